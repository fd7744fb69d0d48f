use std::time::Duration;

use rand::Rng;

/// Randomized pause taken by a worker lane between jobs and before retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    min: Duration,
    max: Duration,
}

impl Pacing {
    /// `min` must not exceed `max`; `ScheduleConfig` guarantees it.
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// Uniform sample from `[min, max]`.
    pub fn next_delay(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let secs = rand::rng().random_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}
