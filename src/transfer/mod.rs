pub mod plan;
pub mod planner;
pub mod playlist;
pub mod source;

use std::time::Duration;

use crate::error::TransferError;

pub use plan::{PlanSummary, TransferPlan};
pub use planner::TransferPlanner;
pub use source::{SourceKind, SourceRef};

/// Knobs for searching and for committing a plan to the destination.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOptions {
    /// Extra attempts after a transient search failure.
    pub search_retries: usize,
    pub search_retry_delay: Duration,
    pub playlist_batch_size: usize,
    pub batch_pause: Duration,
    pub include_ambiguous: bool,
    pub playlist_description: String,
}

impl TransferOptions {
    /// Reject values that would make a run misbehave.
    pub fn validate(self) -> Result<Self, TransferError> {
        if self.playlist_batch_size == 0 {
            return Err(TransferError::config(
                "playlist_batch_size must be at least 1",
            ));
        }
        Ok(self)
    }
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            search_retries: 2,
            search_retry_delay: Duration::from_millis(500),
            playlist_batch_size: 50,
            batch_pause: Duration::from_secs(2),
            include_ambiguous: true,
            playlist_description: "Transferred from Spotify".to_string(),
        }
    }
}
