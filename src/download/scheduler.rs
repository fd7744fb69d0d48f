//! Bounded-concurrency download scheduler.
//!
//! A fixed number of worker lanes pull jobs from one shared queue. Each lane
//! pauses for a randomized delay after every job that reached the transport,
//! and before every retry. Cancellation stops lanes from taking new work;
//! whatever is still queued is reported as Cancelled.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use super::job::{DownloadJob, JobEvent, JobOutcome, JobState};
use super::pacing::Pacing;
use crate::error::TransferError;
use crate::ports::conversion::Converter;
use crate::ports::download::TrackDownloader;

/// Validated settings for one scheduler run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleConfig {
    max_concurrent_jobs: usize,
    delay_min: Duration,
    delay_max: Duration,
    max_retries: u32,
    skip_existing: bool,
}

impl ScheduleConfig {
    pub fn new(
        max_concurrent_jobs: i64,
        delay_min_sec: f64,
        delay_max_sec: f64,
        max_retries: u32,
        skip_existing: bool,
    ) -> Result<Self, TransferError> {
        if max_concurrent_jobs < 1 {
            return Err(TransferError::config(format!(
                "downloads_concurrent_max must be at least 1, got {max_concurrent_jobs}"
            )));
        }
        for (name, value) in [
            ("download_delay_sec_min", delay_min_sec),
            ("download_delay_sec_max", delay_max_sec),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(TransferError::config(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if delay_min_sec > delay_max_sec {
            return Err(TransferError::config(format!(
                "download_delay_sec_min ({delay_min_sec}) exceeds download_delay_sec_max ({delay_max_sec})"
            )));
        }

        Ok(Self {
            max_concurrent_jobs: usize::try_from(max_concurrent_jobs)
                .map_err(|_| TransferError::config("downloads_concurrent_max is too large"))?,
            delay_min: Duration::from_secs_f64(delay_min_sec),
            delay_max: Duration::from_secs_f64(delay_max_sec),
            max_retries,
            skip_existing,
        })
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.max_concurrent_jobs
    }

    pub fn delay_min(&self) -> Duration {
        self.delay_min
    }

    pub fn delay_max(&self) -> Duration {
        self.delay_max
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn skip_existing(&self) -> bool {
        self.skip_existing
    }
}

/// Per-state totals of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ScheduleSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

/// Result of a whole run: one outcome per job, sorted by job id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleReport {
    pub outcomes: Vec<JobOutcome>,
    /// Set when authentication was lost and the run stopped early.
    pub abort_reason: Option<TransferError>,
}

impl ScheduleReport {
    pub fn count(&self, state: JobState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    pub fn summary(&self) -> ScheduleSummary {
        ScheduleSummary {
            total: self.outcomes.len(),
            succeeded: self.count(JobState::Succeeded),
            failed: self.count(JobState::Failed),
            skipped: self.count(JobState::Skipped),
            cancelled: self.count(JobState::Cancelled),
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.state == JobState::Failed)
    }
}

/// A running schedule: a live event stream plus the final report.
pub struct SchedulerHandle {
    events: UnboundedReceiverStream<JobEvent>,
    task: JoinHandle<ScheduleReport>,
}

impl SchedulerHandle {
    /// Progress events. The stream ends once every job is terminal.
    pub fn events(&mut self) -> &mut UnboundedReceiverStream<JobEvent> {
        &mut self.events
    }

    /// Wait for every job to reach a terminal state.
    pub async fn wait(self) -> Result<ScheduleReport, JoinError> {
        self.task.await
    }
}

pub struct DownloadScheduler {
    downloader: Arc<dyn TrackDownloader>,
    converter: Option<Arc<dyn Converter>>,
    config: ScheduleConfig,
}

impl DownloadScheduler {
    pub fn new(downloader: Arc<dyn TrackDownloader>, config: ScheduleConfig) -> Self {
        Self {
            downloader,
            converter: None,
            config,
        }
    }

    /// Hand finished downloads that need another format to `converter`.
    pub fn with_converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Start the run in the background.
    pub fn spawn(self, jobs: Vec<DownloadJob>, cancel: CancellationToken) -> SchedulerHandle {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
        let lanes = self.config.max_concurrent_jobs.min(jobs.len()).max(1);

        let shared = Arc::new(Shared {
            queue: Mutex::new(jobs.into()),
            abort_reason: Mutex::new(None),
            downloader: self.downloader,
            converter: self.converter,
            pacing: Pacing::new(self.config.delay_min, self.config.delay_max),
            config: self.config,
            // A child token so an auth failure can stop this run without
            // cancelling the caller's token.
            cancel: cancel.child_token(),
            events: event_tx,
        });

        let task = tokio::spawn(async move {
            tracing::info!(
                "Starting {} download jobs on {} lanes",
                shared.queue.lock().await.len(),
                lanes
            );

            let mut workers = JoinSet::new();
            for lane in 0..lanes {
                workers.spawn(run_lane(shared.clone(), lane, outcome_tx.clone()));
            }
            drop(outcome_tx);

            let mut outcomes = Vec::new();
            while let Some(outcome) = outcome_rx.recv().await {
                outcomes.push(outcome);
            }
            while let Some(joined) = workers.join_next().await {
                if let Err(err) = joined {
                    tracing::error!("Download lane crashed: {}", err);
                }
            }

            // Only reachable if a lane crashed before draining the queue.
            for job in drain_cancelled(&shared).await {
                outcomes.push(job);
            }

            outcomes.sort_by_key(|outcome| outcome.id);
            let report = ScheduleReport {
                outcomes,
                abort_reason: shared.abort_reason.lock().await.clone(),
            };
            let summary = report.summary();
            tracing::info!(
                "Downloads finished: {} succeeded, {} failed, {} skipped, {} cancelled",
                summary.succeeded,
                summary.failed,
                summary.skipped,
                summary.cancelled
            );
            report
        });

        SchedulerHandle {
            events: UnboundedReceiverStream::new(event_rx),
            task,
        }
    }

    /// Run to completion and return the batched report.
    pub async fn run(
        self,
        jobs: Vec<DownloadJob>,
        cancel: CancellationToken,
    ) -> Result<ScheduleReport, JoinError> {
        self.spawn(jobs, cancel).wait().await
    }
}

struct Shared {
    queue: Mutex<VecDeque<DownloadJob>>,
    abort_reason: Mutex<Option<TransferError>>,
    downloader: Arc<dyn TrackDownloader>,
    converter: Option<Arc<dyn Converter>>,
    pacing: Pacing,
    config: ScheduleConfig,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<JobEvent>,
}

impl Shared {
    fn emit(&self, event: JobEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Sleep for one pacing delay, returning early on cancellation.
    async fn pause(&self) {
        let delay = self.pacing.next_delay();
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.cancel.cancelled() => {}
        }
    }
}

async fn drain_cancelled(shared: &Shared) -> Vec<JobOutcome> {
    let pending: Vec<DownloadJob> = shared.queue.lock().await.drain(..).collect();
    pending
        .into_iter()
        .map(|mut job| {
            job.state = JobState::Cancelled;
            let outcome = job.into_outcome(None, None, false);
            shared.emit(JobEvent::Finished(outcome.clone()));
            outcome
        })
        .collect()
}

async fn run_lane(
    shared: Arc<Shared>,
    lane: usize,
    outcomes: mpsc::UnboundedSender<JobOutcome>,
) {
    loop {
        if shared.cancel.is_cancelled() {
            for outcome in drain_cancelled(&shared).await {
                let _ = outcomes.send(outcome);
            }
            break;
        }

        let Some(job) = shared.queue.lock().await.pop_front() else {
            break;
        };

        tracing::debug!("Lane {} picked up job {}", lane, job.id);
        let (outcome, used_transport) = process_job(&shared, job).await;
        shared.emit(JobEvent::Finished(outcome.clone()));
        let _ = outcomes.send(outcome);

        if used_transport && !shared.queue.lock().await.is_empty() {
            shared.pause().await;
        }
    }
    tracing::debug!("Lane {} finished", lane);
}

fn staging_path(target: &Path) -> PathBuf {
    let mut staging = target.as_os_str().to_owned();
    staging.push(".part");
    PathBuf::from(staging)
}

async fn non_empty_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file() && meta.len() > 0)
}

async fn already_present(job: &DownloadJob) -> bool {
    if non_empty_file(&job.target_path).await {
        return true;
    }
    match job.converted_path() {
        Some(converted) => non_empty_file(&converted).await,
        None => false,
    }
}

async fn remove_staging(staging: &Path) {
    if let Err(err) = tokio::fs::remove_file(staging).await
        && err.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!("Failed to remove staging file {:?}: {}", staging, err);
    }
}

/// One transport attempt: download into the staging file, then move it
/// onto the target.
async fn attempt(shared: &Shared, job: &DownloadJob) -> Result<u64, TransferError> {
    if let Some(parent) = job.target_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let staging = staging_path(&job.target_path);
    let result = shared.downloader.download(&job.candidate, &staging).await;
    let result = match result {
        Ok(bytes) => tokio::fs::rename(&staging, &job.target_path)
            .await
            .map(|_| bytes)
            .map_err(TransferError::from),
        Err(err) => Err(err),
    };

    if result.is_err() {
        remove_staging(&staging).await;
    }
    result
}

/// Drive one job to a terminal state. The flag reports whether the
/// transport was used at all, which decides if the lane paces afterwards.
async fn process_job(shared: &Shared, mut job: DownloadJob) -> (JobOutcome, bool) {
    if shared.config.skip_existing && already_present(&job).await {
        tracing::info!(
            "Skipping '{}': {:?} already exists",
            job.candidate.track.title,
            job.target_path
        );
        job.state = JobState::Skipped;
        return (job.into_outcome(None, None, false), false);
    }

    let max_attempts = shared.config.max_retries.saturating_add(1);
    loop {
        job.attempt_count += 1;
        job.state = JobState::Running;
        shared.emit(JobEvent::Started {
            id: job.id,
            attempt: job.attempt_count,
        });
        tracing::info!(
            "Downloading '{}' by '{}' (attempt {}/{})",
            job.candidate.track.title,
            job.candidate.track.primary_artist,
            job.attempt_count,
            max_attempts
        );

        let err = match attempt(shared, &job).await {
            Ok(bytes) => {
                job.state = JobState::Succeeded;
                tracing::info!("Downloaded {:?} ({} bytes)", job.target_path, bytes);
                let conversion_requested = request_conversion(shared, &job);
                return (job.into_outcome(Some(bytes), None, conversion_requested), true);
            }
            Err(err) => err,
        };

        if err.is_retryable() && job.attempt_count < max_attempts {
            tracing::warn!(
                "Download of '{}' failed, retrying: {}",
                job.candidate.track.title,
                err
            );
            shared.emit(JobEvent::Retrying {
                id: job.id,
                attempt: job.attempt_count,
                error: err.clone(),
            });
            shared.pause().await;
            if shared.cancel.is_cancelled() {
                job.state = JobState::Cancelled;
                return (job.into_outcome(None, Some(err), false), true);
            }
            continue;
        }

        if let TransferError::Auth { .. } = &err {
            tracing::error!("Authentication lost, cancelling remaining downloads: {}", err);
            shared.abort_reason.lock().await.get_or_insert_with(|| err.clone());
            shared.cancel.cancel();
        } else {
            tracing::error!(
                "Download of '{}' failed after {} attempt(s): {}",
                job.candidate.track.title,
                job.attempt_count,
                err
            );
        }
        job.state = JobState::Failed;
        return (job.into_outcome(None, Some(err), false), true);
    }
}

fn request_conversion(shared: &Shared, job: &DownloadJob) -> bool {
    let (Some(converter), Some(format)) = (&shared.converter, job.desired_format) else {
        return false;
    };
    if format.matches_path(&job.target_path) {
        return false;
    }
    converter.submit(job.target_path.clone(), format);
    true
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use tokio_stream::StreamExt;

    use super::*;
    use crate::error::Service;
    use crate::ports::catalog::{CandidateTrack, TrackRef};
    use crate::ports::conversion::{AudioFormat, MockConverter};
    use crate::ports::download::MockTrackDownloader;

    /// Writes a small file after `delay`, recording peak concurrency.
    struct FakeDownloader {
        delay: Duration,
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
        failure: Option<TransferError>,
        cancel_on_first_call: Option<CancellationToken>,
    }

    impl FakeDownloader {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                failure: None,
                cancel_on_first_call: None,
            }
        }

        fn failing(error: TransferError) -> Self {
            Self {
                failure: Some(error),
                ..Self::new(Duration::ZERO)
            }
        }
    }

    #[async_trait::async_trait]
    impl TrackDownloader for FakeDownloader {
        async fn download(
            &self,
            _candidate: &CandidateTrack,
            destination: &Path,
        ) -> Result<u64, TransferError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0
                && let Some(token) = &self.cancel_on_first_call
            {
                token.cancel();
            }

            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now_active, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            // Leave a partial file behind to check failures clean it up.
            let written = tokio::fs::write(destination, b"audio").await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            written?;

            match &self.failure {
                Some(err) => Err(err.clone()),
                None => Ok(5),
            }
        }
    }

    fn candidate(n: usize) -> CandidateTrack {
        CandidateTrack {
            track: TrackRef {
                title: format!("Song {n}"),
                primary_artist: "Artist".to_string(),
                album: None,
                duration_seconds: Some(200),
                source_id: format!("sp-{n}"),
            },
            destination_id: format!("td-{n}"),
            rank: 0,
        }
    }

    fn jobs(dir: &Path, count: usize) -> Vec<DownloadJob> {
        (0..count)
            .map(|n| {
                DownloadJob::new(
                    n,
                    candidate(n),
                    dir.join(format!("{n}. Artist - Song {n}.flac")),
                    None,
                )
            })
            .collect()
    }

    fn config(lanes: i64, delay_sec: f64, max_retries: u32, skip_existing: bool) -> ScheduleConfig {
        ScheduleConfig::new(lanes, delay_sec, delay_sec, max_retries, skip_existing).unwrap()
    }

    #[test]
    fn test_schedule_config_validation() {
        assert!(ScheduleConfig::new(3, 3.0, 5.0, 3, true).is_ok());
        assert!(ScheduleConfig::new(1, 0.0, 0.0, 0, false).is_ok());

        for result in [
            ScheduleConfig::new(0, 1.0, 2.0, 3, true),
            ScheduleConfig::new(-2, 1.0, 2.0, 3, true),
            ScheduleConfig::new(2, -1.0, 2.0, 3, true),
            ScheduleConfig::new(2, 5.0, 3.0, 3, true),
            ScheduleConfig::new(2, 1.0, f64::NAN, 3, true),
        ] {
            assert!(matches!(result, Err(TransferError::Config { .. })));
        }
    }

    #[test]
    fn test_staging_path() {
        assert_eq!(
            staging_path(Path::new("/music/a.flac")),
            PathBuf::from("/music/a.flac.part")
        );
    }

    #[tokio::test]
    async fn test_never_exceeds_max_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(FakeDownloader::new(Duration::from_millis(30)));

        let report = DownloadScheduler::new(downloader.clone(), config(2, 0.0, 0, false))
            .run(jobs(dir.path(), 8), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.count(JobState::Succeeded), 8);
        assert_eq!(downloader.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_all_succeed_with_pacing_on_each_lane() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(FakeDownloader::new(Duration::ZERO));
        let started = Instant::now();

        let report = DownloadScheduler::new(downloader, config(2, 0.05, 3, false))
            .run(jobs(dir.path(), 5), CancellationToken::new())
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(report.outcomes.len(), 5);
        for (id, outcome) in report.outcomes.iter().enumerate() {
            assert_eq!(outcome.id, id);
            assert_eq!(outcome.state, JobState::Succeeded);
            assert_eq!(outcome.attempt_count, 1);
            assert_eq!(outcome.bytes, Some(5));
            assert!(outcome.target_path.exists());
            assert!(!staging_path(&outcome.target_path).exists());
        }
        assert!(report.abort_reason.is_none());
    }

    #[tokio::test]
    async fn test_existing_file_skipped_without_transport() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = jobs(dir.path(), 1);
        std::fs::write(&jobs[0].target_path, b"already here").unwrap();

        let mut downloader = MockTrackDownloader::new();
        downloader.expect_download().never();

        let report = DownloadScheduler::new(Arc::new(downloader), config(1, 0.0, 3, true))
            .run(jobs, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcomes[0].state, JobState::Skipped);
        assert_eq!(report.outcomes[0].attempt_count, 0);
    }

    #[tokio::test]
    async fn test_converted_output_counts_as_existing() {
        let dir = tempfile::tempdir().unwrap();
        let mut jobs = jobs(dir.path(), 1);
        jobs[0].desired_format = Some(AudioFormat::Mp3);
        std::fs::write(jobs[0].target_path.with_extension("mp3"), b"mp3").unwrap();

        let mut downloader = MockTrackDownloader::new();
        downloader.expect_download().never();

        let report = DownloadScheduler::new(Arc::new(downloader), config(1, 0.0, 3, true))
            .run(jobs, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.outcomes[0].state, JobState::Skipped);
    }

    #[tokio::test]
    async fn test_empty_existing_file_is_downloaded_again() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = jobs(dir.path(), 1);
        std::fs::write(&jobs[0].target_path, b"").unwrap();
        let downloader = Arc::new(FakeDownloader::new(Duration::ZERO));

        let report = DownloadScheduler::new(downloader.clone(), config(1, 0.0, 3, true))
            .run(jobs, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcomes[0].state, JobState::Succeeded);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_exhausts_retries() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(FakeDownloader::failing(TransferError::transport("timeout")));

        let report = DownloadScheduler::new(downloader.clone(), config(1, 0.0, 3, false))
            .run(jobs(dir.path(), 1), CancellationToken::new())
            .await
            .unwrap();

        let outcome = &report.outcomes[0];
        assert_eq!(outcome.state, JobState::Failed);
        assert_eq!(outcome.attempt_count, 4);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 4);
        assert!(matches!(outcome.error, Some(TransferError::Transport { .. })));
        assert!(!outcome.target_path.exists());
        assert!(!staging_path(&outcome.target_path).exists());
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(FakeDownloader::failing(TransferError::permanent(
            "geo-restricted",
        )));

        let report = DownloadScheduler::new(downloader.clone(), config(1, 0.0, 3, false))
            .run(jobs(dir.path(), 1), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcomes[0].state, JobState::Failed);
        assert_eq!(report.outcomes[0].attempt_count, 1);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_huge_retry_budget_does_not_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(FakeDownloader::failing(TransferError::permanent(
            "unavailable",
        )));

        let report = DownloadScheduler::new(downloader.clone(), config(1, 0.0, u32::MAX, false))
            .run(jobs(dir.path(), 1), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcomes[0].state, JobState::Failed);
        assert_eq!(report.outcomes[0].attempt_count, 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let mut downloader = MockTrackDownloader::new();
        downloader.expect_download().returning(|candidate, destination| {
            if candidate.destination_id == "td-1" {
                return Err(TransferError::permanent("unavailable"));
            }
            std::fs::write(destination, b"audio")?;
            Ok(5)
        });

        let report = DownloadScheduler::new(Arc::new(downloader), config(2, 0.0, 3, false))
            .run(jobs(dir.path(), 3), CancellationToken::new())
            .await
            .unwrap();

        let summary = report.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(report.failures().next().map(|o| o.id), Some(1));
    }

    #[tokio::test]
    async fn test_cancel_before_start_cancels_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut downloader = MockTrackDownloader::new();
        downloader.expect_download().never();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = DownloadScheduler::new(Arc::new(downloader), config(2, 0.0, 3, false))
            .run(jobs(dir.path(), 4), cancel)
            .await
            .unwrap();

        assert_eq!(report.count(JobState::Cancelled), 4);
        assert!(report.abort_reason.is_none());
    }

    #[tokio::test]
    async fn test_cancel_lets_in_flight_job_finish() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let downloader = Arc::new(FakeDownloader {
            cancel_on_first_call: Some(cancel.clone()),
            ..FakeDownloader::new(Duration::from_millis(20))
        });

        let report = DownloadScheduler::new(downloader.clone(), config(1, 0.0, 3, false))
            .run(jobs(dir.path(), 3), cancel)
            .await
            .unwrap();

        assert_eq!(report.outcomes[0].state, JobState::Succeeded);
        assert!(report.outcomes[0].target_path.exists());
        assert_eq!(report.outcomes[1].state, JobState::Cancelled);
        assert_eq!(report.outcomes[2].state, JobState::Cancelled);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auth_loss_cancels_pending_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(FakeDownloader::failing(TransferError::auth(
            Service::Tidal,
            "session expired",
        )));
        let caller_token = CancellationToken::new();

        let report = DownloadScheduler::new(downloader.clone(), config(1, 0.0, 3, false))
            .run(jobs(dir.path(), 3), caller_token.clone())
            .await
            .unwrap();

        assert_eq!(report.outcomes[0].state, JobState::Failed);
        assert_eq!(report.count(JobState::Cancelled), 2);
        assert!(matches!(report.abort_reason, Some(TransferError::Auth { .. })));
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
        assert!(!caller_token.is_cancelled());
    }

    #[tokio::test]
    async fn test_conversion_requested_only_for_other_formats() {
        let dir = tempfile::tempdir().unwrap();
        let mut jobs = jobs(dir.path(), 2);
        jobs[0].desired_format = Some(AudioFormat::Mp3);
        jobs[1].desired_format = Some(AudioFormat::Flac);
        let expected = jobs[0].target_path.clone();

        let mut converter = MockConverter::new();
        converter
            .expect_submit()
            .withf(move |path, format| path == &expected && *format == AudioFormat::Mp3)
            .times(1)
            .return_const(());

        let report = DownloadScheduler::new(
            Arc::new(FakeDownloader::new(Duration::ZERO)),
            config(1, 0.0, 0, false),
        )
        .with_converter(Arc::new(converter))
        .run(jobs, CancellationToken::new())
        .await
        .unwrap();

        assert!(report.outcomes[0].conversion_requested);
        assert!(!report.outcomes[1].conversion_requested);
    }

    #[tokio::test]
    async fn test_event_stream_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = DownloadScheduler::new(
            Arc::new(FakeDownloader::new(Duration::ZERO)),
            config(2, 0.0, 0, false),
        )
        .spawn(jobs(dir.path(), 3), CancellationToken::new());

        let mut started = 0;
        let mut finished = 0;
        while let Some(event) = handle.events().next().await {
            match event {
                JobEvent::Started { attempt, .. } => {
                    assert_eq!(attempt, 1);
                    started += 1;
                }
                JobEvent::Finished(outcome) => {
                    assert_eq!(outcome.state, JobState::Succeeded);
                    finished += 1;
                }
                JobEvent::Retrying { .. } => panic!("nothing should retry"),
            }
        }

        assert_eq!(started, 3);
        assert_eq!(finished, 3);
        let report = handle.wait().await.unwrap();
        assert_eq!(report.summary().succeeded, 3);
    }
}
