use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::TransferError;
use crate::ports::catalog::CandidateTrack;
use crate::ports::conversion::AudioFormat;

pub type JobId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Pending | JobState::Running)
    }
}

/// One track to fetch onto disk. Owned by the scheduler for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadJob {
    pub id: JobId,
    pub candidate: CandidateTrack,
    pub target_path: PathBuf,
    /// Format to convert into once downloaded, if any.
    pub desired_format: Option<AudioFormat>,
    pub attempt_count: u32,
    pub state: JobState,
}

impl DownloadJob {
    pub fn new(
        id: JobId,
        candidate: CandidateTrack,
        target_path: PathBuf,
        desired_format: Option<AudioFormat>,
    ) -> Self {
        Self {
            id,
            candidate,
            target_path,
            desired_format,
            attempt_count: 0,
            state: JobState::Pending,
        }
    }

    /// Path the conversion step will produce, when conversion applies.
    pub fn converted_path(&self) -> Option<PathBuf> {
        self.desired_format
            .filter(|format| !format.matches_path(&self.target_path))
            .map(|format| self.target_path.with_extension(format.extension()))
    }

    pub(crate) fn into_outcome(
        self,
        bytes: Option<u64>,
        error: Option<TransferError>,
        conversion_requested: bool,
    ) -> JobOutcome {
        JobOutcome {
            id: self.id,
            candidate: self.candidate,
            target_path: self.target_path,
            state: self.state,
            attempt_count: self.attempt_count,
            bytes,
            error,
            conversion_requested,
        }
    }
}

/// Terminal record of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub id: JobId,
    pub candidate: CandidateTrack,
    pub target_path: PathBuf,
    pub state: JobState,
    pub attempt_count: u32,
    pub bytes: Option<u64>,
    /// Last error seen, for Failed jobs and for jobs cancelled mid-retry.
    pub error: Option<TransferError>,
    pub conversion_requested: bool,
}

/// Progress notifications emitted while a schedule runs.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Started {
        id: JobId,
        attempt: u32,
    },
    Retrying {
        id: JobId,
        attempt: u32,
        error: TransferError,
    },
    Finished(JobOutcome),
}
