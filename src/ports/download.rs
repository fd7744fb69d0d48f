use std::path::Path;

use crate::error::TransferError;
use crate::ports::catalog::CandidateTrack;

/// Fetches one destination track onto local disk.
///
/// `destination` is a staging path owned by the scheduler; the transport
/// writes the whole file there and returns the number of bytes written.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TrackDownloader: Send + Sync {
    async fn download(
        &self,
        candidate: &CandidateTrack,
        destination: &Path,
    ) -> Result<u64, TransferError>;
}

/// A direct, unencrypted stream location for a destination track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSource {
    pub url: String,
    pub mime_type: String,
}

/// Resolves a destination track id to something an HTTP client can fetch.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait StreamResolver: Send + Sync {
    async fn resolve_stream(&self, track_id: &str) -> Result<StreamSource, TransferError>;
}
