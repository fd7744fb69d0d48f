use serde::{Deserialize, Serialize};

use crate::error::TransferError;

/// A track as it exists in its origin catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRef {
    pub title: String,
    pub primary_artist: String,
    pub album: Option<String>,
    pub duration_seconds: Option<u32>,
    pub source_id: String,
}

/// A destination-catalog search hit for some source track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateTrack {
    pub track: TrackRef,
    pub destination_id: String,
    /// Position in the search response, 0 = first hit.
    pub rank: usize,
}

/// Handle to a playlist created on the destination catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationPlaylist {
    pub id: String,
    pub url: String,
}

/// Read side of a streaming catalog: where tracks come from.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SourceCatalog: Send + Sync {
    async fn fetch_playlist(&self, id: &str) -> Result<Vec<TrackRef>, TransferError>;
    async fn fetch_album(&self, id: &str) -> Result<Vec<TrackRef>, TransferError>;
    async fn fetch_track(&self, id: &str) -> Result<TrackRef, TransferError>;
}

/// Write side of a streaming catalog: where tracks are resolved and collected.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait DestinationCatalog: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<CandidateTrack>, TransferError>;

    async fn create_playlist(
        &self,
        title: &str,
        description: &str,
    ) -> Result<DestinationPlaylist, TransferError>;

    async fn add_tracks(
        &self,
        playlist: &DestinationPlaylist,
        track_ids: &[String],
    ) -> Result<(), TransferError>;
}
