use std::time::Duration;

use serde::de::DeserializeOwned;

use super::types::{Page, PlaylistItem, SpotifyFullAlbum, SpotifyTrack};
use crate::error::{Service, TransferError};
use crate::ports::catalog::{SourceCatalog, TrackRef};
use crate::ports::session::SessionStore;

const SPOTIFY_API_URL: &str = "https://api.spotify.com";

/// Spotify API client
#[derive(Clone)]
pub struct SpotifyClient {
    access_token: String,
    base_url: String,
    client: reqwest::Client,
}

impl SpotifyClient {
    pub fn new(access_token: String) -> Self {
        Self {
            access_token,
            base_url: SPOTIFY_API_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Build a client from the stored Spotify session.
    pub fn from_session(store: &dyn SessionStore) -> Result<Self, TransferError> {
        let session = store.get_session(Service::Spotify)?;
        Ok(Self::new(session.access_token))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, context: &str) -> Result<T, TransferError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|err| TransferError::from_reqwest(Service::Spotify, err, context))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::from_status(Service::Spotify, status, context));
        }

        response
            .json()
            .await
            .map_err(|err| TransferError::transport(format!("{context}: invalid response: {err}")))
    }

    /// Follow `next` links from `first_url`, collecting every item.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        first_url: String,
        context: &str,
    ) -> Result<Vec<T>, TransferError> {
        let mut items = Vec::new();
        let mut next_url = Some(first_url);

        while let Some(url) = next_url {
            let page: Page<T> = self.get_json(&url, context).await?;
            items.extend(page.items);
            next_url = page.next;
        }

        Ok(items)
    }
}

#[async_trait::async_trait]
impl SourceCatalog for SpotifyClient {
    /// Get all tracks in a playlist
    async fn fetch_playlist(&self, id: &str) -> Result<Vec<TrackRef>, TransferError> {
        let context = format!("Spotify playlist {id}");
        let items: Vec<PlaylistItem> = self
            .get_all_pages(
                format!("{}/v1/playlists/{}/tracks?limit=100", self.base_url, id),
                &context,
            )
            .await?;

        let total = items.len();
        let tracks: Vec<TrackRef> = items
            .into_iter()
            .filter_map(|item| item.track)
            .filter_map(SpotifyTrack::into_track_ref)
            .collect();
        if tracks.len() < total {
            tracing::info!(
                "Skipped {} unavailable or local items in {}",
                total - tracks.len(),
                context
            );
        }
        tracing::info!("Fetched {} tracks from {}", tracks.len(), context);
        Ok(tracks)
    }

    async fn fetch_album(&self, id: &str) -> Result<Vec<TrackRef>, TransferError> {
        let context = format!("Spotify album {id}");
        let album: SpotifyFullAlbum = self
            .get_json(&format!("{}/v1/albums/{}", self.base_url, id), &context)
            .await?;

        let album_artist = album
            .artists
            .first()
            .map(|artist| artist.name.clone())
            .unwrap_or_default();

        let mut raw = album.tracks.items;
        if let Some(next) = album.tracks.next {
            raw.extend(self.get_all_pages::<SpotifyTrack>(next, &context).await?);
        }

        let tracks: Vec<TrackRef> = raw
            .into_iter()
            .filter_map(|track| track.into_album_track_ref(&album.name, &album_artist))
            .collect();
        tracing::info!("Fetched {} tracks from {}", tracks.len(), context);
        Ok(tracks)
    }

    async fn fetch_track(&self, id: &str) -> Result<TrackRef, TransferError> {
        let context = format!("Spotify track {id}");
        let track: SpotifyTrack = self
            .get_json(&format!("{}/v1/tracks/{}", self.base_url, id), &context)
            .await?;
        track
            .into_track_ref()
            .ok_or_else(|| TransferError::not_found(context))
    }
}
