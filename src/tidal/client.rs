use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use governor::{
    Quota, RateLimiter, clock::DefaultClock, state::InMemoryState, state::direct::NotKeyed,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::download::AudioQuality;
use crate::error::{Service, TransferError};
use crate::ports::catalog::{CandidateTrack, DestinationCatalog, DestinationPlaylist, TrackRef};
use crate::ports::download::{StreamResolver, StreamSource};
use crate::ports::session::{Session, SessionStore};

const TIDAL_API_URL: &str = "https://api.tidal.com";
const TIDAL_PLAYLIST_URL: &str = "https://tidal.com/playlist";
const BTS_MANIFEST: &str = "application/vnd.tidal.bts";

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Settings for talking to Tidal.
#[derive(Debug, Clone, PartialEq)]
pub struct TidalOptions {
    /// Used when the session does not carry its own country.
    pub country_code: String,
    pub search_limit: u32,
    pub searches_per_second: u32,
    pub quality: AudioQuality,
}

impl Default for TidalOptions {
    fn default() -> Self {
        Self {
            country_code: "US".to_string(),
            search_limit: 10,
            searches_per_second: 4,
            quality: AudioQuality::High,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<TidalTrack>,
}

#[derive(Debug, Deserialize)]
struct TidalTrack {
    id: u64,
    title: String,
    /// Seconds.
    duration: Option<u32>,
    artist: Option<TidalArtist>,
    #[serde(default)]
    artists: Vec<TidalArtist>,
    album: Option<TidalAlbum>,
}

#[derive(Debug, Deserialize)]
struct TidalArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TidalAlbum {
    title: String,
}

#[derive(Debug, Deserialize)]
struct CreatedPlaylist {
    uuid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaybackInfo {
    manifest_mime_type: String,
    manifest: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BtsManifest {
    mime_type: String,
    #[serde(default)]
    encryption_type: Option<String>,
    #[serde(default)]
    urls: Vec<String>,
}

impl TidalTrack {
    fn into_candidate(self, rank: usize) -> CandidateTrack {
        let primary_artist = self
            .artist
            .or_else(|| self.artists.into_iter().next())
            .map(|artist| artist.name)
            .unwrap_or_default();
        let id = self.id.to_string();
        CandidateTrack {
            track: TrackRef {
                title: self.title,
                primary_artist,
                album: self.album.map(|album| album.title),
                duration_seconds: self.duration,
                source_id: id.clone(),
            },
            destination_id: id,
            rank,
        }
    }
}

/// Decode a BTS playback manifest into a direct stream location.
fn decode_manifest(info: PlaybackInfo, track_id: &str) -> Result<StreamSource, TransferError> {
    if info.manifest_mime_type != BTS_MANIFEST {
        return Err(TransferError::permanent(format!(
            "track {track_id}: unsupported manifest type {}",
            info.manifest_mime_type
        )));
    }

    let raw = STANDARD
        .decode(info.manifest.as_bytes())
        .map_err(|err| TransferError::permanent(format!("track {track_id}: bad manifest: {err}")))?;
    let manifest: BtsManifest = serde_json::from_slice(&raw)
        .map_err(|err| TransferError::permanent(format!("track {track_id}: bad manifest: {err}")))?;

    if let Some(encryption) = manifest.encryption_type.as_deref()
        && encryption != "NONE"
    {
        return Err(TransferError::permanent(format!(
            "track {track_id}: stream is encrypted ({encryption})"
        )));
    }

    let url = manifest
        .urls
        .into_iter()
        .next()
        .ok_or_else(|| TransferError::permanent(format!("track {track_id}: manifest has no urls")))?;
    Ok(StreamSource {
        url,
        mime_type: manifest.mime_type,
    })
}

/// Tidal API client: destination catalog and stream resolver.
#[derive(Clone)]
pub struct TidalClient {
    access_token: String,
    user_id: Option<String>,
    country_code: String,
    options: TidalOptions,
    base_url: String,
    client: reqwest::Client,
    rate_limiter: Arc<DirectRateLimiter>,
}

impl TidalClient {
    pub fn new(session: Session, options: TidalOptions) -> Result<Self, TransferError> {
        let per_second = NonZeroU32::new(options.searches_per_second)
            .ok_or_else(|| TransferError::config("searches_per_second must be greater than 0"))?;
        if options.search_limit == 0 {
            return Err(TransferError::config("search_limit must be greater than 0"));
        }
        tracing::debug!("Tidal search rate limit: {} per second", per_second);

        Ok(Self {
            access_token: session.access_token,
            user_id: session.user_id,
            country_code: session
                .country_code
                .unwrap_or_else(|| options.country_code.clone()),
            options,
            base_url: TIDAL_API_URL.to_string(),
            client: reqwest::Client::new(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
        })
    }

    /// Build a client from the stored Tidal session.
    pub fn from_session(store: &dyn SessionStore, options: TidalOptions) -> Result<Self, TransferError> {
        Self::new(store.get_session(Service::Tidal)?, options)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<reqwest::Response, TransferError> {
        let response = request
            .bearer_auth(&self.access_token)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|err| TransferError::from_reqwest(Service::Tidal, err, context))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::from_status(Service::Tidal, status, context));
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<T, TransferError> {
        self.send(request, context)
            .await?
            .json()
            .await
            .map_err(|err| TransferError::transport(format!("{context}: invalid response: {err}")))
    }

    fn user_id(&self) -> Result<&str, TransferError> {
        self.user_id
            .as_deref()
            .ok_or_else(|| TransferError::auth(Service::Tidal, "session has no user id"))
    }
}

#[async_trait::async_trait]
impl DestinationCatalog for TidalClient {
    async fn search(&self, query: &str) -> Result<Vec<CandidateTrack>, TransferError> {
        self.rate_limiter.until_ready().await;

        let context = format!("Tidal search '{query}'");
        let limit = self.options.search_limit.to_string();
        let response: SearchResponse = self
            .json(
                self.client.get(self.url("/v1/search/tracks")).query(&[
                    ("query", query),
                    ("limit", limit.as_str()),
                    ("countryCode", self.country_code.as_str()),
                ]),
                &context,
            )
            .await?;

        Ok(response
            .items
            .into_iter()
            .enumerate()
            .map(|(rank, track)| track.into_candidate(rank))
            .collect())
    }

    async fn create_playlist(
        &self,
        title: &str,
        description: &str,
    ) -> Result<DestinationPlaylist, TransferError> {
        let context = format!("create Tidal playlist '{title}'");
        let user_id = self.user_id()?;
        let created: CreatedPlaylist = self
            .json(
                self.client
                    .post(self.url(&format!("/v1/users/{user_id}/playlists")))
                    .query(&[("countryCode", self.country_code.as_str())])
                    .form(&[("title", title), ("description", description)]),
                &context,
            )
            .await?;

        Ok(DestinationPlaylist {
            url: format!("{}/{}", TIDAL_PLAYLIST_URL, created.uuid),
            id: created.uuid,
        })
    }

    async fn add_tracks(
        &self,
        playlist: &DestinationPlaylist,
        track_ids: &[String],
    ) -> Result<(), TransferError> {
        if track_ids.is_empty() {
            return Ok(());
        }
        let context = format!("add tracks to Tidal playlist {}", playlist.id);
        let playlist_path = format!("/v1/playlists/{}", playlist.id);

        // Writes must carry the playlist's current ETag.
        let current = self
            .send(
                self.client
                    .get(self.url(&playlist_path))
                    .query(&[("countryCode", self.country_code.as_str())]),
                &context,
            )
            .await?;
        let etag = current
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| TransferError::transport(format!("{context}: missing ETag")))?;

        let ids = track_ids.join(",");
        self.send(
            self.client
                .post(self.url(&format!("{playlist_path}/items")))
                .query(&[("countryCode", self.country_code.as_str())])
                .header(reqwest::header::IF_NONE_MATCH, etag)
                .form(&[("trackIds", ids.as_str()), ("onDupes", "SKIP")]),
            &context,
        )
        .await?;

        tracing::debug!("Added {} tracks to {}", track_ids.len(), playlist.id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl StreamResolver for TidalClient {
    async fn resolve_stream(&self, track_id: &str) -> Result<StreamSource, TransferError> {
        let context = format!("Tidal playback info for track {track_id}");
        let quality = match self.options.quality {
            AudioQuality::High => "HIGH",
            AudioQuality::Lossless => "LOSSLESS",
        };
        let info: PlaybackInfo = self
            .json(
                self.client
                    .get(self.url(&format!("/v1/tracks/{track_id}/playbackinfopostpaywall")))
                    .query(&[
                        ("audioquality", quality),
                        ("playbackmode", "STREAM"),
                        ("assetpresentation", "FULL"),
                        ("countryCode", self.country_code.as_str()),
                    ]),
                &context,
            )
            .await?;
        decode_manifest(info, track_id)
    }
}
