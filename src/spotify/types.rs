use serde::Deserialize;

use crate::ports::catalog::TrackRef;

/// Spotify track from API
#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyTrack {
    /// `None` for local files in a playlist.
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<SpotifyArtist>,
    pub album: Option<SpotifyAlbum>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyArtist {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyAlbum {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<SpotifyArtist>,
}

/// Full album object, tracks embedded as the first page.
#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyFullAlbum {
    pub name: String,
    #[serde(default)]
    pub artists: Vec<SpotifyArtist>,
    pub tracks: Page<SpotifyTrack>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistItem {
    pub track: Option<SpotifyTrack>,
}

fn duration_seconds(duration_ms: Option<i64>) -> Option<u32> {
    duration_ms
        .filter(|ms| *ms > 0)
        .and_then(|ms| u32::try_from((ms + 500) / 1000).ok())
}

impl SpotifyTrack {
    /// `None` when the track has no id (local file) or no artist.
    pub fn into_track_ref(self) -> Option<TrackRef> {
        let id = self.id?;
        let primary_artist = self.artists.into_iter().next()?.name;
        Some(TrackRef {
            title: self.name,
            primary_artist,
            album: self.album.map(|album| album.name),
            duration_seconds: duration_seconds(self.duration_ms),
            source_id: id,
        })
    }

    /// Album tracks carry no album object; every track is credited to the
    /// album's primary artist.
    pub fn into_album_track_ref(self, album_name: &str, album_artist: &str) -> Option<TrackRef> {
        Some(TrackRef {
            title: self.name,
            primary_artist: album_artist.to_string(),
            album: Some(album_name.to_string()),
            duration_seconds: duration_seconds(self.duration_ms),
            source_id: self.id?,
        })
    }
}
