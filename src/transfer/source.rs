use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TransferError;
use crate::ports::catalog::{SourceCatalog, TrackRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Playlist,
    Album,
    Track,
}

impl SourceKind {
    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "playlist" => Some(SourceKind::Playlist),
            "album" => Some(SourceKind::Album),
            "track" => Some(SourceKind::Track),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Playlist => write!(f, "playlist"),
            SourceKind::Album => write!(f, "album"),
            SourceKind::Track => write!(f, "track"),
        }
    }
}

/// A playlist, album or single track on the source catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub kind: SourceKind,
    pub id: String,
}

fn valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric())
}

impl SourceRef {
    /// Parse `https://open.spotify.com/<kind>/<id>` links (query string and
    /// locale prefixes such as `/intl-de/` are ignored) or `spotify:<kind>:<id>`
    /// URIs.
    pub fn parse(input: &str) -> Result<Self, TransferError> {
        let input = input.trim();
        let unrecognized = || TransferError::not_found(format!("unrecognized Spotify link: {input}"));

        if let Some(rest) = input.strip_prefix("spotify:") {
            let (kind, id) = rest.split_once(':').ok_or_else(unrecognized)?;
            let kind = SourceKind::from_segment(kind).ok_or_else(unrecognized)?;
            if !valid_id(id) {
                return Err(unrecognized());
            }
            return Ok(Self {
                kind,
                id: id.to_string(),
            });
        }

        let url = url::Url::parse(input).map_err(|_| unrecognized())?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str() != Some("open.spotify.com") {
            return Err(unrecognized());
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        segments
            .windows(2)
            .find_map(|pair| {
                let kind = SourceKind::from_segment(pair[0])?;
                valid_id(pair[1]).then(|| Self {
                    kind,
                    id: pair[1].to_string(),
                })
            })
            .ok_or_else(unrecognized)
    }

    /// Fetch the referenced tracks, in source order.
    pub async fn fetch<S: SourceCatalog + ?Sized>(
        &self,
        catalog: &S,
    ) -> Result<Vec<TrackRef>, TransferError> {
        match self.kind {
            SourceKind::Playlist => catalog.fetch_playlist(&self.id).await,
            SourceKind::Album => catalog.fetch_album(&self.id).await,
            SourceKind::Track => Ok(vec![catalog.fetch_track(&self.id).await?]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::catalog::MockSourceCatalog;

    #[test]
    fn test_parse_open_urls() {
        let parsed =
            SourceRef::parse("https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M?si=abc")
                .unwrap();
        assert_eq!(parsed.kind, SourceKind::Playlist);
        assert_eq!(parsed.id, "37i9dQZF1DXcBWIGoYBM5M");

        let album = SourceRef::parse("https://open.spotify.com/intl-de/album/4aawyAB9vmqN3uQ7FjRGTy")
            .unwrap();
        assert_eq!(album.kind, SourceKind::Album);

        let track = SourceRef::parse("http://open.spotify.com/track/11dFghVXANMlKmJXsNCbNl").unwrap();
        assert_eq!(track.kind, SourceKind::Track);
    }

    #[test]
    fn test_parse_uris() {
        let parsed = SourceRef::parse("spotify:album:4aawyAB9vmqN3uQ7FjRGTy").unwrap();
        assert_eq!(parsed.kind, SourceKind::Album);
        assert_eq!(parsed.id, "4aawyAB9vmqN3uQ7FjRGTy");
    }

    #[test]
    fn test_parse_rejects_other_links() {
        for input in [
            "https://tidal.com/playlist/123",
            "https://open.spotify.com/artist/0OdUWJ0sBjDrqHygGUXeCF",
            "spotify:show:abc",
            "spotify:track:",
            "not a url",
        ] {
            assert!(
                matches!(SourceRef::parse(input), Err(TransferError::NotFound { .. })),
                "{input} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_fetch_single_track_wraps_in_list() {
        let mut catalog = MockSourceCatalog::new();
        catalog.expect_fetch_track().times(1).returning(|id| {
            Ok(TrackRef {
                title: "Song".to_string(),
                primary_artist: "Artist".to_string(),
                album: None,
                duration_seconds: Some(200),
                source_id: id.to_string(),
            })
        });

        let source = SourceRef::parse("spotify:track:abc123").unwrap();
        let tracks = source.fetch(&catalog).await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].source_id, "abc123");
    }
}
