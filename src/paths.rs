//! Target paths for downloads, rendered from user templates such as
//! `Playlists/{playlist_name}/{list_pos}. {artist_name} - {track_title}`.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::TransferError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    PlaylistName,
    ListPos,
    ArtistName,
    TrackTitle,
    AlbumTitle,
    AlbumArtist,
}

impl Field {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "playlist_name" => Some(Field::PlaylistName),
            "list_pos" => Some(Field::ListPos),
            "artist_name" => Some(Field::ArtistName),
            "track_title" => Some(Field::TrackTitle),
            "album_title" => Some(Field::AlbumTitle),
            "album_artist" => Some(Field::AlbumArtist),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Field(Field),
}

/// Values available to a template for one track.
#[derive(Debug, Clone, Default)]
pub struct TrackContext<'a> {
    pub playlist_name: &'a str,
    /// 1-based position in the source list.
    pub list_pos: usize,
    /// Zero-pad width for `list_pos`, usually the digit count of the list length.
    pub list_pos_width: usize,
    pub artist_name: &'a str,
    pub track_title: &'a str,
    pub album_title: &'a str,
    pub album_artist: &'a str,
}

/// A parsed path template. Placeholders are checked once, up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    pieces: Vec<Piece>,
}

impl PathTemplate {
    pub fn parse(template: &str) -> Result<Self, TransferError> {
        let placeholder = Regex::new(r"\{([A-Za-z_]+)\}")
            .map_err(|err| TransferError::config(format!("placeholder pattern: {err}")))?;

        let mut pieces = Vec::new();
        let mut last = 0;
        for captures in placeholder.captures_iter(template) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            if whole.start() > last {
                pieces.push(Piece::Literal(template[last..whole.start()].to_string()));
            }
            let field = Field::from_name(name.as_str()).ok_or_else(|| {
                TransferError::config(format!(
                    "unknown placeholder {{{}}} in path template '{template}'",
                    name.as_str()
                ))
            })?;
            pieces.push(Piece::Field(field));
            last = whole.end();
        }
        if last < template.len() {
            pieces.push(Piece::Literal(template[last..].to_string()));
        }

        if pieces.is_empty() {
            return Err(TransferError::config("path template is empty"));
        }
        Ok(Self { pieces })
    }

    /// Render to a path relative to the download base, without extension.
    pub fn render(&self, ctx: &TrackContext<'_>) -> PathBuf {
        let mut rendered = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => rendered.push_str(text),
                Piece::Field(field) => rendered.push_str(&sanitize_component(&field_value(*field, ctx))),
            }
        }

        rendered
            .split('/')
            .map(|segment| segment.trim().trim_end_matches('.').trim())
            .filter(|segment| !segment.is_empty() && *segment != "..")
            .collect()
    }

    /// `base/<rendered>.<extension>`
    pub fn target_path(&self, base: &Path, ctx: &TrackContext<'_>, extension: &str) -> PathBuf {
        let relative = self.render(ctx);
        let mut file_name = relative.as_os_str().to_owned();
        file_name.push(".");
        file_name.push(extension);
        base.join(file_name)
    }
}

fn field_value(field: Field, ctx: &TrackContext<'_>) -> String {
    match field {
        Field::PlaylistName => ctx.playlist_name.to_string(),
        Field::ListPos => format!("{:0width$}", ctx.list_pos, width = ctx.list_pos_width),
        Field::ArtistName => ctx.artist_name.to_string(),
        Field::TrackTitle => ctx.track_title.to_string(),
        Field::AlbumTitle => ctx.album_title.to_string(),
        Field::AlbumArtist => ctx.album_artist.to_string(),
    }
}

/// Make a metadata value safe as (part of) a single path component.
pub fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').trim();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned.to_string()
    }
}
