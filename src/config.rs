use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::Result;
use color_eyre::eyre::{Context, eyre};
use serde::{Deserialize, Serialize};

use crate::download::{AudioQuality, ScheduleConfig};
use crate::error::TransferError;
use crate::matching::MatchConfig;
use crate::matching::normalize::DEFAULT_NOISE_TOKENS;
use crate::paths::PathTemplate;
use crate::ports::conversion::AudioFormat;
use crate::tidal::TidalOptions;
use crate::transfer::TransferOptions;

const APP_DIR: &str = "playlist-transfer";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub matching: MatchingConfig,
    pub downloads: DownloadsConfig,
    pub conversion: ConversionConfig,
    pub transfer: TransferConfig,
    pub tidal: TidalConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub similarity_threshold: u8,
    pub ambiguity_margin: f64,
    pub noise_tokens: Vec<String>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 80,
            ambiguity_margin: 2.0,
            noise_tokens: DEFAULT_NOISE_TOKENS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadsConfig {
    pub downloads_concurrent_max: i64,
    pub download_delay_sec_min: f64,
    pub download_delay_sec_max: f64,
    pub max_retries: u32,
    pub skip_existing: bool,
    pub download_timeout_sec: u64,
    pub download_base_path: String,
    pub format_playlist: String,
    pub format_album: String,
    pub format_track: String,
    pub quality_audio: AudioQuality,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            downloads_concurrent_max: 3,
            download_delay_sec_min: 3.0,
            download_delay_sec_max: 5.0,
            max_retries: 3,
            skip_existing: true,
            download_timeout_sec: 300,
            download_base_path: "~/Music/playlist-transfer".to_string(),
            format_playlist: "Playlists/{playlist_name}/{list_pos}. {artist_name} - {track_title}"
                .to_string(),
            format_album: "Albums/{album_artist} - {album_title}/{list_pos}. {track_title}"
                .to_string(),
            format_track: "Tracks/{artist_name} - {track_title}".to_string(),
            quality_audio: AudioQuality::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub convert_to_mp3_only: bool,
    /// Empty means "look up ffmpeg on PATH".
    pub path_binary_ffmpeg: String,
    pub delete_original: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            convert_to_mp3_only: false,
            path_binary_ffmpeg: String::new(),
            delete_original: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub search_retries: usize,
    pub search_retry_delay_ms: u64,
    pub playlist_batch_size: usize,
    pub batch_pause_sec: f64,
    pub include_ambiguous: bool,
    pub playlist_description: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            search_retries: 2,
            search_retry_delay_ms: 500,
            playlist_batch_size: 50,
            batch_pause_sec: 2.0,
            include_ambiguous: true,
            playlist_description: "Transferred from Spotify".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TidalConfig {
    pub country_code: String,
    pub search_limit: u32,
    pub searches_per_second: u32,
}

impl Default for TidalConfig {
    fn default() -> Self {
        Self {
            country_code: "US".to_string(),
            search_limit: 10,
            searches_per_second: 4,
        }
    }
}

/// Expand ~ to home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .wrap_err_with(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Default location: `<config dir>/playlist-transfer/config.toml`
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join(APP_DIR).join("config.toml"))
    }

    /// Resolve the config path from an explicit override or the default.
    pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
        match explicit {
            Some(path) => Ok(path.to_path_buf()),
            None => Self::config_path().ok_or_else(|| eyre!("Could not determine config directory")),
        }
    }

    /// Load the config at `path`. A missing file at the default location
    /// means defaults; a missing explicit file is an error.
    pub fn load(path: &Path, explicit: bool) -> Result<Self> {
        if !explicit && !path.exists() {
            tracing::info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Write the default config to `path`, refusing to overwrite.
    pub fn create_default(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(eyre!("Config file already exists: {}", path.display()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents =
            toml::to_string_pretty(&Self::default()).wrap_err("Failed to serialize config")?;
        std::fs::write(path, contents)
            .wrap_err_with(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Sessions live next to the config file.
    pub fn sessions_path(config_path: &Path) -> PathBuf {
        config_path
            .parent()
            .map(|dir| dir.join("sessions.toml"))
            .unwrap_or_else(|| PathBuf::from("sessions.toml"))
    }

    pub fn match_config(&self) -> Result<MatchConfig, TransferError> {
        MatchConfig::new(
            self.matching.similarity_threshold,
            self.matching.ambiguity_margin,
            self.matching.noise_tokens.clone(),
        )
    }

    pub fn schedule_config(&self) -> Result<ScheduleConfig, TransferError> {
        let d = &self.downloads;
        ScheduleConfig::new(
            d.downloads_concurrent_max,
            d.download_delay_sec_min,
            d.download_delay_sec_max,
            d.max_retries,
            d.skip_existing,
        )
    }

    pub fn transfer_options(&self) -> Result<TransferOptions, TransferError> {
        let t = &self.transfer;
        if !t.batch_pause_sec.is_finite() || t.batch_pause_sec < 0.0 {
            return Err(TransferError::config(format!(
                "batch_pause_sec must be a non-negative number, got {}",
                t.batch_pause_sec
            )));
        }
        TransferOptions {
            search_retries: t.search_retries,
            search_retry_delay: Duration::from_millis(t.search_retry_delay_ms),
            playlist_batch_size: t.playlist_batch_size,
            batch_pause: Duration::from_secs_f64(t.batch_pause_sec),
            include_ambiguous: t.include_ambiguous,
            playlist_description: t.playlist_description.clone(),
        }
        .validate()
    }

    pub fn tidal_options(&self) -> TidalOptions {
        TidalOptions {
            country_code: self.tidal.country_code.clone(),
            search_limit: self.tidal.search_limit,
            searches_per_second: self.tidal.searches_per_second,
            quality: self.downloads.quality_audio,
        }
    }

    pub fn download_timeout(&self) -> Result<Duration, TransferError> {
        match self.downloads.download_timeout_sec {
            0 => Err(TransferError::config("download_timeout_sec must be greater than 0")),
            secs => Ok(Duration::from_secs(secs)),
        }
    }

    pub fn download_base_path(&self) -> PathBuf {
        expand_path(&self.downloads.download_base_path)
    }

    pub fn playlist_template(&self) -> Result<PathTemplate, TransferError> {
        PathTemplate::parse(&self.downloads.format_playlist)
    }

    pub fn album_template(&self) -> Result<PathTemplate, TransferError> {
        PathTemplate::parse(&self.downloads.format_album)
    }

    pub fn track_template(&self) -> Result<PathTemplate, TransferError> {
        PathTemplate::parse(&self.downloads.format_track)
    }

    /// Format finished downloads should end up in, if conversion is on.
    pub fn desired_format(&self) -> Option<AudioFormat> {
        self.conversion.convert_to_mp3_only.then_some(AudioFormat::Mp3)
    }

    pub fn ffmpeg_path(&self) -> Option<PathBuf> {
        let configured = self.conversion.path_binary_ffmpeg.trim();
        (!configured.is_empty()).then(|| expand_path(configured))
    }
}
