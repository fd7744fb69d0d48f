mod config;
mod download;
mod error;
mod logging;
mod matching;
mod paths;
mod ports;
mod report;
mod session;
mod spotify;
mod tidal;
mod tools;
mod transfer;

#[cfg(test)]
mod test_utils;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use color_eyre::{
    Result, Section,
    eyre::{Context, eyre},
};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    download::{DownloadScheduler, JobEvent, JobState, http::HttpTrackDownloader, jobs_from_plan},
    error::TransferError,
    logging::init_tracing,
    matching::Matcher,
    report::{DownloadSection, RunReport},
    session::FileSessionStore,
    spotify::SpotifyClient,
    tidal::TidalClient,
    tools::{FfmpegConverter, locate_ffmpeg},
    transfer::{SourceKind, SourceRef, TransferPlanner, playlist::commit_plan},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, global = true, env = "PLAYLIST_TRANSFER_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "playlist_transfer=debug"
    #[arg(long, default_value = "warn", global = true, env = "LOG_LEVEL")]
    log_level: String,

    /// OTLP collector endpoint for trace export
    #[arg(long, global = true, env = "OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Transfer a Spotify playlist, album or track to Tidal
    Transfer {
        /// Spotify link or URI (open.spotify.com/... or spotify:kind:id)
        source: String,

        /// Name of the playlist to create (defaults to the source id)
        #[arg(short, long)]
        name: Option<String>,

        /// Only print the match plan, create nothing
        #[arg(long)]
        dry_run: bool,

        /// Download the matched tracks after planning
        #[arg(short, long)]
        download: bool,

        /// Download directory, overriding download_base_path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Create a default config file, if it doesn't exist
    CreateDefault,
    /// Print the path to the config file
    Path,
}

struct TransferArgs {
    source: String,
    name: Option<String>,
    dry_run: bool,
    download: bool,
    output: Option<PathBuf>,
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let tracer_provider = init_tracing(
        "playlist-transfer",
        args.otlp_endpoint.as_deref(),
        &args.log_level,
    )?;

    let config_path = Config::resolve_path(args.config.as_deref())?;

    let result = match args.command {
        Commands::Config(config_commands) => match config_commands {
            ConfigCommands::CreateDefault => {
                Config::create_default(&config_path)?;
                println!("Created {}", config_path.display());
                Ok(())
            }
            ConfigCommands::Path => {
                println!("{}", config_path.display());
                Ok(())
            }
        },
        Commands::Transfer {
            source,
            name,
            dry_run,
            download,
            output,
            json,
        } => {
            let config = Config::load(&config_path, args.config.is_some())
                .wrap_err("Failed to load playlist-transfer config")?;
            let sessions = FileSessionStore::load(&Config::sessions_path(&config_path))?;
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            run_transfer(
                &config,
                &sessions,
                TransferArgs {
                    source,
                    name,
                    dry_run,
                    download,
                    output,
                    json,
                },
                cancel,
            )
            .await
        }
    };

    if let Some(provider) = tracer_provider
        && let Err(err) = provider.shutdown()
    {
        eprintln!("Failed to flush traces: {err}");
    }

    result
}

/// First Ctrl-C cancels the run cooperatively, a second one exits at once.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!("Interrupted, finishing in-flight work. Press Ctrl-C again to quit now.");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

/// Attach a hint to auth failures so the user knows what to do next.
fn engine_error(err: TransferError) -> color_eyre::Report {
    match &err {
        TransferError::Auth { service, .. } => {
            let hint = format!("Re-authenticate with {service} and update sessions.toml");
            eyre!(err).suggestion(hint)
        }
        _ => eyre!(err),
    }
}

async fn run_transfer(
    config: &Config,
    sessions: &FileSessionStore,
    args: TransferArgs,
    cancel: CancellationToken,
) -> Result<()> {
    let started = Instant::now();

    // Everything is validated before any network call.
    let match_config = config.match_config()?;
    let transfer_options = config.transfer_options()?;
    let schedule_config = config.schedule_config()?;
    let source = SourceRef::parse(&args.source)?;
    let template = match source.kind {
        SourceKind::Playlist => config.playlist_template()?,
        SourceKind::Album => config.album_template()?,
        SourceKind::Track => config.track_template()?,
    };

    let spotify = SpotifyClient::from_session(sessions).map_err(engine_error)?;
    let tidal = TidalClient::from_session(sessions, config.tidal_options()).map_err(engine_error)?;

    tracing::info!("Fetching Spotify {} {}", source.kind, source.id);
    let tracks = tokio::select! {
        _ = cancel.cancelled() => return Err(engine_error(TransferError::Cancelled)),
        tracks = source.fetch(&spotify) => tracks.map_err(engine_error)?,
    };
    let name = args
        .name
        .unwrap_or_else(|| format!("Spotify {} {}", source.kind, source.id));

    let threshold = match_config.similarity_threshold;
    let planner = TransferPlanner::new(tidal.clone(), Matcher::new(match_config), &transfer_options);
    let plan = planner
        .plan(&tracks, threshold, &cancel)
        .await
        .map_err(engine_error)?;

    let playlist = if args.dry_run {
        None
    } else {
        Some(
            commit_plan(&tidal, &name, &plan, &transfer_options, &cancel)
                .await
                .map_err(engine_error)?,
        )
    };

    let mut schedule = None;
    let mut conversions = Vec::new();
    if args.download && !args.dry_run {
        let base = args.output.unwrap_or_else(|| config.download_base_path());
        let jobs = jobs_from_plan(
            &plan,
            transfer_options.include_ambiguous,
            &name,
            &base,
            &template,
            config.downloads.quality_audio,
            config.desired_format(),
        );

        tracing::info!(
            "Downloading {} tracks to {}, {} at a time",
            jobs.len(),
            base.display(),
            schedule_config.max_concurrent_jobs()
        );
        let downloader = HttpTrackDownloader::new(tidal).with_timeout(config.download_timeout()?);
        let mut scheduler = DownloadScheduler::new(Arc::new(downloader), schedule_config);
        let converter = match config.desired_format() {
            Some(_) => {
                let binary = locate_ffmpeg(config.ffmpeg_path().as_deref())?;
                let converter = Arc::new(FfmpegConverter::spawn(
                    binary,
                    config.conversion.delete_original,
                ));
                scheduler = scheduler.with_converter(converter.clone());
                Some(converter)
            }
            None => None,
        };

        let total = jobs.len();
        let mut handle = scheduler.spawn(jobs, cancel);
        while let Some(event) = handle.events().next().await {
            if !args.json {
                print_progress(&event, total);
            }
        }
        schedule = Some(handle.wait().await.wrap_err("Download scheduler crashed")?);

        if let Some(converter) = converter {
            conversions = converter.finish().await;
        }
    }

    let mut report = RunReport::new(&args.source, &name, &plan);
    report.dry_run = args.dry_run;
    report.playlist = playlist.as_ref();
    report.downloads = schedule.as_ref().map(DownloadSection::new);
    report.conversions = &conversions;
    report.elapsed_secs = started.elapsed().as_secs_f64();

    if args.json {
        println!("{}", report.to_json().wrap_err("Failed to serialize report")?);
    } else {
        print!("{}", report.render());
    }

    if let Some(schedule) = &schedule {
        if let Some(reason) = schedule.abort_reason.clone() {
            return Err(engine_error(reason));
        }
        if report::any_in_state(schedule, JobState::Failed) {
            return Err(eyre!("{} downloads failed", schedule.count(JobState::Failed)));
        }
    }
    Ok(())
}

fn print_progress(event: &JobEvent, total: usize) {
    match event {
        JobEvent::Started { id, attempt } if *attempt == 1 => {
            eprintln!("[{}/{}] Downloading", id + 1, total);
        }
        JobEvent::Started { .. } => {}
        JobEvent::Retrying { id, attempt, error } => {
            eprintln!("[{}/{}] Attempt {} failed: {}", id + 1, total, attempt, error);
        }
        JobEvent::Finished(outcome) => {
            let track = &outcome.candidate.track;
            let state = match outcome.state {
                JobState::Succeeded => "Done",
                JobState::Skipped => "Skipped (exists)",
                JobState::Failed => "Failed",
                JobState::Cancelled => "Cancelled",
                JobState::Pending | JobState::Running => return,
            };
            eprintln!(
                "[{}/{}] {}: {} - {}",
                outcome.id + 1,
                total,
                state,
                track.primary_artist,
                track.title
            );
        }
    }
}
