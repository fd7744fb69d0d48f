pub mod http;
pub mod job;
pub mod pacing;
pub mod scheduler;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::matching::MatchDecision;
use crate::paths::{PathTemplate, TrackContext};
use crate::ports::conversion::AudioFormat;
use crate::transfer::TransferPlan;

pub use job::{DownloadJob, JobEvent, JobId, JobOutcome, JobState};
pub use scheduler::{DownloadScheduler, ScheduleConfig, ScheduleReport, SchedulerHandle};

/// Stream quality requested from the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioQuality {
    /// AAC 320.
    #[default]
    High,
    Lossless,
}

impl AudioQuality {
    /// Container the destination delivers at this quality.
    pub fn delivered_format(&self) -> AudioFormat {
        match self {
            AudioQuality::High => AudioFormat::M4a,
            AudioQuality::Lossless => AudioFormat::Flac,
        }
    }
}

/// One job per resolved plan entry, in plan order, ids counting from 0.
///
/// `list_pos` is the entry's position in the source list, so unresolved
/// tracks leave gaps in the numbering rather than shifting later files.
pub fn jobs_from_plan(
    plan: &TransferPlan,
    include_ambiguous: bool,
    collection_name: &str,
    base: &Path,
    template: &PathTemplate,
    quality: AudioQuality,
    desired_format: Option<AudioFormat>,
) -> Vec<DownloadJob> {
    let width = plan.len().to_string().len();
    let extension = quality.delivered_format().extension();

    plan.entries()
        .iter()
        .enumerate()
        .filter(|(_, entry)| match entry.decision {
            MatchDecision::Matched => true,
            MatchDecision::Ambiguous => include_ambiguous,
            MatchDecision::NoMatch(_) => false,
        })
        .filter_map(|(index, entry)| entry.matched.as_ref().map(|candidate| (index, candidate)))
        .enumerate()
        .map(|(id, (index, candidate))| {
            let album = candidate.track.album.as_deref().unwrap_or_default();
            let ctx = TrackContext {
                playlist_name: collection_name,
                list_pos: index + 1,
                list_pos_width: width,
                artist_name: &candidate.track.primary_artist,
                track_title: &candidate.track.title,
                album_title: album,
                album_artist: &candidate.track.primary_artist,
            };
            DownloadJob::new(
                id,
                candidate.clone(),
                template.target_path(base, &ctx, extension),
                desired_format,
            )
        })
        .collect()
}
