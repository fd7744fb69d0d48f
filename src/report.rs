use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;

use crate::download::{JobState, ScheduleReport};
use crate::download::scheduler::ScheduleSummary;
use crate::error::TransferError;
use crate::matching::{MatchDecision, MatchResult, NoMatchReason};
use crate::ports::catalog::DestinationPlaylist;
use crate::tools::ConversionOutcome;
use crate::transfer::{PlanSummary, TransferPlan};

/// Everything one `transfer` invocation produced, for humans or `--json`.
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub source: &'a str,
    pub playlist_name: &'a str,
    pub dry_run: bool,
    pub plan: &'a [MatchResult],
    pub plan_summary: PlanSummary,
    pub playlist: Option<&'a DestinationPlaylist>,
    pub downloads: Option<DownloadSection<'a>>,
    pub conversions: &'a [ConversionOutcome],
    pub elapsed_secs: f64,
}

#[derive(Debug, Serialize)]
pub struct DownloadSection<'a> {
    pub summary: ScheduleSummary,
    pub abort_reason: Option<&'a TransferError>,
    pub failures: Vec<FailedJob<'a>>,
}

#[derive(Debug, Serialize)]
pub struct FailedJob<'a> {
    pub title: &'a str,
    pub artist: &'a str,
    pub attempts: u32,
    pub error: Option<&'a TransferError>,
}

impl<'a> DownloadSection<'a> {
    pub fn new(report: &'a ScheduleReport) -> Self {
        Self {
            summary: report.summary(),
            abort_reason: report.abort_reason.as_ref(),
            failures: report
                .failures()
                .map(|outcome| FailedJob {
                    title: &outcome.candidate.track.title,
                    artist: &outcome.candidate.track.primary_artist,
                    attempts: outcome.attempt_count,
                    error: outcome.error.as_ref(),
                })
                .collect(),
        }
    }
}

impl<'a> RunReport<'a> {
    pub fn new(source: &'a str, playlist_name: &'a str, plan: &'a TransferPlan) -> Self {
        Self {
            source,
            playlist_name,
            dry_run: false,
            plan: plan.entries(),
            plan_summary: plan.summary(),
            playlist: None,
            downloads: None,
            conversions: &[],
            elapsed_secs: 0.0,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render(&self) -> String {
        let mut out = render_plan(self.plan);
        let s = &self.plan_summary;

        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{}: {} tracks, {} matched ({} ambiguous), {} unmatched ({} search failures)",
            self.playlist_name, s.total, s.matched, s.ambiguous, s.unmatched, s.search_failed
        );

        if self.dry_run {
            let _ = writeln!(out, "Dry run: nothing was created on the destination");
        }
        if let Some(playlist) = self.playlist {
            let _ = writeln!(out, "Created playlist: {}", playlist.url);
        }

        if let Some(downloads) = &self.downloads {
            let d = &downloads.summary;
            let _ = writeln!(
                out,
                "Downloads: {} total, {} succeeded, {} skipped, {} failed, {} cancelled",
                d.total, d.succeeded, d.skipped, d.failed, d.cancelled
            );
            for failure in &downloads.failures {
                let reason = failure
                    .error
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "unknown error".to_string());
                let _ = writeln!(
                    out,
                    "  FAILED {} - {} after {} attempt(s): {}",
                    failure.artist, failure.title, failure.attempts, reason
                );
            }
            if let Some(reason) = downloads.abort_reason {
                let _ = writeln!(out, "Stopped early: {reason}");
            }
        }

        if !self.conversions.is_empty() {
            let failed = self.conversions.iter().filter(|c| !c.succeeded()).count();
            let _ = writeln!(
                out,
                "Conversions: {} converted, {} failed",
                self.conversions.len() - failed,
                failed
            );
            for conversion in self.conversions.iter().filter(|c| !c.succeeded()) {
                let _ = writeln!(
                    out,
                    "  FAILED {}: {}",
                    conversion.source.display(),
                    conversion.error.as_deref().unwrap_or_default()
                );
            }
        }

        let elapsed = Duration::from_secs(self.elapsed_secs.round() as u64);
        let _ = writeln!(out, "Elapsed: {}", humantime::format_duration(elapsed));
        out
    }
}

fn decision_label(result: &MatchResult) -> &'static str {
    match &result.decision {
        MatchDecision::Matched => "MATCHED",
        MatchDecision::Ambiguous => "AMBIGUOUS",
        MatchDecision::NoMatch(NoMatchReason::SearchFailed { .. }) => "SEARCH FAILED",
        MatchDecision::NoMatch(_) => "UNMATCHED",
    }
}

/// One line per source track, in source order.
pub fn render_plan(entries: &[MatchResult]) -> String {
    let width = entries.len().to_string().len();
    let mut out = String::new();

    for (i, result) in entries.iter().enumerate() {
        let source = format!("{} - {}", result.source.primary_artist, result.source.title);
        let _ = write!(
            out,
            "{:>width$}. {:<13} {:>5.1}  {}",
            i + 1,
            decision_label(result),
            result.score,
            source
        );
        match (&result.matched, &result.decision) {
            (Some(candidate), _) => {
                let _ = write!(
                    out,
                    "  ->  {} - {}",
                    candidate.track.primary_artist, candidate.track.title
                );
            }
            (None, MatchDecision::NoMatch(NoMatchReason::SearchFailed { error })) => {
                let _ = write!(out, "  ({error})");
            }
            _ => {}
        }
        let _ = writeln!(out);
    }
    out
}

/// Whether any job ended in `state`.
pub fn any_in_state(report: &ScheduleReport, state: JobState) -> bool {
    report.count(state) > 0
}
