use serde::{Deserialize, Serialize};

use crate::matching::{MatchDecision, MatchResult, NoMatchReason};
use crate::ports::catalog::CandidateTrack;

/// Ordered match results for one source playlist.
///
/// Only the entries are stored; every count is derived from them on demand.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransferPlan {
    entries: Vec<MatchResult>,
}

/// Aggregate counts of a [`TransferPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub total: usize,
    /// Matched plus Ambiguous.
    pub matched: usize,
    pub ambiguous: usize,
    pub unmatched: usize,
    /// Subset of `unmatched` where the catalog could not be searched.
    pub search_failed: usize,
}

impl TransferPlan {
    pub fn new(entries: Vec<MatchResult>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[MatchResult] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn matched_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.decision.is_resolved())
            .count()
    }

    pub fn ambiguous_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.decision == MatchDecision::Ambiguous)
            .count()
    }

    pub fn unmatched_count(&self) -> usize {
        self.entries.len() - self.matched_count()
    }

    pub fn search_failed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| {
                matches!(
                    entry.decision,
                    MatchDecision::NoMatch(NoMatchReason::SearchFailed { .. })
                )
            })
            .count()
    }

    /// Resolved candidates in plan order. Ambiguous entries are included
    /// only when asked for.
    pub fn resolved_tracks(&self, include_ambiguous: bool) -> Vec<&CandidateTrack> {
        self.entries
            .iter()
            .filter(|entry| match entry.decision {
                MatchDecision::Matched => true,
                MatchDecision::Ambiguous => include_ambiguous,
                MatchDecision::NoMatch(_) => false,
            })
            .filter_map(|entry| entry.matched.as_ref())
            .collect()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            total: self.len(),
            matched: self.matched_count(),
            ambiguous: self.ambiguous_count(),
            unmatched: self.unmatched_count(),
            search_failed: self.search_failed_count(),
        }
    }
}
