//! Scores destination candidates against a source track and picks a winner.
//!
//! The composite score blends title, artist, album and duration closeness,
//! each on a 0–100 scale. Album and duration only take part when both sides
//! know them; the remaining weights are renormalized.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::normalize::Normalizer;
use crate::error::TransferError;
use crate::ports::catalog::{CandidateTrack, TrackRef};

const TITLE_WEIGHT: f64 = 0.5;
const ARTIST_WEIGHT: f64 = 0.3;
const ALBUM_WEIGHT: f64 = 0.1;
const DURATION_WEIGHT: f64 = 0.1;

/// Full credit within this many seconds of difference.
const DURATION_EXACT_SECS: f64 = 2.0;
/// Zero credit from this many seconds of difference.
const DURATION_CUTOFF_SECS: f64 = 10.0;

pub const DEFAULT_SIMILARITY_THRESHOLD: u8 = 80;
pub const DEFAULT_AMBIGUITY_MARGIN: f64 = 2.0;

/// Tunables for matching, validated once at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    pub similarity_threshold: u8,
    /// Top-two score gap below which a match is reported as Ambiguous.
    pub ambiguity_margin: f64,
    pub noise_tokens: Vec<String>,
}

impl MatchConfig {
    pub fn new(
        similarity_threshold: u8,
        ambiguity_margin: f64,
        noise_tokens: Vec<String>,
    ) -> Result<Self, TransferError> {
        if similarity_threshold > 100 {
            return Err(TransferError::config(format!(
                "similarity_threshold must be within 0..=100, got {similarity_threshold}"
            )));
        }
        if !ambiguity_margin.is_finite() || ambiguity_margin < 0.0 {
            return Err(TransferError::config(format!(
                "ambiguity_margin must be a non-negative number, got {ambiguity_margin}"
            )));
        }
        Ok(Self {
            similarity_threshold,
            ambiguity_margin,
            noise_tokens,
        })
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            ambiguity_margin: DEFAULT_AMBIGUITY_MARGIN,
            noise_tokens: super::normalize::DEFAULT_NOISE_TOKENS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Why a source track ended up without a destination track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NoMatchReason {
    /// The catalog returned nothing for the query.
    NoCandidates,
    /// Candidates existed but none reached the threshold.
    BelowThreshold,
    /// The catalog could not be asked (transport kept failing).
    SearchFailed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum MatchDecision {
    Matched,
    /// Top two candidates are within the ambiguity margin; `matched` holds
    /// the better-ranked one so a caller can ask for confirmation.
    Ambiguous,
    NoMatch(NoMatchReason),
}

impl MatchDecision {
    pub fn is_resolved(&self) -> bool {
        matches!(self, MatchDecision::Matched | MatchDecision::Ambiguous)
    }
}

/// Outcome of matching one source track. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub source: TrackRef,
    pub matched: Option<CandidateTrack>,
    /// Best composite score seen, 0 when there were no candidates.
    pub score: f64,
    pub runner_up_score: Option<f64>,
    pub decision: MatchDecision,
}

impl MatchResult {
    pub fn no_match(source: TrackRef, reason: NoMatchReason) -> Self {
        Self {
            source,
            matched: None,
            score: 0.0,
            runner_up_score: None,
            decision: MatchDecision::NoMatch(reason),
        }
    }
}

/// Per-field similarity for one candidate, all on 0–100.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    pub title: f64,
    pub artist: f64,
    pub album: Option<f64>,
    pub duration: Option<f64>,
    pub composite: f64,
}

// =============================================================================
// String Similarity
// =============================================================================

/// Token-based similarity - handles word reordering
///
/// "quick brown fox" vs "brown fox quick" scores 1.0
pub fn token_similarity(s1: &str, s2: &str) -> f64 {
    let tokens1: HashSet<&str> = s1.split_whitespace().collect();
    let tokens2: HashSet<&str> = s2.split_whitespace().collect();

    if tokens1.is_empty() && tokens2.is_empty() {
        return 1.0;
    }
    if tokens1.is_empty() || tokens2.is_empty() {
        return 0.0;
    }

    let intersection = tokens1.intersection(&tokens2).count();
    let union = tokens1.union(&tokens2).count();

    intersection as f64 / union as f64
}

/// Similarity of two already-normalized strings on a 0–100 scale.
///
/// Jaro-Winkler for character-level closeness, token overlap for reordered
/// words; the higher wins, with a slight preference for Jaro-Winkler.
pub fn string_similarity(s1: &str, s2: &str) -> f64 {
    if s1 == s2 {
        return 100.0;
    }
    if s1.is_empty() || s2.is_empty() {
        return 0.0;
    }

    let jw = jaro_winkler::jaro_winkler(s1, s2);
    let token = token_similarity(s1, s2);
    (jw.max(token * 0.95) * 100.0).clamp(0.0, 100.0)
}

// =============================================================================
// Duration Matching
// =============================================================================

/// 100 within ±2s, linearly down to 0 at ±10s.
pub fn duration_closeness(secs1: u32, secs2: u32) -> f64 {
    let diff = secs1.abs_diff(secs2) as f64;
    if diff <= DURATION_EXACT_SECS {
        100.0
    } else if diff >= DURATION_CUTOFF_SECS {
        0.0
    } else {
        100.0 * (DURATION_CUTOFF_SECS - diff) / (DURATION_CUTOFF_SECS - DURATION_EXACT_SECS)
    }
}

fn known_album(track: &TrackRef) -> Option<&str> {
    track
        .album
        .as_deref()
        .map(str::trim)
        .filter(|album| !album.is_empty())
}

// =============================================================================
// Main Matching Algorithm
// =============================================================================

#[derive(Debug, Clone)]
pub struct Matcher {
    config: MatchConfig,
    normalizer: Normalizer,
}

impl Matcher {
    pub fn new(config: MatchConfig) -> Self {
        let normalizer = Normalizer::new(&config.noise_tokens);
        Self { config, normalizer }
    }

    /// Composite similarity of `candidate` to `source`.
    pub fn score(&self, source: &TrackRef, candidate: &TrackRef) -> ScoreBreakdown {
        let n = &self.normalizer;

        let title = string_similarity(&n.normalize(&source.title), &n.normalize(&candidate.title));
        let artist = string_similarity(
            &n.normalize(&source.primary_artist),
            &n.normalize(&candidate.primary_artist),
        );
        let album = match (known_album(source), known_album(candidate)) {
            (Some(a), Some(b)) => Some(string_similarity(&n.normalize(a), &n.normalize(b))),
            _ => None,
        };
        let duration = match (source.duration_seconds, candidate.duration_seconds) {
            (Some(a), Some(b)) => Some(duration_closeness(a, b)),
            _ => None,
        };

        let mut weighted = title * TITLE_WEIGHT + artist * ARTIST_WEIGHT;
        let mut total_weight = TITLE_WEIGHT + ARTIST_WEIGHT;
        if let Some(album) = album {
            weighted += album * ALBUM_WEIGHT;
            total_weight += ALBUM_WEIGHT;
        }
        if let Some(duration) = duration {
            weighted += duration * DURATION_WEIGHT;
            total_weight += DURATION_WEIGHT;
        }

        ScoreBreakdown {
            title,
            artist,
            album,
            duration,
            composite: weighted / total_weight,
        }
    }

    /// Pick the best candidate for `source`, or declare no match.
    ///
    /// Pure and deterministic: ties on score are broken by the candidates'
    /// search rank, then by their position in `candidates`.
    pub fn match_track(
        &self,
        source: &TrackRef,
        candidates: &[CandidateTrack],
        threshold: u8,
    ) -> MatchResult {
        if candidates.is_empty() {
            return MatchResult::no_match(source.clone(), NoMatchReason::NoCandidates);
        }

        let mut scored: Vec<(usize, f64)> = candidates
            .iter()
            .enumerate()
            .map(|(index, candidate)| (index, self.score(source, &candidate.track).composite))
            .collect();
        scored.sort_by(|(ia, sa), (ib, sb)| {
            sb.total_cmp(sa)
                .then(candidates[*ia].rank.cmp(&candidates[*ib].rank))
                .then(ia.cmp(ib))
        });

        for (index, score) in scored.iter().take(3) {
            tracing::trace!(
                "Candidate for '{}' by '{}': '{}' by '{}' (rank {}) score={:.2}",
                source.title,
                source.primary_artist,
                candidates[*index].track.title,
                candidates[*index].track.primary_artist,
                candidates[*index].rank,
                score
            );
        }

        let (best_index, best_score) = scored[0];
        let runner_up_score = scored.get(1).map(|(_, score)| *score);
        let threshold = f64::from(threshold);

        if best_score < threshold {
            return MatchResult {
                source: source.clone(),
                matched: None,
                score: best_score,
                runner_up_score,
                decision: MatchDecision::NoMatch(NoMatchReason::BelowThreshold),
            };
        }

        let decision = match runner_up_score {
            Some(second)
                if second >= threshold && best_score - second < self.config.ambiguity_margin =>
            {
                MatchDecision::Ambiguous
            }
            _ => MatchDecision::Matched,
        };

        MatchResult {
            source: source.clone(),
            matched: Some(candidates[best_index].clone()),
            score: best_score,
            runner_up_score,
            decision,
        }
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(MatchConfig::default())
    }
}

// =============================================================================
// Tests
// =============================================================================
