use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use tokio_util::sync::CancellationToken;

use super::TransferOptions;
use super::plan::TransferPlan;
use crate::error::TransferError;
use crate::matching::normalize::strip_parentheticals;
use crate::matching::{MatchDecision, MatchResult, Matcher, NoMatchReason};
use crate::ports::catalog::{CandidateTrack, DestinationCatalog, TrackRef};

/// Free-text query for the destination catalog: the title without its
/// `" - ..."` tail or bracketed suffixes, followed by the primary artist.
pub fn build_query(track: &TrackRef) -> String {
    let title = track
        .title
        .split_once(" - ")
        .map_or(track.title.as_str(), |(head, _)| head);
    let title = strip_parentheticals(title);
    let title = if title.is_empty() {
        track.title.trim()
    } else {
        title.as_str()
    };

    format!("{} {}", title, track.primary_artist.trim())
        .trim()
        .to_string()
}

/// Resolves a list of source tracks against a destination catalog.
pub struct TransferPlanner<C> {
    catalog: C,
    matcher: Matcher,
    search_retries: usize,
    search_retry_delay: Duration,
}

impl<C: DestinationCatalog> TransferPlanner<C> {
    pub fn new(catalog: C, matcher: Matcher, options: &TransferOptions) -> Self {
        Self {
            catalog,
            matcher,
            search_retries: options.search_retries,
            search_retry_delay: options.search_retry_delay,
        }
    }

    /// Match every source track, in order.
    ///
    /// Entry `i` of the returned plan always belongs to `source_tracks[i]`.
    /// Per-track failures become `NoMatch` entries; only a fatal error
    /// (lost authentication) or `cancel` firing aborts the whole plan.
    pub async fn plan(
        &self,
        source_tracks: &[TrackRef],
        threshold: u8,
        cancel: &CancellationToken,
    ) -> Result<TransferPlan, TransferError> {
        let total = source_tracks.len();
        let mut entries = Vec::with_capacity(total);

        for (index, source) in source_tracks.iter().enumerate() {
            let query = build_query(source);
            tracing::debug!("Searching destination catalog for '{}'", query);

            if cancel.is_cancelled() {
                tracing::warn!("Planning cancelled after {}/{} tracks", index, total);
                return Err(TransferError::Cancelled);
            }

            let searched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                searched = self.search_with_retry(&query) => searched,
            };
            let result = match searched {
                Ok(candidates) => self.matcher.match_track(source, &candidates, threshold),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!("Search failed for '{}': {}", query, err);
                    MatchResult::no_match(
                        source.clone(),
                        NoMatchReason::SearchFailed {
                            error: err.to_string(),
                        },
                    )
                }
            };

            log_progress(index + 1, total, &result);
            entries.push(result);
        }

        Ok(TransferPlan::new(entries))
    }

    async fn search_with_retry(&self, query: &str) -> Result<Vec<CandidateTrack>, TransferError> {
        let catalog = &self.catalog;

        (|| async move { catalog.search(query).await })
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.search_retry_delay)
                    .with_max_times(self.search_retries),
            )
            .when(|err: &TransferError| err.is_retryable())
            .notify(|err: &TransferError, delay: Duration| {
                tracing::debug!("Retrying search for '{}' in {:?}: {}", query, delay, err);
            })
            .await
    }
}

fn log_progress(position: usize, total: usize, result: &MatchResult) {
    let source = &result.source;
    match (&result.decision, &result.matched) {
        (MatchDecision::Matched, Some(candidate)) => tracing::info!(
            "[{}/{}] Matched: '{}' by '{}' -> '{}' ({:.1})",
            position,
            total,
            source.title,
            source.primary_artist,
            candidate.track.title,
            result.score
        ),
        (MatchDecision::Ambiguous, Some(candidate)) => tracing::info!(
            "[{}/{}] Ambiguous: '{}' by '{}' -> '{}' ({:.1} vs {:.1})",
            position,
            total,
            source.title,
            source.primary_artist,
            candidate.track.title,
            result.score,
            result.runner_up_score.unwrap_or_default()
        ),
        _ => tracing::info!(
            "[{}/{}] Unmatched: '{}' by '{}'",
            position,
            total,
            source.title,
            source.primary_artist
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Service;
    use crate::matching::MatchConfig;
    use crate::ports::catalog::MockDestinationCatalog;

    fn track(title: &str, artist: &str) -> TrackRef {
        TrackRef {
            title: title.to_string(),
            primary_artist: artist.to_string(),
            album: None,
            duration_seconds: None,
            source_id: format!("sp-{}", title.to_lowercase()),
        }
    }

    fn hit(id: &str, rank: usize, title: &str, artist: &str) -> CandidateTrack {
        CandidateTrack {
            track: track(title, artist),
            destination_id: id.to_string(),
            rank,
        }
    }

    fn fast_options() -> TransferOptions {
        TransferOptions {
            search_retry_delay: Duration::from_millis(1),
            ..TransferOptions::default()
        }
    }

    fn planner(catalog: MockDestinationCatalog) -> TransferPlanner<MockDestinationCatalog> {
        TransferPlanner::new(catalog, Matcher::default(), &fast_options())
    }

    #[test]
    fn test_build_query_cleans_title() {
        assert_eq!(
            build_query(&track("Song - Remastered 2011", "Queen")),
            "Song Queen"
        );
        assert_eq!(
            build_query(&track("Song (feat. Guest) [Live]", "Artist")),
            "Song Artist"
        );
        assert_eq!(build_query(&track("(Intro)", "Artist")), "(Intro) Artist");
    }

    #[tokio::test]
    async fn test_plan_preserves_order_and_classifies() {
        let mut catalog = MockDestinationCatalog::new();
        catalog.expect_search().returning(|query| {
            Ok(match query {
                "Alpha Artist" => vec![hit("a", 0, "Alpha", "Artist")],
                "Bravo Artist" => vec![
                    hit("b1", 0, "Bravo", "Artist"),
                    hit("b2", 1, "Bravo", "Artist"),
                ],
                _ => vec![],
            })
        });

        let sources = vec![
            track("Alpha", "Artist"),
            track("Bravo", "Artist"),
            track("Charlie", "Artist"),
        ];
        let plan = planner(catalog)
            .plan(&sources, 70, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(plan.len(), 3);
        for (entry, source) in plan.entries().iter().zip(&sources) {
            assert_eq!(&entry.source, source);
        }
        assert_eq!(plan.entries()[0].decision, MatchDecision::Matched);
        assert_eq!(plan.entries()[1].decision, MatchDecision::Ambiguous);
        assert_eq!(
            plan.entries()[1].matched.as_ref().unwrap().destination_id,
            "b1"
        );
        assert_eq!(
            plan.entries()[2].decision,
            MatchDecision::NoMatch(NoMatchReason::NoCandidates)
        );
        assert_eq!(plan.matched_count(), 2);
        assert_eq!(plan.unmatched_count(), 1);
    }

    #[tokio::test]
    async fn test_rerun_is_identical() {
        let mut catalog = MockDestinationCatalog::new();
        catalog
            .expect_search()
            .returning(|_| Ok(vec![hit("x", 0, "Song", "Artist")]));
        let planner = planner(catalog);
        let sources = vec![track("Song", "Artist"), track("Other", "Band")];

        let cancel = CancellationToken::new();
        let first = planner.plan(&sources, 80, &cancel).await.unwrap();
        let second = planner.plan(&sources, 80, &cancel).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_transient_search_failure_retried_then_recorded() {
        let mut catalog = MockDestinationCatalog::new();
        catalog
            .expect_search()
            .times(3)
            .returning(|_| Err(TransferError::transport("timeout")));

        let plan = planner(catalog)
            .plan(&[track("Song", "Artist")], 80, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            plan.entries()[0].decision,
            MatchDecision::NoMatch(NoMatchReason::SearchFailed { .. })
        ));
        assert_eq!(plan.search_failed_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let mut catalog = MockDestinationCatalog::new();
        let mut seq = mockall::Sequence::new();
        catalog
            .expect_search()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(TransferError::transport("reset")));
        catalog
            .expect_search()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![hit("x", 0, "Song", "Artist")]));

        let plan = planner(catalog)
            .plan(&[track("Song", "Artist")], 80, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(plan.entries()[0].decision, MatchDecision::Matched);
    }

    #[tokio::test]
    async fn test_permanent_search_failure_not_retried() {
        let mut catalog = MockDestinationCatalog::new();
        catalog
            .expect_search()
            .times(1)
            .returning(|_| Err(TransferError::permanent("bad query")));

        let plan = planner(catalog)
            .plan(&[track("Song", "Artist")], 80, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(plan.search_failed_count(), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_aborts_plan() {
        let mut catalog = MockDestinationCatalog::new();
        catalog
            .expect_search()
            .times(1)
            .returning(|_| Err(TransferError::auth(Service::Tidal, "expired")));

        let result = planner(catalog)
            .plan(
                &[track("Song", "Artist"), track("Other", "Artist")],
                80,
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(TransferError::Auth { .. })));
    }

    #[tokio::test]
    async fn test_cancel_stops_planning_between_tracks() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let mut catalog = MockDestinationCatalog::new();
        catalog.expect_search().times(1).returning(move |_| {
            trigger.cancel();
            Ok(vec![hit("a", 0, "Alpha", "Artist")])
        });

        let result = planner(catalog)
            .plan(
                &[
                    track("Alpha", "Artist"),
                    track("Bravo", "Artist"),
                    track("Charlie", "Artist"),
                ],
                80,
                &cancel,
            )
            .await;

        assert_eq!(result, Err(TransferError::Cancelled));
    }
}
