use tokio_util::sync::CancellationToken;

use super::TransferOptions;
use super::plan::TransferPlan;
use crate::error::TransferError;
use crate::ports::catalog::{DestinationCatalog, DestinationPlaylist};

/// Create the destination playlist for `plan` and fill it in plan order.
///
/// Tracks are added in batches of `playlist_batch_size` with
/// `batch_pause` between batches. The playlist is created even when nothing
/// resolved. Any error aborts the commit and is returned as-is.
///
/// `cancel` is checked before the playlist is created and before each
/// batch; batches already added stay on the destination.
pub async fn commit_plan<C: DestinationCatalog + ?Sized>(
    catalog: &C,
    name: &str,
    plan: &TransferPlan,
    options: &TransferOptions,
    cancel: &CancellationToken,
) -> Result<DestinationPlaylist, TransferError> {
    if cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }

    let track_ids: Vec<String> = plan
        .resolved_tracks(options.include_ambiguous)
        .into_iter()
        .map(|candidate| candidate.destination_id.clone())
        .collect();

    let playlist = catalog
        .create_playlist(name, &options.playlist_description)
        .await?;
    tracing::info!("Created destination playlist '{}' ({})", name, playlist.url);

    let batch_size = options.playlist_batch_size.max(1);
    let batch_count = track_ids.len().div_ceil(batch_size);
    for (index, batch) in track_ids.chunks(batch_size).enumerate() {
        if index > 0 && !options.batch_pause.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(options.batch_pause) => {}
            }
        }
        if cancel.is_cancelled() {
            tracing::warn!(
                "Commit of '{}' cancelled after {}/{} batches",
                name,
                index,
                batch_count
            );
            return Err(TransferError::Cancelled);
        }
        catalog.add_tracks(&playlist, batch).await?;
        tracing::info!(
            "Added batch {}/{} ({} tracks) to '{}'",
            index + 1,
            batch_count,
            batch.len(),
            name
        );
    }

    Ok(playlist)
}
