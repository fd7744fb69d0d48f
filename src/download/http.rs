use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::{Service, TransferError};
use crate::ports::catalog::CandidateTrack;
use crate::ports::download::{StreamResolver, TrackDownloader};

/// Downloads a track by resolving its stream URL, then streaming the body to
/// disk.
pub struct HttpTrackDownloader<R> {
    resolver: R,
    client: reqwest::Client,
    timeout: Duration,
}

impl<R: StreamResolver> HttpTrackDownloader<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl<R: StreamResolver> TrackDownloader for HttpTrackDownloader<R> {
    async fn download(
        &self,
        candidate: &CandidateTrack,
        destination: &Path,
    ) -> Result<u64, TransferError> {
        let source = self
            .resolver
            .resolve_stream(&candidate.destination_id)
            .await?;
        tracing::debug!(
            "Streaming track {} ({}) to {:?}",
            candidate.destination_id,
            source.mime_type,
            destination
        );

        let context = format!("download of track {}", candidate.destination_id);
        let response = self
            .client
            .get(&source.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| TransferError::from_reqwest(Service::Tidal, err, &context))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::from_status(Service::Tidal, status, &context));
        }

        let mut file = tokio::fs::File::create(destination).await?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|err| TransferError::from_reqwest(Service::Tidal, err, &context))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        if written == 0 {
            return Err(TransferError::transport(format!("{context}: empty body")));
        }
        Ok(written)
    }
}
