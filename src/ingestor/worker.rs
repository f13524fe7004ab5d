use anyhow::Result;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::m3u_parser;
use crate::database::Database;
use crate::errors::AppError;
use crate::models::UpstreamSource;

/// Periodically refreshes one configured upstream playlist into the catalog.
///
/// Workers for different upstreams run in parallel, one task each. A failed
/// fetch skips the cycle without touching previously ingested entries.
pub struct IngestionWorker {
    source: UpstreamSource,
    database: Database,
    client: reqwest::Client,
}

impl IngestionWorker {
    pub fn new(
        source: UpstreamSource,
        database: Database,
        fetch_timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder().timeout(fetch_timeout).build()?;

        Ok(Self {
            source,
            database,
            client,
        })
    }

    /// Refresh immediately, then every `refresh_interval` until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            info!(
                "Updating playlist #{} from {}",
                self.source.provider_index, self.source.playlist_url
            );
            match self.refresh().await {
                Ok(count) => info!(
                    "Updated playlist #{}: {} entries ingested",
                    self.source.provider_index, count
                ),
                Err(e) => error!(
                    "Failed to update playlist #{}: {e}",
                    self.source.provider_index
                ),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.source.refresh_interval) => {}
                _ = shutdown.recv() => {
                    info!(
                        "Ingestion worker #{} shutting down",
                        self.source.provider_index
                    );
                    return;
                }
            }
        }
    }

    /// One fetch-parse-upsert cycle. Returns the number of entries written.
    pub async fn refresh(&self) -> Result<usize> {
        let content = self.download_playlist().await?;

        let mut count = 0usize;
        for entry in m3u_parser::parse(&content) {
            self.database
                .upsert_channel_with_url(
                    &entry,
                    self.source.provider_index,
                    self.source.max_concurrency,
                )
                .await?;
            count += 1;
        }

        Ok(count)
    }

    async fn download_playlist(&self) -> Result<String, AppError> {
        let url = &self.source.playlist_url;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::upstream_fetch(url, e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::upstream_fetch(
                url,
                format!("status {}", response.status()),
            ));
        }

        let mut content = String::new();
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AppError::upstream_fetch(url, e.to_string()))?;
            content.push_str(&String::from_utf8_lossy(&chunk));
            downloaded += chunk.len() as u64;
        }
        debug!("Downloaded {downloaded} bytes from {url}");

        Ok(content)
    }
}
