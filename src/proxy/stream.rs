//! Playback dispatch: pick a usable upstream for a channel and relay its
//! bytes to the client.
//!
//! Selection runs in two passes. The first honors each URL's concurrency
//! cap; the second ignores it, because the cap is a soft contract with the
//! provider and exceeding it beats failing the viewer — but only once no
//! compliant option exists.

use axum::body::Body;
use axum::http::{header, Response, StatusCode};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::errors::AppError;
use crate::ledger::ConcurrencyLedger;
use crate::models::{Channel, StreamUrl};

const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct StreamDispatcher {
    client: reqwest::Client,
    ledger: ConcurrencyLedger,
}

impl StreamDispatcher {
    pub fn new(ledger: ConcurrencyLedger) -> Result<Self, AppError> {
        // Connect timeout only. Live streams stay open indefinitely, so the
        // total request duration must remain unbounded.
        let client = reqwest::Client::builder()
            .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self { client, ledger })
    }

    /// Select an upstream for the channel and start relaying it.
    pub async fn dispatch(&self, channel: &Channel) -> Response<Body> {
        // Pass 1: only candidates below their concurrency cap. A transport
        // error moves on to the next candidate, not to pass 2.
        for url in &channel.urls {
            let active = self.ledger.active(&url.content).await;
            if active >= url.max_concurrency {
                debug!(
                    "Skipping {} at concurrency cap ({active}/{})",
                    url.content, url.max_concurrency
                );
                continue;
            }

            match self.open_upstream(&url.content).await {
                Ok(upstream) => return self.relay(url, upstream).await,
                Err(e) => warn!("Candidate failed under cap, trying next: {e}"),
            }
        }

        // Pass 2: best effort, caps ignored.
        for url in &channel.urls {
            match self.open_upstream(&url.content).await {
                Ok(upstream) => {
                    info!(
                        "No candidate under cap for '{}'; adopting {} over its cap",
                        channel.title, url.content
                    );
                    return self.relay(url, upstream).await;
                }
                Err(e) => warn!("Candidate failed in best-effort pass: {e}"),
            }
        }

        error!("Exhausted all upstream URLs for channel '{}'", channel.title);
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Error fetching stream. Exhausted all upstream URLs.",
        )
    }

    async fn open_upstream(&self, url: &str) -> Result<reqwest::Response, AppError> {
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

        Ok(response)
    }

    /// Reserve a ledger slot and build the streaming response. The
    /// reservation lives inside the body stream, so upstream EOF, client
    /// disconnect and transport errors all release exactly one slot.
    async fn relay(&self, url: &StreamUrl, upstream: reqwest::Response) -> Response<Body> {
        let reservation = self.ledger.reserve(&url.content).await;
        info!(
            "Streaming {} (provider {})",
            reservation.key(),
            url.provider_index
        );

        let body_stream = upstream.bytes_stream().map(move |chunk| {
            let _ = &reservation;
            chunk
        });

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "video/mp4")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .body(Body::from_stream(body_stream))
            .unwrap_or_else(|e| {
                error!("Failed to build streaming response: {e}");
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to build response",
                )
            })
    }
}

fn error_response(status: StatusCode, msg: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Body::from(msg.to_string()))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("internal error"))
                .unwrap()
        })
}
