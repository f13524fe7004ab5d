use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::info;

use super::AppState;
use crate::errors::AppError;
use crate::proxy::playlist;

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// `GET /playlist.m3u` — the merged playlist, every URL rewritten to point
/// back at this service.
pub async fn serve_playlist(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let channels = state.database.list_channels().await?;

    // Prefer the address the client reached us on; fall back to the
    // configured base so the rewritten URLs are always well-formed.
    let base_url = match headers.get(header::HOST).and_then(|v| v.to_str().ok()) {
        Some(host) if !host.is_empty() => format!("http://{host}"),
        _ => state.config.web.base_url.clone(),
    };

    let body = playlist::generate_playlist(&channels, &base_url);
    info!("Serving merged playlist with {} channels", channels.len());

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        body,
    )
        .into_response())
}

/// `GET /stream/{channel_id}.mp4` — resolve the channel and relay bytes
/// from a selected upstream.
pub async fn stream_channel(
    State(state): State<AppState>,
    uri: Uri,
) -> Result<Response<Body>, AppError> {
    // Decode from the raw path; the router's own percent-decoding would
    // mangle titles that contain encoded characters themselves.
    let id = uri.path().strip_prefix("/stream/").unwrap_or("");
    let id = id.strip_suffix(".mp4").unwrap_or(id);

    let title = match playlist::decode_channel_id(id) {
        Some(title) if !title.is_empty() => title,
        _ => return Err(AppError::not_found("channel", id)),
    };

    let channel = state
        .database
        .get_channel_by_title(&title)
        .await?
        .ok_or_else(|| AppError::not_found("channel", title.as_str()))?;

    info!("Playback request for '{}'", channel.title);
    Ok(state.dispatcher.dispatch(&channel).await)
}
