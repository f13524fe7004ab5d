use axum::{
    body::{Body, Bytes},
    http::{Request, StatusCode},
    routing::get,
    Router,
};
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use m3u_stream_merger::{
    config::{Config, LedgerConfig},
    database::Database,
    ledger::ConcurrencyLedger,
    models::ParsedChannel,
    proxy::stream::StreamDispatcher,
    web::{AppState, WebServer},
};

async fn test_state(db_name: &str) -> (AppState, ConcurrencyLedger) {
    let mut config = Config::default();
    config.database.url = format!("sqlite:file:{db_name}?mode=memory&cache=shared");

    let database = Database::new(&config.database).await.unwrap();
    database.migrate().await.unwrap();

    let ledger = ConcurrencyLedger::new(&LedgerConfig { redis_url: None }).unwrap();
    let dispatcher = StreamDispatcher::new(ledger.clone()).unwrap();

    (
        AppState {
            database,
            dispatcher,
            config,
        },
        ledger,
    )
}

fn entry(tvg_id: &str, title: &str, group: &str, url: &str) -> ParsedChannel {
    ParsedChannel {
        tvg_id: tvg_id.to_string(),
        title: title.to_string(),
        logo_url: String::new(),
        group_name: group.to_string(),
        url: url.to_string(),
    }
}

/// Serve `body` at `/stream` on an OS-assigned port, counting hits.
async fn spawn_upstream(body: &'static str, hits: Arc<AtomicUsize>) -> String {
    let app = Router::new().route(
        "/stream",
        get(move || {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                body
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}/stream")
}

/// Serve a never-ending chunked body at `/stream` on an OS-assigned port,
/// for sessions that only the client can terminate.
async fn spawn_endless_upstream(hits: Arc<AtomicUsize>) -> String {
    let app = Router::new().route(
        "/stream",
        get(move || {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                let chunks = futures::stream::unfold((), |()| async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Some((
                        Ok::<_, std::io::Error>(Bytes::from_static(b"CHUNK")),
                        (),
                    ))
                });
                Body::from_stream(chunks)
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}/stream")
}

/// An address nothing listens on.
async fn dead_upstream() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/stream")
}

async fn get_response(app: &Router, uri: &str, host: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let request = Request::builder()
        .uri(uri)
        .header("host", host)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    (status, headers, body)
}

async fn wait_for_count(ledger: &ConcurrencyLedger, key: &str, expected: i64) {
    for _ in 0..100 {
        if ledger.active(key).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "ledger count for {key} never reached {expected}, still {}",
        ledger.active(key).await
    );
}

#[tokio::test]
async fn playlist_renders_merged_catalog() {
    let (state, _ledger) = test_state("itest_playlist").await;
    state
        .database
        .upsert_channel_with_url(&entry("bbc1", "BBC One", "UK", "http://src/bbc1"), 1, 1)
        .await
        .unwrap();

    let app = WebServer::create_router(state);
    let (status, headers, body) = get_response(&app, "/playlist.m3u", "example.net").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "text/plain");
    assert_eq!(
        String::from_utf8(body).unwrap(),
        "#EXTM3U\n#EXTINF:-1 tvg-id=\"bbc1\" tvg-name=\"BBC One\" tvg-logo=\"\" group-title=\"UK\",BBC One\nhttp://example.net/stream/BBC%20One.mp4\n"
    );
}

#[tokio::test]
async fn reingest_leaves_rendered_playlist_identical() {
    let (state, _ledger) = test_state("itest_reingest").await;
    let entries = [
        entry("bbc1", "BBC One", "UK", "http://src/bbc1"),
        entry("cnn", "CNN", "News", "http://src/cnn"),
    ];
    for e in &entries {
        state
            .database
            .upsert_channel_with_url(e, 1, 1)
            .await
            .unwrap();
    }

    let app = WebServer::create_router(state.clone());
    let (_, _, first) = get_response(&app, "/playlist.m3u", "example.net").await;

    for e in &entries {
        state
            .database
            .upsert_channel_with_url(e, 1, 1)
            .await
            .unwrap();
    }
    let (_, _, second) = get_response(&app, "/playlist.m3u", "example.net").await;

    assert_eq!(first, second);
}

#[tokio::test]
async fn unknown_channel_returns_404() {
    let (state, _ledger) = test_state("itest_missing").await;
    let app = WebServer::create_router(state);

    let (status, _, _) = get_response(&app, "/stream/Nope.mp4", "example.net").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stream_relays_bytes_and_releases_slot() {
    let (state, ledger) = test_state("itest_relay").await;
    let hits = Arc::new(AtomicUsize::new(0));
    let upstream = spawn_upstream("FAKE-MP4-BYTES", hits.clone()).await;

    state
        .database
        .upsert_channel_with_url(&entry("t1", "Test One", "", &upstream), 1, 1)
        .await
        .unwrap();

    let app = WebServer::create_router(state);
    let (status, headers, body) = get_response(&app, "/stream/Test%20One.mp4", "example.net").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "video/mp4");
    assert_eq!(headers.get("cache-control").unwrap(), "no-cache");
    assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
    assert_eq!(body, b"FAKE-MP4-BYTES");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // The session ended when the body completed; its slot must come back.
    wait_for_count(&ledger, &upstream, 0).await;
}

#[tokio::test]
async fn client_disconnect_mid_stream_releases_slot() {
    let (state, ledger) = test_state("itest_disconnect").await;
    let hits = Arc::new(AtomicUsize::new(0));
    let upstream = spawn_endless_upstream(hits.clone()).await;

    state
        .database
        .upsert_channel_with_url(&entry("e", "Endless", "", &upstream), 1, 1)
        .await
        .unwrap();

    let app = WebServer::create_router(state);
    let request = Request::builder()
        .uri("/stream/Endless.mp4")
        .header("host", "example.net")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Read one chunk, then hang up with the upstream still producing.
    let mut body_stream = response.into_body().into_data_stream();
    let first = body_stream.next().await.unwrap().unwrap();
    assert!(!first.is_empty());
    assert_eq!(ledger.active(&upstream).await, 1);

    drop(body_stream);
    wait_for_count(&ledger, &upstream, 0).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cap_full_fails_over_to_next_url() {
    let (state, ledger) = test_state("itest_failover").await;
    let hits_a = Arc::new(AtomicUsize::new(0));
    let hits_b = Arc::new(AtomicUsize::new(0));
    let upstream_a = spawn_upstream("FROM-A", hits_a.clone()).await;
    let upstream_b = spawn_upstream("FROM-B", hits_b.clone()).await;

    state
        .database
        .upsert_channel_with_url(&entry("c", "Capped", "", &upstream_a), 1, 1)
        .await
        .unwrap();
    state
        .database
        .upsert_channel_with_url(&entry("c", "Capped", "", &upstream_b), 2, 1)
        .await
        .unwrap();

    // Saturate A's single slot.
    let _held = ledger.reserve(&upstream_a).await;

    let app = WebServer::create_router(state);
    let (status, _, body) = get_response(&app, "/stream/Capped.mp4", "example.net").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"FROM-B");
    assert_eq!(hits_a.load(Ordering::SeqCst), 0);
    assert_eq!(hits_b.load(Ordering::SeqCst), 1);

    wait_for_count(&ledger, &upstream_b, 0).await;
    assert_eq!(ledger.active(&upstream_a).await, 1);
}

#[tokio::test]
async fn saturated_caps_fall_through_to_best_effort() {
    let (state, ledger) = test_state("itest_overcap").await;
    let hits = Arc::new(AtomicUsize::new(0));
    let upstream = spawn_upstream("OVER-CAP", hits.clone()).await;

    state
        .database
        .upsert_channel_with_url(&entry("o", "Only", "", &upstream), 1, 1)
        .await
        .unwrap();

    let _held = ledger.reserve(&upstream).await;

    let app = WebServer::create_router(state);
    let (status, _, body) = get_response(&app, "/stream/Only.mp4", "example.net").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OVER-CAP");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Back down to the one slot still held from outside.
    wait_for_count(&ledger, &upstream, 1).await;
}

#[tokio::test]
async fn dead_upstream_tries_next_candidate() {
    let (state, ledger) = test_state("itest_deadfirst").await;
    let dead = dead_upstream().await;
    let hits = Arc::new(AtomicUsize::new(0));
    let live = spawn_upstream("ALIVE", hits.clone()).await;

    state
        .database
        .upsert_channel_with_url(&entry("d", "Mixed", "", &dead), 1, 1)
        .await
        .unwrap();
    state
        .database
        .upsert_channel_with_url(&entry("d", "Mixed", "", &live), 2, 1)
        .await
        .unwrap();

    let app = WebServer::create_router(state);
    let (status, _, body) = get_response(&app, "/stream/Mixed.mp4", "example.net").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ALIVE");
    assert_eq!(ledger.active(&dead).await, 0);
    wait_for_count(&ledger, &live, 0).await;
}

#[tokio::test]
async fn exhausted_candidates_return_500() {
    let (state, ledger) = test_state("itest_allfail").await;
    let dead = dead_upstream().await;

    state
        .database
        .upsert_channel_with_url(&entry("x", "Down", "", &dead), 1, 1)
        .await
        .unwrap();

    let app = WebServer::create_router(state);
    let (status, headers, _) = get_response(&app, "/stream/Down.mp4", "example.net").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    // The playback headers apply to the failure path too.
    assert_eq!(headers.get("cache-control").unwrap(), "no-cache");
    assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
    assert_eq!(ledger.active(&dead).await, 0);
}
