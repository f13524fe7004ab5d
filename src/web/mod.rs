//! HTTP interface: the merged playlist, the stream endpoints and a health
//! check. Handlers stay thin and delegate to the catalog store and the
//! dispatcher.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::database::Database;
use crate::errors::AppError;
use crate::ledger::ConcurrencyLedger;
use crate::proxy::stream::StreamDispatcher;

pub mod handlers;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub database: Database,
    pub dispatcher: StreamDispatcher,
    pub config: Config,
}

pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(
        config: Config,
        database: Database,
        ledger: ConcurrencyLedger,
    ) -> Result<Self, AppError> {
        let addr: SocketAddr = format!("{}:{}", config.web.host, config.web.port)
            .parse()
            .map_err(|e| {
                AppError::configuration(format!("invalid listen address: {e}"))
            })?;

        let dispatcher = StreamDispatcher::new(ledger)?;
        let app = Self::create_router(AppState {
            database,
            dispatcher,
            config,
        });

        Ok(Self { app, addr })
    }

    pub fn create_router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(handlers::health_check))
            .route("/playlist.m3u", get(handlers::serve_playlist))
            .route("/stream/:id", get(handlers::stream_channel))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Serve until the process receives Ctrl-C or SIGTERM. The shutdown is
    /// broadcast on `shutdown_tx` so ingestion workers halt alongside the
    /// listener while in-flight sessions drain.
    pub async fn serve(self, shutdown_tx: broadcast::Sender<()>) -> Result<(), AppError> {
        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .map_err(|e| AppError::internal(format!("failed to bind {}: {e}", self.addr)))?;

        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                info!("Shutdown signal received, stopping workers and draining sessions");
                let _ = shutdown_tx.send(());
            })
            .await
            .map_err(|e| AppError::internal(format!("HTTP server error: {e}")))?;

        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Map application errors to HTTP status codes at the web boundary.
/// Not-found responses carry no body detail.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::NotFound { .. } => {
                debug!("{self}");
                StatusCode::NOT_FOUND.into_response()
            }
            AppError::UpstreamFetch { .. } | AppError::Http(_) => {
                error!("{self}");
                (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response()
            }
            _ => {
                error!("{self}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("sigterm handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = term => {}
    }
}
