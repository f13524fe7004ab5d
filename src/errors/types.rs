//! Error type definitions for the stream merger.

use thiserror::Error;

/// Top-level application error type
///
/// Covers every failure class the service distinguishes. Configuration and
/// initial database errors are fatal; everything else is recovered locally
/// (next ingest cycle, next candidate URL, or fail-open for the ledger).
#[derive(Error, Debug)]
pub enum AppError {
    /// Catalog storage errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Concurrency ledger errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] redis::RedisError),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid or missing environment at startup
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Network/HTTP failure contacting an upstream
    #[error("Upstream fetch failed: {url} - {message}")]
    UpstreamFetch { url: String, message: String },

    /// Unknown resource
    #[error("Not found: {resource} '{id}'")]
    NotFound { resource: String, id: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a configuration error with a custom message
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an upstream fetch error for a specific URL
    pub fn upstream_fetch<U: Into<String>, M: Into<String>>(url: U, message: M) -> Self {
        Self::UpstreamFetch {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a not found error for a specific resource
    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
