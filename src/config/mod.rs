use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::AppError;
use crate::models::UpstreamSource;

const DEFAULT_UPDATE_INTERVAL_HOURS: u64 = 24;
const DEFAULT_MAX_CONCURRENCY: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub ledger: LedgerConfig,
    pub ingestion: IngestionConfig,
    pub upstreams: Vec<UpstreamSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    /// Fallback base for rewritten stream URLs when a request carries no
    /// Host header.
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Shared counter store; None falls back to process-local counters.
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    pub fetch_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./data/current_streams.db".to_string(),
            },
            web: WebConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                base_url: "http://localhost:8080".to_string(),
            },
            ledger: LedgerConfig { redis_url: None },
            ingestion: IngestionConfig {
                fetch_timeout: Duration::from_secs(30),
            },
            upstreams: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration through an arbitrary variable lookup.
    ///
    /// Keeps parsing free of process-global state so tests can feed their
    /// own environment without ordering hazards.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("DATABASE_URL") {
            config.database.url = url;
        }
        if let Some(host) = lookup("HOST") {
            config.web.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.web.port = port.parse().map_err(|_| {
                AppError::configuration(format!("PORT is not a valid port number: {port}"))
            })?;
        }
        if let Some(base_url) = lookup("BASE_URL") {
            config.web.base_url = base_url.trim_end_matches('/').to_string();
        }
        config.ledger.redis_url = lookup("REDIS_URL");

        let interval_hours = match lookup("UPDATE_INTERVAL") {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                AppError::configuration(format!("UPDATE_INTERVAL is not a valid hour count: {raw}"))
            })?,
            None => DEFAULT_UPDATE_INTERVAL_HOURS,
        };
        let refresh_interval = Duration::from_secs(interval_hours * 3600);

        config.upstreams = Self::scan_upstreams(&lookup, refresh_interval)?;
        if config.upstreams.is_empty() {
            return Err(AppError::configuration(
                "no upstream playlists configured; set M3U_URL_1",
            ));
        }

        Ok(config)
    }

    /// Scan `M3U_URL_<i>` starting at 1, stopping at the first gap.
    fn scan_upstreams<F>(
        lookup: &F,
        refresh_interval: Duration,
    ) -> Result<Vec<UpstreamSource>, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut upstreams = Vec::new();
        let mut index: i64 = 1;

        while let Some(playlist_url) = lookup(&format!("M3U_URL_{index}")) {
            let max_concurrency = match lookup(&format!("M3U_MAX_CONCURRENCY_{index}")) {
                Some(raw) => {
                    let parsed: i64 = raw.parse().map_err(|_| {
                        AppError::configuration(format!(
                            "M3U_MAX_CONCURRENCY_{index} is not a valid integer: {raw}"
                        ))
                    })?;
                    if parsed < 1 {
                        return Err(AppError::configuration(format!(
                            "M3U_MAX_CONCURRENCY_{index} must be at least 1, got {parsed}"
                        )));
                    }
                    parsed
                }
                None => DEFAULT_MAX_CONCURRENCY,
            };

            upstreams.push(UpstreamSource {
                provider_index: index,
                playlist_url,
                max_concurrency,
                refresh_interval,
            });
            index += 1;
        }

        Ok(upstreams)
    }
}
