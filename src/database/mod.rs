use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::errors::AppError;

pub mod channels;

const INITIAL_SCHEMA: &str = include_str!("../../migrations/001_initial_schema.sql");

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    channel_update_lock: Arc<Mutex<()>>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, AppError> {
        // Foreign keys are per-connection in SQLite; switching them on here
        // makes channel deletion cascade to stream_urls on every pooled
        // connection.
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(options).await?;

        Ok(Self {
            pool,
            channel_update_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Apply the embedded schema. Idempotent.
    pub async fn migrate(&self) -> Result<(), AppError> {
        for statement in INITIAL_SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Catalog schema applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn acquire_channel_update_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.channel_update_lock.lock().await
    }
}
