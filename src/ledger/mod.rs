//! Concurrency ledger: how many playbacks currently hold each upstream URL.
//!
//! Backed by Redis when `REDIS_URL` is configured so the counts are shared
//! across replicas; otherwise a process-local map, which is only correct for
//! single-process deployments. Redis failures are treated as "unknown is
//! under cap": an unreachable counter store must not deny all playback, so
//! counter drift is accepted.

use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::LedgerConfig;
use crate::errors::AppError;

#[derive(Clone)]
pub struct ConcurrencyLedger {
    redis_client: Option<redis::Client>,
    local: Arc<Mutex<HashMap<String, i64>>>,
}

impl ConcurrencyLedger {
    pub fn new(config: &LedgerConfig) -> Result<Self, AppError> {
        let redis_client = match &config.redis_url {
            Some(url) => Some(redis::Client::open(url.as_str())?),
            None => None,
        };

        Ok(Self {
            redis_client,
            local: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Current reservation count for an upstream URL. Fail-open: a ledger
    /// error reports zero rather than blocking playback.
    pub async fn active(&self, key: &str) -> i64 {
        if let Some(client) = &self.redis_client {
            match Self::redis_get(client, key).await {
                Ok(count) => return count,
                Err(e) => {
                    warn!("Ledger unreachable, treating '{key}' as under cap: {e}");
                    return 0;
                }
            }
        }

        *self.local.lock().await.get(key).unwrap_or(&0)
    }

    /// Take one slot for `key`. The returned guard gives the slot back when
    /// dropped, on every exit path, exactly once.
    pub async fn reserve(&self, key: &str) -> LedgerReservation {
        if let Some(client) = &self.redis_client {
            if let Err(e) = Self::redis_incr(client, key).await {
                warn!("Failed to record reservation for '{key}': {e}");
            }
        } else {
            *self.local.lock().await.entry(key.to_string()).or_insert(0) += 1;
        }
        debug!("Reserved playback slot for {key}");

        LedgerReservation {
            ledger: self.clone(),
            key: key.to_string(),
        }
    }

    async fn release(&self, key: &str) {
        if let Some(client) = &self.redis_client {
            if let Err(e) = Self::redis_decr(client, key).await {
                warn!("Failed to release reservation for '{key}': {e}");
            }
        } else {
            let mut local = self.local.lock().await;
            if let Some(count) = local.get_mut(key) {
                *count = (*count - 1).max(0);
            }
        }
        debug!("Released playback slot for {key}");
    }

    async fn redis_get(client: &redis::Client, key: &str) -> Result<i64, redis::RedisError> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let count: Option<i64> = conn.get(key).await?;
        Ok(count.unwrap_or(0))
    }

    async fn redis_incr(client: &redis::Client, key: &str) -> Result<(), redis::RedisError> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: i64 = conn.incr(key, 1).await?;
        Ok(())
    }

    async fn redis_decr(client: &redis::Client, key: &str) -> Result<(), redis::RedisError> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: i64 = conn.decr(key, 1).await?;
        Ok(())
    }
}

/// One held playback slot. Dropping it releases the slot; the decrement is
/// spawned because `Drop` cannot await.
pub struct LedgerReservation {
    ledger: ConcurrencyLedger,
    key: String,
}

impl LedgerReservation {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LedgerReservation {
    fn drop(&mut self) {
        let ledger = self.ledger.clone();
        let key = std::mem::take(&mut self.key);
        tokio::spawn(async move {
            ledger.release(&key).await;
        });
    }
}
