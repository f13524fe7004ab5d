use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use super::Database;
use crate::errors::AppError;
use crate::models::{Channel, ParsedChannel, StreamUrl};

// Timestamps are stored as TEXT; accept both RFC3339 and the bare SQLite
// datetime format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc());
    }
    Err(sqlx::Error::Decode(
        format!("unable to parse datetime: {s}").into(),
    ))
}

fn parse_uuid(s: &str) -> Result<Uuid, sqlx::Error> {
    Uuid::parse_str(s).map_err(|e| sqlx::Error::Decode(format!("invalid uuid {s}: {e}").into()))
}

impl Database {
    /// Resolve or create the channel identified by `(tvg_id, title)` and
    /// insert or update one of its candidate URLs, in a single transaction.
    ///
    /// Idempotent: replaying the same parse leaves the catalog unchanged
    /// apart from `updated_at`. Concurrent callers serialize on the unique
    /// identity constraint, so no duplicate channel rows can appear.
    pub async fn upsert_channel_with_url(
        &self,
        entry: &ParsedChannel,
        provider_index: i64,
        max_concurrency: i64,
    ) -> Result<Uuid, AppError> {
        // Writers within this process take the update lock so SQLite never
        // sees competing write transactions from our own pool.
        let _lock = self.acquire_channel_update_lock().await;

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool().begin().await?;

        // Empty incoming metadata must not clobber values a richer upstream
        // already provided.
        sqlx::query(
            "INSERT INTO channels (id, tvg_id, title, logo_url, group_name, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (tvg_id, title) DO UPDATE SET
                 logo_url = CASE WHEN excluded.logo_url != ''
                     THEN excluded.logo_url ELSE channels.logo_url END,
                 group_name = CASE WHEN excluded.group_name != ''
                     THEN excluded.group_name ELSE channels.group_name END,
                 updated_at = excluded.updated_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&entry.tvg_id)
        .bind(&entry.title)
        .bind(&entry.logo_url)
        .bind(&entry.group_name)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let channel_id: String =
            sqlx::query_scalar("SELECT id FROM channels WHERE tvg_id = ? AND title = ?")
                .bind(&entry.tvg_id)
                .bind(&entry.title)
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query(
            "INSERT INTO stream_urls
                 (id, channel_id, content, provider_index, max_concurrency, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (channel_id, content) DO UPDATE SET
                 provider_index = excluded.provider_index,
                 max_concurrency = excluded.max_concurrency,
                 updated_at = excluded.updated_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&channel_id)
        .bind(&entry.url)
        .bind(provider_index)
        .bind(max_concurrency)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            "Upserted channel '{}' (tvg-id '{}') url {} from provider {}",
            entry.title, entry.tvg_id, entry.url, provider_index
        );

        Ok(parse_uuid(&channel_id)?)
    }

    pub async fn get_channel_by_title(&self, title: &str) -> Result<Option<Channel>, AppError> {
        let row = sqlx::query(
            "SELECT id, tvg_id, title, logo_url, group_name, created_at, updated_at
             FROM channels WHERE title = ?",
        )
        .bind(title)
        .fetch_optional(self.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut channel = Self::channel_from_row(&row)?;
        channel.urls = self.channel_urls(channel.id).await?;
        Ok(Some(channel))
    }

    /// All channels with their URLs populated, ordered by title ascending.
    pub async fn list_channels(&self) -> Result<Vec<Channel>, AppError> {
        let rows = sqlx::query(
            "SELECT id, tvg_id, title, logo_url, group_name, created_at, updated_at
             FROM channels ORDER BY title ASC",
        )
        .fetch_all(self.pool())
        .await?;

        let mut channels = Vec::with_capacity(rows.len());
        for row in rows {
            let mut channel = Self::channel_from_row(&row)?;
            channel.urls = self.channel_urls(channel.id).await?;
            channels.push(channel);
        }

        Ok(channels)
    }

    async fn channel_urls(&self, channel_id: Uuid) -> Result<Vec<StreamUrl>, AppError> {
        let rows = sqlx::query(
            "SELECT id, channel_id, content, provider_index, max_concurrency,
                    created_at, updated_at
             FROM stream_urls WHERE channel_id = ?
             ORDER BY provider_index ASC, rowid ASC",
        )
        .bind(channel_id.to_string())
        .fetch_all(self.pool())
        .await?;

        let mut urls = Vec::with_capacity(rows.len());
        for row in rows {
            urls.push(StreamUrl {
                id: parse_uuid(&row.get::<String, _>("id"))?,
                channel_id: parse_uuid(&row.get::<String, _>("channel_id"))?,
                content: row.get("content"),
                provider_index: row.get("provider_index"),
                max_concurrency: row.get("max_concurrency"),
                created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
                updated_at: parse_datetime(&row.get::<String, _>("updated_at"))?,
            });
        }

        Ok(urls)
    }

    fn channel_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Channel, AppError> {
        Ok(Channel {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            tvg_id: row.get("tvg_id"),
            title: row.get("title"),
            logo_url: row.get("logo_url"),
            group_name: row.get("group_name"),
            created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
            updated_at: parse_datetime(&row.get::<String, _>("updated_at"))?,
            urls: Vec::new(),
        })
    }
}
