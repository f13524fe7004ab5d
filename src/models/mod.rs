use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::time::Duration;
use uuid::Uuid;

/// A logical television channel merged from one or more upstream playlists.
///
/// Identity is the `(tvg_id, title)` pair; an empty `tvg_id` means the title
/// alone identifies the channel. Entries from different upstreams sharing
/// the identity collapse into one channel whose `urls` is the union.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub tvg_id: String,
    pub title: String,
    pub logo_url: String,
    pub group_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Ordered by provider_index ascending, then insertion order.
    pub urls: Vec<StreamUrl>,
}

/// One candidate upstream source for a channel.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StreamUrl {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub content: String,
    pub provider_index: i64,
    pub max_concurrency: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single entry parsed out of an M3U playlist.
///
/// All fields except `title` and `url` may be empty strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedChannel {
    pub tvg_id: String,
    pub title: String,
    pub logo_url: String,
    pub group_name: String,
    pub url: String,
}

/// One configured upstream playlist, as derived from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamSource {
    /// 1-based index of the `M3U_URL_<i>` variable this came from.
    pub provider_index: i64,
    pub playlist_url: String,
    /// Soft cap on simultaneous playbacks per URL from this upstream.
    pub max_concurrency: i64,
    pub refresh_interval: Duration,
}
