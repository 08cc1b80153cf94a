use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Which limit dimension is being enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitMode {
    #[serde(rename = "video-count")]
    VideoCount,
    #[serde(rename = "time-category")]
    TimeCategory,
    #[serde(rename = "time-total")]
    TimeTotal,
}

impl LimitMode {
    /// Modes that carry their own category lists.
    pub fn is_category_mode(self) -> bool {
        matches!(self, Self::VideoCount | Self::TimeCategory)
    }
}

/// A user-defined bucket with its own daily quota.
///
/// `id` is stable for the lifetime of the category; `name` is the durable
/// join key to usage history (see [`normalize_name`]). The `*_today`
/// counters are derived from the usage store at read time and must never be
/// trusted as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoCategory {
    pub id: String,
    pub name: String,
    pub color: String,
    pub daily_limit_count: u32,
    pub daily_time_limit: u32,
    #[serde(default)]
    pub videos_watched_today: u32,
    #[serde(default)]
    pub time_watched_today: f64,
    pub is_active: bool,
}

impl VideoCategory {
    pub fn new(name: &str, color: &str, daily_limit_count: u32, daily_time_limit: u32) -> Self {
        Self {
            id: next_id("cat"),
            name: name.to_string(),
            color: color.to_string(),
            daily_limit_count,
            daily_time_limit,
            videos_watched_today: 0,
            time_watched_today: 0.0,
            is_active: true,
        }
    }

    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

/// A saved category template, decoupled from any live category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteCategory {
    pub id: String,
    pub name: String,
    pub color: String,
    pub daily_limit_count: u32,
    pub daily_time_limit: u32,
    pub created_at: DateTime<Utc>,
}

impl FavoriteCategory {
    pub fn from_category(category: &VideoCategory, now: DateTime<Utc>) -> Self {
        Self {
            id: next_id("fav"),
            name: category.name.clone(),
            color: category.color.clone(),
            daily_limit_count: category.daily_limit_count,
            daily_time_limit: category.daily_time_limit,
            created_at: now,
        }
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-unique id with a readable prefix.
fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_millis())
}

/// Normalize a category name into the durable usage join key: lowercased,
/// trimmed, internal whitespace runs collapsed to a single space.
///
/// Deleting and recreating a category whose name normalizes to the same key
/// restores its usage history for the day.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
