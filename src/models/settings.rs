use crate::constants::DEFAULT_TOTAL_TIME_LIMIT_MINUTES;
use crate::models::category::{FavoriteCategory, LimitMode, VideoCategory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-mode category lists. Video-count and time-category modes keep
/// separate lists so switching modes never rewrites the other's limits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategorySets {
    #[serde(rename = "video-count", default)]
    pub video_count: Vec<VideoCategory>,
    #[serde(rename = "time-category", default)]
    pub time_category: Vec<VideoCategory>,
}

impl CategorySets {
    pub fn for_mode(&self, mode: LimitMode) -> &[VideoCategory] {
        match mode {
            LimitMode::VideoCount => &self.video_count,
            LimitMode::TimeCategory => &self.time_category,
            LimitMode::TimeTotal => &[],
        }
    }

    /// Mutable list for a category mode; `None` for time-total mode, which
    /// carries no categories.
    pub fn for_mode_mut(&mut self, mode: LimitMode) -> Option<&mut Vec<VideoCategory>> {
        match mode {
            LimitMode::VideoCount => Some(&mut self.video_count),
            LimitMode::TimeCategory => Some(&mut self.time_category),
            LimitMode::TimeTotal => None,
        }
    }

    pub fn all_mut(&mut self) -> impl Iterator<Item = &mut VideoCategory> {
        self.video_count.iter_mut().chain(self.time_category.iter_mut())
    }
}

/// The singleton limits document, persisted in the sync storage area.
///
/// `total_time_watched_today` and the per-category `*_today` counters are
/// derived by joining the usage store at read time; the persisted values
/// are never the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsSettings {
    pub is_limits_enabled: bool,
    pub active_mode: LimitMode,
    pub categories: CategorySets,
    #[serde(default)]
    pub favorite_categories: Vec<FavoriteCategory>,
    pub total_daily_time_limit: u32,
    #[serde(default)]
    pub total_time_watched_today: f64,
    #[serde(default)]
    pub last_disabled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_time_mode_activated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_time_watched_at_activation: Option<f64>,
}

impl Default for LimitsSettings {
    fn default() -> Self {
        Self {
            is_limits_enabled: false,
            active_mode: LimitMode::VideoCount,
            categories: CategorySets::default(),
            favorite_categories: Vec::new(),
            total_daily_time_limit: DEFAULT_TOTAL_TIME_LIMIT_MINUTES,
            total_time_watched_today: 0.0,
            last_disabled_at: None,
            total_time_mode_activated_at: None,
            total_time_watched_at_activation: None,
        }
    }
}

impl LimitsSettings {
    pub fn active_categories(&self) -> impl Iterator<Item = &VideoCategory> {
        self.categories
            .for_mode(self.active_mode)
            .iter()
            .filter(|c| c.is_active)
    }

    pub fn find_category(&self, mode: LimitMode, id: &str) -> Option<&VideoCategory> {
        self.categories.for_mode(mode).iter().find(|c| c.id == id)
    }
}

/// Interface show/hide toggles, persisted under `youtube_settings`.
/// Applying these to the page is the feature-toggle layer's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceSettings {
    pub hide_home_feed: bool,
    pub hide_comments: bool,
    pub hide_shorts: bool,
    pub hide_sidebar: bool,
    pub hide_end_screen_cards: bool,
    pub disable_autoplay: bool,
}

impl Default for InterfaceSettings {
    fn default() -> Self {
        Self {
            hide_home_feed: false,
            hide_comments: false,
            hide_shorts: false,
            hide_sidebar: false,
            hide_end_screen_cards: false,
            disable_autoplay: false,
        }
    }
}
