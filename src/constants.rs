/// Days of usage history kept before the load-time sweep drops a day.
pub const USAGE_RETENTION_DAYS: i64 = 7;

/// Minimum/maximum daily video count limit for a category.
pub const MIN_VIDEO_COUNT_LIMIT: u32 = 1;
pub const MAX_VIDEO_COUNT_LIMIT: u32 = 100;

/// Minimum/maximum daily time limit for a category, in minutes.
pub const MIN_TIME_LIMIT_MINUTES: u32 = 5;
pub const MAX_TIME_LIMIT_MINUTES: u32 = 480;

/// Maximum category name length
pub const MAX_CATEGORY_NAME_LEN: usize = 50;

/// Default total daily time limit in minutes (time-total mode).
pub const DEFAULT_TOTAL_TIME_LIMIT_MINUTES: u32 = 120;

/// Interval between player pause/play samples, in seconds.
pub const SAMPLE_INTERVAL_SECS: u64 = 10;

/// Elapsed segments shorter than this are treated as sampling noise and
/// not flushed when the player is found paused.
pub const MIN_FLUSH_SECS: f64 = 10.0;

/// Debounce window for coalescing settings writes, in milliseconds.
pub const WRITE_DEBOUNCE_MS: u64 = 300;

/// Backoff before retrying a rate-limited sync-area write, in seconds.
pub const RATE_LIMIT_BACKOFF_SECS: u64 = 60;

/// Usage key that accumulates total watch time across all categories.
pub const TOTAL_TIME_KEY: &str = "__total__";

/// Sync-area storage keys.
pub const LIMITS_SETTINGS_KEY: &str = "youtube_limits_settings";
pub const INTERFACE_SETTINGS_KEY: &str = "youtube_settings";

/// Local-area storage key for the per-day usage document.
pub const USAGE_DATA_KEY: &str = "youtube_usage_data";
