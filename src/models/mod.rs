pub mod category;
pub mod settings;
pub mod usage;

pub use category::{normalize_name, FavoriteCategory, LimitMode, VideoCategory};
pub use settings::{CategorySets, InterfaceSettings, LimitsSettings};
pub use usage::{date_key, round_minutes, DayUsage, UsageData, UsageRecord};
