use crate::constants::USAGE_RETENTION_DAYS;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Usage accumulated for one (day, normalized category name) pair.
///
/// `locked_limit` / `locked_time_limit` are stamped when a locked category
/// is deleted, so a later same-named category cannot exceed them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    #[serde(default)]
    pub video_count: u32,
    #[serde(default)]
    pub time_watched: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_time_limit: Option<u32>,
}

/// All records for one day, keyed by normalized category name.
pub type DayUsage = BTreeMap<String, UsageRecord>;

/// The persisted usage document: `{ "YYYY-MM-DD": { name: record } }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageData(pub BTreeMap<String, DayUsage>);

impl UsageData {
    pub fn record(&self, date: NaiveDate, name: &str) -> Option<&UsageRecord> {
        self.0.get(&date_key(date)).and_then(|day| day.get(name))
    }

    /// Record for (date, name), created on first access.
    pub fn record_mut(&mut self, date: NaiveDate, name: &str) -> &mut UsageRecord {
        self.0
            .entry(date_key(date))
            .or_default()
            .entry(name.to_string())
            .or_default()
    }

    pub fn day(&self, date: NaiveDate) -> Option<&DayUsage> {
        self.0.get(&date_key(date))
    }

    /// Drop days older than the retention window. Returns true if any day
    /// was removed. Unparseable date keys are dropped too.
    pub fn sweep(&mut self, today: NaiveDate) -> bool {
        let cutoff = today - Duration::days(USAGE_RETENTION_DAYS);
        let before = self.0.len();
        self.0.retain(|key, _| {
            NaiveDate::parse_from_str(key, DATE_FORMAT)
                .map(|d| d >= cutoff)
                .unwrap_or(false)
        });
        self.0.len() != before
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Canonical date key used throughout the usage document.
pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Round minutes to two decimal places before storage, so stored values
/// stay stable and comparisons stay deterministic across readers.
pub fn round_minutes(minutes: f64) -> f64 {
    (minutes * 100.0).round() / 100.0
}
