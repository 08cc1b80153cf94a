use crate::constants::{TOTAL_TIME_KEY, USAGE_DATA_KEY};
use crate::models::usage::{round_minutes, UsageData, UsageRecord};
use crate::storage::{get_typed, StorageClient};
use chrono::{Local, NaiveDate};
use log::{info, warn};
use std::sync::{Arc, Mutex, MutexGuard};

/// Daily usage ledger over the local storage area.
///
/// The in-memory document is authoritative for the running session: a
/// failed write is logged and the next successful write (each mutation
/// rewrites the whole document) repairs persistence. Counters only ever
/// advance additively, which keeps the cross-context conflict surface to
/// last-write-wins on an append-mostly document.
pub struct UsageStore {
    client: Arc<StorageClient>,
    data: Mutex<UsageData>,
}

impl UsageStore {
    /// Read the persisted document, apply the retention sweep, and persist
    /// the sweep if it removed anything. A corrupt or unreadable document
    /// degrades to an empty one.
    pub fn load(client: Arc<StorageClient>) -> Self {
        Self::load_on(client, Local::now().date_naive())
    }

    pub fn load_on(client: Arc<StorageClient>, today: NaiveDate) -> Self {
        let mut data = match get_typed::<UsageData>(client.area().as_ref(), USAGE_DATA_KEY) {
            Ok(Some(data)) => data,
            Ok(None) => UsageData::default(),
            Err(e) => {
                warn!("usage data unreadable, starting empty: {e}");
                UsageData::default()
            }
        };

        let swept = data.sweep(today);
        let store = Self {
            client,
            data: Mutex::new(data),
        };
        if swept {
            info!("usage retention sweep removed stale days");
            store.persist(&store.lock_data());
        }
        store
    }

    fn lock_data(&self) -> MutexGuard<'_, UsageData> {
        match self.data.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("UsageStore: data mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn persist(&self, data: &UsageData) {
        let value = match serde_json::to_value(data) {
            Ok(v) => v,
            Err(e) => {
                warn!("usage data not serializable: {e}");
                return;
            }
        };
        if let Err(e) = self.client.set_now(USAGE_DATA_KEY, &value) {
            warn!("usage flush failed, in-memory counters kept: {e}");
        }
    }

    /// Count one watched video for (today, normalized name). Returns the
    /// new count.
    pub fn record_video_watched(&self, name: &str) -> u32 {
        self.record_video_watched_on(Local::now().date_naive(), name)
    }

    pub fn record_video_watched_on(&self, date: NaiveDate, name: &str) -> u32 {
        let mut data = self.lock_data();
        let record = data.record_mut(date, name);
        record.video_count += 1;
        let count = record.video_count;
        self.persist(&data);
        count
    }

    /// Add watched minutes for (today, normalized name). Minutes are
    /// rounded to two decimals before storage. Returns the new total.
    pub fn add_watch_time(&self, name: &str, minutes: f64) -> f64 {
        self.add_watch_time_on(Local::now().date_naive(), name, minutes)
    }

    pub fn add_watch_time_on(&self, date: NaiveDate, name: &str, minutes: f64) -> f64 {
        let mut data = self.lock_data();
        let record = data.record_mut(date, name);
        record.time_watched = round_minutes(record.time_watched + minutes);
        let total = record.time_watched;
        self.persist(&data);
        total
    }

    /// Add watched minutes to the reserved global bucket (time-total mode).
    pub fn add_total_watch_time(&self, minutes: f64) -> f64 {
        self.add_watch_time(TOTAL_TIME_KEY, minutes)
    }

    pub fn usage_today(&self, name: &str) -> UsageRecord {
        self.usage_on(Local::now().date_naive(), name)
    }

    pub fn usage_on(&self, date: NaiveDate, name: &str) -> UsageRecord {
        self.lock_data()
            .record(date, name)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of all of today's records, for popup summaries.
    pub fn day_today(&self) -> crate::models::DayUsage {
        self.day_on(Local::now().date_naive())
    }

    pub fn day_on(&self, date: NaiveDate) -> crate::models::DayUsage {
        self.lock_data().day(date).cloned().unwrap_or_default()
    }

    /// Minutes watched today across every bucket, global included.
    pub fn total_time_today(&self) -> f64 {
        self.total_time_on(Local::now().date_naive())
    }

    pub fn total_time_on(&self, date: NaiveDate) -> f64 {
        let data = self.lock_data();
        let sum = data
            .day(date)
            .map(|day| day.values().map(|r| r.time_watched).sum())
            .unwrap_or(0.0);
        round_minutes(sum)
    }

    /// Stamp the limits a category held at deletion onto today's record,
    /// so a later same-named category cannot exceed them.
    pub fn snapshot_locked_limits(&self, name: &str, count_limit: u32, time_limit: u32) {
        self.snapshot_locked_limits_on(Local::now().date_naive(), name, count_limit, time_limit)
    }

    pub fn snapshot_locked_limits_on(
        &self,
        date: NaiveDate,
        name: &str,
        count_limit: u32,
        time_limit: u32,
    ) {
        let mut data = self.lock_data();
        let record = data.record_mut(date, name);
        record.locked_limit = Some(count_limit);
        record.locked_time_limit = Some(time_limit);
        self.persist(&data);
    }

    /// Locked-limit stamps for (today, name), if a locked category with
    /// this name was deleted today.
    pub fn locked_limits_today(&self, name: &str) -> (Option<u32>, Option<u32>) {
        self.locked_limits_on(Local::now().date_naive(), name)
    }

    pub fn locked_limits_on(&self, date: NaiveDate, name: &str) -> (Option<u32>, Option<u32>) {
        self.lock_data()
            .record(date, name)
            .map(|r| (r.locked_limit, r.locked_time_limit))
            .unwrap_or((None, None))
    }
}
