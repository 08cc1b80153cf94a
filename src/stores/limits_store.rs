use crate::constants::LIMITS_SETTINGS_KEY;
use crate::messaging::{Message, MessageBus};
use crate::models::{normalize_name, LimitsSettings};
use crate::storage::{get_typed, StorageClient};
use crate::stores::UsageStore;
use log::warn;
use std::sync::{Arc, Mutex};

/// Limits settings over the sync storage area.
///
/// The in-memory copy is authoritative between change notifications:
/// saves update it immediately and persist through the debounced client,
/// and an external write (another context syncing in) replaces it whole
/// rather than being patched in. Derived usage counters are re-joined on
/// every load and never trusted from the persisted document.
pub struct LimitsStore {
    client: Arc<StorageClient>,
    usage: Arc<UsageStore>,
    bus: MessageBus,
    cached: Arc<Mutex<Option<LimitsSettings>>>,
}

impl LimitsStore {
    pub fn new(client: Arc<StorageClient>, usage: Arc<UsageStore>, bus: MessageBus) -> Self {
        let cached: Arc<Mutex<Option<LimitsSettings>>> = Arc::new(Mutex::new(None));

        // External writers replace the full in-memory state.
        let listener_cache = Arc::clone(&cached);
        client.area().subscribe(Arc::new(move |key, value| {
            if key != LIMITS_SETTINGS_KEY {
                return;
            }
            match serde_json::from_value::<LimitsSettings>(value.clone()) {
                Ok(settings) => {
                    *listener_cache.lock().unwrap_or_else(|p| p.into_inner()) = Some(settings);
                }
                Err(e) => warn!("ignoring unparseable limits settings change: {e}"),
            }
        }));

        Self {
            client,
            usage,
            bus,
            cached,
        }
    }

    /// Current settings, hydrated with today's usage. Storage is read only
    /// on cold start; afterwards the cached copy (kept fresh by saves and
    /// change notifications) is used. Read failures degrade to the cache,
    /// then to defaults.
    pub fn load(&self) -> LimitsSettings {
        let cached = self
            .cached
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        let mut settings = match cached {
            Some(settings) => settings,
            None => {
                match get_typed::<LimitsSettings>(self.client.area().as_ref(), LIMITS_SETTINGS_KEY)
                {
                    Ok(Some(settings)) => {
                        *self.cached.lock().unwrap_or_else(|p| p.into_inner()) =
                            Some(settings.clone());
                        settings
                    }
                    Ok(None) => LimitsSettings::default(),
                    Err(e) => {
                        warn!("limits settings unreadable, using defaults: {e}");
                        LimitsSettings::default()
                    }
                }
            }
        };
        self.hydrate(&mut settings);
        settings
    }

    /// Join today's usage into the derived per-category and global
    /// counters.
    pub fn hydrate(&self, settings: &mut LimitsSettings) {
        for category in settings.categories.all_mut() {
            let record = self.usage.usage_today(&normalize_name(&category.name));
            category.videos_watched_today = record.video_count;
            category.time_watched_today = record.time_watched;
        }
        settings.total_time_watched_today = self.usage.total_time_today();
    }

    /// Adopt the new state, persist it (debounced, coalescing), and
    /// broadcast the change.
    pub fn save(&self, settings: &LimitsSettings) {
        *self.cached.lock().unwrap_or_else(|p| p.into_inner()) = Some(settings.clone());
        match serde_json::to_value(settings) {
            Ok(value) => self.client.set_debounced(LIMITS_SETTINGS_KEY, value),
            Err(e) => warn!("limits settings not serializable: {e}"),
        }
        self.bus.broadcast(&Message::LimitsUpdated(settings.clone()));
    }

    /// Drain any pending debounced save (shutdown and tests).
    pub fn flush(&self) {
        self.client.flush();
    }

    /// The most recent storage write failure, surfaced popup-side only.
    pub fn take_last_write_error(&self) -> Option<String> {
        self.client.take_last_error()
    }

    pub fn usage(&self) -> &Arc<UsageStore> {
        &self.usage
    }
}
