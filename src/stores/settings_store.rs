use crate::constants::INTERFACE_SETTINGS_KEY;
use crate::messaging::{Message, MessageBus};
use crate::models::InterfaceSettings;
use crate::storage::{get_typed, StorageClient};
use log::warn;
use std::sync::{Arc, Mutex};

/// Interface-toggle settings over the sync storage area. Plain CRUD: the
/// DOM application of the toggles lives in the extension's feature-toggle
/// layer, which reloads on the `SettingsUpdated` broadcast.
///
/// Same consistency discipline as the limits store: the in-memory copy is
/// authoritative between external change notifications.
pub struct SettingsStore {
    client: Arc<StorageClient>,
    bus: MessageBus,
    cached: Arc<Mutex<Option<InterfaceSettings>>>,
}

impl SettingsStore {
    pub fn new(client: Arc<StorageClient>, bus: MessageBus) -> Self {
        let cached: Arc<Mutex<Option<InterfaceSettings>>> = Arc::new(Mutex::new(None));

        let listener_cache = Arc::clone(&cached);
        client.area().subscribe(Arc::new(move |key, value| {
            if key != INTERFACE_SETTINGS_KEY {
                return;
            }
            match serde_json::from_value::<InterfaceSettings>(value.clone()) {
                Ok(settings) => {
                    *listener_cache.lock().unwrap_or_else(|p| p.into_inner()) = Some(settings);
                }
                Err(e) => warn!("ignoring unparseable interface settings change: {e}"),
            }
        }));

        Self {
            client,
            bus,
            cached,
        }
    }

    pub fn load(&self) -> InterfaceSettings {
        if let Some(settings) = self
            .cached
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
        {
            return settings;
        }
        match get_typed::<InterfaceSettings>(self.client.area().as_ref(), INTERFACE_SETTINGS_KEY) {
            Ok(Some(settings)) => {
                *self.cached.lock().unwrap_or_else(|p| p.into_inner()) = Some(settings.clone());
                settings
            }
            Ok(None) => InterfaceSettings::default(),
            Err(e) => {
                warn!("interface settings unreadable, using defaults: {e}");
                InterfaceSettings::default()
            }
        }
    }

    pub fn save(&self, settings: &InterfaceSettings) {
        *self.cached.lock().unwrap_or_else(|p| p.into_inner()) = Some(settings.clone());
        match serde_json::to_value(settings) {
            Ok(value) => self.client.set_debounced(INTERFACE_SETTINGS_KEY, value),
            Err(e) => warn!("interface settings not serializable: {e}"),
        }
        self.bus
            .broadcast(&Message::SettingsUpdated(settings.clone()));
    }

    pub fn flush(&self) {
        self.client.flush();
    }
}
