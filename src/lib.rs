pub mod commands;
pub mod constants;
pub mod controller;
pub mod engine;
pub mod error;
pub mod messaging;
pub mod models;
pub mod native_host;
pub mod storage;
pub mod stores;
pub mod tracker;

use crate::error::StorageError;
use crate::messaging::MessageBus;
use crate::storage::{Database, SqliteArea, StorageClient, StorageClientConfig};
use crate::stores::{LimitsStore, SettingsStore, UsageStore};
use std::path::Path;
use std::sync::Arc;

/// The assembled engine: both storage areas, the stores over them, and the
/// message bus the contexts share.
pub struct App {
    pub usage: Arc<UsageStore>,
    pub limits: Arc<LimitsStore>,
    pub settings: Arc<SettingsStore>,
    pub bus: MessageBus,
}

impl App {
    pub fn init(db_path: &Path) -> Result<Self, StorageError> {
        let db = Arc::new(Database::open(db_path)?);
        let local_client = Arc::new(StorageClient::new(
            Arc::new(SqliteArea::local(Arc::clone(&db))),
            StorageClientConfig::default(),
        ));
        let sync_client = Arc::new(StorageClient::new(
            Arc::new(SqliteArea::sync(db)),
            StorageClientConfig::default(),
        ));

        let bus = MessageBus::new();
        let usage = Arc::new(UsageStore::load(local_client));
        let limits = Arc::new(LimitsStore::new(
            Arc::clone(&sync_client),
            Arc::clone(&usage),
            bus.clone(),
        ));
        let settings = Arc::new(SettingsStore::new(sync_client, bus.clone()));

        Ok(Self {
            usage,
            limits,
            settings,
            bus,
        })
    }

    /// Drain pending debounced writes (shutdown).
    pub fn flush(&self) {
        self.limits.flush();
        self.settings.flush();
    }
}
