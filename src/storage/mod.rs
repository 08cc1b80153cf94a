pub mod client;
#[cfg(test)]
pub mod memory;
pub mod sqlite;

pub use client::{StorageClient, StorageClientConfig};
pub use sqlite::{Database, SqliteArea};

use crate::error::StorageError;
use serde_json::Value;
use std::sync::Arc;

/// Change listener invoked after a successful write, with the key and the
/// new value (`Value::Null` for removals).
pub type ChangeListener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// An asynchronous-by-contract key-value area with change notifications.
///
/// Mirrors the extension storage split: one `local` area for usage data and
/// one `sync` area for settings. No ordering guarantees exist across
/// writers beyond last-write-wins per key, so consumers re-fetch whole
/// documents on change notifications instead of patching in-memory state.
pub trait StorageArea: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    fn set(&self, key: &str, value: &Value) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Register a listener for subsequent changes through this handle.
    fn subscribe(&self, listener: ChangeListener);
}

/// Typed read helper: decode the stored JSON document at `key`, or `None`
/// when absent.
pub fn get_typed<T: serde::de::DeserializeOwned>(
    area: &dyn StorageArea,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match area.get(key)? {
        None => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }),
    }
}
