//! In-memory storage area used by tests to exercise failure and
//! rate-limit handling without a real backend.

use crate::error::StorageError;
use crate::storage::{ChangeListener, StorageArea};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
    listeners: Mutex<Vec<ChangeListener>>,
    write_count: AtomicUsize,
    fail_writes: AtomicUsize,
    fail_reads: AtomicUsize,
    rate_limit_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail with a non-transient backend error.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` writes fail with `RateLimited`.
    pub fn rate_limit_next_writes(&self, n: usize) {
        self.rate_limit_writes.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` reads fail.
    pub fn fail_next_reads(&self, n: usize) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    fn consume_injected_failure(&self) -> Result<(), StorageError> {
        if take_one(&self.rate_limit_writes) {
            return Err(StorageError::RateLimited);
        }
        if take_one(&self.fail_writes) {
            return Err(StorageError::Unavailable("injected failure".into()));
        }
        Ok(())
    }

    fn notify(&self, key: &str, value: &Value) {
        let listeners = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
        for listener in listeners.iter() {
            listener(key, value);
        }
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl StorageArea for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        if take_one(&self.fail_reads) {
            return Err(StorageError::Unavailable("injected read failure".into()));
        }
        Ok(self
            .values
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        self.consume_injected_failure()?;
        self.values
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), value.clone());
        self.write_count.fetch_add(1, Ordering::SeqCst);
        self.notify(key, value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(key);
        self.notify(key, &Value::Null);
        Ok(())
    }

    fn subscribe(&self, listener: ChangeListener) {
        self.listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get_and_count() {
        let store = MemoryStore::new();
        store.set("k", &json!(1)).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!(1)));
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn test_injected_rate_limit_consumed_in_order() {
        let store = MemoryStore::new();
        store.rate_limit_next_writes(1);

        let err = store.set("k", &json!(1)).unwrap_err();
        assert!(matches!(err, StorageError::RateLimited));

        store.set("k", &json!(2)).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_injected_failure_is_not_transient_rate_limit() {
        let store = MemoryStore::new();
        store.fail_next_writes(1);
        let err = store.set("k", &json!(1)).unwrap_err();
        assert!(err.is_transient());
        assert!(!matches!(err, StorageError::RateLimited));
    }
}
