use crate::constants::{RATE_LIMIT_BACKOFF_SECS, WRITE_DEBOUNCE_MS};
use crate::error::StorageError;
use crate::storage::StorageArea;
use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, Sender};
use log::{error, warn};
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct StorageClientConfig {
    pub debounce: Duration,
    pub backoff: Duration,
}

impl Default for StorageClientConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(WRITE_DEBOUNCE_MS),
            backoff: Duration::from_secs(RATE_LIMIT_BACKOFF_SECS),
        }
    }
}

enum Op {
    Set { key: String, value: Value },
    Flush(Sender<()>),
}

struct Pending {
    value: Value,
    due: Instant,
    in_backoff: bool,
}

/// Storage area wrapper owning all retry/backoff policy in one place.
///
/// Debounced writes to the same key coalesce inside the debounce window so
/// only the newest value reaches the backend. A transient failure (rate
/// limit, backend unavailable) keeps the pending value and retries after a
/// fixed backoff; newer values arriving meanwhile supersede the retried one
/// without shortening the backoff. Immediate writes bypass the queue for
/// the additive usage path.
pub struct StorageClient {
    area: Arc<dyn StorageArea>,
    tx: Option<Sender<Op>>,
    worker: Option<JoinHandle<()>>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl StorageClient {
    pub fn new(area: Arc<dyn StorageArea>, config: StorageClientConfig) -> Self {
        let (tx, rx) = unbounded::<Op>();
        let last_error = Arc::new(Mutex::new(None));
        let worker_area = Arc::clone(&area);
        let worker_errors = Arc::clone(&last_error);

        let worker = thread::Builder::new()
            .name("storage-writer".into())
            .spawn(move || {
                let mut pending: HashMap<String, Pending> = HashMap::new();
                loop {
                    let msg = match pending.values().map(|p| p.due).min() {
                        Some(due) => {
                            let now = Instant::now();
                            if due <= now {
                                Err(RecvTimeoutError::Timeout)
                            } else {
                                rx.recv_timeout(due - now)
                            }
                        }
                        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                    };

                    match msg {
                        Ok(Op::Set { key, value }) => {
                            let due = Instant::now() + config.debounce;
                            match pending.entry(key) {
                                Entry::Occupied(mut entry) => {
                                    let p = entry.get_mut();
                                    p.value = value;
                                    // A value waiting out a backoff keeps
                                    // its retry deadline.
                                    if !p.in_backoff {
                                        p.due = due;
                                    }
                                }
                                Entry::Vacant(entry) => {
                                    entry.insert(Pending {
                                        value,
                                        due,
                                        in_backoff: false,
                                    });
                                }
                            }
                        }
                        Ok(Op::Flush(ack)) => {
                            attempt_writes(
                                &*worker_area,
                                &mut pending,
                                true,
                                config.backoff,
                                &worker_errors,
                            );
                            let _ = ack.send(());
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            attempt_writes(
                                &*worker_area,
                                &mut pending,
                                false,
                                config.backoff,
                                &worker_errors,
                            );
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            attempt_writes(
                                &*worker_area,
                                &mut pending,
                                true,
                                config.backoff,
                                &worker_errors,
                            );
                            break;
                        }
                    }
                }
            })
            .expect("failed to spawn storage writer thread");

        Self {
            area,
            tx: Some(tx),
            worker: Some(worker),
            last_error,
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.area.get(key)
    }

    /// Write through immediately, bypassing the debounce queue.
    pub fn set_now(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        self.area.set(key, value)
    }

    /// Queue a debounced write; rapid updates to the same key coalesce.
    pub fn set_debounced(&self, key: &str, value: Value) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Op::Set {
                key: key.to_string(),
                value,
            });
        }
    }

    /// Drain all pending writes synchronously (shutdown and tests).
    pub fn flush(&self) {
        if let Some(tx) = &self.tx {
            let (ack_tx, ack_rx) = bounded(1);
            if tx.send(Op::Flush(ack_tx)).is_ok() {
                let _ = ack_rx.recv();
            }
        }
    }

    /// The most recent write failure, for popup-side surfacing. Clears on
    /// read.
    pub fn take_last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
    }

    pub fn area(&self) -> &Arc<dyn StorageArea> {
        &self.area
    }
}

impl Drop for StorageClient {
    fn drop(&mut self) {
        // Disconnecting the channel makes the worker flush and exit.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn attempt_writes(
    area: &dyn StorageArea,
    pending: &mut HashMap<String, Pending>,
    force: bool,
    backoff: Duration,
    last_error: &Mutex<Option<String>>,
) {
    let now = Instant::now();
    let due_keys: Vec<String> = pending
        .iter()
        .filter(|(_, p)| force || p.due <= now)
        .map(|(k, _)| k.clone())
        .collect();

    for key in due_keys {
        let value = match pending.get(&key) {
            Some(p) => p.value.clone(),
            None => continue,
        };
        match area.set(&key, &value) {
            Ok(()) => {
                pending.remove(&key);
            }
            Err(e) if e.is_transient() => {
                warn!("write of '{key}' deferred ({e}), retrying in {backoff:?}");
                *last_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(e.to_string());
                if let Some(p) = pending.get_mut(&key) {
                    p.due = now + backoff;
                    p.in_backoff = true;
                }
            }
            Err(e) => {
                error!("write of '{key}' failed permanently: {e}");
                *last_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(e.to_string());
                pending.remove(&key);
            }
        }
    }
}
