use crate::error::StorageError;
use crate::storage::{ChangeListener, StorageArea};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kv_store (
    area TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    PRIMARY KEY (area, key)
);
";

/// Writes per minute the sync area accepts before reporting a rate limit,
/// matching the browser sync store's sustained write quota.
const SYNC_WRITES_PER_MINUTE: usize = 120;

/// The backing SQLite database holding both storage areas.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Database: connection mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Which logical area a handle addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaKind {
    Local,
    Sync,
}

impl AreaKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Sync => "sync",
        }
    }
}

/// One storage area (`local` or `sync`) over the shared database.
///
/// The sync area enforces the browser sync store's write quota: writes past
/// the per-minute budget fail with `StorageError::RateLimited` and it is the
/// storage client's job to back off and retry.
pub struct SqliteArea {
    db: Arc<Database>,
    area: AreaKind,
    listeners: Mutex<Vec<ChangeListener>>,
    recent_writes: Mutex<VecDeque<Instant>>,
}

impl SqliteArea {
    pub fn new(db: Arc<Database>, area: AreaKind) -> Self {
        Self {
            db,
            area,
            listeners: Mutex::new(Vec::new()),
            recent_writes: Mutex::new(VecDeque::new()),
        }
    }

    pub fn local(db: Arc<Database>) -> Self {
        Self::new(db, AreaKind::Local)
    }

    pub fn sync(db: Arc<Database>) -> Self {
        Self::new(db, AreaKind::Sync)
    }

    fn check_write_quota(&self) -> Result<(), StorageError> {
        if self.area != AreaKind::Sync {
            return Ok(());
        }
        let mut recent = self
            .recent_writes
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        while recent
            .front()
            .is_some_and(|t| now.duration_since(*t) > Duration::from_secs(60))
        {
            recent.pop_front();
        }
        if recent.len() >= SYNC_WRITES_PER_MINUTE {
            return Err(StorageError::RateLimited);
        }
        recent.push_back(now);
        Ok(())
    }

    fn notify(&self, key: &str, value: &Value) {
        let listeners = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
        for listener in listeners.iter() {
            listener(key, value);
        }
    }
}

impl StorageArea for SqliteArea {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let conn = self.db.lock_conn();
        let mut stmt = conn.prepare("SELECT value FROM kv_store WHERE area = ?1 AND key = ?2")?;
        let mut rows = stmt.query(params![self.area.as_str(), key])?;

        match rows.next()? {
            Some(row) => {
                let raw: String = row.get(0)?;
                serde_json::from_str(&raw).map(Some).map_err(|e| {
                    StorageError::Corrupt {
                        key: key.to_string(),
                        reason: e.to_string(),
                    }
                })
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        self.check_write_quota()?;
        {
            let conn = self.db.lock_conn();
            conn.execute(
                "INSERT INTO kv_store (area, key, value, updated_at)
                 VALUES (?1, ?2, ?3, strftime('%s', 'now'))
                 ON CONFLICT (area, key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at",
                params![self.area.as_str(), key, value.to_string()],
            )?;
        }
        self.notify(key, value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        {
            let conn = self.db.lock_conn();
            conn.execute(
                "DELETE FROM kv_store WHERE area = ?1 AND key = ?2",
                params![self.area.as_str(), key],
            )?;
        }
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
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[test]
    fn test_database_opens_and_creates_file() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let _db = Database::open(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_set_get_round_trip() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let area = SqliteArea::local(db);

        assert!(area.get("missing").unwrap().is_none());

        let doc = json!({ "a": 1, "b": [true, null] });
        area.set("doc", &doc).unwrap();
        assert_eq!(area.get("doc").unwrap(), Some(doc));
    }

    #[test]
    fn test_set_overwrites_last_write_wins() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let area = SqliteArea::local(db);

        area.set("k", &json!(1)).unwrap();
        area.set("k", &json!(2)).unwrap();
        assert_eq!(area.get("k").unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_remove() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let area = SqliteArea::local(db);

        area.set("k", &json!("v")).unwrap();
        area.remove("k").unwrap();
        assert!(area.get("k").unwrap().is_none());
    }

    #[test]
    fn test_areas_are_isolated() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let local = SqliteArea::local(Arc::clone(&db));
        let sync = SqliteArea::sync(db);

        local.set("k", &json!("local")).unwrap();
        sync.set("k", &json!("sync")).unwrap();

        assert_eq!(local.get("k").unwrap(), Some(json!("local")));
        assert_eq!(sync.get("k").unwrap(), Some(json!("sync")));
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        {
            let db = Arc::new(Database::open(&db_path).unwrap());
            SqliteArea::local(db).set("k", &json!(42)).unwrap();
        }
        let db = Arc::new(Database::open(&db_path).unwrap());
        assert_eq!(SqliteArea::local(db).get("k").unwrap(), Some(json!(42)));
    }

    #[test]
    fn test_subscribers_see_writes() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let area = SqliteArea::sync(db);

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        area.subscribe(Arc::new(move |key, value| {
            assert_eq!(key, "k");
            assert_eq!(value, &json!("v"));
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));

        area.set("k", &json!("v")).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sync_area_rate_limits_after_quota() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let area = SqliteArea::sync(db);

        for i in 0..SYNC_WRITES_PER_MINUTE {
            area.set("k", &json!(i)).unwrap();
        }
        let err = area.set("k", &json!("over")).unwrap_err();
        assert!(matches!(err, StorageError::RateLimited));
    }

    #[test]
    fn test_local_area_has_no_write_quota() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let area = SqliteArea::local(db);

        for i in 0..(SYNC_WRITES_PER_MINUTE + 10) {
            area.set("k", &json!(i)).unwrap();
        }
    }
}
