use thiserror::Error;

/// Storage-layer error type.
///
/// The sync area mirrors the browser's synced storage, which throttles
/// writes; `RateLimited` is the signal the storage client retries on.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("storage write rate limited")]
    RateLimited,

    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("malformed stored value for '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// True for errors the storage client should retry after backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Unavailable(_))
    }
}

/// Application error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("'{name}' already exists")]
    AlreadyExists { name: String },

    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("Invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("'{name}' is locked for today: {reason}")]
    LimitLocked { name: String, reason: String },

    #[error("Limits can only be disabled once per day")]
    DisableUnavailable,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Internal(String),
}

// For the native-messaging surface - errors cross as plain strings
impl From<AppError> for String {
    fn from(e: AppError) -> Self {
        e.to_string()
    }
}
