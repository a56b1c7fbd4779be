//! Error taxonomy shared by the stores, the coordinator, the queue and the
//! interception layer.

use thiserror::Error;

/// Errors produced by the sync engine.
///
/// Variants carry strings rather than source errors so results can be fanned
/// out to several waiters (coalesced downloads, joined replays).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
  /// No connectivity, or the request timed out
  #[error("Network unavailable: {0}")]
  NetworkUnavailable(String),

  /// The storage medium rejected a write
  #[error("Storage quota exceeded: {needed} bytes needed, quota is {quota} bytes")]
  StorageQuotaExceeded { needed: u64, quota: u64 },

  /// A stored entry could not be read back
  #[error("Stored entry {id} is corrupt: {reason}")]
  StorageCorrupt { id: String, reason: String },

  /// A queued mutation exceeded its retry ceiling
  #[error("Change {id} failed to sync after {attempts} attempts")]
  ReplayExhausted { id: i64, attempts: u32 },

  /// A cached payload no longer matches the remote copy
  #[error("Content {id} changed: expected hash {expected}, got {actual}")]
  IntegrityMismatch {
    id: String,
    expected: String,
    actual: String,
  },

  /// The server refused the request; retrying will not help
  #[error("Request rejected with status {status}: {message}")]
  Rejected { status: u16, message: String },

  /// Content was requested offline and is not in the cache
  #[error("{id} is not available offline")]
  NotCachedOffline { id: String },

  /// Any other storage failure
  #[error("Storage error: {0}")]
  Storage(String),

  /// Serialization/Deserialization error
  #[error("Serialization error: {0}")]
  Serialization(String),

  /// Configuration error
  #[error("Configuration error: {0}")]
  Config(String),
}

/// Result type alias for sync engine operations
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
  /// Whether a failed network operation is worth retrying later.
  pub fn is_retryable(&self) -> bool {
    match self {
      SyncError::NetworkUnavailable(_) => true,
      SyncError::Rejected { status, .. } => *status >= 500 || *status == 408 || *status == 429,
      _ => false,
    }
  }

  /// Whether the underlying storage medium ran out of room.
  pub fn is_quota(&self) -> bool {
    matches!(self, SyncError::StorageQuotaExceeded { .. })
  }
}

impl From<rusqlite::Error> for SyncError {
  fn from(e: rusqlite::Error) -> Self {
    if let rusqlite::Error::SqliteFailure(err, _) = &e {
      if err.code == rusqlite::ErrorCode::DiskFull {
        return SyncError::StorageQuotaExceeded { needed: 0, quota: 0 };
      }
    }
    SyncError::Storage(e.to_string())
  }
}

impl From<serde_json::Error> for SyncError {
  fn from(e: serde_json::Error) -> Self {
    SyncError::Serialization(e.to_string())
  }
}

impl From<reqwest::Error> for SyncError {
  fn from(e: reqwest::Error) -> Self {
    match e.status() {
      Some(status) => SyncError::Rejected {
        status: status.as_u16(),
        message: e.to_string(),
      },
      None => SyncError::NetworkUnavailable(e.to_string()),
    }
  }
}
