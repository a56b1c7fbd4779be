pub mod schema;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::error::{Result, SyncError};

const PARTITION_VERSION_KEY: &str = "partition_version";

/// Database connection wrapper shared by every persisted partition.
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create the database at `path`, or at the default location.
  ///
  /// `cache_version` is compared against the stored partition version; a
  /// mismatch clears every partition at once.
  pub fn open(path: Option<&Path>, cache_version: u32) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| SyncError::Storage(format!("Failed to create database directory: {}", e)))?;
    }

    let conn = Connection::open(&path).map_err(|e| {
      SyncError::Storage(format!(
        "Failed to open database at {}: {}",
        path.display(),
        e
      ))
    })?;

    let db = Self {
      conn: Mutex::new(conn),
    };
    db.run_migrations(cache_version)?;

    Ok(db)
  }

  /// Open a private in-memory database (tests, ephemeral sessions).
  pub fn open_in_memory(cache_version: u32) -> Result<Self> {
    let conn = Connection::open_in_memory()?;
    let db = Self {
      conn: Mutex::new(conn),
    };
    db.run_migrations(cache_version)?;
    Ok(db)
  }

  /// Get the default database path
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| SyncError::Config("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("offsync").join("offsync.db"))
  }

  /// Run database migrations and apply the partition version.
  fn run_migrations(&self, cache_version: u32) -> Result<()> {
    let conn = self.conn()?;

    conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| SyncError::Storage(format!("Failed to run migrations: {}", e)))?;

    let stored: Option<String> = conn
      .query_row(
        "SELECT value FROM meta WHERE key = ?",
        params![PARTITION_VERSION_KEY],
        |row| row.get(0),
      )
      .optional()?;

    let wanted = cache_version.to_string();
    match stored {
      Some(v) if v == wanted => {}
      Some(v) => {
        let discarded: i64 =
          conn.query_row("SELECT COUNT(*) FROM queue", [], |row| row.get(0))?;
        warn!(
          from = %v,
          to = cache_version,
          discarded_changes = discarded,
          "Cache version changed, clearing all partitions"
        );
        let tx = conn.unchecked_transaction()?;
        for table in schema::PARTITIONS {
          tx.execute(&format!("DELETE FROM {}", table), [])?;
        }
        tx.execute(
          "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
          params![PARTITION_VERSION_KEY, wanted],
        )?;
        tx.commit()?;
      }
      None => {
        info!(version = cache_version, "Initializing cache partitions");
        conn.execute(
          "INSERT INTO meta (key, value) VALUES (?, ?)",
          params![PARTITION_VERSION_KEY, wanted],
        )?;
      }
    }

    Ok(())
  }

  /// Lock the connection. Never hold the guard across an `.await`.
  pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| SyncError::Storage(format!("Lock poisoned: {}", e)))
  }

  pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
    let conn = self.conn()?;
    let value = conn
      .query_row("SELECT value FROM meta WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()?;
    Ok(value)
  }

  pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
    let conn = self.conn()?;
    conn.execute(
      "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
      params![key, value],
    )?;
    Ok(())
  }
}

/// Format a timestamp for storage. Fixed width, so text order is time order.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp written by [`format_datetime`].
pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| SyncError::Serialization(format!("Failed to parse datetime '{}': {}", s, e)))
}
