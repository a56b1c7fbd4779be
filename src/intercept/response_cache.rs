//! Named response caches backing the interception strategies.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

use crate::db::{format_datetime, parse_datetime, Database};
use crate::error::{Result, SyncError};

use super::request::Response;

/// A response together with the time it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
  pub response: Response,
  pub stored_at: DateTime<Utc>,
}

impl CachedResponse {
  pub fn age(&self) -> Duration {
    Utc::now() - self.stored_at
  }
}

/// Response caches stored in the `responses` partition, grouped by name.
pub struct ResponseCache {
  db: Arc<Database>,
}

impl ResponseCache {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  pub fn get(&self, cache_name: &str, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self.db.conn()?;
    let row: Option<(u16, Vec<u8>, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, stored_at FROM responses
         WHERE cache_name = ? AND request_key = ?",
        params![cache_name, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()?;

    let Some((status, headers, body, stored_at)) = row else {
      return Ok(None);
    };

    let headers = serde_json::from_slice(&headers).map_err(|e| SyncError::StorageCorrupt {
      id: key.to_string(),
      reason: format!("bad cached headers: {}", e),
    })?;

    Ok(Some(CachedResponse {
      response: Response {
        status,
        headers,
        body,
      },
      stored_at: parse_datetime(&stored_at)?,
    }))
  }

  pub fn put(&self, cache_name: &str, key: &str, url: &str, response: &Response) -> Result<()> {
    let headers = serde_json::to_vec(&response.headers)?;
    let conn = self.db.conn()?;
    conn.execute(
      "INSERT OR REPLACE INTO responses
       (cache_name, request_key, url, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        cache_name,
        key,
        url,
        response.status,
        headers,
        response.body,
        format_datetime(&Utc::now())
      ],
    )?;
    Ok(())
  }

  pub fn len(&self, cache_name: &str) -> Result<usize> {
    let conn = self.db.conn()?;
    let count: i64 = conn.query_row(
      "SELECT COUNT(*) FROM responses WHERE cache_name = ?",
      params![cache_name],
      |row| row.get(0),
    )?;
    Ok(count as usize)
  }

  /// Drop entries older than `max_age`, then the oldest beyond `max_entries`.
  pub fn trim(
    &self,
    cache_name: &str,
    max_age: Option<Duration>,
    max_entries: Option<usize>,
  ) -> Result<usize> {
    let conn = self.db.conn()?;
    let mut removed = 0;

    if let Some(max_age) = max_age {
      removed += conn.execute(
        "DELETE FROM responses WHERE cache_name = ? AND stored_at < ?",
        params![cache_name, format_datetime(&(Utc::now() - max_age))],
      )?;
    }

    if let Some(max_entries) = max_entries {
      removed += conn.execute(
        "DELETE FROM responses WHERE cache_name = ?1 AND request_key NOT IN (
           SELECT request_key FROM responses WHERE cache_name = ?1
           ORDER BY stored_at DESC LIMIT ?2
         )",
        params![cache_name, max_entries as i64],
      )?;
    }

    Ok(removed)
  }

  /// Names of every cache that holds at least one entry.
  pub fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn.prepare("SELECT DISTINCT cache_name FROM responses ORDER BY cache_name")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
  }

  pub fn delete_cache(&self, cache_name: &str) -> Result<usize> {
    let conn = self.db.conn()?;
    let removed = conn.execute(
      "DELETE FROM responses WHERE cache_name = ?",
      params![cache_name],
    )?;
    Ok(removed)
  }
}
