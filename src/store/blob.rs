//! Blob partition: binary/text payloads with metadata.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::db::{format_datetime, parse_datetime, Database};
use crate::error::{Result, SyncError};

/// One cached binary/text asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  /// Id of the owning content item
  pub id: String,
  pub payload: Vec<u8>,
  pub mime_type: String,
  pub size_bytes: u64,
  /// Lowercase hex SHA-256 of the payload
  pub content_hash: Option<String>,
  pub created_at: DateTime<Utc>,
  pub last_accessed_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Build an entry for a freshly downloaded payload.
  pub fn new(id: impl Into<String>, payload: Vec<u8>, mime_type: impl Into<String>) -> Self {
    let now = Utc::now();
    Self {
      id: id.into(),
      size_bytes: payload.len() as u64,
      content_hash: Some(content_hash(&payload)),
      payload,
      mime_type: mime_type.into(),
      created_at: now,
      last_accessed_at: now,
    }
  }
}

/// Entry metadata without the payload, for eviction sweeps and listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobSummary {
  pub id: String,
  pub size_bytes: u64,
  pub last_accessed_at: DateTime<Utc>,
}

/// SHA-256 fingerprint of a payload, hex encoded.
pub fn content_hash(payload: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(payload);
  hex::encode(hasher.finalize())
}

/// Trait for blob storage backends.
pub trait BlobStore: Send + Sync {
  /// Get an entry by id.
  fn get(&self, id: &str) -> Result<Option<CacheEntry>>;

  /// Store an entry, replacing any entry with the same id.
  fn put(&self, entry: &CacheEntry) -> Result<()>;

  /// Remove an entry. Returns whether it existed.
  fn delete(&self, id: &str) -> Result<bool>;

  /// Metadata of every stored entry, oldest access first. Payloads are not read.
  fn list_summaries(&self) -> Result<Vec<BlobSummary>>;

  /// Sum of `size_bytes` over all entries.
  fn total_size(&self) -> Result<u64>;

  /// Record a successful read.
  fn touch(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
}

/// SQLite-backed blob storage.
pub struct SqliteBlobStore {
  db: Arc<Database>,
  quota_bytes: Option<u64>,
}

impl SqliteBlobStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self {
      db,
      quota_bytes: None,
    }
  }

  /// Refuse writes that would grow the partition past `quota_bytes`.
  pub fn with_quota(mut self, quota_bytes: Option<u64>) -> Self {
    self.quota_bytes = quota_bytes;
    self
  }
}

const SELECT_BLOB: &str = "SELECT id, payload, mime_type, size_bytes, content_hash, created_at, last_accessed_at FROM blobs";

type RawBlob = (String, Vec<u8>, String, i64, Option<String>, String, String);

fn raw_blob(row: &Row<'_>) -> rusqlite::Result<RawBlob> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
    row.get(5)?,
    row.get(6)?,
  ))
}

fn into_entry(raw: RawBlob) -> Result<CacheEntry> {
  let (id, payload, mime_type, size_bytes, content_hash, created_at, last_accessed_at) = raw;
  let corrupt = |reason: String| SyncError::StorageCorrupt {
    id: id.clone(),
    reason,
  };

  if payload.len() as i64 != size_bytes {
    return Err(corrupt(format!(
      "payload is {} bytes, metadata says {}",
      payload.len(),
      size_bytes
    )));
  }
  let created_at = parse_datetime(&created_at).map_err(|e| corrupt(e.to_string()))?;
  let last_accessed_at = parse_datetime(&last_accessed_at).map_err(|e| corrupt(e.to_string()))?;

  Ok(CacheEntry {
    id,
    payload,
    mime_type,
    size_bytes: size_bytes as u64,
    content_hash,
    created_at,
    last_accessed_at,
  })
}

impl BlobStore for SqliteBlobStore {
  fn get(&self, id: &str) -> Result<Option<CacheEntry>> {
    let conn = self.db.conn()?;
    let raw = conn
      .query_row(
        &format!("{} WHERE id = ?", SELECT_BLOB),
        params![id],
        raw_blob,
      )
      .optional()?;

    raw.map(into_entry).transpose()
  }

  fn put(&self, entry: &CacheEntry) -> Result<()> {
    let conn = self.db.conn()?;
    let tx = conn.unchecked_transaction()?;

    if let Some(quota) = self.quota_bytes {
      let others: i64 = tx.query_row(
        "SELECT COALESCE(SUM(size_bytes), 0) FROM blobs WHERE id != ?",
        params![entry.id],
        |row| row.get(0),
      )?;
      let needed = others as u64 + entry.size_bytes;
      if needed > quota {
        return Err(SyncError::StorageQuotaExceeded { needed, quota });
      }
    }

    tx.execute(
      "INSERT OR REPLACE INTO blobs (id, payload, mime_type, size_bytes, content_hash, created_at, last_accessed_at)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        entry.id,
        entry.payload,
        entry.mime_type,
        entry.size_bytes as i64,
        entry.content_hash,
        format_datetime(&entry.created_at),
        format_datetime(&entry.last_accessed_at),
      ],
    )?;
    tx.commit()?;

    Ok(())
  }

  fn delete(&self, id: &str) -> Result<bool> {
    let conn = self.db.conn()?;
    let removed = conn.execute("DELETE FROM blobs WHERE id = ?", params![id])?;
    Ok(removed > 0)
  }

  fn list_summaries(&self) -> Result<Vec<BlobSummary>> {
    let conn = self.db.conn()?;
    let mut stmt = conn.prepare(
      "SELECT id, size_bytes, last_accessed_at FROM blobs ORDER BY last_accessed_at, id",
    )?;
    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, i64>(1)?,
          row.get::<_, String>(2)?,
        ))
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    rows
      .into_iter()
      .map(|(id, size_bytes, last_accessed_at)| {
        let last_accessed_at =
          parse_datetime(&last_accessed_at).map_err(|e| SyncError::StorageCorrupt {
            id: id.clone(),
            reason: e.to_string(),
          })?;
        Ok(BlobSummary {
          id,
          size_bytes: size_bytes as u64,
          last_accessed_at,
        })
      })
      .collect()
  }

  fn total_size(&self) -> Result<u64> {
    let conn = self.db.conn()?;
    let total: i64 = conn.query_row("SELECT COALESCE(SUM(size_bytes), 0) FROM blobs", [], |row| {
      row.get(0)
    })?;
    Ok(total as u64)
  }

  fn touch(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
    let conn = self.db.conn()?;
    conn.execute(
      "UPDATE blobs SET last_accessed_at = ? WHERE id = ?",
      params![format_datetime(&at), id],
    )?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn store() -> SqliteBlobStore {
    SqliteBlobStore::new(Arc::new(Database::open_in_memory(1).unwrap()))
  }

  #[test]
  fn test_put_overwrites_and_tracks_size() {
    let store = store();
    store.put(&CacheEntry::new("c1", vec![1; 10], "application/pdf")).unwrap();
    store.put(&CacheEntry::new("c2", vec![2; 5], "image/png")).unwrap();
    assert_eq!(store.total_size().unwrap(), 15);

    store.put(&CacheEntry::new("c1", vec![3; 4], "application/pdf")).unwrap();
    assert_eq!(store.total_size().unwrap(), 9);
    assert_eq!(store.get("c1").unwrap().unwrap().payload, vec![3; 4]);
    assert_eq!(store.list_summaries().unwrap().len(), 2);
  }

  #[test]
  fn test_delete_and_missing() {
    let store = store();
    store.put(&CacheEntry::new("c1", b"hello".to_vec(), "text/plain")).unwrap();

    assert!(store.delete("c1").unwrap());
    assert!(!store.delete("c1").unwrap());
    assert!(store.get("c1").unwrap().is_none());
  }

  #[test]
  fn test_quota_rejects_oversized_write() {
    let store = store().with_quota(Some(10));
    store.put(&CacheEntry::new("a", vec![0; 8], "text/plain")).unwrap();

    let err = store.put(&CacheEntry::new("b", vec![0; 4], "text/plain")).unwrap_err();
    assert_eq!(err, SyncError::StorageQuotaExceeded { needed: 12, quota: 10 });

    // Replacing an entry only counts its new size
    store.put(&CacheEntry::new("a", vec![0; 10], "text/plain")).unwrap();
    assert!(store.get("b").unwrap().is_none());
  }

  #[test]
  fn test_entries_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("blobs.db");

    {
      let store = SqliteBlobStore::new(Arc::new(Database::open(Some(&path), 1).unwrap()));
      store.put(&CacheEntry::new("c1", b"%PDF-1.7".to_vec(), "application/pdf")).unwrap();
    }

    let store = SqliteBlobStore::new(Arc::new(Database::open(Some(&path), 1).unwrap()));
    let entry = store.get("c1").unwrap().unwrap();
    assert_eq!(entry.payload, b"%PDF-1.7");
    assert_eq!(entry.content_hash, Some(content_hash(b"%PDF-1.7")));
  }

  #[test]
  fn test_list_orders_by_last_access() {
    let store = store();
    let now = Utc::now();
    for (i, id) in ["new", "old", "mid"].iter().enumerate() {
      store.put(&CacheEntry::new(*id, vec![0; 1], "text/plain")).unwrap();
      let offset = [0, -20, -10][i];
      store.touch(id, now + chrono::Duration::seconds(offset)).unwrap();
    }

    let ids: Vec<String> = store.list_summaries().unwrap().into_iter().map(|e| e.id).collect();
    assert_eq!(ids, vec!["old", "mid", "new"]);
  }

  #[test]
  fn test_summaries_skip_payloads() {
    let db = Arc::new(Database::open_in_memory(1).unwrap());
    let store = SqliteBlobStore::new(Arc::clone(&db));
    store.put(&CacheEntry::new("c1", vec![7; 64], "application/pdf")).unwrap();

    // A truncated payload makes a full read fail, metadata stays readable
    db.conn()
      .unwrap()
      .execute("UPDATE blobs SET payload = x'00' WHERE id = 'c1'", [])
      .unwrap();
    assert!(matches!(
      store.get("c1").unwrap_err(),
      SyncError::StorageCorrupt { .. }
    ));

    let summaries = store.list_summaries().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].id, "c1");
    assert_eq!(summaries[0].size_bytes, 64);
  }
}
