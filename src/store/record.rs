//! Record partition: merged snapshots of structured records.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::{format_datetime, parse_datetime, Database};
use crate::error::{Result, SyncError};

/// One cached structured record, nested children included.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordCacheEntry {
  pub id: String,
  pub payload: Value,
  pub updated_at: DateTime<Utc>,
  /// User identity the record was cached for
  pub owner: Option<String>,
}

impl RecordCacheEntry {
  pub fn new(id: impl Into<String>, payload: Value) -> Self {
    Self {
      id: id.into(),
      payload,
      updated_at: Utc::now(),
      owner: None,
    }
  }
}

/// Trait for record storage backends.
pub trait RecordStore: Send + Sync {
  fn get(&self, id: &str) -> Result<Option<RecordCacheEntry>>;

  /// Merge a batch by id as one unit. Existing ids are replaced in place,
  /// new ids are appended; within the batch the last record for an id wins.
  fn put_batch(&self, records: &[RecordCacheEntry]) -> Result<()>;

  fn delete(&self, id: &str) -> Result<bool>;

  /// Records in collection order, optionally limited to one owner.
  fn list_all(&self, owner: Option<&str>) -> Result<Vec<RecordCacheEntry>>;

  /// Serialized size of all records.
  fn total_size(&self) -> Result<u64>;
}

/// SQLite-backed record storage.
pub struct SqliteRecordStore {
  db: Arc<Database>,
}

impl SqliteRecordStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

type RawRecord = (String, Option<String>, Vec<u8>, String);

fn raw_record(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
  Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_record(raw: RawRecord) -> Result<RecordCacheEntry> {
  let (id, owner, data, updated_at) = raw;
  let payload = serde_json::from_slice(&data).map_err(|e| SyncError::StorageCorrupt {
    id: id.clone(),
    reason: e.to_string(),
  })?;
  let updated_at = parse_datetime(&updated_at).map_err(|e| SyncError::StorageCorrupt {
    id: id.clone(),
    reason: e.to_string(),
  })?;

  Ok(RecordCacheEntry {
    id,
    payload,
    updated_at,
    owner,
  })
}

impl RecordStore for SqliteRecordStore {
  fn get(&self, id: &str) -> Result<Option<RecordCacheEntry>> {
    let conn = self.db.conn()?;
    let raw = conn
      .query_row(
        "SELECT id, owner, payload, updated_at FROM records WHERE id = ?",
        params![id],
        raw_record,
      )
      .optional()?;

    raw.map(into_record).transpose()
  }

  fn put_batch(&self, records: &[RecordCacheEntry]) -> Result<()> {
    if records.is_empty() {
      return Ok(());
    }

    // Collapse duplicates inside the batch: first position, last content
    let mut order: Vec<&str> = Vec::new();
    let mut latest: HashMap<&str, &RecordCacheEntry> = HashMap::new();
    for record in records {
      if latest.insert(record.id.as_str(), record).is_none() {
        order.push(record.id.as_str());
      }
    }

    let conn = self.db.conn()?;
    let tx = conn.unchecked_transaction()?;

    let mut next_position: i64 = tx.query_row(
      "SELECT COALESCE(MAX(position) + 1, 0) FROM records",
      [],
      |row| row.get(0),
    )?;

    for id in order {
      let record = latest[id];
      let data = serde_json::to_vec(&record.payload)?;
      let existing: Option<i64> = tx
        .query_row(
          "SELECT position FROM records WHERE id = ?",
          params![id],
          |row| row.get(0),
        )
        .optional()?;

      let position = match existing {
        Some(position) => position,
        None => {
          next_position += 1;
          next_position - 1
        }
      };

      tx.execute(
        "INSERT OR REPLACE INTO records (id, owner, payload, position, updated_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          id,
          record.owner,
          data,
          position,
          format_datetime(&record.updated_at)
        ],
      )?;
    }

    tx.commit()?;
    Ok(())
  }

  fn delete(&self, id: &str) -> Result<bool> {
    let conn = self.db.conn()?;
    let removed = conn.execute("DELETE FROM records WHERE id = ?", params![id])?;
    Ok(removed > 0)
  }

  fn list_all(&self, owner: Option<&str>) -> Result<Vec<RecordCacheEntry>> {
    let conn = self.db.conn()?;
    let rows = match owner {
      Some(owner) => {
        let mut stmt = conn.prepare(
          "SELECT id, owner, payload, updated_at FROM records WHERE owner = ? ORDER BY position",
        )?;
        let rows = stmt
          .query_map(params![owner], raw_record)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
      }
      None => {
        let mut stmt =
          conn.prepare("SELECT id, owner, payload, updated_at FROM records ORDER BY position")?;
        let rows = stmt
          .query_map([], raw_record)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
      }
    };

    rows.into_iter().map(into_record).collect()
  }

  fn total_size(&self) -> Result<u64> {
    let conn = self.db.conn()?;
    let total: i64 = conn.query_row(
      "SELECT COALESCE(SUM(LENGTH(payload)), 0) FROM records",
      [],
      |row| row.get(0),
    )?;
    Ok(total as u64)
  }
}
