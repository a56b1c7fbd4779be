//! Queue partition: durable storage for pending mutations.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashSet;
use std::sync::Arc;

use crate::db::{format_datetime, parse_datetime, Database};
use crate::error::{Result, SyncError};

use super::types::{Operation, QueueItem, QueueStatus};

const SELECT_ITEM: &str =
  "SELECT id, operation, attempts, status, last_error, created_at, updated_at FROM queue";

type RawItem = (i64, Vec<u8>, u32, String, Option<String>, String, String);

fn raw_item(row: &Row<'_>) -> rusqlite::Result<RawItem> {
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

fn into_item(raw: RawItem) -> Result<QueueItem> {
  let (id, data, attempts, status, last_error, created_at, updated_at) = raw;
  let corrupt = |reason: String| SyncError::StorageCorrupt {
    id: id.to_string(),
    reason,
  };

  let operation: Operation =
    serde_json::from_slice(&data).map_err(|e| corrupt(e.to_string()))?;
  let status =
    QueueStatus::parse(&status).ok_or_else(|| corrupt(format!("unknown status '{}'", status)))?;

  Ok(QueueItem {
    id,
    operation,
    attempts,
    status,
    last_error,
    created_at: parse_datetime(&created_at).map_err(|e| corrupt(e.to_string()))?,
    updated_at: parse_datetime(&updated_at).map_err(|e| corrupt(e.to_string()))?,
  })
}

/// SQLite-backed queue partition.
pub struct QueueStore {
  db: Arc<Database>,
}

impl QueueStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Append an operation as a pending item.
  pub fn insert(&self, operation: &Operation) -> Result<QueueItem> {
    let data = serde_json::to_vec(operation)?;
    let now = Utc::now();
    let stamp = format_datetime(&now);

    let conn = self.db.conn()?;
    conn.execute(
      "INSERT INTO queue (operation, target_id, attempts, status, last_error, created_at, updated_at)
       VALUES (?, ?, 0, ?, NULL, ?, ?)",
      params![
        data,
        operation.target_id(),
        QueueStatus::Pending.as_str(),
        stamp,
        stamp
      ],
    )?;

    Ok(QueueItem {
      id: conn.last_insert_rowid(),
      operation: operation.clone(),
      attempts: 0,
      status: QueueStatus::Pending,
      last_error: None,
      created_at: now,
      updated_at: now,
    })
  }

  pub fn get(&self, id: i64) -> Result<Option<QueueItem>> {
    let conn = self.db.conn()?;
    let raw = conn
      .query_row(&format!("{} WHERE id = ?", SELECT_ITEM), params![id], raw_item)
      .optional()?;
    raw.map(into_item).transpose()
  }

  /// Every item that has not reached `Done`, in replay order.
  pub fn list(&self) -> Result<Vec<QueueItem>> {
    let conn = self.db.conn()?;
    let mut stmt = conn.prepare(&format!("{} WHERE status != ? ORDER BY id", SELECT_ITEM))?;
    let rows = stmt
      .query_map(params![QueueStatus::Done.as_str()], raw_item)?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter().map(into_item).collect()
  }

  pub fn list_with_status(&self, status: QueueStatus) -> Result<Vec<QueueItem>> {
    let conn = self.db.conn()?;
    let mut stmt = conn.prepare(&format!("{} WHERE status = ? ORDER BY id", SELECT_ITEM))?;
    let rows = stmt
      .query_map(params![status.as_str()], raw_item)?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter().map(into_item).collect()
  }

  pub fn set_status(&self, id: i64, status: QueueStatus) -> Result<()> {
    let conn = self.db.conn()?;
    conn.execute(
      "UPDATE queue SET status = ?, updated_at = ? WHERE id = ?",
      params![status.as_str(), format_datetime(&Utc::now()), id],
    )?;
    Ok(())
  }

  /// Store the outcome of a failed attempt.
  pub fn record_failure(
    &self,
    id: i64,
    attempts: u32,
    status: QueueStatus,
    error: &str,
  ) -> Result<()> {
    let conn = self.db.conn()?;
    conn.execute(
      "UPDATE queue SET attempts = ?, status = ?, last_error = ?, updated_at = ? WHERE id = ?",
      params![
        attempts,
        status.as_str(),
        error,
        format_datetime(&Utc::now()),
        id
      ],
    )?;
    Ok(())
  }

  /// Put a failed item back in line with a fresh retry budget.
  pub fn reset(&self, id: i64) -> Result<bool> {
    let conn = self.db.conn()?;
    let changed = conn.execute(
      "UPDATE queue SET attempts = 0, status = ?, last_error = NULL, updated_at = ?
       WHERE id = ? AND status = ?",
      params![
        QueueStatus::Pending.as_str(),
        format_datetime(&Utc::now()),
        id,
        QueueStatus::Failed.as_str()
      ],
    )?;
    Ok(changed > 0)
  }

  pub fn remove(&self, id: i64) -> Result<bool> {
    let conn = self.db.conn()?;
    let removed = conn.execute("DELETE FROM queue WHERE id = ?", params![id])?;
    Ok(removed > 0)
  }

  /// Items left in flight by an interrupted session have an unknown outcome;
  /// put them back to pending.
  pub fn reset_in_flight(&self) -> Result<usize> {
    let conn = self.db.conn()?;
    let changed = conn.execute(
      "UPDATE queue SET status = ? WHERE status = ?",
      params![QueueStatus::Pending.as_str(), QueueStatus::InFlight.as_str()],
    )?;
    Ok(changed)
  }

  /// Count of items still waiting to reach the backend.
  pub fn count_waiting(&self) -> Result<usize> {
    let conn = self.db.conn()?;
    let count: i64 = conn.query_row(
      "SELECT COUNT(*) FROM queue WHERE status IN (?, ?)",
      params![QueueStatus::Pending.as_str(), QueueStatus::InFlight.as_str()],
      |row| row.get(0),
    )?;
    Ok(count as usize)
  }

  /// Whether any unsynced item targets `target_id`.
  pub fn has_unsynced_for(&self, target_id: &str) -> Result<bool> {
    let conn = self.db.conn()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT id FROM queue WHERE target_id = ? AND status != ? LIMIT 1",
        params![target_id, QueueStatus::Done.as_str()],
        |row| row.get(0),
      )
      .optional()?;
    Ok(found.is_some())
  }

  /// Content ids referenced by unsynced items.
  pub fn referenced_ids(&self) -> Result<HashSet<String>> {
    Ok(
      self
        .list()?
        .iter()
        .flat_map(|item| item.operation.referenced_ids())
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn store() -> QueueStore {
    QueueStore::new(Arc::new(Database::open_in_memory(1).unwrap()))
  }

  fn update(id: &str) -> Operation {
    Operation::Update {
      entity: "songs".into(),
      id: id.into(),
      body: json!({"title": "Amazing Grace", "content_id": format!("{}-pdf", id)}),
    }
  }

  #[test]
  fn test_ids_increase_in_insert_order() {
    let store = store();
    let a = store.insert(&update("s1")).unwrap();
    let b = store.insert(&update("s2")).unwrap();

    assert!(b.id > a.id);
    let ids: Vec<i64> = store.list().unwrap().iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![a.id, b.id]);
  }

  #[test]
  fn test_upload_round_trips_through_storage() {
    let store = store();
    let upload = Operation::UploadFile {
      destination: "s1".into(),
      file_name: "chart.pdf".into(),
      mime_type: "application/pdf".into(),
      bytes: vec![0x25, 0x50, 0x44, 0x46],
    };
    let item = store.insert(&upload).unwrap();

    assert_eq!(store.get(item.id).unwrap().unwrap().operation, upload);
  }

  #[test]
  fn test_failure_and_reset() {
    let store = store();
    let item = store.insert(&update("s1")).unwrap();

    store
      .record_failure(item.id, 3, QueueStatus::Failed, "503 Service Unavailable")
      .unwrap();
    let failed = store.get(item.id).unwrap().unwrap();
    assert_eq!(failed.status, QueueStatus::Failed);
    assert_eq!(failed.attempts, 3);
    assert_eq!(store.count_waiting().unwrap(), 0);

    assert!(store.reset(item.id).unwrap());
    let reset = store.get(item.id).unwrap().unwrap();
    assert_eq!((reset.status, reset.attempts), (QueueStatus::Pending, 0));
    assert!(reset.last_error.is_none());
  }

  #[test]
  fn test_referenced_ids_cover_targets_and_content() {
    let store = store();
    store.insert(&update("s1")).unwrap();
    let done = store.insert(&update("s2")).unwrap();
    store.set_status(done.id, QueueStatus::Done).unwrap();

    let ids = store.referenced_ids().unwrap();
    assert!(ids.contains("s1"));
    assert!(ids.contains("s1-pdf"));
    assert!(!ids.contains("s2"));
  }
}
