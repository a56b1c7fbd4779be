use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A mutation the application wants the backend to apply.
///
/// Operations describe end states (full replace, explicit favorite flag) so
/// replaying one twice is harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
  Create {
    entity: String,
    id: String,
    body: Value,
  },
  Update {
    entity: String,
    id: String,
    body: Value,
  },
  Delete {
    entity: String,
    id: String,
  },
  ToggleFavorite {
    entity: String,
    id: String,
    favorite: bool,
  },
  UploadFile {
    /// Id of the entity the file is attached to
    destination: String,
    file_name: String,
    mime_type: String,
    #[serde(with = "hex_bytes")]
    bytes: Vec<u8>,
  },
}

impl Operation {
  /// Id of the entity this operation changes.
  pub fn target_id(&self) -> &str {
    match self {
      Operation::Create { id, .. }
      | Operation::Update { id, .. }
      | Operation::Delete { id, .. }
      | Operation::ToggleFavorite { id, .. } => id,
      Operation::UploadFile { destination, .. } => destination,
    }
  }

  /// Content ids whose cached assets back this operation.
  pub fn referenced_ids(&self) -> Vec<String> {
    let mut ids = vec![self.target_id().to_string()];
    if let Operation::Create { body, .. } | Operation::Update { body, .. } = self {
      for key in ["content_id", "contentId", "file_id", "fileId"] {
        if let Some(Value::String(id)) = body.get(key) {
          ids.push(id.clone());
        }
      }
    }
    ids
  }

  pub fn kind(&self) -> &'static str {
    match self {
      Operation::Create { .. } => "create",
      Operation::Update { .. } => "update",
      Operation::Delete { .. } => "delete",
      Operation::ToggleFavorite { .. } => "toggle_favorite",
      Operation::UploadFile { .. } => "upload_file",
    }
  }
}

mod hex_bytes {
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    hex::decode(s).map_err(serde::de::Error::custom)
  }
}

/// Replay state of a queued change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
  Pending,
  InFlight,
  /// Retry ceiling reached or rejected by the server; waits for the user
  Failed,
  Done,
}

impl QueueStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      QueueStatus::Pending => "pending",
      QueueStatus::InFlight => "in_flight",
      QueueStatus::Failed => "failed",
      QueueStatus::Done => "done",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "pending" => Some(QueueStatus::Pending),
      "in_flight" => Some(QueueStatus::InFlight),
      "failed" => Some(QueueStatus::Failed),
      "done" => Some(QueueStatus::Done),
      _ => None,
    }
  }
}

/// A durably recorded mutation awaiting replay.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
  /// Monotonic; defines replay order
  pub id: i64,
  pub operation: Operation,
  pub attempts: u32,
  pub status: QueueStatus,
  pub last_error: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
  /// Items applied by the backend and removed from the queue
  pub succeeded: Vec<i64>,
  /// Items whose attempt failed during this pass
  pub failed: Vec<i64>,
  /// Subset of `failed` that reached the retry ceiling or was rejected
  pub exhausted: Vec<i64>,
  /// Items skipped because an earlier change to the same entity is unsynced
  pub held_back: Vec<i64>,
}

impl ReplayReport {
  /// Whether every queued change made it to the backend.
  pub fn fully_synced(&self) -> bool {
    self.failed.is_empty() && self.held_back.is_empty()
  }
}

/// Result of sending a mutation through the normal path.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
  /// Applied by the backend immediately
  Sent,
  /// The network was unavailable; queued for replay
  Queued(QueueItem),
}
