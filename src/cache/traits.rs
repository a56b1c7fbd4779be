//! Core traits and types for the cache coordinator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::error::Result;

/// A payload downloaded for a content id.
#[derive(Debug, Clone)]
pub struct FetchedPayload {
  pub bytes: Vec<u8>,
  pub mime_type: String,
  /// Hash the server advertised for these bytes, if any
  pub content_hash: Option<String>,
}

/// Source of content payloads.
///
/// Implementors download the payload for an id and, optionally, report the
/// current remote content hash without downloading it.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, id: &str) -> Result<FetchedPayload>;

  /// Current remote hash for `id`. `None` means the source cannot tell.
  async fn probe_hash(&self, _id: &str) -> Result<Option<String>> {
    Ok(None)
  }
}

/// Ids that must survive eviction (assets backing unsynced changes).
pub trait PinSource: Send + Sync {
  fn pinned_ids(&self) -> Result<HashSet<String>>;
}

/// Identity of the signed-in user, used only to scope cached records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
  pub user_id: Option<String>,
}

impl AuthContext {
  pub fn user(user_id: impl Into<String>) -> Self {
    Self {
      user_id: Some(user_id.into()),
    }
  }
}

/// Per-call behavior of `ensure_cached`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnsureOptions {
  /// Compare the cached hash with the remote one before serving
  pub verify_hash: bool,
  /// On a hash mismatch, serve the stale entry and refresh in the background
  pub stale_while_revalidate: bool,
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, known stale; a background refresh is running
  CacheStale,
  /// Offline mode - network unavailable, serving cached data
  Offline,
}
