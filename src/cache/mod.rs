//! Cache coordinator for offline content and records.
//!
//! This module provides the application-facing caching API that:
//! - Downloads content once per id, even under concurrent callers
//! - Serves pure offline reads without touching the network
//! - Optionally checks content hashes and refreshes stale payloads
//! - Evicts least recently used payloads, sparing those pinned by unsynced changes
//! - Merges structured record batches by id

mod coalesce;
mod coordinator;
mod traits;

pub use coalesce::Coalescer;
pub use coordinator::CacheCoordinator;
pub use traits::{
  AuthContext, CacheResult, CacheSource, EnsureOptions, FetchedPayload, Fetcher, PinSource,
};
