//! Durable client-side partitions.
//!
//! Both stores are thin SQLite tables behind traits so the coordinator can be
//! built over any backend:
//! - blobs: payload bytes plus mime type, size, content hash and access times
//! - records: structured JSON snapshots merged by id

mod blob;
mod record;

pub use blob::{content_hash, BlobStore, BlobSummary, CacheEntry, SqliteBlobStore};
pub use record::{RecordCacheEntry, RecordStore, SqliteRecordStore};
