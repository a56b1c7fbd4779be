//! Durable queue of mutations captured while offline.
//!
//! Changes that cannot reach the backend are written to the queue partition
//! and replayed in id order once connectivity returns. Replay retries each
//! change up to a ceiling, holds back changes that depend on an unsynced
//! earlier change to the same entity, and never runs twice concurrently.

mod replay;
mod store;
mod types;

pub use replay::{MutationQueue, Transport};
pub use store::QueueStore;
pub use types::{Operation, QueueItem, QueueStatus, ReplayReport, SubmitOutcome};
