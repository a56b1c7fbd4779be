//! Offline-first content sync.
//!
//! Keeps previously viewed content usable without a network connection,
//! records changes made offline and replays them when connectivity returns,
//! and answers intercepted requests from per-class response caches.

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod engine;
pub mod error;
pub mod event;
pub mod intercept;
pub mod logging;
pub mod queue;
pub mod remote;
pub mod store;

pub use config::Config;
pub use engine::SyncEngine;
pub use error::{Result, SyncError};
pub use event::{Event, EventBus};
