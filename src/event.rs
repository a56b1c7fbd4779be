use tokio::sync::broadcast;

use crate::queue::{QueueItem, ReplayReport};

/// Notifications the sync engine sends to the application.
#[derive(Debug, Clone)]
pub enum Event {
  /// A navigation could not reach the network and was served a fallback
  OfflineFallback { url: String },
  /// A new interception layer version is installed but not yet active
  UpdateWaiting { version: u32 },
  /// An interception layer version took control of open clients
  Activated { version: u32 },
  /// Connectivity changed
  ConnectivityChanged { online: bool },
  /// A replay pass finished
  ReplayFinished(ReplayReport),
  /// Queued changes that will not be retried without user action
  SyncFailed { items: Vec<QueueItem> },
}

/// Broadcast channel carrying [`Event`]s to every listening application
/// instance.
#[derive(Clone)]
pub struct EventBus {
  tx: broadcast::Sender<Event>,
}

impl EventBus {
  pub fn new() -> Self {
    let (tx, _rx) = broadcast::channel(64);
    Self { tx }
  }

  /// Send an event. Having no listeners is not an error.
  pub fn publish(&self, event: Event) {
    let _ = self.tx.send(event);
  }

  pub fn subscribe(&self) -> broadcast::Receiver<Event> {
    self.tx.subscribe()
  }
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new()
  }
}
