//! Single-flight execution keyed by content id.
//!
//! The first caller for a key becomes the leader and runs the work; callers
//! arriving while it is outstanding subscribe to a broadcast channel and get
//! a clone of the leader's result. If the leader is dropped before finishing,
//! its waiters see the channel close and race to become the next leader.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

/// In-flight table owned by one coordinator instance.
pub struct Coalescer<T: Clone> {
  in_flight: Mutex<HashMap<String, broadcast::Sender<T>>>,
}

enum Role<'a, T: Clone> {
  Leader(LeaderGuard<'a, T>),
  Waiter(broadcast::Receiver<T>),
}

/// Removes the leader's key from the table when dropped, so an abandoned
/// download never strands its waiters.
struct LeaderGuard<'a, T: Clone> {
  coalescer: &'a Coalescer<T>,
  key: String,
  completed: bool,
}

impl<T: Clone> LeaderGuard<'_, T> {
  fn complete(mut self, result: T) {
    self.completed = true;
    let sender = self.coalescer.remove(&self.key);
    if let Some(tx) = sender {
      let waiters = tx.receiver_count();
      let _ = tx.send(result);
      if waiters > 0 {
        debug!(key = %self.key, waiters, "Shared result with coalesced waiters");
      }
    }
  }
}

impl<T: Clone> Drop for LeaderGuard<'_, T> {
  fn drop(&mut self) {
    if !self.completed {
      self.coalescer.remove(&self.key);
    }
  }
}

impl<T: Clone> Coalescer<T> {
  pub fn new() -> Self {
    Self {
      in_flight: Mutex::new(HashMap::new()),
    }
  }

  /// Run `work` for `key` unless it is already running, in which case wait
  /// for the running call's result.
  pub async fn run<F, Fut>(&self, key: &str, work: F) -> T
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
  {
    loop {
      let mut rx = match self.register(key) {
        Role::Leader(guard) => {
          let result = work().await;
          guard.complete(result.clone());
          return result;
        }
        Role::Waiter(rx) => rx,
      };

      match rx.recv().await {
        Ok(result) => return result,
        Err(_) => {
          debug!(key, "In-flight leader went away, retrying");
        }
      }
    }
  }

  /// Number of keys currently being worked on.
  pub fn in_flight_count(&self) -> usize {
    self.in_flight.lock().map(|m| m.len()).unwrap_or(0)
  }

  fn register(&self, key: &str) -> Role<'_, T> {
    let mut in_flight = match self.in_flight.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };

    if let Some(tx) = in_flight.get(key) {
      debug!(key, "Coalescing request onto in-flight download");
      Role::Waiter(tx.subscribe())
    } else {
      let (tx, _rx) = broadcast::channel(1);
      in_flight.insert(key.to_string(), tx);
      Role::Leader(LeaderGuard {
        coalescer: self,
        key: key.to_string(),
        completed: false,
      })
    }
  }

  fn remove(&self, key: &str) -> Option<broadcast::Sender<T>> {
    let mut in_flight = match self.in_flight.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };
    in_flight.remove(key)
  }
}

impl<T: Clone> Default for Coalescer<T> {
  fn default() -> Self {
    Self::new()
  }
}
