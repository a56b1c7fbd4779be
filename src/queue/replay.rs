//! The mutation queue: capture, replay and surface pending changes.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::cache::PinSource;
use crate::error::{Result, SyncError};

use super::store::QueueStore;
use super::types::{Operation, QueueItem, QueueStatus, ReplayReport, SubmitOutcome};

/// Executes operations against the backend.
///
/// Replay uses the same implementation the application submits through, so a
/// replayed change takes exactly the path it would have taken online.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn execute(&self, operation: &Operation) -> Result<()>;
}

type RunningReplay = Shared<BoxFuture<'static, Result<ReplayReport>>>;

struct Inner {
  store: QueueStore,
  transport: Arc<dyn Transport>,
  max_attempts: u32,
  active: Mutex<Option<RunningReplay>>,
}

/// Durable queue of mutations awaiting the backend.
///
/// Delivery is at-least-once; operations are expected to be idempotent.
#[derive(Clone)]
pub struct MutationQueue {
  inner: Arc<Inner>,
}

impl MutationQueue {
  /// Open the queue, resetting items an interrupted session left in flight.
  pub fn new(store: QueueStore, transport: Arc<dyn Transport>, max_attempts: u32) -> Result<Self> {
    let recovered = store.reset_in_flight()?;
    if recovered > 0 {
      info!(recovered, "Recovered in-flight changes from a previous session");
    }

    Ok(Self {
      inner: Arc::new(Inner {
        store,
        transport,
        max_attempts: max_attempts.max(1),
        active: Mutex::new(None),
      }),
    })
  }

  /// Record an operation for later replay. Never touches the network.
  pub fn enqueue(&self, operation: Operation) -> Result<QueueItem> {
    let item = self.inner.store.insert(&operation)?;
    info!(
      id = item.id,
      kind = operation.kind(),
      entity_id = operation.target_id(),
      "Queued change"
    );
    Ok(item)
  }

  /// Send an operation now, queueing it if the network is unavailable.
  ///
  /// Operations on an entity that already has unsynced changes go straight to
  /// the queue so they cannot overtake the earlier ones.
  pub async fn submit(&self, operation: Operation) -> Result<SubmitOutcome> {
    if self.inner.store.has_unsynced_for(operation.target_id())? {
      debug!(entity_id = operation.target_id(), "Earlier change unsynced, queueing");
      return Ok(SubmitOutcome::Queued(self.enqueue(operation)?));
    }

    match self.inner.transport.execute(&operation).await {
      Ok(()) => Ok(SubmitOutcome::Sent),
      Err(e) if e.is_retryable() => {
        debug!(error = %e, "Submit failed, queueing for replay");
        Ok(SubmitOutcome::Queued(self.enqueue(operation)?))
      }
      Err(e) => Err(e),
    }
  }

  /// Replay queued changes in id order.
  ///
  /// Only one replay runs at a time; calling this while a replay is running
  /// waits for that replay and returns its report.
  pub async fn replay(&self) -> Result<ReplayReport> {
    let running = {
      let mut active = lock(&self.inner.active);
      match active.as_ref() {
        Some(running) => {
          debug!("Replay already running, joining it");
          running.clone()
        }
        None => {
          let this = self.clone();
          let pass = async move {
            let result = this.replay_pass().await;
            *lock(&this.inner.active) = None;
            result
          }
          .boxed()
          .shared();
          *active = Some(pass.clone());
          pass
        }
      }
    };

    running.await
  }

  async fn replay_pass(&self) -> Result<ReplayReport> {
    let items = self.inner.store.list()?;
    let mut report = ReplayReport::default();
    // Entities with an earlier change that has not reached the backend
    let mut blocked: HashSet<String> = HashSet::new();

    for item in items {
      let target = item.operation.target_id().to_string();

      if item.status == QueueStatus::Failed {
        blocked.insert(target);
        continue;
      }
      if blocked.contains(&target) {
        debug!(id = item.id, entity_id = %target, "Holding back dependent change");
        report.held_back.push(item.id);
        continue;
      }

      self.inner.store.set_status(item.id, QueueStatus::InFlight)?;

      match self.inner.transport.execute(&item.operation).await {
        Ok(()) => {
          self.inner.store.remove(item.id)?;
          debug!(id = item.id, kind = item.operation.kind(), "Replayed change");
          report.succeeded.push(item.id);
        }
        Err(e) => {
          let attempts = item.attempts + 1;
          let exhausted = attempts >= self.inner.max_attempts || !e.is_retryable();
          let status = if exhausted {
            QueueStatus::Failed
          } else {
            QueueStatus::Pending
          };
          self
            .inner
            .store
            .record_failure(item.id, attempts, status, &e.to_string())?;

          report.failed.push(item.id);
          if exhausted {
            let surfaced = SyncError::ReplayExhausted {
              id: item.id,
              attempts,
            };
            warn!(error = %surfaced, last_error = %e, entity_id = %target, "Giving up on change");
            report.exhausted.push(item.id);
          } else {
            debug!(id = item.id, attempts, error = %e, "Replay attempt failed, will retry");
          }
          blocked.insert(target);
        }
      }
    }

    info!(
      succeeded = report.succeeded.len(),
      failed = report.failed.len(),
      exhausted = report.exhausted.len(),
      held_back = report.held_back.len(),
      "Replay finished"
    );

    Ok(report)
  }

  /// Number of changes waiting to sync.
  pub fn pending_count(&self) -> Result<usize> {
    self.inner.store.count_waiting()
  }

  /// Every unsynced item, in replay order.
  pub fn items(&self) -> Result<Vec<QueueItem>> {
    self.inner.store.list()
  }

  /// Changes that will not be retried without user action.
  pub fn failed_items(&self) -> Result<Vec<QueueItem>> {
    self.inner.store.list_with_status(QueueStatus::Failed)
  }

  /// Drop a change the user dismissed.
  pub fn discard(&self, id: i64) -> Result<bool> {
    let removed = self.inner.store.remove(id)?;
    if removed {
      info!(id, "Discarded queued change");
    }
    Ok(removed)
  }

  /// Give a failed change a fresh retry budget.
  pub fn retry(&self, id: i64) -> Result<bool> {
    self.inner.store.reset(id)
  }
}

impl PinSource for MutationQueue {
  fn pinned_ids(&self) -> Result<HashSet<String>> {
    self.inner.store.referenced_ids()
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  match mutex.lock() {
    Ok(guard) => guard,
    Err(poisoned) => poisoned.into_inner(),
  }
}
