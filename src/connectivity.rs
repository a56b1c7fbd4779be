//! Connectivity tracking and the replay trigger.
//!
//! The controller does not watch the platform itself: whatever event source
//! exists (OS network notifications, window visibility, the optional HEAD
//! probe) calls [`ConnectivityController::set_online`] and
//! [`ConnectivityController::set_visible`].

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::event::{Event, EventBus};
use crate::intercept::Interceptor;
use crate::queue::MutationQueue;

type Callback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// What the application should do after answering an update prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
  /// The new layer version is active; reload to pick it up
  Reload,
  /// The user declined; the update stays waiting
  Deferred,
  /// Nothing was waiting
  NoUpdate,
}

#[derive(Clone)]
pub struct ConnectivityController {
  online: Arc<watch::Sender<bool>>,
  visible: Arc<AtomicBool>,
  callbacks: Arc<Mutex<Vec<Callback>>>,
  events: Option<EventBus>,
}

impl ConnectivityController {
  pub fn new(initially_online: bool) -> Self {
    let (tx, _rx) = watch::channel(initially_online);
    Self {
      online: Arc::new(tx),
      visible: Arc::new(AtomicBool::new(true)),
      callbacks: Arc::new(Mutex::new(Vec::new())),
      events: None,
    }
  }

  /// Publish [`Event::ConnectivityChanged`] on every transition.
  pub fn with_events(mut self, events: EventBus) -> Self {
    self.events = Some(events);
    self
  }

  pub fn is_online(&self) -> bool {
    *self.online.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.online.subscribe()
  }

  /// Run `callback` on every offline to online transition, and whenever the
  /// application becomes visible while online. Callbacks run one after
  /// another in registration order.
  pub fn on_became_online<F, Fut>(&self, callback: F)
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let callback: Callback = Arc::new(move || callback().boxed());
    lock(&self.callbacks).push(callback);
  }

  /// Report the current connectivity. Returns once the callbacks triggered by
  /// the change have finished.
  pub async fn set_online(&self, online: bool) {
    let was_online = self.online.send_replace(online);
    if was_online == online {
      return;
    }

    info!(online, "Connectivity changed");
    if let Some(events) = &self.events {
      events.publish(Event::ConnectivityChanged { online });
    }
    if online {
      self.run_callbacks().await;
    }
  }

  /// Report application visibility. Becoming visible while online counts as
  /// a reconnect, since events may have been missed in the background.
  pub async fn set_visible(&self, visible: bool) {
    let was_visible = self.visible.swap(visible, Ordering::SeqCst);
    if visible && !was_visible && self.is_online() {
      debug!("Visible again while online");
      self.run_callbacks().await;
    }
  }

  async fn run_callbacks(&self) {
    let callbacks: Vec<Callback> = lock(&self.callbacks).clone();
    for callback in callbacks {
      callback().await;
    }
  }

  /// Replay `queue` whenever connectivity returns and report the outcome on
  /// `events`.
  pub fn attach_queue(&self, queue: MutationQueue, events: EventBus) {
    self.on_became_online(move || {
      let queue = queue.clone();
      let events = events.clone();
      async move {
        let report = match queue.replay().await {
          Ok(report) => report,
          Err(e) => {
            warn!(error = %e, "Replay failed");
            return;
          }
        };

        let exhausted = report.exhausted.clone();
        events.publish(Event::ReplayFinished(report));
        if exhausted.is_empty() {
          return;
        }

        match queue.failed_items() {
          Ok(failed) => {
            let items: Vec<_> = failed
              .into_iter()
              .filter(|item| exhausted.contains(&item.id))
              .collect();
            events.publish(Event::SyncFailed { items });
          }
          Err(e) => warn!(error = %e, "Failed to load exhausted changes"),
        }
      }
    });
  }

  /// Poll `url` with HEAD requests and feed the result into [`Self::set_online`].
  ///
  /// Any HTTP response counts as online; only transport errors count as offline.
  pub fn spawn_probe(&self, url: url::Url, interval: Duration) -> Result<JoinHandle<()>> {
    let client = reqwest::Client::builder()
      .timeout(interval.min(Duration::from_secs(10)))
      .build()
      .map_err(|e| SyncError::Config(format!("Failed to build probe client: {}", e)))?;

    let this = self.clone();
    Ok(tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      loop {
        ticker.tick().await;
        let online = match client.head(url.clone()).send().await {
          Ok(_) => true,
          Err(e) => {
            debug!(url = %url, error = %e, "Probe failed");
            false
          }
        };
        this.set_online(online).await;
      }
    }))
  }
}

/// Act on the user's answer to an update prompt for a waiting layer version.
pub fn apply_update(interceptor: &Interceptor, accepted: bool) -> Result<UpdateOutcome> {
  if !accepted {
    return Ok(UpdateOutcome::Deferred);
  }
  if interceptor.skip_waiting()? {
    info!(version = interceptor.version(), "Update applied, reload required");
    Ok(UpdateOutcome::Reload)
  } else {
    Ok(UpdateOutcome::NoUpdate)
  }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
  match mutex.lock() {
    Ok(guard) => guard,
    Err(poisoned) => poisoned.into_inner(),
  }
}
