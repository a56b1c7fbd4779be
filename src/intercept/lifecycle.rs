//! Install/activate lifecycle of an interception layer version.

use std::collections::HashSet;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::error::{Result, SyncError};
use crate::event::Event;

use super::interceptor::{offline_page_key, Interceptor, CACHE_KINDS, PRECACHE};
use super::request::Response;

const ACTIVE_VERSION_KEY: &str = "intercept_active_version";

/// Where a layer version is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerState {
  Installing,
  Installed,
  /// Installed while an older version still controls open clients
  Waiting,
  Activated,
}

impl Interceptor {
  pub fn state(&self) -> LayerState {
    match self.state.lock() {
      Ok(guard) => *guard,
      Err(poisoned) => *poisoned.into_inner(),
    }
  }

  fn set_state(&self, state: LayerState) {
    match self.state.lock() {
      Ok(mut guard) => *guard = state,
      Err(poisoned) => *poisoned.into_inner() = state,
    }
  }

  /// Version currently controlling clients, if any version was ever activated.
  pub fn active_version(&self) -> Result<Option<u32>> {
    match self.db.get_meta(ACTIVE_VERSION_KEY)? {
      Some(v) => v
        .parse()
        .map(Some)
        .map_err(|_| SyncError::StorageCorrupt {
          id: ACTIVE_VERSION_KEY.to_string(),
          reason: format!("not a version number: '{}'", v),
        }),
      None => Ok(None),
    }
  }

  /// Install this version: precache the offline page, then activate unless an
  /// older version still controls `controlled_clients` open clients.
  pub fn install(&self, controlled_clients: usize) -> Result<LayerState> {
    self.set_state(LayerState::Installing);

    self.cache.put(
      &self.cache_name(PRECACHE),
      &offline_page_key(),
      "offsync:offline-page",
      &Response::offline_page(&self.config.offline_page),
    )?;
    self.set_state(LayerState::Installed);
    info!(version = self.version, "Interception layer installed");

    match self.active_version()? {
      Some(active) if active != self.version && controlled_clients > 0 => {
        info!(
          version = self.version,
          active,
          clients = controlled_clients,
          "Update waiting for open clients"
        );
        self.set_state(LayerState::Waiting);
        self.events.publish(Event::UpdateWaiting {
          version: self.version,
        });
        Ok(LayerState::Waiting)
      }
      _ => {
        self.activate()?;
        Ok(LayerState::Activated)
      }
    }
  }

  /// Take control: drop caches of other versions and record this one as active.
  pub fn activate(&self) -> Result<()> {
    let allowed: HashSet<String> = CACHE_KINDS.iter().map(|k| self.cache_name(k)).collect();

    for name in self.cache.cache_names()? {
      if allowed.contains(&name) {
        continue;
      }
      match self.cache.delete_cache(&name) {
        Ok(removed) => info!(cache = %name, removed, "Deleted outdated cache"),
        Err(e) => warn!(cache = %name, error = %e, "Failed to delete outdated cache"),
      }
    }

    self
      .db
      .set_meta(ACTIVE_VERSION_KEY, &self.version.to_string())?;
    self.set_state(LayerState::Activated);
    info!(version = self.version, "Interception layer activated");
    self.events.publish(Event::Activated {
      version: self.version,
    });
    Ok(())
  }

  /// Activate a waiting version now. Returns whether anything changed; the
  /// application should reload when it did.
  pub fn skip_waiting(&self) -> Result<bool> {
    if self.state() != LayerState::Waiting {
      return Ok(false);
    }
    self.activate()?;
    Ok(true)
  }
}

/// Per-session registration of the interception layer.
#[derive(Default)]
pub struct ClientSession {
  layer: OnceCell<Interceptor>,
}

impl ClientSession {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build and install the layer on the first call; later calls return the
  /// same handle without running `build` again.
  pub async fn register<F>(&self, build: F, controlled_clients: usize) -> Result<&Interceptor>
  where
    F: FnOnce() -> Interceptor,
  {
    self
      .layer
      .get_or_try_init(|| async move {
        let layer = build();
        layer.install(controlled_clients)?;
        Ok::<_, SyncError>(layer)
      })
      .await
  }

  pub fn layer(&self) -> Option<&Interceptor> {
    self.layer.get()
  }
}
