//! Wiring of the partitions, coordinator, queue and controller for one
//! application session.

use std::sync::Arc;
use tracing::info;

use crate::cache::{AuthContext, CacheCoordinator, EnsureOptions, Fetcher};
use crate::config::Config;
use crate::connectivity::ConnectivityController;
use crate::db::Database;
use crate::error::Result;
use crate::event::EventBus;
use crate::intercept::{Interceptor, Network};
use crate::queue::{MutationQueue, QueueStore, Transport};
use crate::remote::{HttpFetcher, HttpTransport, RemoteClient};
use crate::store::{SqliteBlobStore, SqliteRecordStore};

pub struct SyncEngine {
  pub config: Config,
  pub db: Arc<Database>,
  pub events: EventBus,
  pub coordinator: CacheCoordinator,
  pub queue: MutationQueue,
  pub connectivity: ConnectivityController,
  fetcher: Arc<dyn Fetcher>,
}

impl SyncEngine {
  /// Open the configured database and talk to the configured backend.
  pub fn open(config: Config) -> Result<Self> {
    let db = Arc::new(Database::open(config.database.as_deref(), config.cache_version)?);
    let client = RemoteClient::new(&config)?;
    let transport = Arc::new(HttpTransport::new(client.clone()));
    let fetcher = Arc::new(HttpFetcher::new(client));
    Self::assemble(config, db, transport, fetcher)
  }

  /// Build an engine over explicit collaborators.
  pub fn assemble(
    config: Config,
    db: Arc<Database>,
    transport: Arc<dyn Transport>,
    fetcher: Arc<dyn Fetcher>,
  ) -> Result<Self> {
    let events = EventBus::new();
    let queue = MutationQueue::new(
      QueueStore::new(Arc::clone(&db)),
      transport,
      config.queue.max_attempts,
    )?;

    let blobs = SqliteBlobStore::new(Arc::clone(&db)).with_quota(config.cache.quota_bytes);
    let records = SqliteRecordStore::new(Arc::clone(&db));
    let auth = AuthContext {
      user_id: config.user_id.clone(),
    };
    let coordinator = CacheCoordinator::new(Arc::new(blobs), Arc::new(records))
      .with_pin_source(Arc::new(queue.clone()))
      .with_auth(auth)
      .with_budget(config.cache.budget_bytes)
      .with_default_options(EnsureOptions {
        verify_hash: config.cache.verify_hashes,
        stale_while_revalidate: config.cache.stale_while_revalidate,
      });

    // Assume online until an event source says otherwise
    let connectivity = ConnectivityController::new(true).with_events(events.clone());
    connectivity.attach_queue(queue.clone(), events.clone());

    info!(
      cache_version = config.cache_version,
      pending = queue.pending_count()?,
      "Sync engine ready"
    );

    Ok(Self {
      config,
      db,
      events,
      coordinator,
      queue,
      connectivity,
      fetcher,
    })
  }

  /// Default content source for `ensure_cached`.
  pub fn fetcher(&self) -> Arc<dyn Fetcher> {
    Arc::clone(&self.fetcher)
  }

  /// An interception layer for this session's cache version. Install it
  /// through a [`crate::intercept::ClientSession`].
  pub fn interceptor(&self, network: Arc<dyn Network>) -> Interceptor {
    Interceptor::new(
      self.config.cache_version,
      self.config.intercept.clone(),
      Arc::clone(&self.db),
      network,
      self.events.clone(),
    )
  }
}
