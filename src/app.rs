use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;

use offsync::cache::{CacheSource, Fetcher};
use offsync::intercept::Network;
use offsync::queue::{QueueItem, QueueStatus};
use offsync::remote::{HttpFetcher, HttpNetwork, RemoteClient};
use offsync::{Config, SyncEngine, SyncError};

use crate::Command;

/// Command-line front end over one sync engine session.
pub struct App {
  engine: SyncEngine,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let engine = SyncEngine::open(config)?;
    Ok(Self { engine })
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Status => self.status(),
      Command::Fetch { id, url } => self.fetch(&id, url).await,
      Command::Read { id, output } => self.read(&id, output.as_deref()),
      Command::Evict { budget } => self.evict(budget),
      Command::Queue => self.list_queue(),
      Command::Replay => self.replay().await,
      Command::Discard { id } => {
        if !self.engine.queue.discard(id)? {
          return Err(eyre!("No queued change with id {}", id));
        }
        println!("Discarded change {}", id);
        Ok(())
      }
      Command::Retry { id } => {
        if !self.engine.queue.retry(id)? {
          return Err(eyre!("Change {} is not in the failed state", id));
        }
        println!("Change {} will be retried on the next replay", id);
        Ok(())
      }
    }
  }

  fn status(&self) -> Result<()> {
    let coordinator = &self.engine.coordinator;
    let network: Arc<dyn Network> = Arc::new(HttpNetwork::new()?);
    let active = self.engine.interceptor(network).active_version()?;

    println!("Backend:          {}", self.engine.config.base_url);
    println!("Cache version:    {}", self.engine.config.cache_version);
    match active {
      Some(v) => println!("Active layer:     v{}", v),
      None => println!("Active layer:     none"),
    }
    println!(
      "Cached content:   {} items, {} / {} bytes",
      coordinator.cached_ids()?.len(),
      coordinator.total_size()?,
      self.engine.config.cache.budget_bytes
    );
    println!("Cached records:   {}", coordinator.read_records()?.len());
    println!("Pending changes:  {}", self.engine.queue.pending_count()?);
    println!("Failed changes:   {}", self.engine.queue.failed_items()?.len());
    Ok(())
  }

  async fn fetch(&self, id: &str, url: Option<url::Url>) -> Result<()> {
    let fetcher: Arc<dyn Fetcher> = match url {
      Some(url) => Arc::new(HttpFetcher::from_url(
        RemoteClient::new(&self.engine.config)?,
        url,
      )),
      None => self.engine.fetcher(),
    };

    let result = self.engine.coordinator.ensure_cached(id, fetcher).await?;
    let origin = match result.source {
      CacheSource::Network => "downloaded",
      CacheSource::CacheFresh => "already cached",
      CacheSource::CacheStale => "cached (refreshing)",
      CacheSource::Offline => "cached (backend unreachable)",
    };
    println!(
      "{}: {} ({}, {} bytes)",
      id, origin, result.data.mime_type, result.data.size_bytes
    );
    Ok(())
  }

  fn read(&self, id: &str, output: Option<&std::path::Path>) -> Result<()> {
    let entry = match self.engine.coordinator.read_or_unavailable(id) {
      Ok(entry) => entry,
      Err(e @ SyncError::NotCachedOffline { .. }) => {
        println!("{}", e);
        return Ok(());
      }
      Err(e) => return Err(e.into()),
    };

    println!("Id:        {}", entry.id);
    println!("Type:      {}", entry.mime_type);
    println!("Size:      {} bytes", entry.size_bytes);
    println!(
      "Hash:      {}",
      entry.content_hash.as_deref().unwrap_or("-")
    );
    println!("Cached:    {}", entry.created_at.format("%Y-%m-%d %H:%M"));

    if let Some(path) = output {
      std::fs::write(path, &entry.payload)?;
      println!("Written to {}", path.display());
    }
    Ok(())
  }

  fn evict(&self, budget: Option<u64>) -> Result<()> {
    let budget = budget.unwrap_or(self.engine.config.cache.budget_bytes);
    let evicted = self.engine.coordinator.evict_if_over_budget(budget)?;
    println!(
      "Evicted {} items; {} bytes remain",
      evicted,
      self.engine.coordinator.total_size()?
    );
    Ok(())
  }

  fn list_queue(&self) -> Result<()> {
    let items = self.engine.queue.items()?;
    if items.is_empty() {
      println!("No unsynced changes");
      return Ok(());
    }
    for item in &items {
      println!("{}", describe(item));
    }
    Ok(())
  }

  async fn replay(&self) -> Result<()> {
    let report = self.engine.queue.replay().await?;
    println!(
      "Synced {}, failed {}, held back {}",
      report.succeeded.len(),
      report.failed.len(),
      report.held_back.len()
    );

    if !report.exhausted.is_empty() {
      println!("Needs attention (use `retry` or `discard`):");
      for item in self.engine.queue.failed_items()? {
        println!("  {}", describe(&item));
      }
    }
    Ok(())
  }
}

fn describe(item: &QueueItem) -> String {
  let status = match item.status {
    QueueStatus::Pending => "pending",
    QueueStatus::InFlight => "sending",
    QueueStatus::Failed => "FAILED",
    QueueStatus::Done => "done",
  };
  let mut line = format!(
    "#{:<5} {:<8} {:<16} {:<20} attempts={}",
    item.id,
    status,
    item.operation.kind(),
    item.operation.target_id(),
    item.attempts
  );
  if let Some(error) = &item.last_error {
    line.push_str(&format!("  ({})", error));
  }
  line
}
