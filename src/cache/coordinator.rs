//! Cache coordinator: the public face of the blob and record partitions.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::store::{BlobStore, CacheEntry, RecordCacheEntry, RecordStore};

use super::coalesce::Coalescer;
use super::traits::{AuthContext, CacheResult, CacheSource, EnsureOptions, Fetcher, PinSource};

/// Coordinates downloads, offline reads and eviction.
///
/// This sits between the application and its content sources, making
/// previously viewed content and records available without a network.
/// Each instance owns its own in-flight download table.
pub struct CacheCoordinator {
  blobs: Arc<dyn BlobStore>,
  records: Arc<dyn RecordStore>,
  downloads: Arc<Coalescer<Result<(CacheEntry, CacheSource)>>>,
  pins: Option<Arc<dyn PinSource>>,
  auth: AuthContext,
  /// Target size for the eviction pass that follows a quota failure
  budget_bytes: u64,
  defaults: EnsureOptions,
}

impl CacheCoordinator {
  /// Create a new coordinator over the given stores.
  pub fn new(blobs: Arc<dyn BlobStore>, records: Arc<dyn RecordStore>) -> Self {
    Self {
      blobs,
      records,
      downloads: Arc::new(Coalescer::new()),
      pins: None,
      auth: AuthContext::default(),
      budget_bytes: u64::MAX,
      defaults: EnsureOptions::default(),
    }
  }

  /// Protect ids referenced by unsynced changes from eviction.
  pub fn with_pin_source(mut self, pins: Arc<dyn PinSource>) -> Self {
    self.pins = Some(pins);
    self
  }

  /// Scope cached records to a user.
  pub fn with_auth(mut self, auth: AuthContext) -> Self {
    self.auth = auth;
    self
  }

  pub fn with_budget(mut self, budget_bytes: u64) -> Self {
    self.budget_bytes = budget_bytes;
    self
  }

  /// Options used by [`Self::ensure_cached`].
  pub fn with_default_options(mut self, options: EnsureOptions) -> Self {
    self.defaults = options;
    self
  }

  /// Make `id` available offline using the coordinator's default options.
  pub async fn ensure_cached(
    &self,
    id: &str,
    fetcher: Arc<dyn Fetcher>,
  ) -> Result<CacheResult<CacheEntry>> {
    self.ensure_cached_with(id, fetcher, self.defaults).await
  }

  /// Make `id` available offline.
  ///
  /// 1. Cached and no hash check requested - serve the cached entry
  /// 2. Cached and the remote hash matches (or cannot be checked) - serve it
  /// 3. Hash differs - refresh now, or serve stale and refresh in background
  /// 4. Not cached - download once, however many callers are waiting
  pub async fn ensure_cached_with(
    &self,
    id: &str,
    fetcher: Arc<dyn Fetcher>,
    options: EnsureOptions,
  ) -> Result<CacheResult<CacheEntry>> {
    let cached = self.blobs.get(id)?;
    let refreshing = cached.is_some();
    if let Some(cached) = cached {
      if !options.verify_hash {
        return self.serve(cached, CacheSource::CacheFresh);
      }

      match fetcher.probe_hash(id).await {
        Ok(Some(remote)) if cached.content_hash.as_deref() != Some(remote.as_str()) => {
          let mismatch = SyncError::IntegrityMismatch {
            id: id.to_string(),
            expected: cached.content_hash.clone().unwrap_or_default(),
            actual: remote,
          };
          warn!(error = %mismatch, "Cached content is out of date, refreshing");

          if options.stale_while_revalidate {
            self.spawn_refresh(id, fetcher);
            return self.serve(cached, CacheSource::CacheStale);
          }
        }
        Ok(_) => return self.serve(cached, CacheSource::CacheFresh),
        Err(e) => {
          debug!(id, error = %e, "Hash check failed, serving cached copy");
          return self.serve(cached, CacheSource::Offline);
        }
      }
    }

    match self.download(id, fetcher, !refreshing).await? {
      (entry, CacheSource::Network) => Ok(CacheResult::from_network(entry)),
      (entry, source) => self.serve(entry, source),
    }
  }

  /// Read a cached entry. Never touches the network.
  pub fn read(&self, id: &str) -> Result<Option<CacheEntry>> {
    match self.blobs.get(id)? {
      Some(mut entry) => {
        let now = Utc::now();
        self.blobs.touch(id, now)?;
        entry.last_accessed_at = now;
        Ok(Some(entry))
      }
      None => Ok(None),
    }
  }

  /// Like [`Self::read`], but a miss is an explicit "not available offline".
  pub fn read_or_unavailable(&self, id: &str) -> Result<CacheEntry> {
    self.read(id)?.ok_or_else(|| SyncError::NotCachedOffline { id: id.to_string() })
  }

  /// Drop a cached entry, e.g. because its owning record was deleted.
  pub fn invalidate(&self, id: &str) -> Result<()> {
    if self.blobs.delete(id)? {
      debug!(id, "Invalidated cache entry");
    }
    Ok(())
  }

  /// Evict least recently accessed entries until the blob partition fits in
  /// `max_total_bytes`. Pinned entries are never evicted.
  pub fn evict_if_over_budget(&self, max_total_bytes: u64) -> Result<usize> {
    let mut total = self.blobs.total_size()?;
    if total <= max_total_bytes {
      return Ok(0);
    }

    let pinned: HashSet<String> = match &self.pins {
      Some(pins) => pins.pinned_ids()?,
      None => HashSet::new(),
    };

    let mut evicted = 0;
    for entry in self.blobs.list_summaries()? {
      if total <= max_total_bytes {
        break;
      }
      if pinned.contains(&entry.id) {
        debug!(id = %entry.id, "Skipping eviction of pinned entry");
        continue;
      }
      if self.blobs.delete(&entry.id)? {
        total = total.saturating_sub(entry.size_bytes);
        evicted += 1;
      }
    }

    if total > max_total_bytes {
      warn!(
        total,
        budget = max_total_bytes,
        pinned = pinned.len(),
        "Cache still over budget after eviction"
      );
    } else {
      info!(evicted, total, budget = max_total_bytes, "Evicted cache entries");
    }

    Ok(evicted)
  }

  /// Merge a batch of records into the record partition.
  ///
  /// Records are stamped with the current user; records explicitly owned by
  /// someone else are not eligible for caching.
  pub fn save_records(&self, records: Vec<RecordCacheEntry>) -> Result<()> {
    let user = self.auth.user_id.as_deref();
    let eligible: Vec<RecordCacheEntry> = records
      .into_iter()
      .filter(|r| match (r.owner.as_deref(), user) {
        (Some(owner), Some(user)) if owner != user => {
          debug!(id = %r.id, owner, "Skipping record owned by another user");
          false
        }
        _ => true,
      })
      .map(|mut r| {
        if r.owner.is_none() {
          r.owner = user.map(String::from);
        }
        r
      })
      .collect();

    self.records.put_batch(&eligible)
  }

  /// Cached records for the current user, in collection order.
  pub fn read_records(&self) -> Result<Vec<RecordCacheEntry>> {
    self.records.list_all(self.auth.user_id.as_deref())
  }

  pub fn invalidate_record(&self, id: &str) -> Result<()> {
    self.records.delete(id)?;
    Ok(())
  }

  /// Total bytes held by the blob partition.
  pub fn total_size(&self) -> Result<u64> {
    self.blobs.total_size()
  }

  /// Ids of every cached entry, least recently accessed first.
  pub fn cached_ids(&self) -> Result<Vec<String>> {
    Ok(self.blobs.list_summaries()?.into_iter().map(|e| e.id).collect())
  }

  fn serve(&self, mut entry: CacheEntry, source: CacheSource) -> Result<CacheResult<CacheEntry>> {
    let now = Utc::now();
    self.blobs.touch(&entry.id, now)?;
    let cached_at = entry.created_at;
    entry.last_accessed_at = now;

    Ok(match source {
      CacheSource::Offline => CacheResult::offline(entry, cached_at),
      CacheSource::CacheStale => CacheResult::from_cache(entry, cached_at, true),
      _ => CacheResult::from_cache(entry, cached_at, false),
    })
  }

  /// Download and store `id`, collapsing concurrent calls into one.
  ///
  /// With `if_missing`, an entry stored by a leader that finished between the
  /// caller's miss and its registration is returned instead of downloading again.
  async fn download(
    &self,
    id: &str,
    fetcher: Arc<dyn Fetcher>,
    if_missing: bool,
  ) -> Result<(CacheEntry, CacheSource)> {
    self
      .downloads
      .run(id, || async {
        if if_missing {
          if let Some(entry) = self.blobs.get(id)? {
            debug!(id, "Stored by an earlier download, skipping fetch");
            return Ok((entry, CacheSource::CacheFresh));
          }
        }

        let fetched = fetcher.fetch(id).await?;
        let entry = CacheEntry::new(id, fetched.bytes, fetched.mime_type);

        if let (Some(advertised), Some(actual)) = (&fetched.content_hash, &entry.content_hash) {
          if advertised != actual {
            return Err(SyncError::IntegrityMismatch {
              id: id.to_string(),
              expected: advertised.clone(),
              actual: actual.clone(),
            });
          }
        }

        self.store_with_retry(&entry)?;
        info!(id, size = entry.size_bytes, mime = %entry.mime_type, "Cached content");
        Ok((entry, CacheSource::Network))
      })
      .await
  }

  /// Write an entry; a quota failure triggers one eviction pass and one retry.
  fn store_with_retry(&self, entry: &CacheEntry) -> Result<()> {
    match self.blobs.put(entry) {
      Err(SyncError::StorageQuotaExceeded { quota, .. }) => {
        let limit = if quota > 0 {
          quota.min(self.budget_bytes)
        } else {
          self.budget_bytes
        };
        let target = limit.saturating_sub(entry.size_bytes);
        let evicted = self.evict_if_over_budget(target)?;
        warn!(id = %entry.id, evicted, "Storage quota hit, retrying after eviction");
        self.blobs.put(entry)
      }
      other => other,
    }
  }

  fn spawn_refresh(&self, id: &str, fetcher: Arc<dyn Fetcher>) {
    let this = self.clone();
    let id = id.to_string();
    tokio::spawn(async move {
      match this.download(&id, fetcher, false).await {
        Ok((entry, _)) => debug!(id = %id, size = entry.size_bytes, "Background refresh complete"),
        Err(e) => warn!(id = %id, error = %e, "Background refresh failed, keeping stale copy"),
      }
    });
  }
}

impl Clone for CacheCoordinator {
  fn clone(&self) -> Self {
    Self {
      blobs: Arc::clone(&self.blobs),
      records: Arc::clone(&self.records),
      downloads: Arc::clone(&self.downloads),
      pins: self.pins.clone(),
      auth: self.auth.clone(),
      budget_bytes: self.budget_bytes,
      defaults: self.defaults,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::store::{content_hash, SqliteBlobStore, SqliteRecordStore};
  use crate::cache::FetchedPayload;
  use async_trait::async_trait;
  use serde_json::json;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Mutex;
  use std::time::Duration;

  struct FakeFetcher {
    body: Mutex<Vec<u8>>,
    fetches: AtomicUsize,
    offline: AtomicBool,
    delay: Duration,
  }

  impl FakeFetcher {
    fn new(body: &[u8]) -> Arc<Self> {
      Arc::new(Self {
        body: Mutex::new(body.to_vec()),
        fetches: AtomicUsize::new(0),
        offline: AtomicBool::new(false),
        delay: Duration::from_millis(10),
      })
    }

    fn fetches(&self) -> usize {
      self.fetches.load(Ordering::SeqCst)
    }

    fn set_body(&self, body: &[u8]) {
      *self.body.lock().unwrap() = body.to_vec();
    }
  }

  #[async_trait]
  impl Fetcher for FakeFetcher {
    async fn fetch(&self, _id: &str) -> Result<FetchedPayload> {
      self.fetches.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(self.delay).await;
      if self.offline.load(Ordering::SeqCst) {
        return Err(SyncError::NetworkUnavailable("offline".into()));
      }
      Ok(FetchedPayload {
        bytes: self.body.lock().unwrap().clone(),
        mime_type: "application/pdf".into(),
        content_hash: None,
      })
    }

    async fn probe_hash(&self, _id: &str) -> Result<Option<String>> {
      if self.offline.load(Ordering::SeqCst) {
        return Err(SyncError::NetworkUnavailable("offline".into()));
      }
      Ok(Some(content_hash(&self.body.lock().unwrap())))
    }
  }

  struct FixedPins(HashSet<String>);

  impl PinSource for FixedPins {
    fn pinned_ids(&self) -> Result<HashSet<String>> {
      Ok(self.0.clone())
    }
  }

  fn stores() -> (Arc<SqliteBlobStore>, Arc<SqliteRecordStore>) {
    let db = Arc::new(Database::open_in_memory(1).unwrap());
    (
      Arc::new(SqliteBlobStore::new(db.clone())),
      Arc::new(SqliteRecordStore::new(db)),
    )
  }

  fn coordinator() -> CacheCoordinator {
    let (blobs, records) = stores();
    CacheCoordinator::new(blobs, records)
  }

  const VERIFY: EnsureOptions = EnsureOptions {
    verify_hash: true,
    stale_while_revalidate: false,
  };

  #[tokio::test]
  async fn test_ensure_cached_is_idempotent() {
    let cache = coordinator();
    let fetcher = FakeFetcher::new(b"%PDF-1.7 chart");

    let first = cache.ensure_cached("c1", fetcher.clone()).await.unwrap();
    let second = cache.ensure_cached("c1", fetcher.clone()).await.unwrap();

    assert_eq!(fetcher.fetches(), 1);
    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(first.data.payload, second.data.payload);
  }

  #[tokio::test]
  async fn test_concurrent_ensure_cached_downloads_once() {
    let cache = coordinator();
    let fetcher = FakeFetcher::new(b"shared");

    let calls = (0..10).map(|_| cache.ensure_cached("c1", fetcher.clone()));
    let results = futures::future::join_all(calls).await;

    assert_eq!(fetcher.fetches(), 1);
    for result in results {
      assert_eq!(result.unwrap().data.payload, b"shared");
    }
  }

  #[tokio::test]
  async fn test_failed_download_keeps_previous_entry() {
    let cache = coordinator();
    let fetcher = FakeFetcher::new(b"v1");
    cache.ensure_cached("c1", fetcher.clone()).await.unwrap();

    // Remote changed, then the download of the new version fails
    fetcher.set_body(b"v2");
    let failing = Arc::new(FailingFetch(content_hash(b"v2")));
    let err = cache.ensure_cached_with("c1", failing, VERIFY).await.unwrap_err();

    assert!(matches!(err, SyncError::NetworkUnavailable(_)));
    assert_eq!(cache.read("c1").unwrap().unwrap().payload, b"v1");
  }

  struct FailingFetch(String);

  #[async_trait]
  impl Fetcher for FailingFetch {
    async fn fetch(&self, _id: &str) -> Result<FetchedPayload> {
      Err(SyncError::NetworkUnavailable("connection reset".into()))
    }

    async fn probe_hash(&self, _id: &str) -> Result<Option<String>> {
      Ok(Some(self.0.clone()))
    }
  }

  #[tokio::test]
  async fn test_download_failure_creates_nothing() {
    let cache = coordinator();
    let failing = Arc::new(FailingFetch(String::new()));

    assert!(cache.ensure_cached("c1", failing).await.is_err());
    assert!(cache.read("c1").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_hash_check_refreshes_changed_content() {
    let cache = coordinator();
    let fetcher = FakeFetcher::new(b"v1");
    cache.ensure_cached_with("c1", fetcher.clone(), VERIFY).await.unwrap();

    let same = cache.ensure_cached_with("c1", fetcher.clone(), VERIFY).await.unwrap();
    assert_eq!(same.source, CacheSource::CacheFresh);
    assert_eq!(fetcher.fetches(), 1);

    fetcher.set_body(b"v2");
    let refreshed = cache.ensure_cached_with("c1", fetcher.clone(), VERIFY).await.unwrap();
    assert_eq!(refreshed.source, CacheSource::Network);
    assert_eq!(refreshed.data.payload, b"v2");
    assert_eq!(fetcher.fetches(), 2);
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_swaps_in_background() {
    let cache = coordinator();
    let fetcher = FakeFetcher::new(b"v1");
    cache.ensure_cached("c1", fetcher.clone()).await.unwrap();

    fetcher.set_body(b"v2");
    let options = EnsureOptions {
      verify_hash: true,
      stale_while_revalidate: true,
    };
    let stale = cache.ensure_cached_with("c1", fetcher.clone(), options).await.unwrap();
    assert_eq!(stale.source, CacheSource::CacheStale);
    assert_eq!(stale.data.payload, b"v1");

    let mut swapped = false;
    for _ in 0..50 {
      tokio::time::sleep(Duration::from_millis(10)).await;
      if cache.read("c1").unwrap().unwrap().payload == b"v2" {
        swapped = true;
        break;
      }
    }
    assert!(swapped);
  }

  #[tokio::test]
  async fn test_unreachable_hash_check_serves_offline_copy() {
    let cache = coordinator();
    let fetcher = FakeFetcher::new(b"v1");
    cache.ensure_cached("c1", fetcher.clone()).await.unwrap();

    fetcher.offline.store(true, Ordering::SeqCst);
    let result = cache.ensure_cached_with("c1", fetcher.clone(), VERIFY).await.unwrap();

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data.payload, b"v1");
  }

  #[tokio::test]
  async fn test_advertised_hash_mismatch_is_rejected() {
    struct Corrupting;

    #[async_trait]
    impl Fetcher for Corrupting {
      async fn fetch(&self, _id: &str) -> Result<FetchedPayload> {
        Ok(FetchedPayload {
          bytes: b"truncated".to_vec(),
          mime_type: "image/png".into(),
          content_hash: Some(content_hash(b"the full image")),
        })
      }
    }

    let cache = coordinator();
    let err = cache.ensure_cached("c1", Arc::new(Corrupting)).await.unwrap_err();

    assert!(matches!(err, SyncError::IntegrityMismatch { .. }));
    assert!(cache.read("c1").unwrap().is_none());
  }

  #[test]
  fn test_offline_read_scenario() {
    let (blobs, records) = stores();
    blobs
      .put(&CacheEntry::new("c1", vec![0u8; 1000], "application/pdf"))
      .unwrap();
    let cache = CacheCoordinator::new(blobs, records);

    let entry = cache.read("c1").unwrap().unwrap();
    assert_eq!(entry.mime_type, "application/pdf");
    assert_eq!(entry.size_bytes, 1000);
    assert_eq!(entry.payload, vec![0u8; 1000]);

    assert!(cache.read("c2").unwrap().is_none());
    assert!(matches!(
      cache.read_or_unavailable("c2"),
      Err(SyncError::NotCachedOffline { .. })
    ));
  }

  #[test]
  fn test_eviction_is_lru_and_respects_pins() {
    let (blobs, records) = stores();
    let now = Utc::now();
    for (id, age) in [("oldest", 40), ("pinned", 30), ("older", 20), ("newest", 10)] {
      blobs.put(&CacheEntry::new(id, vec![0u8; 100], "image/png")).unwrap();
      blobs.touch(id, now - chrono::Duration::seconds(age)).unwrap();
    }
    let pins = Arc::new(FixedPins(HashSet::from(["pinned".to_string()])));
    let cache = CacheCoordinator::new(blobs.clone(), records).with_pin_source(pins);

    let evicted = cache.evict_if_over_budget(200).unwrap();

    assert_eq!(evicted, 2);
    assert!(cache.total_size().unwrap() <= 200);
    let mut left = cache.cached_ids().unwrap();
    left.sort();
    assert_eq!(left, vec!["newest", "pinned"]);
  }

  #[test]
  fn test_eviction_reads_metadata_only() {
    let db = Arc::new(Database::open_in_memory(1).unwrap());
    let blobs = Arc::new(SqliteBlobStore::new(db.clone()));
    let now = Utc::now();
    for (id, age) in [("a", 20), ("b", 10)] {
      blobs.put(&CacheEntry::new(id, vec![0u8; 100], "image/png")).unwrap();
      blobs.touch(id, now - chrono::Duration::seconds(age)).unwrap();
    }
    // Payload no longer matches its metadata; only a full read would notice
    db.conn()
      .unwrap()
      .execute("UPDATE blobs SET payload = x'00'", [])
      .unwrap();
    let cache = CacheCoordinator::new(blobs, Arc::new(SqliteRecordStore::new(db)));

    assert_eq!(cache.cached_ids().unwrap(), vec!["a", "b"]);
    assert_eq!(cache.evict_if_over_budget(100).unwrap(), 1);
    assert_eq!(cache.cached_ids().unwrap(), vec!["b"]);
  }

  #[tokio::test]
  async fn test_download_after_racing_store_skips_fetch() {
    let cache = coordinator();
    let fetcher = FakeFetcher::new(b"remote");
    cache
      .blobs
      .put(&CacheEntry::new("c1", b"stored".to_vec(), "application/pdf"))
      .unwrap();

    let (entry, source) = cache.download("c1", fetcher.clone(), true).await.unwrap();
    assert_eq!(source, CacheSource::CacheFresh);
    assert_eq!(entry.payload, b"stored");
    assert_eq!(fetcher.fetches(), 0);

    let (entry, source) = cache.download("c1", fetcher.clone(), false).await.unwrap();
    assert_eq!(source, CacheSource::Network);
    assert_eq!(entry.payload, b"remote");
    assert_eq!(fetcher.fetches(), 1);
  }

  #[test]
  fn test_eviction_under_budget_is_a_no_op() {
    let (blobs, records) = stores();
    blobs.put(&CacheEntry::new("a", vec![0u8; 10], "text/plain")).unwrap();
    let cache = CacheCoordinator::new(blobs, records);

    assert_eq!(cache.evict_if_over_budget(10).unwrap(), 0);
    assert_eq!(cache.cached_ids().unwrap(), vec!["a"]);
  }

  #[tokio::test]
  async fn test_quota_failure_evicts_then_retries() {
    let db = Arc::new(Database::open_in_memory(1).unwrap());
    let blobs = Arc::new(SqliteBlobStore::new(db.clone()).with_quota(Some(10)));
    let cache = CacheCoordinator::new(blobs.clone(), Arc::new(SqliteRecordStore::new(db)));
    blobs.put(&CacheEntry::new("old", vec![0u8; 8], "text/plain")).unwrap();

    let result = cache.ensure_cached("new", FakeFetcher::new(b"123456")).await.unwrap();

    assert_eq!(result.data.size_bytes, 6);
    assert!(cache.read("old").unwrap().is_none());
    assert!(cache.read("new").unwrap().is_some());
  }

  #[tokio::test]
  async fn test_quota_failure_surfaces_when_eviction_cannot_help() {
    let db = Arc::new(Database::open_in_memory(1).unwrap());
    let blobs = Arc::new(SqliteBlobStore::new(db.clone()).with_quota(Some(4)));
    let cache = CacheCoordinator::new(blobs, Arc::new(SqliteRecordStore::new(db)));

    let err = cache.ensure_cached("big", FakeFetcher::new(b"123456")).await.unwrap_err();
    assert!(err.is_quota());
  }

  #[test]
  fn test_records_merge_not_duplicate() {
    let cache = coordinator();
    cache
      .save_records(vec![
        RecordCacheEntry::new("set-1", json!({"name": "Friday", "songs": [{"id": "s1"}]})),
        RecordCacheEntry::new("set-2", json!({"name": "Sunday", "songs": []})),
      ])
      .unwrap();
    cache
      .save_records(vec![RecordCacheEntry::new(
        "set-1",
        json!({"name": "Friday (late)", "songs": [{"id": "s1"}, {"id": "s2"}]}),
      )])
      .unwrap();

    let records = cache.read_records().unwrap();
    let set_1: Vec<_> = records.iter().filter(|r| r.id == "set-1").collect();
    assert_eq!(records.len(), 2);
    assert_eq!(set_1.len(), 1);
    assert_eq!(set_1[0].payload["name"], "Friday (late)");
    assert_eq!(set_1[0].payload["songs"].as_array().unwrap().len(), 2);
  }

  #[test]
  fn test_records_are_scoped_to_user() {
    let (blobs, records) = stores();
    let alice = CacheCoordinator::new(blobs.clone(), records.clone())
      .with_auth(AuthContext::user("alice"));
    let bob = CacheCoordinator::new(blobs, records).with_auth(AuthContext::user("bob"));

    let mut foreign = RecordCacheEntry::new("b-1", json!({}));
    foreign.owner = Some("bob".into());
    alice
      .save_records(vec![RecordCacheEntry::new("a-1", json!({})), foreign])
      .unwrap();
    bob.save_records(vec![RecordCacheEntry::new("b-2", json!({}))]).unwrap();

    let ids: Vec<String> = alice.read_records().unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["a-1"]);
    let ids: Vec<String> = bob.read_records().unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["b-2"]);
  }

  #[tokio::test]
  async fn test_invalidate_forces_new_download() {
    let cache = coordinator();
    let fetcher = FakeFetcher::new(b"v1");
    cache.ensure_cached("c1", fetcher.clone()).await.unwrap();

    cache.invalidate("c1").unwrap();
    assert!(cache.read("c1").unwrap().is_none());

    cache.ensure_cached("c1", fetcher.clone()).await.unwrap();
    assert_eq!(fetcher.fetches(), 2);
  }
}
