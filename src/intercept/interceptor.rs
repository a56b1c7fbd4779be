//! The interception layer: routes each request to the strategy of its class.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::InterceptConfig;
use crate::db::Database;
use crate::error::Result;
use crate::event::{Event, EventBus};

use super::classify::{classify, ClassifyRules, ResourceClass};
use super::lifecycle::LayerState;
use super::request::{request_key, Request, Response};
use super::response_cache::ResponseCache;

/// Executes requests against the real network.
#[async_trait]
pub trait Network: Send + Sync {
  async fn send(&self, request: &Request) -> Result<Response>;
}

pub(super) const PRECACHE: &str = "precache";
pub(super) const MEDIA: &str = "media";
pub(super) const API: &str = "api";
pub(super) const STATIC: &str = "static";
pub(super) const PAGES: &str = "pages";

/// Every cache kind owned by one layer version.
pub(super) const CACHE_KINDS: &[&str] = &[PRECACHE, MEDIA, API, STATIC, PAGES];

/// Precache key of the offline page.
pub(super) fn offline_page_key() -> String {
  request_key("GET offsync:offline-page")
}

/// Name of the `kind` cache owned by layer `version`.
fn versioned_name(kind: &str, version: u32) -> String {
  format!("{}-v{}", kind, version)
}

/// Client-resident request interceptor.
///
/// Until the layer is installed, requests pass straight to the network. A
/// waiting layer answers from the caches of the version still in control.
#[derive(Clone)]
pub struct Interceptor {
  pub(super) version: u32,
  pub(super) rules: ClassifyRules,
  pub(super) config: InterceptConfig,
  pub(super) db: Arc<Database>,
  pub(super) cache: Arc<ResponseCache>,
  pub(super) network: Arc<dyn Network>,
  pub(super) events: EventBus,
  pub(super) state: Arc<Mutex<LayerState>>,
}

impl Interceptor {
  pub fn new(
    version: u32,
    config: InterceptConfig,
    db: Arc<Database>,
    network: Arc<dyn Network>,
    events: EventBus,
  ) -> Self {
    Self {
      version,
      rules: ClassifyRules::from(&config),
      config,
      cache: Arc::new(ResponseCache::new(Arc::clone(&db))),
      db,
      network,
      events,
      state: Arc::new(Mutex::new(LayerState::Installing)),
    }
  }

  pub fn version(&self) -> u32 {
    self.version
  }

  pub fn response_cache(&self) -> &ResponseCache {
    &self.cache
  }

  /// Versioned name of one of this layer's caches.
  pub(super) fn cache_name(&self, kind: &str) -> String {
    versioned_name(kind, self.version)
  }

  /// Version whose caches answer requests right now.
  fn serving_version(&self) -> Result<Option<u32>> {
    Ok(match self.state() {
      LayerState::Activated => Some(self.version),
      LayerState::Waiting => Some(self.active_version()?.unwrap_or(self.version)),
      LayerState::Installing | LayerState::Installed => None,
    })
  }

  /// Answer a request the way its resource class prescribes.
  pub async fn handle(&self, request: &Request) -> Result<Response> {
    let version = match self.serving_version()? {
      Some(version) => version,
      None => return self.network.send(request).await,
    };

    let class = classify(request, &self.rules);
    debug!(method = %request.method, url = %request.url, ?class, version, "Intercepted request");

    match class {
      ResourceClass::ImmutableMedia => self.cache_first(request, version).await,
      ResourceClass::Api => Ok(self.network_first_with_timeout(request, version).await),
      ResourceClass::StaticAsset => self.stale_while_revalidate(request, version).await,
      ResourceClass::Navigation => self.navigate(request, version).await,
      ResourceClass::Passthrough => self.network.send(request).await,
    }
  }

  async fn cache_first(&self, request: &Request, version: u32) -> Result<Response> {
    let name = versioned_name(MEDIA, version);
    let max_age = self.config.media_max_age();
    let cached = self.cache.get(&name, &request.cache_key())?;

    if let Some(hit) = &cached {
      if hit.age() < max_age {
        return Ok(hit.response.clone());
      }
    }

    match self.network.send(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store(&name, request, &response);
          if let Err(e) = self
            .cache
            .trim(&name, Some(max_age), Some(self.config.media_max_entries))
          {
            warn!(cache = %name, error = %e, "Failed to trim media cache");
          }
        }
        Ok(response)
      }
      Err(e) => match cached {
        Some(hit) => {
          debug!(url = %request.url, error = %e, "Serving expired media copy");
          Ok(hit.response)
        }
        None => Err(e),
      },
    }
  }

  /// API calls never fail outright: the caller gets the network response,
  /// the last cached one, or a structured offline reply.
  async fn network_first_with_timeout(&self, request: &Request, version: u32) -> Response {
    let name = versioned_name(API, version);
    let wait = self.config.api_timeout();

    let error = match timeout(wait, self.network.send(request)).await {
      Ok(Ok(response)) => {
        if request.is_get() && response.is_success() {
          self.store(&name, request, &response);
          if let Err(e) = self.cache.trim(&name, Some(self.config.api_max_age()), None) {
            warn!(cache = %name, error = %e, "Failed to trim API cache");
          }
        }
        return response;
      }
      Ok(Err(e)) => e.to_string(),
      Err(_) => format!("timed out after {}ms", wait.as_millis()),
    };

    if request.is_get() {
      match self.cache.get(&name, &request.cache_key()) {
        Ok(Some(hit)) => {
          debug!(url = %request.url, error = %error, "Serving cached API response");
          return hit.response;
        }
        Ok(None) => {}
        Err(e) => warn!(url = %request.url, error = %e, "API cache lookup failed"),
      }
    }

    warn!(url = %request.url, error = %error, "API request failed, replying offline");
    Response::offline(&error)
  }

  async fn stale_while_revalidate(&self, request: &Request, version: u32) -> Result<Response> {
    let name = versioned_name(STATIC, version);

    if let Some(hit) = self.cache.get(&name, &request.cache_key())? {
      self.spawn_revalidate(request.clone(), name);
      return Ok(hit.response);
    }

    let response = self.network.send(request).await?;
    if response.is_success() {
      self.store(&name, request, &response);
    }
    Ok(response)
  }

  async fn navigate(&self, request: &Request, version: u32) -> Result<Response> {
    let name = versioned_name(PAGES, version);

    let error = match self.network.send(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store(&name, request, &response);
        }
        return Ok(response);
      }
      Err(e) => e,
    };

    let route = request.route();
    let fallback = match self.cache.get(&name, &request.cache_key())? {
      Some(hit) => hit.response,
      None => self.offline_page(version)?,
    };

    warn!(url = %route, error = %error, "Navigation failed, serving offline fallback");
    self.events.publish(Event::OfflineFallback { url: route });
    Ok(fallback)
  }

  /// The precached offline page, or the configured one if the precache is gone.
  fn offline_page(&self, version: u32) -> Result<Response> {
    let precached = self
      .cache
      .get(&versioned_name(PRECACHE, version), &offline_page_key())?;
    Ok(match precached {
      Some(hit) => hit.response,
      None => Response::offline_page(&self.config.offline_page),
    })
  }

  /// Cache writes never fail the request they belong to.
  fn store(&self, cache_name: &str, request: &Request, response: &Response) {
    if let Err(e) = self
      .cache
      .put(cache_name, &request.cache_key(), request.url.as_str(), response)
    {
      warn!(cache = %cache_name, url = %request.url, error = %e, "Failed to cache response");
    }
  }

  fn spawn_revalidate(&self, request: Request, cache_name: String) {
    let this = self.clone();
    tokio::spawn(async move {
      match this.network.send(&request).await {
        Ok(response) if response.is_success() => {
          this.store(&cache_name, &request, &response);
          debug!(url = %request.url, "Revalidated static asset");
        }
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "Revalidation not cached")
        }
        Err(e) => debug!(url = %request.url, error = %e, "Revalidation failed, keeping cached copy"),
      }
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::SyncError;
  use crate::intercept::request::Destination;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::time::Duration;
  use url::Url;

  /// Network double: answers from a route table, or fails while "offline".
  #[derive(Default)]
  struct FakeNetwork {
    routes: Mutex<HashMap<String, Response>>,
    offline: AtomicBool,
    delay: Mutex<Option<Duration>>,
    sends: AtomicUsize,
  }

  impl FakeNetwork {
    fn route(&self, path: &str, response: Response) {
      self.routes.lock().unwrap().insert(path.to_string(), response);
    }
  }

  #[async_trait]
  impl Network for FakeNetwork {
    async fn send(&self, request: &Request) -> Result<Response> {
      self.sends.fetch_add(1, Ordering::SeqCst);
      let delay = *self.delay.lock().unwrap();
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      if self.offline.load(Ordering::SeqCst) {
        return Err(SyncError::NetworkUnavailable("connection refused".into()));
      }
      let found = self.routes.lock().unwrap().get(&request.route()).cloned();
      Ok(found.unwrap_or_else(|| Response::new(404, "not found")))
    }
  }

  fn url(path: &str) -> Url {
    Url::parse(&format!("https://app.example.com{}", path)).unwrap()
  }

  async fn active_layer(network: Arc<FakeNetwork>) -> (Interceptor, EventBus) {
    let events = EventBus::new();
    let db = Arc::new(Database::open_in_memory(1).unwrap());
    let layer = Interceptor::new(1, InterceptConfig::default(), db, network, events.clone());
    layer.install(0).unwrap();
    (layer, events)
  }

  #[tokio::test]
  async fn test_navigation_falls_back_to_offline_page() {
    let network = Arc::new(FakeNetwork::default());
    network.offline.store(true, Ordering::SeqCst);
    let (layer, events) = active_layer(Arc::clone(&network)).await;
    let mut rx = events.subscribe();

    let response = layer.handle(&Request::navigate(url("/library"))).await.unwrap();

    assert_eq!(response.status, 200);
    assert!(String::from_utf8_lossy(&response.body).contains("You are offline"));
    match rx.try_recv().unwrap() {
      Event::OfflineFallback { url } => assert_eq!(url, "/library"),
      other => panic!("unexpected event {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_navigation_prefers_cached_copy_of_same_url() {
    let network = Arc::new(FakeNetwork::default());
    network.route("/library", Response::new(200, "<h1>Library</h1>"));
    let (layer, _events) = active_layer(Arc::clone(&network)).await;

    let page = Request::navigate(url("/library"));
    layer.handle(&page).await.unwrap();
    network.offline.store(true, Ordering::SeqCst);

    let response = layer.handle(&page).await.unwrap();
    assert_eq!(response.body, b"<h1>Library</h1>".to_vec());
  }

  #[tokio::test]
  async fn test_api_offline_reply_without_cache() {
    let network = Arc::new(FakeNetwork::default());
    network.offline.store(true, Ordering::SeqCst);
    let (layer, _events) = active_layer(network).await;

    let response = layer.handle(&Request::get(url("/api/songs"))).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();

    assert_eq!(response.status, 503);
    assert_eq!(body["offline"], true);
    assert!(body["error"].as_str().unwrap().contains("connection refused"));
  }

  #[tokio::test]
  async fn test_api_timeout_serves_cached_response() {
    let network = Arc::new(FakeNetwork::default());
    network.route("/api/songs", Response::new(200, "[1,2,3]"));
    let config = InterceptConfig {
      api_timeout_ms: 50,
      ..InterceptConfig::default()
    };
    let db = Arc::new(Database::open_in_memory(1).unwrap());
    let layer = Interceptor::new(
      1,
      config,
      db,
      Arc::clone(&network) as Arc<dyn Network>,
      EventBus::new(),
    );
    layer.install(0).unwrap();
    let request = Request::get(url("/api/songs"));

    layer.handle(&request).await.unwrap();
    network.route("/api/songs", Response::new(200, "[1,2,3,4]"));
    *network.delay.lock().unwrap() = Some(Duration::from_secs(5));

    let started = std::time::Instant::now();
    let response = layer.handle(&request).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"[1,2,3]".to_vec());
  }

  #[tokio::test]
  async fn test_api_writes_are_never_cached() {
    let network = Arc::new(FakeNetwork::default());
    network.route("/api/songs", Response::new(201, "{}"));
    let (layer, _events) = active_layer(Arc::clone(&network)).await;
    let post = Request::get(url("/api/songs")).with_method("POST");

    layer.handle(&post).await.unwrap();
    network.offline.store(true, Ordering::SeqCst);

    assert_eq!(layer.handle(&post).await.unwrap().status, 503);
  }

  #[tokio::test]
  async fn test_media_is_cache_first_and_bounded() {
    let network = Arc::new(FakeNetwork::default());
    let events = EventBus::new();
    let db = Arc::new(Database::open_in_memory(1).unwrap());
    let config = InterceptConfig {
      media_max_entries: 2,
      ..InterceptConfig::default()
    };
    let layer = Interceptor::new(1, config, db, Arc::clone(&network) as Arc<dyn Network>, events);
    layer.install(0).unwrap();

    for i in 0..3 {
      network.route(&format!("/media/{}.png", i), Response::new(200, vec![i as u8]));
      layer
        .handle(&Request::get(url(&format!("/media/{}.png", i))))
        .await
        .unwrap();
      std::thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(layer.response_cache().len("media-v1").unwrap(), 2);

    let sends = network.sends.load(Ordering::SeqCst);
    let again = Request::get(url("/media/2.png")).with_destination(Destination::Image);
    assert_eq!(layer.handle(&again).await.unwrap().body, vec![2u8]);
    assert_eq!(network.sends.load(Ordering::SeqCst), sends);
  }

  #[tokio::test]
  async fn test_static_assets_revalidate_in_background() {
    let network = Arc::new(FakeNetwork::default());
    network.route("/assets/app.js", Response::new(200, "v1"));
    let (layer, _events) = active_layer(Arc::clone(&network)).await;
    let request = Request::get(url("/assets/app.js"));

    assert_eq!(layer.handle(&request).await.unwrap().body, b"v1".to_vec());
    network.route("/assets/app.js", Response::new(200, "v2"));

    // Stale copy first, refreshed copy on the next request
    assert_eq!(layer.handle(&request).await.unwrap().body, b"v1".to_vec());
    for _ in 0..50 {
      tokio::task::yield_now().await;
    }
    assert_eq!(layer.handle(&request).await.unwrap().body, b"v2".to_vec());
  }

  #[tokio::test]
  async fn test_waiting_update_keeps_serving_from_active_version() {
    let network = Arc::new(FakeNetwork::default());
    network.route("/media/cover.png", Response::new(200, vec![1u8, 2, 3]));
    let (v1, events) = active_layer(Arc::clone(&network)).await;
    v1.handle(&Request::get(url("/media/cover.png"))).await.unwrap();

    let v2 = Interceptor::new(
      2,
      InterceptConfig::default(),
      Arc::clone(&v1.db),
      Arc::clone(&network) as Arc<dyn Network>,
      events.clone(),
    );
    let session = crate::intercept::ClientSession::new();
    let layer = session.register(|| v2, 1).await.unwrap();
    assert_eq!(layer.state(), LayerState::Waiting);

    network.offline.store(true, Ordering::SeqCst);
    let mut rx = events.subscribe();

    let page = layer.handle(&Request::navigate(url("/library"))).await.unwrap();
    assert!(String::from_utf8_lossy(&page.body).contains("You are offline"));
    match rx.try_recv().unwrap() {
      Event::OfflineFallback { url } => assert_eq!(url, "/library"),
      other => panic!("unexpected event {:?}", other),
    }

    let cover = layer.handle(&Request::get(url("/media/cover.png"))).await.unwrap();
    assert_eq!(cover.body, vec![1u8, 2, 3]);
    assert_eq!(layer.response_cache().len("media-v2").unwrap(), 0);
  }

  #[tokio::test]
  async fn test_requests_pass_through_before_activation() {
    let network = Arc::new(FakeNetwork::default());
    network.offline.store(true, Ordering::SeqCst);
    let db = Arc::new(Database::open_in_memory(1).unwrap());
    let layer = Interceptor::new(
      1,
      InterceptConfig::default(),
      db,
      network as Arc<dyn Network>,
      EventBus::new(),
    );

    let result = layer.handle(&Request::get(url("/api/songs"))).await;
    assert!(matches!(result, Err(SyncError::NetworkUnavailable(_))));
  }
}
