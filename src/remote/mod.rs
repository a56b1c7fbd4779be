//! HTTP implementations of the backend-facing traits.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use std::time::Duration;
use url::Url;

use crate::cache::{FetchedPayload, Fetcher};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::intercept::{Network, Request, Response};
use crate::queue::{Operation, Transport};

/// Header the backend uses to advertise a payload's content hash.
pub const CONTENT_HASH_HEADER: &str = "x-content-hash";
const FILE_NAME_HEADER: &str = "x-file-name";

/// Backend client shared by the fetcher and the transport.
#[derive(Clone)]
pub struct RemoteClient {
  http: reqwest::Client,
  base: Url,
  token: Option<String>,
}

impl RemoteClient {
  pub fn new(config: &Config) -> Result<Self> {
    let base = Url::parse(&config.base_url)
      .map_err(|e| SyncError::Config(format!("Invalid base_url '{}': {}", config.base_url, e)))?;
    Self::with_base(base, Config::api_token())
  }

  pub fn with_base(base: Url, token: Option<String>) -> Result<Self> {
    if base.cannot_be_a_base() {
      return Err(SyncError::Config(format!("{} cannot be a base URL", base)));
    }

    let http = reqwest::Client::builder()
      .connect_timeout(Duration::from_secs(10))
      .build()
      .map_err(|e| SyncError::Config(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self { http, base, token })
  }

  pub fn base(&self) -> &Url {
    &self.base
  }

  /// `{base}/{segments...}`, each segment percent-encoded.
  pub fn endpoint(&self, segments: &[&str]) -> Url {
    let mut url = self.base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
    let builder = self.http.request(method, url);
    match &self.token {
      Some(token) => builder.header(AUTHORIZATION, format!("Bearer {}", token)),
      None => builder,
    }
  }

  /// Method, URL and body for a queued operation.
  pub fn route(&self, operation: &Operation) -> Result<(Method, Url, Option<(String, Vec<u8>)>)> {
    let json = |body: &serde_json::Value| -> Result<Option<(String, Vec<u8>)>> {
      Ok(Some(("application/json".to_string(), serde_json::to_vec(body)?)))
    };

    Ok(match operation {
      Operation::Create { entity, id, body } => (
        Method::POST,
        self.endpoint(&[entity.as_str()]),
        json(&with_client_id(body, id))?,
      ),
      Operation::Update { entity, id, body } => {
        (Method::PUT, self.endpoint(&[entity.as_str(), id.as_str()]), json(body)?)
      }
      Operation::Delete { entity, id } => (
        Method::DELETE,
        self.endpoint(&[entity.as_str(), id.as_str()]),
        None,
      ),
      Operation::ToggleFavorite {
        entity,
        id,
        favorite,
      } => (
        Method::PUT,
        self.endpoint(&[entity.as_str(), id.as_str(), "favorite"]),
        json(&serde_json::json!({ "favorite": favorite }))?,
      ),
      Operation::UploadFile {
        destination,
        mime_type,
        bytes,
        ..
      } => (
        Method::POST,
        self.endpoint(&["files", destination.as_str()]),
        Some((mime_type.clone(), bytes.clone())),
      ),
    })
  }
}

/// Create body carrying the client-generated id, so the backend can key the
/// new entity by it and drop duplicate deliveries.
fn with_client_id(body: &serde_json::Value, id: &str) -> serde_json::Value {
  match body {
    serde_json::Value::Object(fields) => {
      let mut fields = fields.clone();
      fields.insert("id".to_string(), serde_json::Value::from(id));
      serde_json::Value::Object(fields)
    }
    other => serde_json::json!({ "id": id, "data": other }),
  }
}

/// Turn a non-success status into a rejection carrying the response text.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  let message = response
    .text()
    .await
    .ok()
    .filter(|t| !t.is_empty())
    .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
  Err(SyncError::Rejected {
    status: status.as_u16(),
    message,
  })
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
  headers
    .get(name)
    .and_then(|v| v.to_str().ok())
    .map(str::to_string)
}

/// Downloads content payloads from `{base}/files/{id}`.
#[derive(Clone)]
pub struct HttpFetcher {
  client: RemoteClient,
  /// Fixed download location, used instead of the files route when set
  source: Option<Url>,
}

impl HttpFetcher {
  pub fn new(client: RemoteClient) -> Self {
    Self {
      client,
      source: None,
    }
  }

  /// Fetch from `url` whatever id is asked for.
  pub fn from_url(client: RemoteClient, url: Url) -> Self {
    Self {
      client,
      source: Some(url),
    }
  }

  fn location(&self, id: &str) -> Url {
    match &self.source {
      Some(url) => url.clone(),
      None => self.client.endpoint(&["files", id]),
    }
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, id: &str) -> Result<FetchedPayload> {
    let url = self.location(id);
    let response = check_status(self.client.request(Method::GET, url).send().await?).await?;

    let mime_type = header_str(response.headers(), CONTENT_TYPE.as_str())
      .unwrap_or_else(|| "application/octet-stream".to_string());
    let content_hash = header_str(response.headers(), CONTENT_HASH_HEADER);
    let bytes = response.bytes().await?.to_vec();

    Ok(FetchedPayload {
      bytes,
      mime_type,
      content_hash,
    })
  }

  async fn probe_hash(&self, id: &str) -> Result<Option<String>> {
    let url = self.location(id);
    let response = self.client.request(Method::HEAD, url).send().await?;
    if response.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    let response = check_status(response).await?;
    Ok(header_str(response.headers(), CONTENT_HASH_HEADER))
  }
}

/// Applies queued operations through the backend's REST routes.
#[derive(Clone)]
pub struct HttpTransport {
  client: RemoteClient,
}

impl HttpTransport {
  pub fn new(client: RemoteClient) -> Self {
    Self { client }
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn execute(&self, operation: &Operation) -> Result<()> {
    let (method, url, body) = self.client.route(operation)?;
    let mut builder = self.client.request(method, url);

    if let Some((content_type, bytes)) = body {
      builder = builder.header(CONTENT_TYPE, content_type).body(bytes);
    }
    if let Operation::UploadFile { file_name, .. } = operation {
      builder = builder.header(FILE_NAME_HEADER, file_name.as_str());
    }

    check_status(builder.send().await?).await?;
    Ok(())
  }
}

/// Sends intercepted requests unchanged.
#[derive(Clone)]
pub struct HttpNetwork {
  http: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let http = reqwest::Client::builder()
      .build()
      .map_err(|e| SyncError::Config(format!("Failed to create HTTP client: {}", e)))?;
    Ok(Self { http })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn send(&self, request: &Request) -> Result<Response> {
    let method = Method::from_bytes(request.method.as_bytes())
      .map_err(|e| SyncError::Config(format!("Invalid method '{}': {}", request.method, e)))?;

    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
      if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
      ) {
        headers.append(name, value);
      }
    }

    let mut builder = self.http.request(method, request.url.clone()).headers(headers);
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    // Statuses are the caller's business; only transport failures are errors
    let response = builder.send().await?;
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
      .collect();
    let body = response.bytes().await?.to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}
