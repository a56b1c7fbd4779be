//! Requests and responses as seen by the interception layer.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// What the request will be used for, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
  Document,
  Image,
  Script,
  Style,
  Font,
  /// Media embedded in a page (audio, video, PDF objects)
  Media,
  /// fetch()/XHR style requests
  #[default]
  Empty,
}

/// Request mode reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
  /// A full page load
  Navigate,
  #[default]
  Cors,
  SameOrigin,
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub destination: Destination,
  pub mode: Mode,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      destination: Destination::Empty,
      mode: Mode::Cors,
      headers: Vec::new(),
      body: None,
    }
  }

  /// A full page load of `url`.
  pub fn navigate(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      mode: Mode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_uppercase();
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_body(mut self, body: Vec<u8>) -> Self {
    self.body = Some(body);
    self
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  /// Path plus query, as the application addresses its own routes.
  pub fn route(&self) -> String {
    match self.url.query() {
      Some(q) => format!("{}?{}", self.url.path(), q),
      None => self.url.path().to_string(),
    }
  }

  /// Stable cache key for the full request identity.
  pub fn cache_key(&self) -> String {
    request_key(&format!("{} {}", self.method.to_uppercase(), self.url))
  }
}

/// SHA256 hash for stable, fixed-length keys
pub(crate) fn request_key(identity: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(identity.as_bytes());
  hex::encode(hasher.finalize())
}

/// A response, either from the network or from a cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

/// Header marking responses produced by the interception layer itself.
pub const FALLBACK_HEADER: &str = "x-offsync-fallback";

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_lowercase(), value.to_string()));
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Structured reply for API calls that could not reach the backend.
  pub fn offline(error: &str) -> Self {
    let body = serde_json::json!({ "offline": true, "error": error });
    Self::new(503, body.to_string())
      .with_header("content-type", "application/json")
      .with_header(FALLBACK_HEADER, "offline")
  }

  /// The designated page served when a navigation cannot be satisfied.
  pub fn offline_page(html: &str) -> Self {
    Self::new(200, html.as_bytes().to_vec())
      .with_header("content-type", "text/html; charset=utf-8")
      .with_header(FALLBACK_HEADER, "offline-page")
  }
}
