//! Request classification: a pure function from request metadata to the
//! caching strategy that applies.

use crate::config::InterceptConfig;

use super::request::{Destination, Mode, Request};

/// Resource class of a request. Each class has exactly one strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
  /// Documents and images belonging to content items: cache-first
  ImmutableMedia,
  /// Backend calls: network-first with a timeout
  Api,
  /// Scripts, styles, fonts: stale-while-revalidate
  StaticAsset,
  /// Full page loads: network-first with an offline page
  Navigation,
  /// Anything else goes straight to the network
  Passthrough,
}

const MEDIA_EXTENSIONS: &[&str] = &[
  "pdf", "png", "jpg", "jpeg", "gif", "webp", "svg", "mp3", "mp4",
];
const STATIC_EXTENSIONS: &[&str] = &["js", "mjs", "css", "woff", "woff2", "ttf", "otf"];

/// Path rules used by [`classify`].
#[derive(Debug, Clone)]
pub struct ClassifyRules {
  pub api_prefix: String,
  pub media_prefixes: Vec<String>,
}

impl Default for ClassifyRules {
  fn default() -> Self {
    Self::from(&InterceptConfig::default())
  }
}

impl From<&InterceptConfig> for ClassifyRules {
  fn from(config: &InterceptConfig) -> Self {
    Self {
      api_prefix: config.api_prefix.clone(),
      media_prefixes: config.media_prefixes.clone(),
    }
  }
}

fn extension(path: &str) -> Option<String> {
  let file = path.rsplit('/').next()?;
  let (_, ext) = file.rsplit_once('.')?;
  Some(ext.to_ascii_lowercase())
}

/// Classify a request. Rules are checked in priority order; first match wins.
pub fn classify(request: &Request, rules: &ClassifyRules) -> ResourceClass {
  let path = request.url.path();
  let ext = extension(path);
  let has_ext = |list: &[&str]| ext.as_deref().map(|e| list.contains(&e)).unwrap_or(false);

  let media_destination = matches!(request.destination, Destination::Image | Destination::Media);
  let media_path = rules.media_prefixes.iter().any(|p| path.starts_with(p.as_str()));
  if request.is_get() && (media_destination || media_path || has_ext(MEDIA_EXTENSIONS)) {
    return ResourceClass::ImmutableMedia;
  }

  if path.starts_with(rules.api_prefix.as_str()) {
    return ResourceClass::Api;
  }

  let static_destination = matches!(
    request.destination,
    Destination::Script | Destination::Style | Destination::Font
  );
  if request.is_get() && (static_destination || has_ext(STATIC_EXTENSIONS)) {
    return ResourceClass::StaticAsset;
  }

  if request.mode == Mode::Navigate || request.destination == Destination::Document {
    return ResourceClass::Navigation;
  }

  ResourceClass::Passthrough
}
