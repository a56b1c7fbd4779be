use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Backend base URL that queued mutations and downloads go to
  pub base_url: String,
  /// Database file (defaults to $XDG_DATA_HOME/offsync/offsync.db)
  pub database: Option<PathBuf>,
  /// Current user identity, used to scope cached records
  pub user_id: Option<String>,
  /// Incremented on breaking changes; a bump clears every partition
  pub cache_version: u32,
  pub cache: CacheConfig,
  pub queue: QueueConfig,
  pub intercept: InterceptConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// LRU sweep target for the blob partition
  pub budget_bytes: u64,
  /// Hard limit the blob partition refuses to grow past
  pub quota_bytes: Option<u64>,
  /// Check content hashes against the server before serving cached payloads
  pub verify_hashes: bool,
  /// Serve a mismatched cached payload at once and refresh it in the background
  pub stale_while_revalidate: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Attempts before a queued change is marked failed
  pub max_attempts: u32,
  /// Interval of the connectivity probe, in seconds
  pub probe_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterceptConfig {
  pub api_prefix: String,
  pub media_prefixes: Vec<String>,
  pub api_timeout_ms: u64,
  pub api_max_age_secs: u64,
  pub media_max_age_days: u64,
  pub media_max_entries: usize,
  /// HTML served when a navigation cannot be satisfied
  pub offline_page: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8080".to_string(),
      database: None,
      user_id: None,
      cache_version: 1,
      cache: CacheConfig::default(),
      queue: QueueConfig::default(),
      intercept: InterceptConfig::default(),
    }
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      budget_bytes: 512 * 1024 * 1024,
      quota_bytes: None,
      verify_hashes: false,
      stale_while_revalidate: false,
    }
  }
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      probe_interval_secs: 30,
    }
  }
}

impl Default for InterceptConfig {
  fn default() -> Self {
    Self {
      api_prefix: "/api/".to_string(),
      media_prefixes: vec![
        "/media/".to_string(),
        "/uploads/".to_string(),
        "/api/files/".to_string(),
      ],
      api_timeout_ms: 3_000,
      api_max_age_secs: 5 * 60,
      media_max_age_days: 30,
      media_max_entries: 200,
      offline_page: DEFAULT_OFFLINE_PAGE.to_string(),
    }
  }
}

const DEFAULT_OFFLINE_PAGE: &str = "<!doctype html>\n<html><head><title>Offline</title></head>\
<body><h1>You are offline</h1><p>This page is not available offline. \
Content you opened before is still in your library.</p></body></html>\n";

impl InterceptConfig {
  pub fn api_timeout(&self) -> Duration {
    Duration::from_millis(self.api_timeout_ms)
  }

  pub fn api_max_age(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.api_max_age_secs as i64)
  }

  pub fn media_max_age(&self) -> chrono::Duration {
    chrono::Duration::days(self.media_max_age_days as i64)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offsync/config.yaml
  ///
  /// Falls back to defaults when no file exists.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(SyncError::Config(format!(
          "Config file not found: {}",
          p.display()
        )));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("offsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      SyncError::Config(format!(
        "Failed to read config file {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::parse(&contents)
      .map_err(|e| SyncError::Config(format!("{} ({})", e, path.display())))
  }

  /// Parse configuration from YAML text.
  pub fn parse(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents)
      .map_err(|e| SyncError::Config(format!("Failed to parse config: {}", e)))
  }

  /// Get the backend API token from the environment, if one is set.
  pub fn api_token() -> Option<String> {
    std::env::var("OFFSYNC_TOKEN").ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_apply_to_missing_fields() {
    let config = Config::parse("base_url: https://library.example.com\n").unwrap();

    assert_eq!(config.base_url, "https://library.example.com");
    assert_eq!(config.cache_version, 1);
    assert_eq!(config.queue.max_attempts, 3);
    assert!(!config.cache.stale_while_revalidate);
    assert_eq!(config.intercept.api_timeout(), Duration::from_secs(3));
    assert_eq!(config.intercept.media_max_age(), chrono::Duration::days(30));
  }

  #[test]
  fn test_nested_overrides() {
    let yaml = r#"
cache_version: 4
user_id: alice
cache:
  budget_bytes: 1024
  verify_hashes: true
  stale_while_revalidate: true
queue:
  max_attempts: 5
intercept:
  api_prefix: /v2/
  media_max_entries: 10
"#;
    let config = Config::parse(yaml).unwrap();

    assert_eq!(config.cache_version, 4);
    assert_eq!(config.user_id.as_deref(), Some("alice"));
    assert_eq!(config.cache.budget_bytes, 1024);
    assert!(config.cache.verify_hashes);
    assert!(config.cache.stale_while_revalidate);
    assert_eq!(config.queue.max_attempts, 5);
    assert_eq!(config.intercept.api_prefix, "/v2/");
    assert_eq!(config.intercept.media_max_entries, 10);
    assert_eq!(config.intercept.api_timeout_ms, 3_000);
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/offsync.yaml"))).unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
  }
}
