//! Logging setup for the command-line front end.
//!
//! Writes a daily rolling log file under the data directory and mirrors
//! warnings to stderr. Filtering follows `RUST_LOG`, defaulting to
//! `offsync=info`.

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::error::{Result, SyncError};

/// Keeps the background log writer alive; dropping it flushes the file.
pub struct LoggingGuard {
  _file_guard: WorkerGuard,
}

pub fn init_logging(log_dir: &Path) -> Result<LoggingGuard> {
  let (writer, file_guard) = tracing_appender::non_blocking(file_appender(log_dir)?);

  let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
  let stderr_layer = fmt::layer()
    .with_writer(std::io::stderr)
    .compact()
    .with_filter(tracing_subscriber::filter::LevelFilter::WARN);

  let env_filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offsync=info"));

  tracing_subscriber::registry()
    .with(env_filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| SyncError::Config(format!("Failed to install logger: {}", e)))?;

  Ok(LoggingGuard {
    _file_guard: file_guard,
  })
}

/// Daily rolling `offsync.log` in `log_dir`, creating the directory first.
fn file_appender(log_dir: &Path) -> Result<RollingFileAppender> {
  std::fs::create_dir_all(log_dir).map_err(|e| {
    SyncError::Config(format!(
      "Failed to create log directory {}: {}",
      log_dir.display(),
      e
    ))
  })?;
  Ok(tracing_appender::rolling::daily(log_dir, "offsync.log"))
}

/// `$XDG_DATA_HOME/offsync/logs`
pub fn default_log_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| SyncError::Config("Could not determine data directory".to_string()))?;
  Ok(data_dir.join("offsync").join("logs"))
}
