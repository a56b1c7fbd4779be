mod app;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use offsync::{logging, Config};

#[derive(Parser, Debug)]
#[command(name = "offsync")]
#[command(about = "Offline content cache and change queue")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Database file, overriding the config
  #[arg(short, long)]
  database: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Show cache and queue state
  Status,
  /// Make content available offline
  Fetch {
    id: String,
    /// Download from this URL instead of the backend files route
    url: Option<url::Url>,
  },
  /// Read cached content without touching the network
  Read {
    id: String,
    /// Write the payload to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Evict least recently used content down to a size budget
  Evict {
    /// Budget in bytes (default: cache.budget_bytes)
    #[arg(short, long)]
    budget: Option<u64>,
  },
  /// List unsynced changes
  Queue,
  /// Send unsynced changes to the backend
  Replay,
  /// Dismiss a failed change
  Discard { id: i64 },
  /// Give a failed change another round of attempts
  Retry { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override database if specified on command line
  let config = if let Some(database) = args.database {
    Config {
      database: Some(database),
      ..config
    }
  } else {
    config
  };

  let _log_guard = logging::init_logging(&logging::default_log_dir()?)?;

  let app = app::App::new(config)?;
  app.run(args.command).await?;

  Ok(())
}
