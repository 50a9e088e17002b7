mod app;
mod cache;
mod catalog;
mod clock;
mod commands;
mod config;
mod coordinator;
mod error;
mod event;
mod kv;
mod loader;
mod logging;
mod pagination;
mod version;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "roost")]
#[command(about = "Browse property listings from the terminal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/roost/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Category to open: all, sale, rent or new-builds
  #[arg(short = 't', long)]
  category: Option<catalog::Category>,

  /// Keep persisted state in memory only
  #[arg(long)]
  ephemeral: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let _log_guard = logging::init(&config::data_dir()?)?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override category if specified on command line
  let config = if let Some(category) = args.category {
    config::Config {
      default_category: Some(category),
      ..config
    }
  } else {
    config
  };

  // Initialize and run the app
  let mut app = app::App::new(config, args.ephemeral).await?;
  app.run().await?;

  Ok(())
}
