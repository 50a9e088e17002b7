use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::catalog::Category;
use crate::version::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub catalog: CatalogConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub pagination: PaginationConfig,
  #[serde(default)]
  pub loader: LoaderConfig,
  #[serde(default)]
  pub version: VersionConfig,
  /// Category shown on start (defaults to "all")
  #[serde(default)]
  pub default_category: Option<Category>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
  /// Base URL of the catalog query service
  pub url: String,
  /// Per-request timeout
  #[serde(default = "default_request_timeout_ms")]
  pub timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
  10_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
  pub page_size: u32,
  /// Minimum time between unforced first-page fetches of the same category
  pub refetch_interval_secs: u64,
}

impl Default for PaginationConfig {
  fn default() -> Self {
    Self {
      page_size: 10,
      refetch_interval_secs: 5 * 60,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
  pub debounce_ms: u64,
  pub throttle_ms: u64,
}

impl Default for LoaderConfig {
  fn default() -> Self {
    Self {
      debounce_ms: 300,
      throttle_ms: 800,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VersionConfig {
  /// Identifier of the content update this build runs, if any
  pub update_id: Option<String>,
  pub check_timeout_ms: u64,
  pub check_retries: u32,
  pub backoff_ms: u64,
  /// Directory wiped on every full clear (defaults to `<data dir>/scratch`)
  pub scratch_dir: Option<PathBuf>,
}

impl Default for VersionConfig {
  fn default() -> Self {
    Self {
      update_id: None,
      check_timeout_ms: 5_000,
      check_retries: 3,
      backoff_ms: 500,
      scratch_dir: None,
    }
  }
}

impl VersionConfig {
  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      timeout: Duration::from_millis(self.check_timeout_ms),
      max_attempts: self.check_retries,
      initial_backoff: Duration::from_millis(self.backoff_ms),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./roost.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/roost/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/roost/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("roost.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("roost").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    if config.pagination.page_size == 0 {
      return Err(eyre!("pagination.page_size must be at least 1"));
    }
    Ok(config)
  }

  /// Defaults for everything except the catalog location.
  #[cfg(test)]
  pub fn for_catalog(url: &str) -> Self {
    Self {
      catalog: CatalogConfig {
        url: url.to_string(),
        timeout_ms: default_request_timeout_ms(),
      },
      cache: CacheConfig::default(),
      pagination: PaginationConfig::default(),
      loader: LoaderConfig::default(),
      version: VersionConfig::default(),
      default_category: None,
    }
  }

  /// Get the catalog API token from the environment.
  ///
  /// Reads ROOST_API_TOKEN. The catalog may be public, so a missing token is
  /// not an error.
  pub fn get_api_token() -> Option<String> {
    std::env::var("ROOST_API_TOKEN")
      .ok()
      .filter(|token| !token.is_empty())
  }
}

/// Per-user data directory, e.g. `~/.local/share/roost`.
pub fn data_dir() -> Result<PathBuf> {
  let base = dirs::data_dir().ok_or_else(|| eyre!("Could not determine data directory"))?;
  let dir = base.join("roost");
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create data directory {}: {}", dir.display(), e))?;
  Ok(dir)
}

/// Disposable files wiped on every full clear.
pub fn default_scratch_dir() -> Result<PathBuf> {
  Ok(data_dir()?.join("scratch"))
}
