//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};

/// Anything holding derived in-memory state that a full wipe must reset.
pub trait Clearable: Send + Sync {
  /// Short name for logs (e.g., "page_cache")
  fn name(&self) -> &'static str;

  fn clear(&self);
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Cached data served because the network call failed.
  pub fn degraded(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Degraded,
      cached_at: Some(cached_at),
    }
  }

  /// Network data that arrived after its request was superseded.
  pub fn superseded(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Superseded,
      cached_at: None,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Served from cache (throttled or another request already in flight)
  Cache,
  /// Network failed, serving the last cached snapshot
  Degraded,
  /// The response belongs to parameters that have since changed; it was not applied
  Superseded,
}
