//! Persistent key-value storage used for version fingerprints and scratch data.

mod memory;
mod sqlite;

use async_trait::async_trait;
use color_eyre::Result;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

/// String key-value store that outlives the process.
#[async_trait]
pub trait KvStore: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<String>>;

  async fn set(&self, key: &str, value: &str) -> Result<()>;

  /// Removing a missing key is not an error.
  async fn remove(&self, key: &str) -> Result<()>;

  async fn list_keys(&self) -> Result<Vec<String>>;
}
