use async_trait::async_trait;
use color_eyre::Result;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::KvStore;

/// Process-local store. Used with `--ephemeral` and in tests.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
  entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKvStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

#[async_trait]
impl KvStore for MemoryKvStore {
  async fn get(&self, key: &str) -> Result<Option<String>> {
    Ok(self.lock().get(key).cloned())
  }

  async fn set(&self, key: &str, value: &str) -> Result<()> {
    self.lock().insert(key.to_string(), value.to_string());
    Ok(())
  }

  async fn remove(&self, key: &str) -> Result<()> {
    self.lock().remove(key);
    Ok(())
  }

  async fn list_keys(&self) -> Result<Vec<String>> {
    Ok(self.lock().keys().cloned().collect())
  }
}
