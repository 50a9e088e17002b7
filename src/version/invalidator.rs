//! Wipes derived state when the running build changes.
//!
//! The stored fingerprint is never partially trusted. A missing, unreadable
//! or malformed fingerprint is handled exactly like a version mismatch, so
//! any doubt ends in a clear rather than in serving stale data.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use super::fingerprint::{RuntimeIdentity, VersionFingerprint};
use super::remote::{retry_with_timeout, RetryPolicy};
use super::restart::Restarter;
use crate::cache::Clearable;
use crate::catalog::UpdateSource;
use crate::clock::SharedClock;
use crate::event::{notify, DataEvent, EventSender};
use crate::kv::KvStore;

pub const FINGERPRINT_KEY: &str = "version:fingerprint";
pub const FORCE_CLEAR_KEY: &str = "version:force_clear";
/// Keys under this prefix are disposable and removed on every full clear.
pub const SCRATCH_PREFIX: &str = "scratch:";

pub struct VersionInvalidator {
  kv: Arc<dyn KvStore>,
  identity: RuntimeIdentity,
  clock: SharedClock,
  restarter: Arc<dyn Restarter>,
  clearables: Mutex<Vec<Arc<dyn Clearable>>>,
  scratch_dir: Option<PathBuf>,
  events: Option<EventSender>,
}

impl VersionInvalidator {
  pub fn new(
    kv: Arc<dyn KvStore>,
    identity: RuntimeIdentity,
    clock: SharedClock,
    restarter: Arc<dyn Restarter>,
  ) -> Self {
    Self {
      kv,
      identity,
      clock,
      restarter,
      clearables: Mutex::new(Vec::new()),
      scratch_dir: None,
      events: None,
    }
  }

  /// Directory whose files are deleted on every full clear.
  pub fn with_scratch_dir(mut self, dir: PathBuf) -> Self {
    self.scratch_dir = Some(dir);
    self
  }

  pub fn with_events(mut self, events: EventSender) -> Self {
    self.events = Some(events);
    self
  }

  /// Add an in-memory cache to wipe on every full clear.
  pub fn register(&self, clearable: Arc<dyn Clearable>) {
    self
      .clearables
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(clearable);
  }

  /// Clear everything if a deferred clear was requested or the stored
  /// fingerprint does not vouch for the running build.
  pub async fn check_and_clear_if_needed(&self) -> Result<bool> {
    let reason = match self.read_force_clear_flag().await {
      Some(reason) => Some(reason),
      None => self.mismatch_reason().await,
    };

    match reason {
      Some(reason) => {
        self.force_clear_all(&reason).await?;
        Ok(true)
      }
      None => {
        debug!("version fingerprint matches, keeping caches");
        Ok(false)
      }
    }
  }

  /// The flag stays set until a full clear has gone through.
  async fn read_force_clear_flag(&self) -> Option<String> {
    match self.kv.get(FORCE_CLEAR_KEY).await {
      Ok(Some(reason)) => Some(format!("deferred clear: {}", reason)),
      Ok(None) => None,
      Err(e) => {
        warn!(error = %e, "force clear flag unreadable");
        Some("force clear flag unreadable".to_string())
      }
    }
  }

  async fn mismatch_reason(&self) -> Option<String> {
    let raw = match self.kv.get(FINGERPRINT_KEY).await {
      Ok(Some(raw)) => raw,
      Ok(None) => return Some("first run".to_string()),
      Err(e) => {
        warn!(error = %e, "version fingerprint unreadable");
        return Some("fingerprint unreadable".to_string());
      }
    };

    match VersionFingerprint::parse(&raw) {
      // Corruption is not user-facing; it just means "clear".
      Err(e) => {
        debug!(error = %e, "stored fingerprint rejected");
        Some("fingerprint corrupted".to_string())
      }
      Ok(stored) if !stored.matches(&self.identity) => Some(format!(
        "version changed from {}+{} to {}+{}",
        stored.app_version,
        stored.build_version,
        self.identity.app_version,
        self.identity.build_version
      )),
      Ok(_) => None,
    }
  }

  /// Wipe every registered cache, persisted scratch data and the fingerprint,
  /// then record a fresh fingerprint for the running build.
  pub async fn force_clear_all(&self, reason: &str) -> Result<()> {
    let clearables = self
      .clearables
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone();
    for clearable in &clearables {
      clearable.clear();
      debug!(cache = clearable.name(), "cleared");
    }

    self.kv.remove(FINGERPRINT_KEY).await?;

    let scratch_keys: Vec<String> = self
      .kv
      .list_keys()
      .await?
      .into_iter()
      .filter(|key| key.starts_with(SCRATCH_PREFIX))
      .collect();
    for key in &scratch_keys {
      self.kv.remove(key).await?;
    }

    let scratch_files = self.clear_scratch_dir().await?;

    let fingerprint = VersionFingerprint::new(&self.identity, self.clock.now(), reason);
    let json = fingerprint
      .to_json()
      .map_err(|e| eyre!("Failed to serialize version fingerprint: {}", e))?;
    self.kv.set(FINGERPRINT_KEY, &json).await?;

    // Any completed clear satisfies a pending deferred one. Failing to drop the
    // flag only costs one extra clear on the next start.
    if let Err(e) = self.kv.remove(FORCE_CLEAR_KEY).await {
      warn!(error = %e, "failed to consume force clear flag");
    }

    info!(
      reason,
      caches = clearables.len(),
      scratch_keys = scratch_keys.len(),
      scratch_files,
      "cleared all cached data"
    );
    notify(
      self.events.as_ref(),
      DataEvent::CacheCleared {
        reason: reason.to_string(),
      },
    );
    Ok(())
  }

  async fn clear_scratch_dir(&self) -> Result<usize> {
    let Some(dir) = &self.scratch_dir else {
      return Ok(0);
    };
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
      return Ok(0);
    }

    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir)
      .await
      .map_err(|e| eyre!("Failed to read scratch dir {}: {}", dir.display(), e))?;
    while let Some(entry) = entries
      .next_entry()
      .await
      .map_err(|e| eyre!("Failed to read scratch dir {}: {}", dir.display(), e))?
    {
      let path = entry.path();
      let result = if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
        tokio::fs::remove_dir_all(&path).await
      } else {
        tokio::fs::remove_file(&path).await
      };
      result.map_err(|e| eyre!("Failed to remove {}: {}", path.display(), e))?;
      removed += 1;
    }
    Ok(removed)
  }

  /// Clear, then reload the process so no in-memory module state survives.
  pub async fn force_restart(&self, reason: &str) -> Result<()> {
    self.force_clear_all(reason).await?;
    self.restarter.restart(reason)
  }

  /// Defer a full clear to the next cold start.
  pub async fn set_force_clear_flag(&self, reason: &str) -> Result<()> {
    self.kv.set(FORCE_CLEAR_KEY, reason).await
  }

  /// Ask the catalog for the latest published update. A newer one schedules a
  /// clear for the next start. Timeouts and exhausted retries are errors,
  /// never "no update".
  pub async fn check_for_remote_update(
    &self,
    source: &dyn UpdateSource,
    policy: RetryPolicy,
  ) -> Result<bool> {
    let latest = retry_with_timeout(policy, move || source.latest_update_id())
      .await
      .map_err(|e| eyre!("Update check failed: {}", e))?;

    match latest {
      Some(remote) if Some(&remote) != self.identity.update_id.as_ref() => {
        info!(update_id = %remote, "newer update published");
        self
          .set_force_clear_flag(&format!("update {} available", remote))
          .await?;
        Ok(true)
      }
      _ => Ok(false),
    }
  }
}
