use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};

/// Identity of the running build. Read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeIdentity {
  pub app_version: String,
  pub build_version: String,
  pub update_id: Option<String>,
}

impl RuntimeIdentity {
  /// Identity of this binary. The build version can be stamped at compile time
  /// through `ROOST_BUILD_VERSION`.
  pub fn current(update_id: Option<String>) -> Self {
    Self {
      app_version: env!("CARGO_PKG_VERSION").to_string(),
      build_version: option_env!("ROOST_BUILD_VERSION")
        .unwrap_or("dev")
        .to_string(),
      update_id,
    }
  }
}

/// What was running the last time derived state was known to be clean.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionFingerprint {
  pub app_version: String,
  pub build_version: String,
  pub update_id: Option<String>,
  pub last_clear_at: DateTime<Utc>,
  pub clear_reason: String,
}

/// Lenient mirror used to tell "missing field" apart from "bad JSON".
#[derive(Debug, Deserialize)]
struct StoredFingerprint {
  app_version: Option<String>,
  build_version: Option<String>,
  update_id: Option<String>,
  last_clear_at: Option<DateTime<Utc>>,
  clear_reason: Option<String>,
}

impl VersionFingerprint {
  pub fn new(identity: &RuntimeIdentity, now: DateTime<Utc>, reason: &str) -> Self {
    Self {
      app_version: identity.app_version.clone(),
      build_version: identity.build_version.clone(),
      update_id: identity.update_id.clone(),
      last_clear_at: now,
      clear_reason: reason.to_string(),
    }
  }

  /// Parse a stored fingerprint. Any missing required field is corruption.
  pub fn parse(raw: &str) -> CatalogResult<Self> {
    let stored: StoredFingerprint = serde_json::from_str(raw)
      .map_err(|e| CatalogError::CorruptedState(format!("unreadable fingerprint: {}", e)))?;

    let required = |field: Option<String>, name: &str| {
      field
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CatalogError::CorruptedState(format!("fingerprint missing {}", name)))
    };

    Ok(Self {
      app_version: required(stored.app_version, "app_version")?,
      build_version: required(stored.build_version, "build_version")?,
      update_id: stored.update_id,
      last_clear_at: stored.last_clear_at.ok_or_else(|| {
        CatalogError::CorruptedState("fingerprint missing last_clear_at".to_string())
      })?,
      clear_reason: required(stored.clear_reason, "clear_reason")?,
    })
  }

  pub fn to_json(&self) -> serde_json::Result<String> {
    serde_json::to_string(self)
  }

  pub fn matches(&self, identity: &RuntimeIdentity) -> bool {
    self.app_version == identity.app_version
      && self.build_version == identity.build_version
      && self.update_id == identity.update_id
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn identity() -> RuntimeIdentity {
    RuntimeIdentity {
      app_version: "1.2.0".to_string(),
      build_version: "42".to_string(),
      update_id: Some("u-1".to_string()),
    }
  }

  #[test]
  fn test_stored_fingerprint_matches_its_identity() {
    let fp = VersionFingerprint::new(&identity(), Utc::now(), "first run");
    let parsed = VersionFingerprint::parse(&fp.to_json().unwrap()).unwrap();
    assert_eq!(parsed, fp);
    assert!(parsed.matches(&identity()));
  }

  #[test]
  fn test_any_changed_field_is_a_mismatch() {
    let fp = VersionFingerprint::new(&identity(), Utc::now(), "first run");

    let mut changed = identity();
    changed.update_id = None;
    assert!(!fp.matches(&changed));

    let mut changed = identity();
    changed.build_version = "43".to_string();
    assert!(!fp.matches(&changed));
  }

  #[test]
  fn test_missing_required_field_is_corruption() {
    let raw = r#"{"app_version": "1.2.0", "last_clear_at": "2024-01-01T00:00:00Z", "clear_reason": "x"}"#;
    assert!(matches!(
      VersionFingerprint::parse(raw),
      Err(CatalogError::CorruptedState(_))
    ));
    assert!(matches!(
      VersionFingerprint::parse("not json"),
      Err(CatalogError::CorruptedState(_))
    ));
  }
}
