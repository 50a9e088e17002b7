//! Bounded retries for the remote update check.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::{CatalogError, CatalogResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Budget for a single attempt
  pub timeout: Duration,
  pub max_attempts: u32,
  /// Wait before the second attempt; doubles after each failure
  pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(5),
      max_attempts: 3,
      initial_backoff: Duration::from_millis(500),
    }
  }
}

/// Run `op` until it succeeds, fails terminally, or attempts run out.
///
/// An attempt exceeding `timeout` is aborted and counts as a network failure.
pub async fn retry_with_timeout<T, F, Fut>(policy: RetryPolicy, mut op: F) -> CatalogResult<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = CatalogResult<T>>,
{
  let attempts = policy.max_attempts.max(1);
  let mut backoff = policy.initial_backoff;
  let mut last_error = CatalogError::Network("no attempt made".to_string());

  for attempt in 1..=attempts {
    let error = match tokio::time::timeout(policy.timeout, op()).await {
      Ok(Ok(value)) => return Ok(value),
      Ok(Err(e)) if !e.is_retryable() => return Err(e),
      Ok(Err(e)) => e,
      Err(_) => CatalogError::Network(format!("timed out after {:?}", policy.timeout)),
    };

    debug!(attempt, error = %error, "update check attempt failed");
    last_error = error;

    if attempt < attempts {
      tokio::time::sleep(backoff).await;
      backoff *= 2;
    }
  }

  Err(last_error)
}
