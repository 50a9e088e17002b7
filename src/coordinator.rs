//! Per-key in-flight tracking and refetch throttling.
//!
//! A granted acquisition hands out an [`InFlightGuard`]; the key stays busy until
//! the guard is dropped, which also records the completion time used by
//! [`RequestCoordinator::should_throttle`] unless the key was acquired untracked.
//! Callers that are denied get an [`InFlightWaiter`] that resolves with the
//! fetch's outcome once it is over.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use crate::cache::Clearable;
use crate::clock::SharedClock;
use crate::error::{CatalogError, CatalogResult};

/// Published to waiters when a fetch ends: the error it failed with, if any.
type Outcome = Option<CatalogError>;

#[derive(Default)]
struct CoordinatorState {
  in_flight: HashMap<String, watch::Receiver<Outcome>>,
  last_fetch_at: HashMap<String, DateTime<Utc>>,
}

#[derive(Clone)]
pub struct RequestCoordinator {
  state: Arc<Mutex<CoordinatorState>>,
  clock: SharedClock,
}

/// Outcome of [`RequestCoordinator::try_acquire`].
pub enum Acquire {
  Granted(InFlightGuard),
  Denied(InFlightWaiter),
}

impl RequestCoordinator {
  pub fn new(clock: SharedClock) -> Self {
    Self {
      state: Arc::new(Mutex::new(CoordinatorState::default())),
      clock,
    }
  }

  fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Mark `key` as in flight, unless it already is. Releasing records the
  /// completion time, success or failure, for [`should_throttle`](Self::should_throttle).
  pub fn try_acquire(&self, key: &str) -> Acquire {
    self.acquire(key, true)
  }

  /// Like [`try_acquire`](Self::try_acquire), for keys that are never throttled.
  pub fn try_acquire_untracked(&self, key: &str) -> Acquire {
    self.acquire(key, false)
  }

  fn acquire(&self, key: &str, track: bool) -> Acquire {
    let mut state = self.lock();

    if let Some(rx) = state.in_flight.get(key) {
      return Acquire::Denied(InFlightWaiter { rx: rx.clone() });
    }

    let (tx, rx) = watch::channel(None);
    state.in_flight.insert(key.to_string(), rx);

    Acquire::Granted(InFlightGuard {
      key: key.to_string(),
      coordinator: self.clone(),
      track,
      done: tx,
    })
  }

  /// True when the caller should serve its cached data instead of refetching.
  pub fn should_throttle(
    &self,
    key: &str,
    min_interval: Duration,
    force: bool,
    has_cached: bool,
  ) -> bool {
    if force || !has_cached {
      return false;
    }

    let now = self.clock.now();
    self
      .lock()
      .last_fetch_at
      .get(key)
      .is_some_and(|last| now - *last < min_interval)
  }

  /// Drop the throttle record for every key starting with `prefix`.
  pub fn forget_prefix(&self, prefix: &str) {
    self
      .lock()
      .last_fetch_at
      .retain(|key, _| !key.starts_with(prefix));
  }

  /// Number of keys with a recorded completion time.
  #[cfg(test)]
  pub fn throttle_records(&self) -> usize {
    self.lock().last_fetch_at.len()
  }

  fn release(&self, key: &str, track: bool) {
    let now = self.clock.now();
    let mut state = self.lock();
    state.in_flight.remove(key);
    if track {
      state.last_fetch_at.insert(key.to_string(), now);
    }
  }
}

impl Clearable for RequestCoordinator {
  fn name(&self) -> &'static str {
    "request_coordinator"
  }

  /// Forget throttle history. In-flight markers stay: their guards still own them.
  fn clear(&self) {
    self.lock().last_fetch_at.clear();
  }
}

/// Held for the whole duration of a remote call.
///
/// Dropping it, on success, failure or cancellation, releases the key.
pub struct InFlightGuard {
  key: String,
  coordinator: RequestCoordinator,
  track: bool,
  done: watch::Sender<Outcome>,
}

impl InFlightGuard {
  pub fn release(self) {}

  /// Release without counting as a fetch, for a response that was thrown away.
  pub fn discard(mut self) {
    self.track = false;
  }

  /// Release and hand `error` to everyone waiting on this fetch.
  pub fn fail(self, error: CatalogError) {
    self.done.send_replace(Some(error));
  }
}

impl Drop for InFlightGuard {
  fn drop(&mut self) {
    self.coordinator.release(&self.key, self.track);
  }
}

/// Resolves once the fetch that caused a denial has finished.
pub struct InFlightWaiter {
  rx: watch::Receiver<Outcome>,
}

impl InFlightWaiter {
  /// Ok when the fetch succeeded or was discarded, the fetch's own error
  /// when it failed.
  pub async fn wait(mut self) -> CatalogResult<()> {
    // Returns Err once the guard has dropped the sender.
    while self.rx.changed().await.is_ok() {}
    let outcome = (*self.rx.borrow()).clone();
    match outcome {
      Some(error) => Err(error),
      None => Ok(()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::{Clock, ManualClock};

  fn coordinator() -> (RequestCoordinator, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    (RequestCoordinator::new(clock.clone()), clock)
  }

  fn granted(acquire: Acquire) -> InFlightGuard {
    match acquire {
      Acquire::Granted(guard) => guard,
      Acquire::Denied(_) => panic!("expected the key to be free"),
    }
  }

  fn denied(acquire: Acquire) -> InFlightWaiter {
    match acquire {
      Acquire::Denied(waiter) => waiter,
      Acquire::Granted(_) => panic!("expected the key to be busy"),
    }
  }

  #[test]
  fn test_second_acquire_denied_until_release() {
    let (coordinator, _clock) = coordinator();

    let guard = granted(coordinator.try_acquire("feed:sale"));
    denied(coordinator.try_acquire("feed:sale"));
    // Other keys are independent.
    granted(coordinator.try_acquire("feed:rent"));

    guard.release();
    granted(coordinator.try_acquire("feed:sale"));
  }

  #[test]
  fn test_throttle_window() {
    let (coordinator, clock) = coordinator();
    let interval = Duration::milliseconds(800);

    // Nothing fetched yet.
    assert!(!coordinator.should_throttle("k", interval, false, true));

    granted(coordinator.try_acquire("k")).release();

    clock.advance_millis(500);
    assert!(coordinator.should_throttle("k", interval, false, true));
    assert!(!coordinator.should_throttle("k", interval, true, true));
    assert!(!coordinator.should_throttle("k", interval, false, false));

    clock.advance_millis(400);
    assert!(!coordinator.should_throttle("k", interval, false, true));
  }

  #[test]
  fn test_completion_time_taken_at_release() {
    let (coordinator, clock) = coordinator();
    let interval = Duration::milliseconds(800);

    let guard = granted(coordinator.try_acquire("k"));
    assert!(!coordinator.should_throttle("k", interval, false, true));

    clock.advance_millis(1000);
    let released_at = clock.now();
    drop(guard);

    clock.advance_millis(700);
    assert!(coordinator.should_throttle("k", interval, false, true));
    assert!(clock.now() - released_at < interval);
  }

  #[test]
  fn test_failed_fetch_still_counts_as_completed() {
    let (coordinator, _clock) = coordinator();

    granted(coordinator.try_acquire("k")).fail(CatalogError::Network("reset".to_string()));

    assert!(coordinator.should_throttle("k", Duration::minutes(5), false, true));
  }

  #[test]
  fn test_discarded_and_untracked_fetches_leave_no_record() {
    let (coordinator, _clock) = coordinator();
    let interval = Duration::minutes(5);

    granted(coordinator.try_acquire("feed:sale:abc@0")).discard();
    granted(coordinator.try_acquire_untracked("page:sale:abc")).release();

    for key in ["feed:sale:abc@0", "page:sale:abc"] {
      assert!(!coordinator.should_throttle(key, interval, false, true));
    }
    assert_eq!(coordinator.throttle_records(), 0);
  }

  #[test]
  fn test_forget_prefix_only_drops_matching_records() {
    let (coordinator, _clock) = coordinator();
    let interval = Duration::minutes(5);
    granted(coordinator.try_acquire("feed:sale:1")).release();
    granted(coordinator.try_acquire("feed:rent:1")).release();

    coordinator.forget_prefix("feed:sale:");

    assert!(!coordinator.should_throttle("feed:sale:1", interval, false, true));
    assert!(coordinator.should_throttle("feed:rent:1", interval, false, true));
  }

  #[tokio::test]
  async fn test_waiter_resolves_when_guard_drops() {
    let (coordinator, _clock) = coordinator();

    let guard = granted(coordinator.try_acquire("k"));
    let waiter = denied(coordinator.try_acquire("k"));

    let (outcome, _) = tokio::join!(waiter.wait(), async move { drop(guard) });
    assert_eq!(outcome, Ok(()));
    granted(coordinator.try_acquire("k"));
  }

  #[tokio::test]
  async fn test_waiter_receives_the_fetch_error() {
    let (coordinator, _clock) = coordinator();

    let guard = granted(coordinator.try_acquire("k"));
    let waiter = denied(coordinator.try_acquire("k"));

    let (outcome, _) = tokio::join!(waiter.wait(), async move {
      guard.fail(CatalogError::Network("connection reset".to_string()))
    });
    assert_eq!(
      outcome,
      Err(CatalogError::Network("connection reset".to_string()))
    );
  }
}
