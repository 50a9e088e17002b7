//! Debounced, throttled "load more" driver.
//!
//! Scroll-proximity signals arrive in bursts. [`Debouncer`] collapses a burst
//! into one trailing call carrying the last arguments, and refuses to fire
//! again until `throttle` has passed since the previous *executed* call. It is
//! a plain state machine driven by timestamps, so tests step it with a manual
//! clock instead of sleeping.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::catalog::{Category, Listing};
use crate::clock::SharedClock;
use crate::error::{CatalogError, CatalogResult};
use crate::pagination::PaginationStore;

#[derive(Debug, Clone, PartialEq)]
pub enum DebounceState<A> {
  Idle,
  PendingTrailingCall { args: A, due_at: DateTime<Utc> },
}

#[derive(Debug)]
pub struct Debouncer<A> {
  state: DebounceState<A>,
  window: Duration,
  throttle: Duration,
  last_executed_at: Option<DateTime<Utc>>,
}

impl<A> Debouncer<A> {
  pub fn new(window: Duration, throttle: Duration) -> Self {
    Self {
      state: DebounceState::Idle,
      window,
      throttle,
      last_executed_at: None,
    }
  }

  /// Arm (or re-arm) the trailing call. Earlier pending arguments are dropped.
  pub fn trigger(&mut self, args: A, now: DateTime<Utc>) {
    self.state = DebounceState::PendingTrailingCall {
      args,
      due_at: now + self.window,
    };
  }

  pub fn deadline(&self) -> Option<DateTime<Utc>> {
    match &self.state {
      DebounceState::Idle => None,
      DebounceState::PendingTrailingCall { due_at, .. } => Some(*due_at),
    }
  }

  /// Fire the pending call if its window has elapsed.
  ///
  /// A due call that lands inside the throttle interval is discarded.
  pub fn poll(&mut self, now: DateTime<Utc>) -> Option<A> {
    match self.deadline() {
      Some(due_at) if now >= due_at => {}
      _ => return None,
    }

    let DebounceState::PendingTrailingCall { args, .. } =
      std::mem::replace(&mut self.state, DebounceState::Idle)
    else {
      return None;
    };

    if let Some(last) = self.last_executed_at {
      if now - last < self.throttle {
        debug!("trailing call rejected by throttle");
        return None;
      }
    }

    self.last_executed_at = Some(now);
    Some(args)
  }
}

/// Fire-and-forget wrapper around [`PaginationStore::load_next_page`].
pub struct DebouncedLoader {
  store: Arc<PaginationStore>,
  clock: SharedClock,
  page_size: u32,
  debouncer: Mutex<Debouncer<Category>>,
  wake: Notify,
}

impl DebouncedLoader {
  pub fn new(
    store: Arc<PaginationStore>,
    clock: SharedClock,
    page_size: u32,
    debounce: Duration,
    throttle: Duration,
  ) -> Self {
    Self {
      store,
      clock,
      page_size,
      debouncer: Mutex::new(Debouncer::new(debounce, throttle)),
      wake: Notify::new(),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Debouncer<Category>> {
    self.debouncer.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Signal that `category`'s feed was scrolled near its end.
  pub fn request(&self, category: Category) {
    let now = self.clock.now();
    self.lock().trigger(category, now);
    self.wake.notify_one();
  }

  /// Run the pending call if it is due. Returns `None` when nothing ran.
  pub async fn tick(&self) -> Option<CatalogResult<Vec<Listing>>> {
    let now = self.clock.now();
    let category = self.lock().poll(now)?;

    let result = self.store.load_next_page(category, self.page_size).await;
    match &result {
      Ok(appended) => debug!(%category, appended = appended.len(), "load more finished"),
      Err(CatalogError::Throttled) => debug!(%category, "load more skipped, feed already loading"),
      // Already reported to the UI by the store.
      Err(e) => debug!(%category, error = %e, "load more failed"),
    }
    Some(result)
  }

  fn time_until_deadline(&self) -> Option<std::time::Duration> {
    let deadline = self.lock().deadline()?;
    let remaining = deadline - self.clock.now();
    Some(remaining.to_std().unwrap_or(std::time::Duration::ZERO))
  }

  /// Drive the loader with real timers until the task is aborted.
  pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move {
      loop {
        match self.time_until_deadline() {
          None => self.wake.notified().await,
          Some(wait) => {
            tokio::select! {
              _ = tokio::time::sleep(wait) => {
                self.tick().await;
              }
              // Re-armed; recompute the deadline.
              _ = self.wake.notified() => {}
            }
          }
        }
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheConfig, LruCache};
  use crate::catalog::fake::FakeCatalog;
  use crate::clock::ManualClock;
  use crate::coordinator::RequestCoordinator;

  fn debouncer() -> (Debouncer<&'static str>, DateTime<Utc>) {
    (
      Debouncer::new(Duration::milliseconds(300), Duration::milliseconds(800)),
      Utc::now(),
    )
  }

  #[test]
  fn test_burst_collapses_to_last_args() {
    let (mut d, t0) = debouncer();

    d.trigger("a", t0);
    d.trigger("b", t0 + Duration::milliseconds(100));
    d.trigger("c", t0 + Duration::milliseconds(200));

    // Window restarts at every trigger.
    assert_eq!(d.poll(t0 + Duration::milliseconds(450)), None);
    assert_eq!(d.poll(t0 + Duration::milliseconds(500)), Some("c"));
    assert_eq!(d.state, DebounceState::Idle);
    assert_eq!(d.poll(t0 + Duration::milliseconds(600)), None);
  }

  #[test]
  fn test_throttle_rejects_frequent_executions() {
    let (mut d, t0) = debouncer();

    d.trigger("a", t0);
    assert_eq!(d.poll(t0 + Duration::milliseconds(300)), Some("a"));

    // Fires 400ms after the last execution: inside the 800ms throttle.
    d.trigger("b", t0 + Duration::milliseconds(400));
    assert_eq!(d.poll(t0 + Duration::milliseconds(700)), None);
    assert_eq!(d.state, DebounceState::Idle);

    d.trigger("c", t0 + Duration::milliseconds(900));
    assert_eq!(d.poll(t0 + Duration::milliseconds(1200)), Some("c"));
  }

  #[test]
  fn test_rejected_call_does_not_reset_throttle() {
    let (mut d, t0) = debouncer();

    d.trigger("a", t0);
    d.poll(t0 + Duration::milliseconds(300));
    d.trigger("b", t0 + Duration::milliseconds(400));
    d.poll(t0 + Duration::milliseconds(700));

    // 800ms after "a" executed, regardless of the rejected "b".
    d.trigger("c", t0 + Duration::milliseconds(800));
    assert_eq!(d.poll(t0 + Duration::milliseconds(1100)), Some("c"));
  }

  fn loader(catalog: Arc<FakeCatalog>, clock: Arc<ManualClock>) -> DebouncedLoader {
    let cache = Arc::new(LruCache::new("pages", CacheConfig::default(), clock.clone()));
    let store = Arc::new(PaginationStore::new(
      catalog,
      cache,
      RequestCoordinator::new(clock.clone()),
      clock.clone(),
      Duration::minutes(5),
    ));
    DebouncedLoader::new(
      store,
      clock,
      10,
      Duration::milliseconds(300),
      Duration::milliseconds(800),
    )
  }

  #[tokio::test]
  async fn test_scroll_burst_makes_one_backend_call() {
    let clock = Arc::new(ManualClock::default());
    let catalog = Arc::new(FakeCatalog::with_listings(Category::Rent, 25));
    let loader = loader(catalog.clone(), clock.clone());

    loader
      .store
      .get_first_page(Category::Rent, 10)
      .await
      .unwrap();
    assert_eq!(catalog.calls(), 1);

    for _ in 0..5 {
      loader.request(Category::Rent);
      clock.advance_millis(50);
      assert!(loader.tick().await.is_none());
    }

    clock.advance_millis(300);
    let appended = loader.tick().await.unwrap().unwrap();
    assert_eq!(appended.len(), 10);
    assert_eq!(catalog.calls(), 2);
    assert!(loader.tick().await.is_none());
  }

  #[tokio::test]
  async fn test_category_switch_supersedes_pending_call() {
    let clock = Arc::new(ManualClock::default());
    let catalog = Arc::new(FakeCatalog::with_listings(Category::Rent, 25));
    let loader = loader(catalog.clone(), clock.clone());
    loader
      .store
      .get_first_page(Category::Rent, 10)
      .await
      .unwrap();

    loader.request(Category::Rent);
    clock.advance_millis(100);
    // Sale was never loaded, so its next page is a no-op.
    loader.request(Category::Sale);
    clock.advance_millis(300);

    let appended = loader.tick().await.unwrap().unwrap();
    assert!(appended.is_empty());
    assert_eq!(catalog.calls(), 1);
    assert_eq!(loader.store.items(Category::Rent).len(), 10);
  }
}
