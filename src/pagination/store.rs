//! Per-category pagination over the catalog service.
//!
//! Each category feed moves `Idle -> Fetching -> Idle`. A failed fetch leaves
//! the feed exactly as it was before the call. Locks are only taken inside the
//! synchronous helpers so no guard ever lives across an `.await`.

use chrono::Duration;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::state::CategoryState;
use crate::cache::{CacheResult, Clearable, ListingQueryKey, LruCache};
use crate::catalog::{CatalogService, Category, Listing, ListingFilters, ListingPage};
use crate::clock::SharedClock;
use crate::coordinator::{Acquire, RequestCoordinator};
use crate::error::{CatalogError, CatalogResult};
use crate::event::{notify, DataEvent, EventSender};

pub type PageCache = LruCache<String, ListingPage>;

/// Parameters captured when a fetch starts, checked again when it completes.
#[derive(Debug, Clone)]
struct Ticket {
  filters: ListingFilters,
  epoch: u64,
}

impl Ticket {
  fn feed_key(&self, category: Category) -> String {
    ListingQueryKey::Feed {
      category,
      filters: self.filters.clone(),
    }
    .cache_hash()
  }

  /// In-flight and throttle key of the feed at this ticket's epoch. A fetch
  /// started before an invalidation never blocks one started after it.
  fn flight_key(&self, category: Category) -> String {
    format!("{}@{}", self.feed_key(category), self.epoch)
  }

  fn page_key(&self, category: Category, page: u32, page_size: u32) -> String {
    ListingQueryKey::Page {
      category,
      filters: self.filters.clone(),
      page,
      page_size,
    }
    .cache_hash()
  }
}

pub struct PaginationStore {
  catalog: Arc<dyn CatalogService>,
  cache: Arc<PageCache>,
  coordinator: RequestCoordinator,
  clock: SharedClock,
  /// Minimum time between unforced first-page fetches of the same feed
  refetch_interval: Duration,
  categories: Mutex<HashMap<Category, CategoryState>>,
  events: Option<EventSender>,
}

impl PaginationStore {
  pub fn new(
    catalog: Arc<dyn CatalogService>,
    cache: Arc<PageCache>,
    coordinator: RequestCoordinator,
    clock: SharedClock,
    refetch_interval: Duration,
  ) -> Self {
    Self {
      catalog,
      cache,
      coordinator,
      clock,
      refetch_interval,
      categories: Mutex::new(HashMap::new()),
      events: None,
    }
  }

  /// Report load failures on this channel.
  pub fn with_events(mut self, events: EventSender) -> Self {
    self.events = Some(events);
    self
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<Category, CategoryState>> {
    self.categories.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// First page of a category feed, subject to throttling and in-flight dedup.
  pub async fn get_first_page(
    &self,
    category: Category,
    page_size: u32,
  ) -> CatalogResult<CacheResult<ListingPage>> {
    self.first_page(category, page_size, false).await
  }

  /// Like [`get_first_page`](Self::get_first_page) but ignores the refetch
  /// interval. A fetch already in flight is still shared, not duplicated.
  pub async fn refresh(
    &self,
    category: Category,
    page_size: u32,
  ) -> CatalogResult<CacheResult<ListingPage>> {
    self.first_page(category, page_size, true).await
  }

  async fn first_page(
    &self,
    category: Category,
    page_size: u32,
    force: bool,
  ) -> CatalogResult<CacheResult<ListingPage>> {
    loop {
      let ticket = self.ticket(category);
      let flight_key = ticket.flight_key(category);
      let page_key = ticket.page_key(category, 1, page_size);

      let cached = self.cache.get_entry(&page_key);
      let has_cached = cached.as_ref().is_some_and(|c| !c.value.items.is_empty());

      if self
        .coordinator
        .should_throttle(&flight_key, self.refetch_interval, force, has_cached)
      {
        if let Some(cached) = cached {
          debug!(%category, "first page throttled, serving cache");
          return Ok(CacheResult::from_cache(cached.value, cached.created_at));
        }
      }

      let guard = match self.coordinator.try_acquire(&flight_key) {
        Acquire::Granted(guard) => guard,
        Acquire::Denied(waiter) => {
          if let Some(cached) = cached {
            debug!(%category, "first page already in flight, serving cache");
            return Ok(CacheResult::from_cache(cached.value, cached.created_at));
          }
          debug!(%category, "first page already in flight, waiting");
          waiter.wait().await?;
          if let Some(cached) = self.cache.get_entry(&page_key) {
            return Ok(CacheResult::from_cache(cached.value, cached.created_at));
          }
          // The shared fetch was superseded before it could cache anything.
          continue;
        }
      };

      self.set_in_flight(category, &ticket, true);
      let result = self
        .catalog
        .fetch_page(category, &ticket.filters, 1, page_size)
        .await;

      return match result {
        Ok(page) => {
          if self.apply_first_page(category, &ticket, &page, page_size) {
            self.cache.set(page_key, page.clone());
            guard.release();
            Ok(CacheResult::from_network(page))
          } else {
            guard.discard();
            Ok(CacheResult::superseded(page))
          }
        }
        Err(e) => {
          self.fail(category, &ticket, &e);
          guard.fail(e.clone());
          match cached {
            Some(cached) => Ok(CacheResult::degraded(cached.value, cached.created_at)),
            None => Err(e),
          }
        }
      };
    }
  }

  /// Fetch and merge the next page of a loaded feed.
  ///
  /// Returns the newly appended listings, empty when there is nothing more to
  /// load or the response was superseded. While another fetch of the same feed
  /// is running this returns [`CatalogError::Throttled`] without calling out.
  pub async fn load_next_page(
    &self,
    category: Category,
    page_size: u32,
  ) -> CatalogResult<Vec<Listing>> {
    let Some((ticket, next_index)) = self.next_page_ticket(category) else {
      return Ok(Vec::new());
    };
    let flight_key = ticket.flight_key(category);

    // Only first-page fetches count towards the refetch interval.
    let guard = match self.coordinator.try_acquire_untracked(&flight_key) {
      Acquire::Granted(guard) => guard,
      Acquire::Denied(_) => {
        debug!(%category, "next page skipped, feed already in flight");
        return Err(CatalogError::Throttled);
      }
    };

    self.set_in_flight(category, &ticket, true);
    let result = self
      .catalog
      .fetch_page(category, &ticket.filters, next_index, page_size)
      .await;

    let outcome = match result {
      Ok(page) => {
        let appended = self.apply_next_page(category, &ticket, &page, next_index, page_size);
        if let Some(appended) = &appended {
          self
            .cache
            .set(ticket.page_key(category, next_index, page_size), page);
          notify(
            self.events.as_ref(),
            DataEvent::PageAppended {
              category,
              appended: appended.len(),
            },
          );
        }
        Ok(appended.unwrap_or_default())
      }
      Err(e) => {
        self.fail(category, &ticket, &e);
        Err(e)
      }
    };

    guard.release();
    outcome
  }

  /// An arbitrary page, cached but not merged into the category feed.
  pub async fn get_page(
    &self,
    category: Category,
    page: u32,
    page_size: u32,
  ) -> CatalogResult<CacheResult<ListingPage>> {
    if page <= 1 {
      return self.get_first_page(category, page_size).await;
    }

    loop {
      let ticket = self.ticket(category);
      let page_key = ticket.page_key(category, page, page_size);

      if let Some(cached) = self.cache.get_entry(&page_key) {
        return Ok(CacheResult::from_cache(cached.value, cached.created_at));
      }

      let guard = match self.coordinator.try_acquire_untracked(&page_key) {
        Acquire::Granted(guard) => guard,
        Acquire::Denied(waiter) => {
          waiter.wait().await?;
          continue;
        }
      };

      let result = self
        .catalog
        .fetch_page(category, &ticket.filters, page, page_size)
        .await;

      return match result {
        Ok(fetched) if self.is_current(category, &ticket) => {
          self.cache.set(page_key, fetched.clone());
          guard.release();
          Ok(CacheResult::from_network(fetched))
        }
        Ok(fetched) => {
          guard.discard();
          Ok(CacheResult::superseded(fetched))
        }
        Err(e) => {
          notify(
            self.events.as_ref(),
            DataEvent::LoadFailed {
              category,
              message: e.to_string(),
            },
          );
          guard.fail(e.clone());
          Err(e)
        }
      };
    }
  }

  /// Change a feed's filters. Responses still in flight for the old filters
  /// will be discarded.
  pub fn set_filters(&self, category: Category, filters: ListingFilters) {
    {
      let mut categories = self.lock();
      let state = categories.entry(category).or_default();
      if state.filters == filters {
        return;
      }
      state.reset_with(filters);
    }
    self.drop_cached(category);
  }

  pub fn filters(&self, category: Category) -> ListingFilters {
    self
      .lock()
      .get(&category)
      .map(|state| state.filters.clone())
      .unwrap_or_default()
  }

  /// Forget everything about a category; the next read goes to the network.
  pub fn invalidate(&self, category: Category) {
    if let Some(state) = self.lock().get_mut(&category) {
      state.reset();
    }
    self.drop_cached(category);
    debug!(%category, "category invalidated");
  }

  pub fn invalidate_all(&self) {
    for category in Category::ALL {
      self.invalidate(category);
    }
  }

  /// Copy of a category's state, if it has been used.
  pub fn state(&self, category: Category) -> Option<CategoryState> {
    self.lock().get(&category).cloned()
  }

  /// The merged feed of a category.
  pub fn items(&self, category: Category) -> Vec<Listing> {
    self
      .lock()
      .get(&category)
      .map(|state| state.items.clone())
      .unwrap_or_default()
  }

  fn drop_cached(&self, category: Category) {
    let page_prefix = ListingQueryKey::page_prefix(category);
    let removed = self.cache.delete_where(|key| key.starts_with(&page_prefix));
    self
      .coordinator
      .forget_prefix(&ListingQueryKey::feed_prefix(category));
    if removed > 0 {
      debug!(%category, removed, "dropped cached pages");
    }
  }

  // --------------------------------------------------------------------------
  // Synchronous state transitions
  // --------------------------------------------------------------------------

  fn ticket(&self, category: Category) -> Ticket {
    let mut categories = self.lock();
    let state = categories.entry(category).or_default();
    Ticket {
      filters: state.filters.clone(),
      epoch: state.epoch,
    }
  }

  fn next_page_ticket(&self, category: Category) -> Option<(Ticket, u32)> {
    let categories = self.lock();
    let state = categories.get(&category)?;
    if !state.is_loaded() || !state.has_more {
      return None;
    }
    Some((
      Ticket {
        filters: state.filters.clone(),
        epoch: state.epoch,
      },
      state.current_page_index + 1,
    ))
  }

  fn is_current(&self, category: Category, ticket: &Ticket) -> bool {
    self
      .lock()
      .get(&category)
      .is_some_and(|state| state.epoch == ticket.epoch)
  }

  fn set_in_flight(&self, category: Category, ticket: &Ticket, in_flight: bool) {
    if let Some(state) = self.lock().get_mut(&category) {
      if state.epoch == ticket.epoch {
        state.in_flight = in_flight;
      }
    }
  }

  /// Returns false when the response was superseded and not applied.
  fn apply_first_page(
    &self,
    category: Category,
    ticket: &Ticket,
    page: &ListingPage,
    page_size: u32,
  ) -> bool {
    let now = self.clock.now();
    let mut categories = self.lock();
    let state = categories.entry(category).or_default();
    if state.epoch != ticket.epoch {
      debug!(%category, "discarding superseded first page");
      return false;
    }
    state.in_flight = false;
    state.apply_first_page(page, page_size, now);
    true
  }

  fn apply_next_page(
    &self,
    category: Category,
    ticket: &Ticket,
    page: &ListingPage,
    page_index: u32,
    page_size: u32,
  ) -> Option<Vec<Listing>> {
    let now = self.clock.now();
    let mut categories = self.lock();
    let state = categories.entry(category).or_default();
    if state.epoch != ticket.epoch {
      debug!(%category, page_index, "discarding superseded page");
      return None;
    }
    state.in_flight = false;
    Some(state.apply_next_page(page, page_index, page_size, now))
  }

  fn fail(&self, category: Category, ticket: &Ticket, error: &CatalogError) {
    self.set_in_flight(category, ticket, false);
    warn!(%category, error = %error, "catalog fetch failed");
    notify(
      self.events.as_ref(),
      DataEvent::LoadFailed {
        category,
        message: error.to_string(),
      },
    );
  }
}

impl Clearable for PaginationStore {
  fn name(&self) -> &'static str {
    "pagination_store"
  }

  fn clear(&self) {
    for state in self.lock().values_mut() {
      state.reset();
    }
  }
}
