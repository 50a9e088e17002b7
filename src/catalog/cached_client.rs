//! Catalog access with transparent caching, pagination and invalidation.

use chrono::Duration;
use color_eyre::Result;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::service::CatalogService;
use super::types::{Category, Listing, ListingFilters, ListingPage};
use crate::cache::{CacheResult, CacheStats, ListingQueryKey, LruCache};
use crate::clock::SharedClock;
use crate::config::Config;
use crate::coordinator::RequestCoordinator;
use crate::error::{CatalogError, CatalogResult};
use crate::event::EventSender;
use crate::kv::KvStore;
use crate::loader::DebouncedLoader;
use crate::pagination::{CategoryState, PaginationStore};
use crate::version::{Restarter, RuntimeIdentity, VersionInvalidator, SCRATCH_PREFIX};

/// Everything the rest of the application needs from the data layer.
///
/// One instance lives for the whole process; it owns the page and listing
/// caches and hands them to the components allowed to write them.
pub struct CachedCatalogClient {
  catalog: Arc<dyn CatalogService>,
  kv: Arc<dyn KvStore>,
  pages: Arc<LruCache<String, ListingPage>>,
  listings: Arc<LruCache<String, Listing>>,
  store: Arc<PaginationStore>,
  loader: Arc<DebouncedLoader>,
  invalidator: Arc<VersionInvalidator>,
  page_size: u32,
  loader_task: Mutex<Option<JoinHandle<()>>>,
}

impl CachedCatalogClient {
  pub fn new(
    config: &Config,
    catalog: Arc<dyn CatalogService>,
    kv: Arc<dyn KvStore>,
    clock: SharedClock,
    restarter: Arc<dyn Restarter>,
    events: EventSender,
  ) -> Self {
    let pages = Arc::new(LruCache::new("page_cache", config.cache, clock.clone()));
    let listings = Arc::new(LruCache::new("listing_cache", config.cache, clock.clone()));
    let coordinator = RequestCoordinator::new(clock.clone());

    let store = Arc::new(
      PaginationStore::new(
        catalog.clone(),
        pages.clone(),
        coordinator.clone(),
        clock.clone(),
        Duration::seconds(config.pagination.refetch_interval_secs as i64),
      )
      .with_events(events.clone()),
    );

    let loader = Arc::new(DebouncedLoader::new(
      store.clone(),
      clock.clone(),
      config.pagination.page_size,
      Duration::milliseconds(config.loader.debounce_ms as i64),
      Duration::milliseconds(config.loader.throttle_ms as i64),
    ));

    let mut invalidator = VersionInvalidator::new(
      kv.clone(),
      RuntimeIdentity::current(config.version.update_id.clone()),
      clock,
      restarter,
    )
    .with_events(events);
    if let Some(dir) = &config.version.scratch_dir {
      invalidator = invalidator.with_scratch_dir(dir.clone());
    }
    invalidator.register(pages.clone());
    invalidator.register(listings.clone());
    invalidator.register(store.clone());
    invalidator.register(Arc::new(coordinator));

    Self {
      catalog,
      kv,
      pages,
      listings,
      store,
      loader,
      invalidator: Arc::new(invalidator),
      page_size: config.pagination.page_size,
      loader_task: Mutex::new(None),
    }
  }

  /// Start background work: cache sweeps and the load-more driver.
  pub fn start(&self) {
    self.pages.start_cleanup();
    self.listings.start_cleanup();

    let handle = self.loader.clone().spawn();
    if let Some(previous) = self
      .loader_task
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .replace(handle)
    {
      previous.abort();
    }
  }

  /// Stop background work and drop cached data.
  pub fn shutdown(&self) {
    if let Some(handle) = self
      .loader_task
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take()
    {
      handle.abort();
    }
    self.pages.destroy();
    self.listings.destroy();
  }

  pub fn page_size(&self) -> u32 {
    self.page_size
  }

  pub fn invalidator(&self) -> &VersionInvalidator {
    &self.invalidator
  }

  /// A page of a category feed. Page 1 goes through the throttled, merged
  /// feed; later pages are cached individually.
  pub async fn get_properties_by_type(
    &self,
    category: Category,
    page: u32,
    page_size: u32,
  ) -> CatalogResult<CacheResult<ListingPage>> {
    self.store.get_page(category, page, page_size).await
  }

  /// Ask for the next page of `category`. Debounced and throttled; results
  /// arrive as data events.
  pub fn load_more_properties(&self, category: Category) {
    self.loader.request(category);
  }

  /// Fresh first page, ignoring the refetch interval.
  pub async fn refresh_properties(
    &self,
    category: Category,
  ) -> CatalogResult<CacheResult<ListingPage>> {
    self.store.refresh(category, self.page_size).await
  }

  /// Force every category's next read to hit the network, e.g. after a listing
  /// was created, edited or deleted.
  pub fn invalidate_cache(&self) {
    self.store.invalidate_all();
    self.listings.clear();
    debug!("catalog cache invalidated");
  }

  /// Compare the stored version fingerprint with this build; wipe on mismatch.
  pub async fn run_startup_version_check(&self) -> Result<bool> {
    self.invalidator.check_and_clear_if_needed().await
  }

  pub fn set_filters(&self, category: Category, filters: ListingFilters) {
    self.store.set_filters(category, filters);
  }

  pub fn filters(&self, category: Category) -> ListingFilters {
    self.store.filters(category)
  }

  pub fn items(&self, category: Category) -> Vec<Listing> {
    self.store.items(category)
  }

  pub fn category_state(&self, category: Category) -> Option<CategoryState> {
    self.store.state(category)
  }

  /// `(page cache, listing cache)` diagnostics.
  pub fn stats(&self) -> (CacheStats, CacheStats) {
    (self.pages.stats(), self.listings.stats())
  }

  /// A single listing, falling back to the last copy persisted on disk when
  /// the network is unavailable.
  pub async fn get_property(&self, id: &str) -> CatalogResult<Listing> {
    let key = ListingQueryKey::Listing { id: id.to_string() }.cache_hash();
    if let Some(listing) = self.listings.get(&key) {
      return Ok(listing);
    }

    let scratch_key = format!("{}listing:{}", SCRATCH_PREFIX, id);
    match self.catalog.fetch_single(id).await {
      Ok(listing) => {
        self.listings.set(key, listing.clone());
        self.persist_scratch(&scratch_key, &listing).await;
        Ok(listing)
      }
      Err(CatalogError::NotFound(id)) => {
        self.listings.delete(&key);
        if let Err(e) = self.kv.remove(&scratch_key).await {
          debug!(error = %e, "failed to drop scratch copy");
        }
        Err(CatalogError::NotFound(id))
      }
      Err(e) => match self.read_scratch(&scratch_key).await {
        Some(listing) => {
          warn!(id, error = %e, "serving persisted copy of listing");
          Ok(listing)
        }
        None => Err(e),
      },
    }
  }

  async fn persist_scratch(&self, key: &str, listing: &Listing) {
    let json = match serde_json::to_string(listing) {
      Ok(json) => json,
      Err(e) => {
        debug!(error = %e, "failed to serialize listing");
        return;
      }
    };
    if let Err(e) = self.kv.set(key, &json).await {
      debug!(error = %e, "failed to persist listing");
    }
  }

  async fn read_scratch(&self, key: &str) -> Option<Listing> {
    let raw = self.kv.get(key).await.ok()??;
    serde_json::from_str(&raw).ok()
  }
}
