//! In-memory catalog used by tests.

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Semaphore;

use super::service::{CatalogService, UpdateSource};
use super::types::{Category, Listing, ListingFilters, ListingPage};
use crate::error::{CatalogError, CatalogResult};

pub fn listing(id: &str, category: Category) -> Listing {
  let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
  let seq: i64 = id.parse().unwrap_or(0);
  Listing {
    id: id.to_string(),
    category_tags: BTreeSet::from([category.to_string()]),
    // Lower ids are newer so pages come back in id order.
    created_at: epoch - Duration::minutes(seq),
    title: format!("Listing {}", id),
    price: Some(100_000 + seq as u64),
    city: None,
    bedrooms: Some(2),
  }
}

pub struct FakeCatalog {
  feeds: Mutex<HashMap<Category, Vec<Listing>>>,
  pages: Mutex<HashMap<(Category, u32), (Vec<Listing>, u64)>>,
  update_id: Mutex<Option<String>>,
  calls: AtomicUsize,
  failing: AtomicBool,
  gate: Option<Semaphore>,
}

impl FakeCatalog {
  /// A feed of `count` listings with ids "1".."count".
  pub fn with_listings(category: Category, count: usize) -> Self {
    let listings = (1..=count)
      .map(|i| listing(&i.to_string(), category))
      .collect();
    Self {
      feeds: Mutex::new(HashMap::from([(category, listings)])),
      pages: Mutex::new(HashMap::new()),
      update_id: Mutex::new(None),
      calls: AtomicUsize::new(0),
      failing: AtomicBool::new(false),
      gate: None,
    }
  }

  /// Every fetch blocks until [`open_gate`](Self::open_gate) lets it through.
  pub fn gated(mut self) -> Self {
    self.gate = Some(Semaphore::new(0));
    self
  }

  pub fn open_gate(&self, fetches: usize) {
    if let Some(gate) = &self.gate {
      gate.add_permits(fetches);
    }
  }

  /// Serve exactly these ids for one page, regardless of the feed.
  pub fn set_page(&self, category: Category, page: u32, ids: &[&str], total_count: u64) {
    let items = ids.iter().map(|id| listing(id, category)).collect();
    self
      .pages
      .lock()
      .unwrap()
      .insert((category, page), (items, total_count));
  }

  pub fn set_update_id(&self, update_id: Option<&str>) {
    *self.update_id.lock().unwrap() = update_id.map(String::from);
  }

  /// Make every following call fail (or succeed again).
  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  async fn enter(&self) -> CatalogResult<()> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if let Some(gate) = &self.gate {
      gate
        .acquire()
        .await
        .map_err(|e| CatalogError::Network(e.to_string()))?
        .forget();
    }
    if self.failing.load(Ordering::SeqCst) {
      return Err(CatalogError::Network("connection reset".to_string()));
    }
    Ok(())
  }
}

#[async_trait]
impl CatalogService for FakeCatalog {
  async fn fetch_page(
    &self,
    category: Category,
    _filters: &ListingFilters,
    page: u32,
    page_size: u32,
  ) -> CatalogResult<ListingPage> {
    self.enter().await?;

    let fixed = self.pages.lock().unwrap().get(&(category, page)).cloned();
    let (items, total_count) = match fixed {
      Some(fixed) => fixed,
      None => {
        let feeds = self.feeds.lock().unwrap();
        let feed = feeds.get(&category).cloned().unwrap_or_default();
        let start = ((page.max(1) - 1) * page_size) as usize;
        let items = feed
          .iter()
          .skip(start)
          .take(page_size as usize)
          .cloned()
          .collect();
        (items, feed.len() as u64)
      }
    };

    Ok(ListingPage {
      items,
      total_count,
      has_more: u64::from(page) * u64::from(page_size) < total_count,
      fetched_at: Utc::now(),
    })
  }

  async fn fetch_single(&self, id: &str) -> CatalogResult<Listing> {
    self.enter().await?;

    self
      .feeds
      .lock()
      .unwrap()
      .values()
      .flatten()
      .find(|l| l.id == id)
      .cloned()
      .ok_or_else(|| CatalogError::NotFound(id.to_string()))
  }
}

#[async_trait]
impl UpdateSource for FakeCatalog {
  async fn latest_update_id(&self) -> CatalogResult<Option<String>> {
    self.enter().await?;
    Ok(self.update_id.lock().unwrap().clone())
  }
}
