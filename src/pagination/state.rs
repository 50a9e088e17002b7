use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::catalog::{Listing, ListingFilters, ListingPage};

/// Pagination progress of one category feed.
#[derive(Debug, Clone, Default)]
pub struct CategoryState {
  pub filters: ListingFilters,
  /// Bumped whenever the feed's parameters change or it is reset; responses
  /// tagged with an older epoch are discarded.
  pub epoch: u64,
  /// Last page merged into `items`; 0 until the first page arrives.
  pub current_page_index: u32,
  pub page_size: u32,
  pub has_more: bool,
  pub total_count: u64,
  pub last_fetch_at: Option<DateTime<Utc>>,
  pub in_flight: bool,
  /// Ids already merged; never shrinks except on reset.
  pub accumulated_ids: HashSet<String>,
  /// Visible feed, in merge order.
  pub items: Vec<Listing>,
}

impl CategoryState {
  /// Start over with the same filters under a new epoch.
  pub fn reset(&mut self) {
    let filters = std::mem::take(&mut self.filters);
    self.reset_with(filters);
  }

  pub fn reset_with(&mut self, filters: ListingFilters) {
    *self = CategoryState {
      filters,
      epoch: self.epoch + 1,
      ..Default::default()
    };
  }

  pub fn is_loaded(&self) -> bool {
    self.current_page_index > 0
  }

  /// Replace the feed with a freshly fetched first page.
  pub fn apply_first_page(&mut self, page: &ListingPage, page_size: u32, now: DateTime<Utc>) {
    self.items.clear();
    self.accumulated_ids.clear();
    self.merge(page);

    self.current_page_index = 1;
    self.page_size = page_size;
    self.update_counts(page.total_count);
    self.last_fetch_at = Some(now);
  }

  /// Append page `page_index`, skipping ids that were already merged.
  ///
  /// Returns the listings actually appended.
  pub fn apply_next_page(
    &mut self,
    page: &ListingPage,
    page_index: u32,
    page_size: u32,
    now: DateTime<Utc>,
  ) -> Vec<Listing> {
    let appended = self.merge(page);

    self.current_page_index = page_index;
    self.page_size = page_size;
    self.update_counts(page.total_count);
    self.last_fetch_at = Some(now);

    appended
  }

  fn merge(&mut self, page: &ListingPage) -> Vec<Listing> {
    let fresh: Vec<Listing> = page
      .items
      .iter()
      // `insert` is false for ids seen before, including repeats within the page.
      .filter(|listing| self.accumulated_ids.insert(listing.id.clone()))
      .cloned()
      .collect();
    self.items.extend(fresh.iter().cloned());
    fresh
  }

  /// `has_more` follows the position in the feed, not the server's flag, so a
  /// shrinking total ends pagination instead of looping.
  fn update_counts(&mut self, total_count: u64) {
    self.total_count = total_count;
    self.has_more =
      u64::from(self.current_page_index) * u64::from(self.page_size) < self.total_count;
  }
}
