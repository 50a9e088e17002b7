//! Seams to the remote catalog.

use async_trait::async_trait;

use super::types::{Category, Listing, ListingFilters, ListingPage};
use crate::error::CatalogResult;

/// Remote paged query service for listings.
#[async_trait]
pub trait CatalogService: Send + Sync {
  /// Fetch page `page` (1-based) of a category feed.
  async fn fetch_page(
    &self,
    category: Category,
    filters: &ListingFilters,
    page: u32,
    page_size: u32,
  ) -> CatalogResult<ListingPage>;

  /// Fetch a single listing. Missing listings yield `CatalogError::NotFound`.
  async fn fetch_single(&self, id: &str) -> CatalogResult<Listing>;
}

/// Source of the most recently published update id, if any.
#[async_trait]
pub trait UpdateSource: Send + Sync {
  async fn latest_update_id(&self) -> CatalogResult<Option<String>>;
}
