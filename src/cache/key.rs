//! Cache and request keys for catalog queries.

use sha2::{Digest, Sha256};

use crate::catalog::{Category, ListingFilters};

/// A logical catalog query, used both as an LRU key and as an in-flight key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListingQueryKey {
  /// The paginated feed of a category under a set of filters (in-flight tracking)
  Feed {
    category: Category,
    filters: ListingFilters,
  },
  /// One page of a category feed
  Page {
    category: Category,
    filters: ListingFilters,
    page: u32,
    page_size: u32,
  },
  /// A single listing by id
  Listing { id: String },
}

impl ListingQueryKey {
  /// Stable key of the form `<kind>:<category>:<sha256>`.
  ///
  /// The readable prefix lets callers drop every entry of a category at once.
  pub fn cache_hash(&self) -> String {
    let input = match self {
      Self::Feed { category, filters } => format!("feed:{}:{}", category, filters.canonical()),
      Self::Page {
        category,
        filters,
        page,
        page_size,
      } => format!(
        "page:{}:{}:{}:{}",
        category,
        filters.canonical(),
        page,
        page_size
      ),
      Self::Listing { id } => format!("listing:{}", id),
    };

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hex::encode(hasher.finalize());

    format!("{}{}", self.prefix(), digest)
  }

  /// Prefix shared by every key of this kind and category.
  fn prefix(&self) -> String {
    match self {
      Self::Feed { category, .. } => Self::feed_prefix(*category),
      Self::Page { category, .. } => Self::page_prefix(*category),
      Self::Listing { .. } => "listing:".to_string(),
    }
  }

  pub fn feed_prefix(category: Category) -> String {
    format!("feed:{}:", category)
  }

  pub fn page_prefix(category: Category) -> String {
    format!("page:{}:", category)
  }
}
