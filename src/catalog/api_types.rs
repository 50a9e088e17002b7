//! Serde-deserializable types matching catalog API responses.
//!
//! These types are separate from domain types to allow lenient deserialization
//! while keeping domain types focused on application needs.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeSet;

use super::types::{Listing, ListingPage};

// ============================================================================
// Listings
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiListing {
  pub id: String,
  #[serde(default, alias = "categories")]
  pub category_tags: Vec<String>,
  #[serde(alias = "createdAt")]
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub title: String,
  pub price: Option<u64>,
  pub city: Option<String>,
  pub bedrooms: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ApiListingPage {
  #[serde(default, alias = "results")]
  pub items: Vec<ApiListing>,
  #[serde(default, alias = "totalCount", alias = "total")]
  pub total_count: u64,
}

// ============================================================================
// App version endpoint response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiVersionResponse {
  #[serde(alias = "updateId")]
  pub update_id: Option<String>,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

impl From<ApiListing> for Listing {
  fn from(l: ApiListing) -> Self {
    Listing {
      id: l.id,
      category_tags: l.category_tags.into_iter().collect::<BTreeSet<_>>(),
      created_at: l.created_at,
      title: l.title,
      price: l.price,
      city: l.city,
      bedrooms: l.bedrooms,
    }
  }
}

impl ApiListingPage {
  /// Convert into a domain page, newest first.
  ///
  /// `has_more` is derived from the page position rather than trusted from the
  /// server, so a shrinking `total_count` ends pagination.
  pub fn into_page(self, page: u32, page_size: u32, fetched_at: DateTime<Utc>) -> ListingPage {
    let mut items: Vec<Listing> = self.items.into_iter().map(Listing::from).collect();
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    ListingPage {
      items,
      total_count: self.total_count,
      has_more: (u64::from(page) * u64::from(page_size)) < self.total_count,
      fetched_at,
    }
  }
}
