//! Remote listing catalog: domain types, the service seam and its HTTP client.

mod api_types;
mod cached_client;
mod client;
#[cfg(test)]
pub mod fake;
mod service;
mod types;

pub use cached_client::CachedCatalogClient;
pub use client::HttpCatalogClient;
pub use service::{CatalogService, UpdateSource};
pub use types::{Category, Listing, ListingFilters, ListingPage};
