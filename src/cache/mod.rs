//! In-memory caching for catalog data.
//!
//! - `LruCache`: bounded, TTL-aware store with least-recently-used eviction
//! - `ListingQueryKey`: stable hashed keys for pages, feeds and single listings
//! - `Clearable`: hook used by the version invalidator to wipe derived state

mod key;
mod lru;
mod traits;

pub use key::ListingQueryKey;
pub use lru::{CacheConfig, CacheStats, LruCache};
pub use traits::{CacheResult, CacheSource, Clearable};
