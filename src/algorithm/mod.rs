//! Algorithm-side helpers shared by kernel implementations
//!
//! - [`blocking`] - cache-aware row blocking for centroid assignment

pub mod blocking;

pub use blocking::{CacheInfo, kmeans_block_size};
