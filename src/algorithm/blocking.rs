//! Cache-aware row blocking
//!
//! Picks how many rows one parallel task processes when assigning rows to
//! cluster centroids, so that a block of rows plus the centroid table stays
//! resident in L1 or L2.

use crate::dtype::Element;

/// Per-core data cache sizes in bytes
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CacheInfo {
    /// L1 data cache size
    pub l1: usize,
    /// L2 cache size
    pub l2: usize,
}

impl Default for CacheInfo {
    fn default() -> Self {
        Self {
            l1: 32 * 1024,
            l2: 1024 * 1024,
        }
    }
}

/// Fraction of a cache level a block may fill
const CACHE_FILL: f64 = 0.8;
/// Block size when neither cache level gives a usable estimate
const DEFAULT_BLOCK: usize = 96;
/// Block size cap when many rows fit in L2, for 8-byte elements
const MAX_L2_BLOCK: usize = 496;
/// Number of blocks is rounded down to a multiple of this
const BLOCK_GROUP: usize = 56;

/// Rows of `dim` features that fit in `cache_bytes` next to `clusters` centroids
fn rows_fitting<T: Element>(cache_bytes: usize, dim: usize, clusters: usize) -> usize {
    let elems = cache_bytes / std::mem::size_of::<T>();
    let free = clusters
        .checked_mul(dim)
        .map_or(0, |centroids| elems.saturating_sub(centroids));
    let rows = clusters
        .checked_add(dim)
        .and_then(|per_row| free.checked_div(per_row))
        .unwrap_or(0);
    (rows as f64 * CACHE_FILL) as usize
}

/// Rows per block for assigning `rows` rows of `dim` features to `clusters` centroids.
///
/// Thresholds are tuned for 8-byte elements and scale up for narrower types.
/// The result is then adjusted so that the number of blocks is a multiple of
/// 56 when there are enough rows for that.
pub fn kmeans_block_size<T: Element>(
    rows: usize,
    dim: usize,
    clusters: usize,
    cache: &CacheInfo,
) -> usize {
    let scale = (8 / std::mem::size_of::<T>()).max(1);
    let fit_l1 = rows_fitting::<T>(cache.l1, dim, clusters);
    let fit_l2 = rows_fitting::<T>(cache.l2, dim, clusters);

    let mut block = DEFAULT_BLOCK;
    if (256 * scale..=512 * scale).contains(&fit_l1) {
        block = fit_l1 / 16 * 16;
    } else if (8..=512 * scale).contains(&fit_l2) {
        block = fit_l2 / 8 * 8;
    } else if fit_l2 >= 512 * scale {
        block = MAX_L2_BLOCK * scale;
    }

    let groups = rows / block / BLOCK_GROUP * BLOCK_GROUP;
    if groups > 0 { rows / groups } else { block }
}
