//! Page cache for decoded blocks.
//!
//! The page cache shields the tree from redundant reads and deserialization by
//! keeping recently used decoded nodes in memory, keyed by block identifier.
//!
//! # Design
//!
//! - Fixed capacity chosen at construction (at least one entry)
//! - Strict least-recently-used eviction: a `get` hit or a `put` makes the
//!   entry the most recently used one
//! - Write-through only: the cache never holds the sole copy of a node, so
//!   an evicted entry is simply dropped
//!
//! # Invariants
//!
//! - At most one entry per block identifier
//! - `len() <= capacity()`

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::storage::block::BlockId;

/// Hit, miss and eviction counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that had to go to the block store.
    pub misses: u64,
    /// Entries dropped to make room for new ones.
    pub evictions: u64,
}

/// A fixed-capacity LRU cache of decoded blocks.
#[derive(Debug)]
pub struct PageCache<T> {
    entries: LruCache<BlockId, T>,
    stats: CacheStats,
}

impl<T: Clone> PageCache<T> {
    /// Create a cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            stats: CacheStats::default(),
        }
    }

    /// Look up a block, promoting it to most recently used on a hit.
    pub fn get(&mut self, block_id: BlockId) -> Option<T> {
        if let Some(value) = self.entries.get(&block_id) {
            self.stats.hits += 1;
            Some(value.clone())
        } else {
            self.stats.misses += 1;
            None
        }
    }

    /// Insert or overwrite an entry.
    ///
    /// Inserting a new block into a full cache evicts the least recently
    /// used entry first.
    pub fn put(&mut self, block_id: BlockId, value: T) {
        if let Some((evicted_id, _)) = self.entries.push(block_id, value) {
            if evicted_id != block_id {
                self.stats.evictions += 1;
                tracing::trace!("evicted block {evicted_id} from page cache");
            }
        }
    }

    /// Remove an entry. Returns true if it was present.
    pub fn invalidate(&mut self, block_id: BlockId) -> bool {
        self.entries.pop(&block_id).is_some()
    }

    /// Check for an entry without touching its recency.
    #[must_use]
    pub fn contains(&self, block_id: BlockId) -> bool {
        self.entries.contains(&block_id)
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Hit, miss and eviction counters.
    #[must_use]
    pub const fn stats(&self) -> CacheStats {
        self.stats
    }
}
