//! Tunables for the cache and prefetch engine.
//!
//! All block math in the crate is driven by the [`Settings`] carried by each
//! stream, so different streams (and tests) can run with different block
//! sizes and residency bounds. The defaults below are sized for progressive
//! media playback.

/// Default size of one cached block in bytes.
pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024;

/// Default cap on resident blocks per stream.
///
/// Bounds per-stream memory at `max_cache_blocks * block_size`.
pub const DEFAULT_MAX_CACHE_BLOCKS: usize = 64;

/// Default prefetch window, in blocks, measured from the read cursor.
pub const DEFAULT_MAX_FORWARD_READ_BLOCKS: u64 = 32;

/// Per-stream tunables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Size of one block in bytes. Should be a power of two.
    pub block_size: u64,

    /// Maximum number of resident blocks; exceeding it on insertion evicts
    /// exactly one block.
    pub max_cache_blocks: usize,

    /// Blocks ahead of the read cursor the scheduler is allowed to prefetch.
    /// Keep this at or below `max_cache_blocks`, otherwise prefetched blocks
    /// evict each other before the cursor reaches them.
    pub max_forward_read_blocks: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            max_cache_blocks: DEFAULT_MAX_CACHE_BLOCKS,
            max_forward_read_blocks: DEFAULT_MAX_FORWARD_READ_BLOCKS,
        }
    }
}
