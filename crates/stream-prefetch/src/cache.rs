//! Sparse per-stream block cache.
//!
//! Blocks are fixed-size contiguous slices of the remote resource, keyed by
//! block index in an ordered map. The ordered container matters: eviction
//! inspects the smallest and largest resident indices, and the scheduler's
//! "first block missing after the cursor" scan walks keys in order.
//!
//! Design notes:
//! - Residency is bounded by `max_blocks`; inserting past the bound evicts
//!   exactly one block, biased toward keeping blocks ahead of the cursor.
//! - The cache itself is not synchronized. Callers hold the owning stream's
//!   cache lock around every operation, which also publishes inserted block
//!   contents to any later residency check.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use tracing::trace;

/// Bounded sparse map from block index to fetched bytes.
pub struct BlockCache {
    blocks: BTreeMap<u64, Bytes>,
    block_size: u64,
    max_blocks: usize,
}

impl BlockCache {
    /// Creates an empty cache for `block_size`-byte blocks, holding at most
    /// `max_blocks` of them.
    pub fn new(block_size: u64, max_blocks: usize) -> Self {
        Self {
            blocks: BTreeMap::new(),
            block_size,
            max_blocks,
        }
    }

    /// Size of one block in bytes.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Number of resident blocks.
    pub fn resident_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Whether `block` is resident.
    pub fn contains(&self, block: u64) -> bool {
        self.blocks.contains_key(&block)
    }

    /// Whether every block intersecting `[start, start + size)` is resident.
    pub fn has_range(&self, start: u64, size: u64) -> bool {
        if size == 0 {
            return true;
        }
        let first = start / self.block_size;
        let last = (start + size - 1) / self.block_size;
        (first..=last).all(|block| self.blocks.contains_key(&block))
    }

    /// Smallest block index in `[from, end)` that is not resident, or `end`
    /// when everything in the range is cached.
    pub fn next_missing(&self, from: u64, end: u64) -> u64 {
        let mut block = from;
        while block < end && self.blocks.contains_key(&block) {
            block += 1;
        }
        block
    }

    /// Copies out exactly `size` bytes starting at byte offset `start`.
    ///
    /// The caller must have verified residency via [`has_range`]; a miss here
    /// is a caller bug.
    ///
    /// [`has_range`]: BlockCache::has_range
    pub fn read(&self, start: u64, size: u64) -> Bytes {
        if size == 0 {
            return Bytes::new();
        }
        let end = start + size;
        let first = start / self.block_size;
        let last = (end - 1) / self.block_size;

        if first == last {
            let data = self
                .blocks
                .get(&first)
                .expect("requested range must be resident");
            let lo = (start - first * self.block_size) as usize;
            let hi = (end - first * self.block_size) as usize;
            return data.slice(lo..hi);
        }

        let mut out = BytesMut::with_capacity(size as usize);
        for block in first..=last {
            let data = self
                .blocks
                .get(&block)
                .expect("requested range must be resident");
            let base = block * self.block_size;
            let lo = (start.max(base) - base) as usize;
            let hi = (end.min(base + self.block_size) - base) as usize;
            out.extend_from_slice(&data[lo..hi]);
        }
        out.freeze()
    }

    /// Stores a block, evicting one resident block if the bound is exceeded.
    ///
    /// `cursor_block` is the block the decoder will read next. Eviction keeps
    /// blocks ahead of the cursor: a resident block strictly before the
    /// cursor goes first, otherwise the highest-indexed block goes (the
    /// decoder reaches lower indices sooner).
    pub fn insert(&mut self, block: u64, data: Bytes, cursor_block: u64) {
        self.blocks.insert(block, data);
        if self.blocks.len() > self.max_blocks {
            let first = self.blocks.first_key_value().map(|(k, _)| *k);
            let last = self.blocks.last_key_value().map(|(k, _)| *k);
            if let (Some(first), Some(last)) = (first, last) {
                let evict = if first < cursor_block { first } else { last };
                trace!(block = evict, cursor_block, "evicting cached block");
                self.blocks.remove(&evict);
            }
        }
    }

    /// Percentage of the resource currently resident, by byte count.
    pub fn coverage_percent(&self, len: u64) -> f64 {
        if len == 0 {
            return 0.0;
        }
        let resident: u64 = self.blocks.values().map(|data| data.len() as u64).sum();
        resident as f64 * 100.0 / len as f64
    }

    /// Per-bin residency percentages over `bins` equal-width byte ranges
    /// covering `[0, len)`. Feeds a buffering progress bar.
    pub fn coverage_histogram(&self, bins: usize, len: u64) -> Vec<f64> {
        let mut out = vec![0.0; bins];
        if len == 0 || bins == 0 {
            return out;
        }
        for (i, slot) in out.iter_mut().enumerate() {
            let lo = len * i as u64 / bins as u64;
            let hi = len * (i as u64 + 1) / bins as u64;
            if hi <= lo {
                continue;
            }
            let first = lo / self.block_size;
            let last = (hi - 1) / self.block_size;
            let mut covered = 0u64;
            for (block, data) in self.blocks.range(first..=last) {
                let block_lo = block * self.block_size;
                let block_hi = block_lo + data.len() as u64;
                let overlap_lo = block_lo.max(lo);
                let overlap_hi = block_hi.min(hi);
                if overlap_hi > overlap_lo {
                    covered += overlap_hi - overlap_lo;
                }
            }
            *slot = covered as f64 * 100.0 / (hi - lo) as f64;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BS: u64 = 1024;

    fn filled(len: usize, seed: u8) -> Bytes {
        Bytes::from((0..len).map(|i| seed.wrapping_add(i as u8)).collect::<Vec<_>>())
    }

    fn cache_with(blocks: &[u64], max_blocks: usize) -> BlockCache {
        let mut cache = BlockCache::new(BS, max_blocks);
        for &b in blocks {
            cache.insert(b, filled(BS as usize, b as u8), 0);
        }
        cache
    }

    #[test]
    fn range_availability_requires_every_block() {
        let cache = cache_with(&[0, 1, 3], 16);
        assert!(cache.has_range(0, 2 * BS));
        assert!(cache.has_range(BS + 100, 100));
        assert!(!cache.has_range(BS, 3 * BS)); // block 2 missing
        assert!(cache.has_range(3 * BS, BS));
        assert!(cache.has_range(123, 0)); // empty range is vacuously there
    }

    #[test]
    fn read_concatenates_block_slices() {
        let cache = cache_with(&[0, 1, 2], 16);
        // Crosses all three blocks with unaligned edges.
        let start = BS - 7;
        let size = BS + 20;
        let got = cache.read(start, size);
        let expected: Vec<u8> = (start..start + size)
            .map(|off| ((off / BS) as u8).wrapping_add((off % BS) as u8))
            .collect();
        assert_eq!(&got[..], &expected[..]);
    }

    #[test]
    fn read_within_single_block_is_a_slice() {
        let cache = cache_with(&[5], 16);
        let got = cache.read(5 * BS + 10, 100);
        assert_eq!(&got[..], &filled(BS as usize, 5)[10..110]);
    }

    #[test]
    fn short_final_block_reads_back() {
        let mut cache = BlockCache::new(BS, 16);
        cache.insert(0, filled(BS as usize, 0), 0);
        cache.insert(1, filled(300, 1), 0); // final block of a 1324-byte resource
        assert!(cache.has_range(0, BS + 300));
        assert_eq!(cache.read(BS, 300), filled(300, 1));
        assert!((cache.coverage_percent(BS + 300) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn residency_stays_bounded() {
        let mut cache = BlockCache::new(BS, 4);
        for b in 0..100 {
            cache.insert(b, filled(BS as usize, b as u8), 0);
            assert!(cache.resident_blocks() <= 4);
        }
    }

    #[test]
    fn eviction_prefers_stale_blocks_behind_the_cursor() {
        // Cursor at block 6: block 2 is stale and goes first.
        let mut cache = cache_with(&[2, 6, 7, 8], 4);
        cache.insert(9, filled(BS as usize, 9), 6);
        assert!(!cache.contains(2));
        assert_eq!(cache.resident_blocks(), 4);
        for b in [6, 7, 8, 9] {
            assert!(cache.contains(b));
        }
    }

    #[test]
    fn eviction_drops_farthest_forward_block_otherwise() {
        // Everything is at or ahead of the cursor: the highest index goes.
        let mut cache = cache_with(&[4, 5, 6, 7], 4);
        cache.insert(8, filled(BS as usize, 8), 4);
        assert!(!cache.contains(8));
        for b in [4, 5, 6, 7] {
            assert!(cache.contains(b));
        }
    }

    #[test]
    fn eviction_removes_exactly_one_block() {
        let mut cache = cache_with(&[0, 1, 2, 3], 4);
        cache.insert(10, filled(BS as usize, 10), 2);
        assert_eq!(cache.resident_blocks(), 4);
    }

    #[test]
    fn next_missing_scans_resident_prefix() {
        let cache = cache_with(&[3, 4, 6], 16);
        assert_eq!(cache.next_missing(3, 16), 5);
        assert_eq!(cache.next_missing(0, 16), 0);
        assert_eq!(cache.next_missing(3, 5), 5); // clamped at end
        assert_eq!(cache.next_missing(6, 7), 7);
    }

    #[test]
    fn coverage_percent_sums_actual_block_lengths() {
        let mut cache = BlockCache::new(BS, 16);
        let len = 4 * BS;
        assert_eq!(cache.coverage_percent(len), 0.0);
        cache.insert(0, filled(BS as usize, 0), 0);
        cache.insert(2, filled(BS as usize, 2), 0);
        assert!((cache.coverage_percent(len) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn coverage_histogram_reports_per_bin_residency() {
        let mut cache = BlockCache::new(BS, 16);
        let len = 4 * BS;
        cache.insert(0, filled(BS as usize, 0), 0);
        cache.insert(1, filled(BS as usize, 1), 0);

        let bars = cache.coverage_histogram(4, len);
        assert_eq!(bars.len(), 4);
        assert!((bars[0] - 100.0).abs() < 1e-9);
        assert!((bars[1] - 100.0).abs() < 1e-9);
        assert_eq!(bars[2], 0.0);
        assert_eq!(bars[3], 0.0);

        // Two bins: the first fully covered, the second empty.
        let bars = cache.coverage_histogram(2, len);
        assert!((bars[0] - 100.0).abs() < 1e-9);
        assert_eq!(bars[1], 0.0);
    }

    #[test]
    fn coverage_histogram_handles_partial_bins() {
        let mut cache = BlockCache::new(BS, 16);
        let len = 2 * BS;
        cache.insert(0, filled(BS as usize, 0), 0);
        // One bin covering the whole resource: half resident.
        let bars = cache.coverage_histogram(1, len);
        assert!((bars[0] - 50.0).abs() < 1e-9);
    }
}
