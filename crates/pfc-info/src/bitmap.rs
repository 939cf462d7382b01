//! Block bitmaps.
//!
//! One bit per block, bit `i` stored in byte `i / 8` under mask `1 << (i % 8)`.
//! A descriptor carries three bitmaps of identical length:
//!
//! - `synced`: what has been checkpointed; the only one that is persisted
//! - `working`: in-memory mirror updated as blocks finish writing
//! - `prefetch`: read-ahead marks, present only when prefetch is enabled

/// Number of blocks needed to cover `file_size` bytes. An empty file has
/// no blocks.
///
/// # Panics
///
/// Panics if `block_size` is zero.
#[inline]
pub fn block_count(file_size: u64, block_size: u64) -> u64 {
    file_size.div_ceil(block_size)
}

/// Number of bytes needed to hold `blocks` bits.
#[inline]
pub fn bytes_for_blocks(blocks: u64) -> usize {
    blocks.div_ceil(8) as usize
}

/// Fixed-length bit vector, one bit per block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockBitmap {
    bits: Vec<u8>,
    len: u64,
}

impl BlockBitmap {
    /// All-zero bitmap covering `len` blocks.
    pub fn zeroed(len: u64) -> Self {
        Self {
            bits: vec![0u8; bytes_for_blocks(len)],
            len,
        }
    }

    /// Number of blocks tracked.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw bytes, as persisted.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bits
    }

    /// Mark block `i`. Out-of-range indices are ignored.
    pub fn set(&mut self, i: u64) {
        if i < self.len {
            self.bits[(i / 8) as usize] |= 1 << (i % 8);
        }
    }

    /// Whether block `i` is marked. Out-of-range indices read as unset.
    pub fn test(&self, i: u64) -> bool {
        i < self.len && self.bits[(i / 8) as usize] & (1 << (i % 8)) != 0
    }

    /// True if any block in `[lo, hi)` is unset. `hi` is clamped to `len`.
    pub fn any_unset_in_range(&self, lo: u64, hi: u64) -> bool {
        (lo..hi.min(self.len)).any(|i| !self.test(i))
    }

    /// Count of marked blocks.
    pub fn count_set(&self) -> u64 {
        (0..self.len).filter(|&i| self.test(i)).count() as u64
    }

    /// Overwrite contents with another bitmap of the same length.
    pub fn copy_from(&mut self, other: &BlockBitmap) {
        debug_assert_eq!(self.len, other.len);
        self.bits.copy_from_slice(&other.bits);
    }
}

/// The synced, working and optional prefetch bitmaps of one descriptor.
///
/// They are only ever (re)allocated together, by [`BlockBitmaps::resize`].
#[derive(Debug, Clone, Default)]
pub struct BlockBitmaps {
    synced: BlockBitmap,
    working: BlockBitmap,
    prefetch: Option<BlockBitmap>,
    prefetch_enabled: bool,
}

impl BlockBitmaps {
    pub fn new(prefetch_enabled: bool) -> Self {
        Self {
            prefetch_enabled,
            ..Self::default()
        }
    }

    /// Drop all prior contents and allocate zeroed bitmaps for `blocks` blocks.
    pub fn resize(&mut self, blocks: u64) {
        self.synced = BlockBitmap::zeroed(blocks);
        self.working = BlockBitmap::zeroed(blocks);
        self.prefetch = self.prefetch_enabled.then(|| BlockBitmap::zeroed(blocks));
    }

    /// Make the working bitmap mirror the synced one (after a load).
    pub fn reset_working_to_synced(&mut self) {
        self.working.copy_from(&self.synced);
    }

    /// Checkpoint: the synced bitmap takes over the working bitmap's marks.
    pub fn sync_from_working(&mut self) {
        self.synced.copy_from(&self.working);
    }

    pub fn synced(&self) -> &BlockBitmap {
        &self.synced
    }

    pub(crate) fn synced_mut(&mut self) -> &mut BlockBitmap {
        &mut self.synced
    }

    pub fn working(&self) -> &BlockBitmap {
        &self.working
    }

    pub(crate) fn working_mut(&mut self) -> &mut BlockBitmap {
        &mut self.working
    }

    pub fn prefetch(&self) -> Option<&BlockBitmap> {
        self.prefetch.as_ref()
    }

    pub(crate) fn prefetch_mut(&mut self) -> Option<&mut BlockBitmap> {
        self.prefetch.as_mut()
    }

    pub fn prefetch_enabled(&self) -> bool {
        self.prefetch_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_count_is_ceiling_division() {
        for file_size in 1..=70u64 {
            for block_size in 1..=17u64 {
                let expected = file_size.div_ceil(block_size);
                assert_eq!(block_count(file_size, block_size), expected);
                assert_eq!(bytes_for_blocks(expected), expected.div_ceil(8) as usize);
            }
        }
    }

    #[test]
    fn test_empty_file_has_no_blocks() {
        assert_eq!(block_count(0, 4096), 0);
        assert_eq!(bytes_for_blocks(0), 0);
        assert!(BlockBitmap::zeroed(0).is_empty());
    }

    #[test]
    fn test_bit_layout_is_lsb_first() {
        let mut bm = BlockBitmap::zeroed(12);
        bm.set(0);
        bm.set(9);
        assert_eq!(bm.as_bytes(), &[0b0000_0001, 0b0000_0010]);
        assert!(bm.test(9));
        assert!(!bm.test(8));
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let mut bm = BlockBitmap::zeroed(3);
        bm.set(3);
        bm.set(100);
        assert_eq!(bm.as_bytes(), &[0]);
        assert!(!bm.test(3));
    }

    #[test]
    fn test_any_unset_in_range() {
        let mut bm = BlockBitmap::zeroed(10);
        for i in 0..10 {
            bm.set(i);
        }
        assert!(!bm.any_unset_in_range(0, 10));
        // hi past the end is clamped; trailing pad bits never count
        assert!(!bm.any_unset_in_range(0, 16));

        let mut partial = BlockBitmap::zeroed(10);
        partial.set(0);
        partial.set(1);
        assert!(!partial.any_unset_in_range(0, 2));
        assert!(partial.any_unset_in_range(0, 3));
        assert_eq!(partial.count_set(), 2);
    }

    #[test]
    fn test_resize_discards_and_allocates_together() {
        let mut maps = BlockBitmaps::new(true);
        maps.resize(20);
        maps.working_mut().set(4);
        maps.sync_from_working();
        assert!(maps.synced().test(4));

        maps.resize(9);
        assert_eq!(maps.synced().len(), 9);
        assert_eq!(maps.working().len(), 9);
        assert_eq!(maps.prefetch().map(|p| p.len()), Some(9));
        assert_eq!(maps.synced().as_bytes(), &[0, 0]);
        assert!(!maps.working().test(4));
    }

    #[test]
    fn test_prefetch_absent_when_disabled() {
        let mut maps = BlockBitmaps::new(false);
        maps.resize(8);
        assert!(maps.prefetch().is_none());
        assert!(!maps.prefetch_enabled());
    }
}
