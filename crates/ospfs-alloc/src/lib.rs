#![forbid(unsafe_code)]
//! Block allocation against the free bitmap.
//!
//! One bit per block over the whole image, bit = 1 meaning free. The
//! allocator only ever hands out blocks in the data range; bits for the
//! boot, superblock, bitmap, and inode-table blocks are permanently 0 and
//! `free_block` refuses to touch them.

use ospfs_image::Image;
use ospfs_types::BlockNumber;
use tracing::trace;

// ── Raw bitmap operations ───────────────────────────────────────────────────

/// Get bit `idx` from a bitmap byte slice.
#[must_use]
pub fn bitmap_get(bitmap: &[u8], idx: u32) -> bool {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx >= bitmap.len() {
        return false;
    }
    (bitmap[byte_idx] >> bit_idx) & 1 == 1
}

/// Set bit `idx` in a bitmap byte slice.
pub fn bitmap_set(bitmap: &mut [u8], idx: u32) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] |= 1 << bit_idx;
    }
}

/// Clear bit `idx` in a bitmap byte slice.
pub fn bitmap_clear(bitmap: &mut [u8], idx: u32) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] &= !(1 << bit_idx);
    }
}

/// Find the first set (free) bit in `[start, count)`, lowest index first.
#[must_use]
pub fn bitmap_find_set(bitmap: &[u8], count: u32, start: u32) -> Option<u32> {
    (start..count).find(|&idx| bitmap_get(bitmap, idx))
}

/// Count set (free) bits in the first `count` bits of `bitmap`.
#[must_use]
pub fn bitmap_count_set(bitmap: &[u8], count: u32) -> u32 {
    (0..count).filter(|&idx| bitmap_get(bitmap, idx)).count() as u32
}

// ── Allocator ───────────────────────────────────────────────────────────────

/// Allocate the lowest free data block, clearing its bit.
///
/// Returns `None` when the disk is full. The block's contents are not
/// touched; callers that need a zeroed block must zero it themselves.
pub fn allocate_block(image: &mut Image) -> Option<BlockNumber> {
    let first_data = image.first_data_block();
    let nblocks = image.nblocks();
    let found = bitmap_find_set(image.freemap(), nblocks, first_data)?;
    bitmap_clear(image.freemap_mut(), found);
    trace!(target: "ospfs::alloc", block = found, "allocated");
    Some(BlockNumber(found))
}

/// Mark `block` free again.
///
/// Refuses (no-op) any block outside the data range: the boot sector,
/// superblock, free bitmap, and inode table must never be freed, and the
/// size engine relies on the guard when unwinding with sentinel values.
pub fn free_block(image: &mut Image, block: BlockNumber) {
    if !image.superblock().is_data_block(block) {
        return;
    }
    bitmap_set(image.freemap_mut(), block.0);
    trace!(target: "ospfs::alloc", block = block.0, "freed");
}

/// Number of free data blocks.
#[must_use]
pub fn free_block_count(image: &Image) -> u32 {
    bitmap_count_set(image.freemap(), image.nblocks())
}
