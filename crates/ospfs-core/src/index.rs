//! The multi-level block index.
//!
//! Translates a file-block index into the slot that stores its block
//! number: one of the inode's direct pointers, a slot of the indirect
//! block, or a slot of an indirect block hanging off the doubly-indirect
//! block. Read-only; allocation lives in the size engine.

use ospfs_error::{FsError, Result};
use ospfs_image::Image;
use ospfs_ondisk::Inode;
use ospfs_types::{BlockNumber, BLKSIZE, MAX_FILE_BLOCKS, NDIRECT, NINDIRECT};

/// Where file block `b` lives in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockPath {
    /// `direct[slot]` in the inode.
    Direct { slot: usize },
    /// Slot of the block `indirect` points to.
    Indirect { slot: usize },
    /// `index_slot` of the doubly-indirect block names an indirect block;
    /// `slot` within that names the data block.
    DoubleIndirect { index_slot: usize, slot: usize },
}

impl BlockPath {
    /// Decompose a zero-based file block index. `None` past the largest
    /// representable file.
    pub(crate) fn of(block_index: u32) -> Option<Self> {
        let b = block_index as usize;
        if block_index >= MAX_FILE_BLOCKS {
            None
        } else if b < NDIRECT {
            Some(Self::Direct { slot: b })
        } else if b < NDIRECT + NINDIRECT {
            Some(Self::Indirect { slot: b - NDIRECT })
        } else {
            let b = b - (NDIRECT + NINDIRECT);
            Some(Self::DoubleIndirect {
                index_slot: b / NINDIRECT,
                slot: b % NINDIRECT,
            })
        }
    }
}

/// Block number holding the `offset`th byte of `inode`'s data.
///
/// Returns the `BlockNumber::NONE` sentinel when `offset` is at or past the
/// end of the file, when the inode is a symlink (symlinks own no blocks),
/// or when an index table that should name the block does not.
pub(crate) fn block_for_offset(image: &Image, inode: &Inode, offset: u32) -> Result<BlockNumber> {
    if offset >= inode.size {
        return Ok(BlockNumber::NONE);
    }
    let Some(ptrs) = inode.ptrs() else {
        return Ok(BlockNumber::NONE);
    };

    let block_index = offset / BLKSIZE as u32;
    // A well-formed inode keeps size within MAX_FILE_SIZE.
    let Some(path) = BlockPath::of(block_index) else {
        return Err(FsError::Corruption(format!(
            "file block {block_index} beyond the largest representable file"
        )));
    };

    match path {
        BlockPath::Direct { slot } => Ok(BlockNumber(ptrs.direct[slot])),
        BlockPath::Indirect { slot } => {
            if ptrs.indirect == 0 {
                return Ok(BlockNumber::NONE);
            }
            image.block_ptr(BlockNumber(ptrs.indirect), slot)
        }
        BlockPath::DoubleIndirect { index_slot, slot } => {
            if ptrs.indirect2 == 0 {
                return Ok(BlockNumber::NONE);
            }
            let indirect = image.block_ptr(BlockNumber(ptrs.indirect2), index_slot)?;
            if indirect.is_none() {
                return Ok(BlockNumber::NONE);
            }
            image.block_ptr(indirect, slot)
        }
    }
}
