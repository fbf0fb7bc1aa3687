#![forbid(unsafe_code)]
//! Typed views over the raw OSPFS byte region.
//!
//! The `Image` owns the contiguous "pretend disk" and hands out
//! bounds-checked views: block slices, inode records, block-pointer slots
//! inside indirect blocks, and the free-bitmap region. It also builds fresh
//! images for hosts and tests.
//!
//! Every persistent reference inside the region is a 32-bit block or inode
//! index; nothing here holds pointers into the buffer across calls.

use ospfs_error::{FsError, Result};
use ospfs_ondisk::{Inode, Superblock};
use ospfs_types::{
    read_le_u32, write_le_u32, BlockNumber, InodeNumber, BLKSIZE, BLOCK_BITS, FREEMAP_BLOCK,
    INODES_PER_BLOCK, INODE_SIZE, MAGIC, NINDIRECT, ROOT_INO,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Parameters for building a fresh image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatOptions {
    /// Total blocks in the image.
    pub nblocks: u32,
    /// Total inode records (including the reserved inode 0 and the root).
    pub ninodes: u32,
    /// Permission bits of the root directory.
    pub root_mode: u32,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            nblocks: 1024,
            ninodes: 64,
            root_mode: 0o755,
        }
    }
}

/// The in-memory image: a contiguous byte region laid out as
/// boot, superblock, free bitmap, inode table, data blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    bytes: Vec<u8>,
    sb: Superblock,
}

impl Image {
    /// Adopt an existing image, validating the superblock and geometry.
    pub fn load(bytes: Vec<u8>) -> Result<Self> {
        let sb = Superblock::parse_from_image(&bytes)?;
        let needed = sb.nblocks as usize * BLKSIZE;
        if bytes.len() < needed {
            return Err(FsError::Format(format!(
                "image is {} bytes but the superblock claims {} blocks ({needed} bytes)",
                bytes.len(),
                sb.nblocks
            )));
        }
        info!(
            target: "ospfs::image",
            nblocks = sb.nblocks,
            ninodes = sb.ninodes,
            first_inode_block = sb.first_inode_block,
            "image loaded"
        );
        Ok(Self { bytes, sb })
    }

    /// Build a fresh image: superblock, free bitmap with all metadata blocks
    /// marked allocated, an empty inode table, and an empty root directory.
    pub fn format(opts: &FormatOptions) -> Result<Self> {
        let bitmap_blocks = (opts.nblocks as usize).div_ceil(BLOCK_BITS) as u32;
        let first_inode_block = FREEMAP_BLOCK + bitmap_blocks;
        let sb = Superblock {
            magic: MAGIC,
            nblocks: opts.nblocks,
            ninodes: opts.ninodes,
            first_inode_block,
        };
        let first_data = sb.first_data_block();
        if opts.ninodes < 2 {
            return Err(FsError::Format(
                "need at least the reserved and root inodes".into(),
            ));
        }
        if first_data >= opts.nblocks {
            return Err(FsError::Format(format!(
                "{} blocks leave no room for data after {first_data} metadata blocks",
                opts.nblocks
            )));
        }

        let mut bytes = vec![0_u8; opts.nblocks as usize * BLKSIZE];
        sb.write_to_block(&mut bytes[BLKSIZE..2 * BLKSIZE]);

        // Bit = 1 means free; metadata blocks and the tail of the last
        // bitmap block stay 0 so the allocator never touches them.
        let freemap = &mut bytes[FREEMAP_BLOCK as usize * BLKSIZE..first_inode_block as usize * BLKSIZE];
        for block in first_data..opts.nblocks {
            freemap[block as usize / 8] |= 1 << (block % 8);
        }

        let mut image = Self { bytes, sb };
        image.write_inode(InodeNumber(ROOT_INO), &Inode::new_directory(opts.root_mode))?;
        info!(
            target: "ospfs::image",
            nblocks = opts.nblocks,
            ninodes = opts.ninodes,
            "image formatted"
        );
        Ok(image)
    }

    #[must_use]
    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    // ── Block views ─────────────────────────────────────────────────────────

    fn block_range(&self, block: BlockNumber) -> Result<std::ops::Range<usize>> {
        if block.0 >= self.sb.nblocks {
            return Err(FsError::Corruption(format!(
                "block {block} out of range (image has {} blocks)",
                self.sb.nblocks
            )));
        }
        let start = block.byte_offset();
        Ok(start..start + BLKSIZE)
    }

    /// Borrow one block's contents.
    pub fn block(&self, block: BlockNumber) -> Result<&[u8]> {
        let range = self.block_range(block)?;
        Ok(&self.bytes[range])
    }

    /// Borrow one block's contents mutably.
    pub fn block_mut(&mut self, block: BlockNumber) -> Result<&mut [u8]> {
        let range = self.block_range(block)?;
        Ok(&mut self.bytes[range])
    }

    /// Zero-fill a block.
    pub fn zero_block(&mut self, block: BlockNumber) -> Result<()> {
        self.block_mut(block)?.fill(0);
        Ok(())
    }

    /// Read slot `slot` of an indirect block.
    pub fn block_ptr(&self, block: BlockNumber, slot: usize) -> Result<BlockNumber> {
        debug_assert!(slot < NINDIRECT);
        let data = self.block(block)?;
        let raw = read_le_u32(data, slot * 4).map_err(FsError::from)?;
        Ok(BlockNumber(raw))
    }

    /// Write slot `slot` of an indirect block.
    pub fn set_block_ptr(&mut self, block: BlockNumber, slot: usize, value: BlockNumber) -> Result<()> {
        debug_assert!(slot < NINDIRECT);
        let data = self.block_mut(block)?;
        write_le_u32(data, slot * 4, value.0);
        Ok(())
    }

    // ── Inode table ─────────────────────────────────────────────────────────

    fn inode_offset(&self, ino: InodeNumber) -> Result<usize> {
        if ino.0 >= self.sb.ninodes {
            return Err(FsError::Corruption(format!(
                "inode {ino} out of range (image has {} inodes)",
                self.sb.ninodes
            )));
        }
        let base = self.sb.first_inode_block as usize * BLKSIZE;
        Ok(base + ino.0 as usize * INODE_SIZE)
    }

    /// Read and parse an inode record.
    pub fn read_inode(&self, ino: InodeNumber) -> Result<Inode> {
        let off = self.inode_offset(ino)?;
        Inode::parse_from_bytes(&self.bytes[off..off + INODE_SIZE]).map_err(FsError::from)
    }

    /// Serialize an inode record back into the table.
    pub fn write_inode(&mut self, ino: InodeNumber, inode: &Inode) -> Result<()> {
        let off = self.inode_offset(ino)?;
        self.bytes[off..off + INODE_SIZE].copy_from_slice(&inode.to_bytes());
        Ok(())
    }

    #[must_use]
    pub fn ninodes(&self) -> u32 {
        self.sb.ninodes
    }

    #[must_use]
    pub fn nblocks(&self) -> u32 {
        self.sb.nblocks
    }

    #[must_use]
    pub fn first_data_block(&self) -> u32 {
        self.sb.first_data_block()
    }

    // ── Free bitmap ─────────────────────────────────────────────────────────

    /// The contiguous free-bitmap region (blocks 2..`first_inode_block`).
    #[must_use]
    pub fn freemap(&self) -> &[u8] {
        &self.bytes
            [FREEMAP_BLOCK as usize * BLKSIZE..self.sb.first_inode_block as usize * BLKSIZE]
    }

    #[must_use]
    pub fn freemap_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
            [FREEMAP_BLOCK as usize * BLKSIZE..self.sb.first_inode_block as usize * BLKSIZE]
    }
}
