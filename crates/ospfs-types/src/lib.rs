#![forbid(unsafe_code)]
//! Shared types for OSPFS.
//!
//! Layout constants of the reference image, `BlockNumber`/`InodeNumber`
//! newtypes, the closed `FileType` variant, and little-endian field codecs
//! used by the on-disk record parsers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ── Image layout constants ──────────────────────────────────────────────────

/// Bytes per block.
pub const BLKSIZE: usize = 1024;
/// log2 of the block size.
pub const BLKSIZE_BITS: u32 = 10;
/// Superblock magic number.
pub const MAGIC: u32 = 0x1310_1138;

/// Bytes per inode record.
pub const INODE_SIZE: usize = 64;
/// Inode records per inode-table block.
pub const INODES_PER_BLOCK: usize = BLKSIZE / INODE_SIZE;
/// First block of the free bitmap (block 0 is boot, block 1 the superblock).
pub const FREEMAP_BLOCK: u32 = 2;
/// Bits per bitmap block.
pub const BLOCK_BITS: usize = BLKSIZE * 8;

/// Direct block pointers per inode.
pub const NDIRECT: usize = 10;
/// Block pointers per indirect block.
pub const NINDIRECT: usize = BLKSIZE / 4;
/// Largest number of data blocks a single file can reference.
pub const MAX_FILE_BLOCKS: u32 = (NDIRECT + NINDIRECT + NINDIRECT * NINDIRECT) as u32;
/// Largest file size in bytes.
pub const MAX_FILE_SIZE: u64 = MAX_FILE_BLOCKS as u64 * BLKSIZE as u64;

/// Bytes per directory entry (inode number + NUL-terminated name).
pub const DIRENTRY_SIZE: usize = 128;
/// Longest directory entry name.
pub const MAXNAMELEN: usize = DIRENTRY_SIZE - 4 - 1;
/// Longest plain symlink target storable inline in a symlink inode.
pub const MAXSYMLINKLEN: usize = INODE_SIZE - 3 * 4 - 1;

/// Inode number of the root directory. Inode 0 is reserved.
pub const ROOT_INO: u32 = 1;

// Directory entries must never straddle a block boundary.
const _: () = assert!(BLKSIZE % DIRENTRY_SIZE == 0);
const _: () = assert!(BLKSIZE % INODE_SIZE == 0);

// ── Newtypes ────────────────────────────────────────────────────────────────

/// Block number within the image. `BlockNumber(0)` is the "no block" sentinel
/// in every block-reference field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u32);

impl BlockNumber {
    /// The "not present" sentinel.
    pub const NONE: Self = Self(0);

    #[must_use]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Byte offset of this block within the image.
    #[must_use]
    pub fn byte_offset(self) -> usize {
        self.0 as usize * BLKSIZE
    }
}

/// Inode number. Inode 0 is reserved; inode 1 is the root directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u32);

impl InodeNumber {
    pub const ROOT: Self = Self(ROOT_INO);
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── File types ──────────────────────────────────────────────────────────────

/// The three kinds of filesystem object, as stored in the inode `ftype` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum FileType {
    Regular = 0,
    Directory = 1,
    Symlink = 2,
}

impl FileType {
    /// Decode a raw `ftype` word; unknown values are a layout breach.
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Regular),
            1 => Some(Self::Directory),
            2 => Some(Self::Symlink),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Regular => "regular",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
        };
        f.write_str(s)
    }
}

// ── Parse errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u32, actual: u32 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

// ── Field codecs ────────────────────────────────────────────────────────────

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn write_le_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Length of a NUL-terminated name field (the whole field if no NUL).
#[must_use]
pub fn nul_terminated_len(bytes: &[u8]) -> usize {
    bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len())
}

// ── Block arithmetic ────────────────────────────────────────────────────────

/// Number of whole blocks required to hold `size` bytes.
#[must_use]
pub fn size_to_blocks(size: u32) -> u32 {
    size.div_ceil(BLKSIZE as u32)
}
