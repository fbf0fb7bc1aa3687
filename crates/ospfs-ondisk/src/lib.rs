#![forbid(unsafe_code)]
//! On-disk record layouts of the OSPFS image.
//!
//! Superblock, inode records (file/directory/symlink shapes), and directory
//! entries. Parsing and serialization are byte-for-byte compatible with the
//! reference image so that pre-built images load unchanged.

use ospfs_types::{
    ensure_slice, nul_terminated_len, read_le_u32, write_le_u32, BlockNumber, FileType,
    InodeNumber, ParseError, BLKSIZE, DIRENTRY_SIZE, FREEMAP_BLOCK, INODES_PER_BLOCK, INODE_SIZE,
    MAGIC, MAXNAMELEN, MAXSYMLINKLEN, NDIRECT,
};
use serde::{Deserialize, Serialize};

// ── Superblock ──────────────────────────────────────────────────────────────

/// The superblock, stored in block 1. Read-only after image construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub magic: u32,
    /// Total number of blocks in the image.
    pub nblocks: u32,
    /// Total number of inode records.
    pub ninodes: u32,
    /// First block of the inode table.
    pub first_inode_block: u32,
}

impl Superblock {
    /// Parse a superblock from its 1024-byte block.
    pub fn parse_from_block(block: &[u8]) -> Result<Self, ParseError> {
        let magic = read_le_u32(block, 0x00)?;
        if magic != MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: MAGIC,
                actual: magic,
            });
        }

        let sb = Self {
            magic,
            nblocks: read_le_u32(block, 0x04)?,
            ninodes: read_le_u32(block, 0x08)?,
            first_inode_block: read_le_u32(block, 0x0C)?,
        };
        sb.validate_geometry()?;
        Ok(sb)
    }

    /// Parse the superblock out of a whole image.
    pub fn parse_from_image(image: &[u8]) -> Result<Self, ParseError> {
        let block = ensure_slice(image, BLKSIZE, BLKSIZE)?;
        Self::parse_from_block(block)
    }

    /// Serialize into the first 16 bytes of `block`.
    pub fn write_to_block(&self, block: &mut [u8]) {
        write_le_u32(block, 0x00, self.magic);
        write_le_u32(block, 0x04, self.nblocks);
        write_le_u32(block, 0x08, self.ninodes);
        write_le_u32(block, 0x0C, self.first_inode_block);
    }

    /// Number of free-bitmap blocks (blocks 2..`first_inode_block`).
    #[must_use]
    pub fn bitmap_blocks(&self) -> u32 {
        self.first_inode_block.saturating_sub(FREEMAP_BLOCK)
    }

    /// Number of inode-table blocks.
    #[must_use]
    pub fn inode_blocks(&self) -> u32 {
        self.ninodes.div_ceil(INODES_PER_BLOCK as u32)
    }

    /// First data block; everything from here to `nblocks` belongs to the
    /// allocator.
    #[must_use]
    pub fn first_data_block(&self) -> u32 {
        self.first_inode_block + self.inode_blocks()
    }

    /// Whether `block` lies in the allocator's domain.
    #[must_use]
    pub fn is_data_block(&self, block: BlockNumber) -> bool {
        block.0 >= self.first_data_block() && block.0 < self.nblocks
    }

    fn validate_geometry(&self) -> Result<(), ParseError> {
        if self.first_inode_block <= FREEMAP_BLOCK {
            return Err(ParseError::InvalidField {
                field: "first_inode_block",
                reason: "inode table overlaps boot/super/bitmap blocks",
            });
        }
        if self.ninodes < 2 {
            return Err(ParseError::InvalidField {
                field: "ninodes",
                reason: "need at least the reserved and root inodes",
            });
        }
        // The bitmap must cover every block.
        let covered = u64::from(self.bitmap_blocks()) * (BLKSIZE as u64 * 8);
        if u64::from(self.nblocks) > covered {
            return Err(ParseError::InvalidField {
                field: "nblocks",
                reason: "free bitmap too small for block count",
            });
        }
        if self.first_data_block() >= self.nblocks {
            return Err(ParseError::InvalidField {
                field: "nblocks",
                reason: "no data blocks after metadata",
            });
        }
        Ok(())
    }
}

// ── Inodes ──────────────────────────────────────────────────────────────────

/// Block references of a file or directory inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPtrs {
    pub direct: [u32; NDIRECT],
    pub indirect: u32,
    pub indirect2: u32,
}

impl BlockPtrs {
    pub const EMPTY: Self = Self {
        direct: [0; NDIRECT],
        indirect: 0,
        indirect2: 0,
    };
}

/// Type-specific payload of an inode record.
///
/// Symlinks store their target inline and never carry a block tree, so
/// growth operations refuse them by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InodeBody {
    Regular { mode: u32, ptrs: BlockPtrs },
    Directory { mode: u32, ptrs: BlockPtrs },
    Symlink { target: Vec<u8> },
}

/// A parsed 64-byte inode record.
///
/// `size` counts content bytes for files and directories and target bytes
/// for symlinks. A free inode is one whose `nlink` is zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    pub size: u32,
    pub nlink: u32,
    pub body: InodeBody,
}

/// Mode word `stat` reports for symlinks, which store no mode of their own.
pub const SYMLINK_MODE: u32 = 0o777;

impl Inode {
    /// A blank regular file, as `create` initializes it.
    #[must_use]
    pub fn new_regular(mode: u32) -> Self {
        Self {
            size: 0,
            nlink: 1,
            body: InodeBody::Regular {
                mode,
                ptrs: BlockPtrs::EMPTY,
            },
        }
    }

    /// An empty directory.
    #[must_use]
    pub fn new_directory(mode: u32) -> Self {
        Self {
            size: 0,
            nlink: 1,
            body: InodeBody::Directory {
                mode,
                ptrs: BlockPtrs::EMPTY,
            },
        }
    }

    /// A symlink holding already-encoded `target` bytes.
    ///
    /// `size` equals the stored target length.
    #[must_use]
    pub fn new_symlink(target: Vec<u8>) -> Self {
        debug_assert!(target.len() <= MAXSYMLINKLEN);
        Self {
            size: target.len() as u32,
            nlink: 1,
            body: InodeBody::Symlink { target },
        }
    }

    #[must_use]
    pub fn file_type(&self) -> FileType {
        match self.body {
            InodeBody::Regular { .. } => FileType::Regular,
            InodeBody::Directory { .. } => FileType::Directory,
            InodeBody::Symlink { .. } => FileType::Symlink,
        }
    }

    #[must_use]
    pub fn mode(&self) -> u32 {
        match self.body {
            InodeBody::Regular { mode, .. } | InodeBody::Directory { mode, .. } => mode,
            InodeBody::Symlink { .. } => SYMLINK_MODE,
        }
    }

    #[must_use]
    pub fn is_free(&self) -> bool {
        self.nlink == 0
    }

    /// Block references, for files and directories only.
    #[must_use]
    pub fn ptrs(&self) -> Option<&BlockPtrs> {
        match &self.body {
            InodeBody::Regular { ptrs, .. } | InodeBody::Directory { ptrs, .. } => Some(ptrs),
            InodeBody::Symlink { .. } => None,
        }
    }

    #[must_use]
    pub fn ptrs_mut(&mut self) -> Option<&mut BlockPtrs> {
        match &mut self.body {
            InodeBody::Regular { ptrs, .. } | InodeBody::Directory { ptrs, .. } => Some(ptrs),
            InodeBody::Symlink { .. } => None,
        }
    }

    /// Parse a 64-byte inode record.
    pub fn parse_from_bytes(raw: &[u8]) -> Result<Self, ParseError> {
        if raw.len() < INODE_SIZE {
            return Err(ParseError::InsufficientData {
                needed: INODE_SIZE,
                offset: 0,
                actual: raw.len(),
            });
        }

        let size = read_le_u32(raw, 0x00)?;
        let ftype_raw = read_le_u32(raw, 0x04)?;
        let nlink = read_le_u32(raw, 0x08)?;

        let ftype = FileType::from_raw(ftype_raw).ok_or(ParseError::InvalidField {
            field: "ftype",
            reason: "unknown file type",
        })?;

        let body = match ftype {
            FileType::Regular | FileType::Directory => {
                let mode = read_le_u32(raw, 0x0C)?;
                let mut direct = [0_u32; NDIRECT];
                for (i, slot) in direct.iter_mut().enumerate() {
                    *slot = read_le_u32(raw, 0x10 + i * 4)?;
                }
                let ptrs = BlockPtrs {
                    direct,
                    indirect: read_le_u32(raw, 0x38)?,
                    indirect2: read_le_u32(raw, 0x3C)?,
                };
                if ftype == FileType::Regular {
                    InodeBody::Regular { mode, ptrs }
                } else {
                    InodeBody::Directory { mode, ptrs }
                }
            }
            FileType::Symlink => {
                if size as usize > MAXSYMLINKLEN {
                    return Err(ParseError::InvalidField {
                        field: "size",
                        reason: "symlink target longer than the inline area",
                    });
                }
                let target = raw[0x0C..0x0C + size as usize].to_vec();
                InodeBody::Symlink { target }
            }
        };

        Ok(Self { size, nlink, body })
    }

    /// Serialize into a 64-byte record.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; INODE_SIZE] {
        let mut raw = [0_u8; INODE_SIZE];
        write_le_u32(&mut raw, 0x00, self.size);
        write_le_u32(&mut raw, 0x04, self.file_type().as_raw());
        write_le_u32(&mut raw, 0x08, self.nlink);

        match &self.body {
            InodeBody::Regular { mode, ptrs } | InodeBody::Directory { mode, ptrs } => {
                write_le_u32(&mut raw, 0x0C, *mode);
                for (i, slot) in ptrs.direct.iter().enumerate() {
                    write_le_u32(&mut raw, 0x10 + i * 4, *slot);
                }
                write_le_u32(&mut raw, 0x38, ptrs.indirect);
                write_le_u32(&mut raw, 0x3C, ptrs.indirect2);
            }
            InodeBody::Symlink { target } => {
                raw[0x0C..0x0C + target.len()].copy_from_slice(target);
                // NUL terminator; the rest of the inline area stays zero.
            }
        }

        raw
    }
}

// ── Directory entries ───────────────────────────────────────────────────────

/// A 128-byte directory entry: inode number plus a NUL-terminated name.
///
/// `ino == 0` marks an empty slot; the name bytes of an empty slot are
/// meaningless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntryRecord {
    pub ino: InodeNumber,
    pub name: Vec<u8>,
}

impl DirEntryRecord {
    /// Build an occupied entry. `name` must fit `MAXNAMELEN`.
    #[must_use]
    pub fn new(ino: InodeNumber, name: &[u8]) -> Self {
        debug_assert!(name.len() <= MAXNAMELEN);
        Self {
            ino,
            name: name.to_vec(),
        }
    }

    /// The empty-slot marker.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            ino: InodeNumber(0),
            name: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ino.0 == 0
    }

    /// Parse a 128-byte entry. The stored name length is the position of the
    /// first NUL in the name field.
    pub fn parse_from_bytes(raw: &[u8]) -> Result<Self, ParseError> {
        if raw.len() < DIRENTRY_SIZE {
            return Err(ParseError::InsufficientData {
                needed: DIRENTRY_SIZE,
                offset: 0,
                actual: raw.len(),
            });
        }
        let ino = read_le_u32(raw, 0)?;
        let name_field = &raw[4..DIRENTRY_SIZE];
        let len = nul_terminated_len(&name_field[..=MAXNAMELEN]);
        Ok(Self {
            ino: InodeNumber(ino),
            name: name_field[..len].to_vec(),
        })
    }

    /// Serialize into a 128-byte record.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; DIRENTRY_SIZE] {
        let mut raw = [0_u8; DIRENTRY_SIZE];
        write_le_u32(&mut raw, 0, self.ino.0);
        raw[4..4 + self.name.len()].copy_from_slice(&self.name);
        raw
    }

    /// Return the name as a UTF-8 string (lossy).
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_superblock() -> Superblock {
        Superblock {
            magic: MAGIC,
            nblocks: 1024,
            ninodes: 64,
            first_inode_block: 3,
        }
    }

    #[test]
    fn superblock_round_trip() {
        let sb = sample_superblock();
        let mut block = vec![0_u8; BLKSIZE];
        sb.write_to_block(&mut block);
        let parsed = Superblock::parse_from_block(&block).expect("parse");
        assert_eq!(parsed, sb);
    }

    #[test]
    fn superblock_rejects_bad_magic() {
        let mut block = vec![0_u8; BLKSIZE];
        sample_superblock().write_to_block(&mut block);
        block[0] ^= 0xFF;
        assert!(matches!(
            Superblock::parse_from_block(&block),
            Err(ParseError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn superblock_geometry() {
        let sb = sample_superblock();
        assert_eq!(sb.bitmap_blocks(), 1);
        // 64 inodes at 16 per block.
        assert_eq!(sb.inode_blocks(), 4);
        assert_eq!(sb.first_data_block(), 7);
        assert!(!sb.is_data_block(BlockNumber(6)));
        assert!(sb.is_data_block(BlockNumber(7)));
        assert!(sb.is_data_block(BlockNumber(1023)));
        assert!(!sb.is_data_block(BlockNumber(1024)));
    }

    #[test]
    fn superblock_rejects_undersized_bitmap() {
        let sb = Superblock {
            magic: MAGIC,
            // One bitmap block covers 8192 blocks; ask for more.
            nblocks: 10_000,
            ninodes: 64,
            first_inode_block: 3,
        };
        let mut block = vec![0_u8; BLKSIZE];
        sb.write_to_block(&mut block);
        assert!(Superblock::parse_from_block(&block).is_err());
    }

    #[test]
    fn regular_inode_round_trip() {
        let mut inode = Inode::new_regular(0o644);
        inode.size = 5 * 1024 + 17;
        inode.nlink = 2;
        let ptrs = inode.ptrs_mut().expect("regular has ptrs");
        ptrs.direct[0] = 7;
        ptrs.direct[9] = 42;
        ptrs.indirect = 99;

        let raw = inode.to_bytes();
        let parsed = Inode::parse_from_bytes(&raw).expect("parse");
        assert_eq!(parsed, inode);
        assert_eq!(parsed.file_type(), FileType::Regular);
        assert_eq!(parsed.mode(), 0o644);
    }

    #[test]
    fn directory_inode_round_trip() {
        let mut inode = Inode::new_directory(0o755);
        inode.size = 2 * DIRENTRY_SIZE as u32;
        let raw = inode.to_bytes();
        let parsed = Inode::parse_from_bytes(&raw).expect("parse");
        assert_eq!(parsed.file_type(), FileType::Directory);
        assert_eq!(parsed.size, 256);
    }

    #[test]
    fn symlink_inode_round_trip() {
        let inode = Inode::new_symlink(b"/some/where".to_vec());
        assert_eq!(inode.size, 11);
        assert_eq!(inode.mode(), SYMLINK_MODE);
        assert!(inode.ptrs().is_none());

        let raw = inode.to_bytes();
        // Target is NUL-terminated on disk.
        assert_eq!(&raw[0x0C..0x0C + 12], b"/some/where\0");
        let parsed = Inode::parse_from_bytes(&raw).expect("parse");
        assert_eq!(parsed, inode);
    }

    #[test]
    fn inode_rejects_unknown_ftype() {
        let mut raw = Inode::new_regular(0o644).to_bytes();
        write_le_u32(&mut raw, 0x04, 9);
        assert!(matches!(
            Inode::parse_from_bytes(&raw),
            Err(ParseError::InvalidField { field: "ftype", .. })
        ));
    }

    #[test]
    fn inode_rejects_oversized_symlink() {
        let mut raw = Inode::new_symlink(b"x".to_vec()).to_bytes();
        write_le_u32(&mut raw, 0x00, MAXSYMLINKLEN as u32 + 1);
        assert!(Inode::parse_from_bytes(&raw).is_err());
    }

    #[test]
    fn free_inode_is_all_zero() {
        let parsed = Inode::parse_from_bytes(&[0_u8; INODE_SIZE]).expect("parse");
        assert!(parsed.is_free());
        assert_eq!(parsed.file_type(), FileType::Regular);
        assert_eq!(parsed.size, 0);
    }

    #[test]
    fn direntry_round_trip() {
        let entry = DirEntryRecord::new(InodeNumber(5), b"hello.txt");
        let raw = entry.to_bytes();
        assert_eq!(raw.len(), DIRENTRY_SIZE);
        let parsed = DirEntryRecord::parse_from_bytes(&raw).expect("parse");
        assert_eq!(parsed, entry);
        assert_eq!(parsed.name_str(), "hello.txt");
        assert!(!parsed.is_empty());
    }

    #[test]
    fn direntry_empty_slot() {
        let parsed = DirEntryRecord::parse_from_bytes(&[0_u8; DIRENTRY_SIZE]).expect("parse");
        assert!(parsed.is_empty());
        assert!(parsed.name.is_empty());
    }

    #[test]
    fn direntry_max_name() {
        let name = vec![b'a'; MAXNAMELEN];
        let entry = DirEntryRecord::new(InodeNumber(9), &name);
        let raw = entry.to_bytes();
        // The final byte of the record is the NUL terminator.
        assert_eq!(raw[DIRENTRY_SIZE - 1], 0);
        let parsed = DirEntryRecord::parse_from_bytes(&raw).expect("parse");
        assert_eq!(parsed.name.len(), MAXNAMELEN);
    }
}
