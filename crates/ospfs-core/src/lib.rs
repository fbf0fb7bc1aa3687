#![forbid(unsafe_code)]
//! The OSPFS data engine.
//!
//! A `Filesystem` wraps an in-memory image and exposes the operation
//! surface a VFS or FUSE host adapter needs: lookup, readdir, create,
//! link, unlink, symlink, follow_symlink, read, write, truncate, stat.
//!
//! There is no hidden global state: every `Filesystem` is a value over its
//! own image, so tests instantiate as many as they need and snapshotting
//! is a clone of the byte region. The engine never spawns threads and
//! never locks; mutating operations take `&mut self`, which makes the
//! host's serialization obligation a compile-time fact.

mod check;
mod dir;
mod file;
mod index;
mod namespace;
mod size;
mod symlink;

use serde::{Deserialize, Serialize};
use tracing::info;

pub use ospfs_error::{FsError, Result};
pub use ospfs_image::{FormatOptions, Image};
pub use ospfs_ondisk::{DirEntryRecord, Inode, InodeBody, Superblock};
pub use ospfs_types::{BlockNumber, FileType, InodeNumber};

/// How namespace operations maintain a parent directory's hard-link count.
///
/// The original kernel module bumped the parent on `symlink` but not on
/// `create` or `link`, and dropped it on every `unlink`. `Preserved` keeps
/// the symlink bump while leaving `unlink` alone; `Legacy` replays the
/// original pair of quirks exactly, for images that must not drift from
/// the module's output; `Symmetric` never touches the parent's count and
/// is the recommended choice for fresh images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkAccounting {
    #[default]
    Preserved,
    Symmetric,
    Legacy,
}

/// Mount-time configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountOptions {
    pub link_accounting: LinkAccounting,
}

/// What `stat` reports for one inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub size: u32,
    pub ftype: FileType,
    pub nlink: u32,
    pub mode: u32,
}

/// One entry produced by `readdir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaddirEntry {
    pub name: Vec<u8>,
    /// The cursor value this entry was emitted at.
    pub cursor: u64,
    pub ino: InodeNumber,
    pub kind: FileType,
}

impl ReaddirEntry {
    /// Return the name as a UTF-8 string (lossy).
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// A batch of directory entries plus the cursor to resume from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaddirPage {
    pub entries: Vec<ReaddirEntry>,
    pub next_cursor: u64,
    pub done: bool,
}

/// An OSPFS instance over one in-memory image.
#[derive(Debug, Clone)]
pub struct Filesystem {
    image: Image,
    options: MountOptions,
}

impl Filesystem {
    /// Build a fresh filesystem with default mount options.
    pub fn format(opts: &FormatOptions) -> Result<Self> {
        Ok(Self {
            image: Image::format(opts)?,
            options: MountOptions::default(),
        })
    }

    /// Mount an existing image with default options.
    pub fn mount(bytes: Vec<u8>) -> Result<Self> {
        Self::mount_with(bytes, MountOptions::default())
    }

    /// Mount an existing image.
    ///
    /// Validates the superblock and requires the root inode to be a live
    /// directory.
    pub fn mount_with(bytes: Vec<u8>, options: MountOptions) -> Result<Self> {
        let image = Image::load(bytes)?;
        let root = image.read_inode(InodeNumber::ROOT)?;
        if root.file_type() != FileType::Directory || root.is_free() {
            return Err(FsError::Format(
                "root inode is not a live directory".into(),
            ));
        }
        info!(
            target: "ospfs::mount",
            nblocks = image.nblocks(),
            ninodes = image.ninodes(),
            "mounted"
        );
        Ok(Self { image, options })
    }

    #[must_use]
    pub fn options(&self) -> MountOptions {
        self.options
    }

    #[must_use]
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Surrender the image, e.g. to snapshot or persist it.
    #[must_use]
    pub fn into_image(self) -> Image {
        self.image
    }

    // ── Namespace ───────────────────────────────────────────────────────────

    /// Find `name` in directory `dir`.
    pub fn lookup(&self, dir: InodeNumber, name: &[u8]) -> Result<Option<InodeNumber>> {
        namespace::lookup(&self.image, dir, name)
    }

    /// Create a regular file. Returns the new inode number.
    pub fn create(&mut self, dir: InodeNumber, name: &[u8], mode: u32) -> Result<InodeNumber> {
        namespace::create(&mut self.image, dir, name, mode)
    }

    /// Add a hard link to `src` under `dir`. Returns `src`.
    pub fn link(&mut self, src: InodeNumber, dir: InodeNumber, name: &[u8]) -> Result<InodeNumber> {
        namespace::link(&mut self.image, src, dir, name)
    }

    /// Remove the entry `name` from `dir`.
    pub fn unlink(&mut self, dir: InodeNumber, name: &[u8]) -> Result<()> {
        namespace::unlink(&mut self.image, self.options.link_accounting, dir, name)
    }

    /// Create a symlink pointing at `target`. Returns the new inode number.
    pub fn symlink(
        &mut self,
        dir: InodeNumber,
        name: &[u8],
        target: &[u8],
    ) -> Result<InodeNumber> {
        namespace::symlink(
            &mut self.image,
            self.options.link_accounting,
            dir,
            name,
            target,
        )
    }

    /// Resolve a symlink for the calling user.
    pub fn follow_symlink(&self, ino: InodeNumber, uid: u32) -> Result<Vec<u8>> {
        namespace::follow_symlink(&self.image, ino, uid)
    }

    // ── Directory iteration ─────────────────────────────────────────────────

    /// Read directory entries starting at `cursor`.
    ///
    /// Cursor 0 emits `"."`, cursor 1 emits `".."` with `parent` (the host
    /// adapter owns the dentry tree and knows the parent), and `k >= 2`
    /// addresses stored entry `k - 2`.
    pub fn readdir(
        &self,
        dir: InodeNumber,
        parent: InodeNumber,
        cursor: u64,
    ) -> Result<ReaddirPage> {
        let mut entries = Vec::new();
        let (next_cursor, done) = dir::iterate(&self.image, dir, parent, cursor, |entry| {
            entries.push(entry);
            true
        })?;
        Ok(ReaddirPage {
            entries,
            next_cursor,
            done,
        })
    }

    /// Like `readdir`, but feeds entries to `emit` until it declines, the
    /// way a VFS `filldir` callback consumes them.
    pub fn readdir_with(
        &self,
        dir: InodeNumber,
        parent: InodeNumber,
        cursor: u64,
        emit: impl FnMut(ReaddirEntry) -> bool,
    ) -> Result<(u64, bool)> {
        dir::iterate(&self.image, dir, parent, cursor, emit)
    }

    // ── File I/O ────────────────────────────────────────────────────────────

    /// Read up to `count` bytes at `pos`. Returns the bytes and the new
    /// position.
    pub fn read(&self, ino: InodeNumber, pos: u32, count: usize) -> Result<(Vec<u8>, u32)> {
        let bytes = file::read(&self.image, ino, pos, count)?;
        let new_pos = pos + bytes.len() as u32;
        Ok((bytes, new_pos))
    }

    /// Write `buf` at `pos`, or at end of file when `append` is set.
    /// Returns the new position.
    pub fn write(&mut self, ino: InodeNumber, pos: u32, buf: &[u8], append: bool) -> Result<u32> {
        file::write(&mut self.image, ino, pos, buf, append)
    }

    /// Resize a regular file to exactly `new_size` bytes.
    ///
    /// Directories can only grow through entry creation and symlinks carry
    /// no block tree, so both are refused.
    pub fn truncate(&mut self, ino: InodeNumber, new_size: u32) -> Result<()> {
        let inode = self.image.read_inode(ino)?;
        if inode.file_type() != FileType::Regular {
            return Err(FsError::PermissionDenied);
        }
        size::change_size(&mut self.image, ino, new_size)
    }

    /// Report an inode's metadata.
    pub fn stat(&self, ino: InodeNumber) -> Result<Stat> {
        let inode = self.image.read_inode(ino)?;
        Ok(Stat {
            size: inode.size,
            ftype: inode.file_type(),
            nlink: inode.nlink,
            mode: inode.mode(),
        })
    }

    // ── Observability ───────────────────────────────────────────────────────

    /// Number of free data blocks.
    #[must_use]
    pub fn free_block_count(&self) -> u32 {
        ospfs_alloc::free_block_count(&self.image)
    }

    /// Verify the structural invariants of the whole image: block
    /// references against the bitmap, index shapes against file sizes,
    /// directory alignment, and entry liveness.
    pub fn verify_invariants(&self) -> Result<()> {
        check::verify(&self.image)
    }
}
