//! Namespace operations: create, hard link, unlink, symlink, lookup.
//!
//! Every operation that adds an entry hands the new inode number back so
//! the host adapter can materialize its handle. Directory link accounting
//! follows the mount options; see `LinkAccounting`.

use crate::dir::{create_blank_entry, find_entry, write_entry_at};
use crate::size::change_size;
use crate::symlink::{encode_target, resolve_target};
use crate::LinkAccounting;
use ospfs_error::{FsError, Result};
use ospfs_image::Image;
use ospfs_ondisk::{DirEntryRecord, Inode, InodeBody};
use ospfs_types::{FileType, InodeNumber, MAXNAMELEN};
use tracing::debug;

fn validate_name(name: &[u8]) -> Result<()> {
    if name.len() > MAXNAMELEN {
        return Err(FsError::NameTooLong);
    }
    Ok(())
}

fn ensure_absent(image: &Image, dir: InodeNumber, name: &[u8]) -> Result<()> {
    if find_entry(image, dir, name)?.is_some() {
        return Err(FsError::Exists);
    }
    Ok(())
}

/// Lowest free inode number, skipping the reserved inode 0 and the root.
///
/// A free inode is one whose hard-link count is zero.
pub(crate) fn find_free_inode(image: &Image) -> Result<Option<InodeNumber>> {
    for raw in 2..image.ninodes() {
        let ino = InodeNumber(raw);
        if image.read_inode(ino)?.is_free() {
            return Ok(Some(ino));
        }
    }
    Ok(None)
}

fn bump_nlink(inode: &mut Inode, delta: i32) -> Result<()> {
    let next = if delta >= 0 {
        inode.nlink.checked_add(delta as u32)
    } else {
        inode.nlink.checked_sub(delta.unsigned_abs())
    };
    inode.nlink = next.ok_or_else(|| {
        FsError::Corruption(format!(
            "hard-link count {} cannot be adjusted by {delta}",
            inode.nlink
        ))
    })?;
    Ok(())
}

/// Look up `name` in `dir`.
pub(crate) fn lookup(image: &Image, dir: InodeNumber, name: &[u8]) -> Result<Option<InodeNumber>> {
    validate_name(name)?;
    Ok(find_entry(image, dir, name)?.map(|(_, entry)| entry.ino))
}

/// Create a regular file named `name` in `dir` with permission bits `mode`.
pub(crate) fn create(
    image: &mut Image,
    dir: InodeNumber,
    name: &[u8],
    mode: u32,
) -> Result<InodeNumber> {
    validate_name(name)?;
    ensure_absent(image, dir, name)?;

    let ino = find_free_inode(image)?.ok_or(FsError::NoSpace)?;
    let slot = create_blank_entry(image, dir)?;
    image.write_inode(ino, &Inode::new_regular(mode))?;
    write_entry_at(image, dir, slot, &DirEntryRecord::new(ino, name))?;

    debug!(target: "ospfs::namespace", dir = dir.0, ino = ino.0, "created file");
    Ok(ino)
}

/// Add a hard link to `src` named `name` in `dir`.
///
/// Only regular files can be hard-linked; linking a directory or symlink is
/// refused the way POSIX `link(2)` refuses directories.
pub(crate) fn link(
    image: &mut Image,
    src: InodeNumber,
    dir: InodeNumber,
    name: &[u8],
) -> Result<InodeNumber> {
    let mut src_inode = image.read_inode(src)?;
    if src_inode.file_type() != FileType::Regular {
        return Err(FsError::PermissionDenied);
    }
    bump_nlink(&mut src_inode, 1)?;

    validate_name(name)?;
    ensure_absent(image, dir, name)?;

    let slot = create_blank_entry(image, dir)?;
    write_entry_at(image, dir, slot, &DirEntryRecord::new(src, name))?;
    image.write_inode(src, &src_inode)?;

    debug!(target: "ospfs::namespace", dir = dir.0, ino = src.0, "hard link added");
    Ok(src)
}

/// Remove the entry named `name` from `dir`, releasing the inode's data
/// once its last link is gone. Symlink inodes own no blocks, so they only
/// lose their link count.
pub(crate) fn unlink(
    image: &mut Image,
    accounting: LinkAccounting,
    dir: InodeNumber,
    name: &[u8],
) -> Result<()> {
    let Some((slot, entry)) = find_entry(image, dir, name)? else {
        return Err(FsError::NotFound(String::from_utf8_lossy(name).into_owned()));
    };

    write_entry_at(image, dir, slot, &DirEntryRecord::empty())?;

    let mut inode = image.read_inode(entry.ino)?;
    bump_nlink(&mut inode, -1)?;
    image.write_inode(entry.ino, &inode)?;

    if accounting == LinkAccounting::Legacy {
        // The original module dropped the parent's count on every unlink.
        // Saturate rather than wrap when an image arrives at zero.
        let mut dir_inode = image.read_inode(dir)?;
        dir_inode.nlink = dir_inode.nlink.saturating_sub(1);
        image.write_inode(dir, &dir_inode)?;
    }

    if inode.nlink == 0 && inode.file_type() != FileType::Symlink {
        change_size(image, entry.ino, 0)?;
    }

    debug!(target: "ospfs::namespace", dir = dir.0, ino = entry.ino.0, "unlinked");
    Ok(())
}

/// Create a symlink named `name` in `dir` pointing at `target`.
pub(crate) fn symlink(
    image: &mut Image,
    accounting: LinkAccounting,
    dir: InodeNumber,
    name: &[u8],
    target: &[u8],
) -> Result<InodeNumber> {
    validate_name(name)?;
    ensure_absent(image, dir, name)?;

    let stored = encode_target(target)?;
    let ino = find_free_inode(image)?.ok_or(FsError::NoSpace)?;
    let slot = create_blank_entry(image, dir)?;
    image.write_inode(ino, &Inode::new_symlink(stored))?;
    write_entry_at(image, dir, slot, &DirEntryRecord::new(ino, name))?;

    if accounting != LinkAccounting::Symmetric {
        let mut dir_inode = image.read_inode(dir)?;
        bump_nlink(&mut dir_inode, 1)?;
        image.write_inode(dir, &dir_inode)?;
    }

    debug!(target: "ospfs::namespace", dir = dir.0, ino = ino.0, "symlink created");
    Ok(ino)
}

/// Resolve a symlink's target for the calling user.
pub(crate) fn follow_symlink(image: &Image, ino: InodeNumber, uid: u32) -> Result<Vec<u8>> {
    let inode = image.read_inode(ino)?;
    match &inode.body {
        InodeBody::Symlink { target } => resolve_target(target, uid),
        _ => Err(FsError::Format(format!(
            "inode {ino} is not a symbolic link"
        ))),
    }
}
