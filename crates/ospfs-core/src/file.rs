//! Byte-level file I/O over the block index.
//!
//! Reads clamp to end of file; writes past the end extend the file first
//! through the size engine, so a failed extension leaves the file exactly
//! as it was.

use crate::index::block_for_offset;
use crate::size::change_size;
use ospfs_error::{FsError, Result};
use ospfs_image::Image;
use ospfs_ondisk::Inode;
use ospfs_types::{FileType, InodeNumber, BLKSIZE};
use tracing::trace;

fn load_regular(image: &Image, ino: InodeNumber) -> Result<Inode> {
    let inode = image.read_inode(ino)?;
    match inode.file_type() {
        FileType::Regular => Ok(inode),
        FileType::Directory => Err(FsError::IsDirectory),
        FileType::Symlink => Err(FsError::Format(format!(
            "inode {ino} is a symbolic link, not a regular file"
        ))),
    }
}

fn end_position(pos: u32, count: usize) -> Result<u32> {
    u32::try_from(count)
        .ok()
        .and_then(|c| pos.checked_add(c))
        .ok_or_else(|| FsError::Corruption(format!("file position {pos} + {count} overflows")))
}

/// Read up to `count` bytes starting at `pos`.
///
/// Returns the bytes actually read; empty at or past end of file. The block
/// index returning its sentinel inside the valid range means the image is
/// corrupt.
pub(crate) fn read(image: &Image, ino: InodeNumber, pos: u32, count: usize) -> Result<Vec<u8>> {
    let inode = load_regular(image, ino)?;
    end_position(pos, count)?;

    if pos >= inode.size {
        return Ok(Vec::new());
    }
    let count = count.min((inode.size - pos) as usize);
    let mut out = Vec::with_capacity(count);
    let mut pos = pos;

    while out.len() < count {
        let block = block_for_offset(image, &inode, pos)?;
        if block.is_none() {
            return Err(FsError::Corruption(format!(
                "no block backs byte {pos} of inode {ino}"
            )));
        }
        let within = pos as usize % BLKSIZE;
        let n = (BLKSIZE - within).min(count - out.len());
        let data = image.block(block)?;
        out.extend_from_slice(&data[within..within + n]);
        pos += n as u32;
    }

    Ok(out)
}

/// Write `buf` at `pos` (or at end of file when `append` is set), extending
/// the file as needed. Returns the position after the last byte written.
pub(crate) fn write(
    image: &mut Image,
    ino: InodeNumber,
    pos: u32,
    buf: &[u8],
    append: bool,
) -> Result<u32> {
    let inode = load_regular(image, ino)?;
    let mut pos = if append { inode.size } else { pos };
    let end = end_position(pos, buf.len())?;

    if end > inode.size {
        change_size(image, ino, end)?;
    }
    let inode = image.read_inode(ino)?;

    let mut written = 0_usize;
    while written < buf.len() {
        let block = block_for_offset(image, &inode, pos)?;
        if block.is_none() {
            return Err(FsError::Corruption(format!(
                "no block backs byte {pos} of inode {ino}"
            )));
        }
        let within = pos as usize % BLKSIZE;
        let n = (BLKSIZE - within).min(buf.len() - written);
        let data = image.block_mut(block)?;
        data[within..within + n].copy_from_slice(&buf[written..written + n]);
        written += n;
        pos += n as u32;
    }

    trace!(target: "ospfs::file", ino = ino.0, pos = pos, bytes = buf.len(), "wrote");
    Ok(pos)
}
