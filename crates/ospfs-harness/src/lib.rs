#![forbid(unsafe_code)]
//! Scenario helpers for exercising OSPFS end to end.

use ospfs::{Filesystem, FormatOptions, FsError, InodeNumber, Result};
use ospfs_types::BLKSIZE;

/// A filesystem roomy enough for the indirect-range scenarios.
pub fn medium_fs() -> Filesystem {
    Filesystem::format(&FormatOptions {
        nblocks: 1024,
        ninodes: 64,
        root_mode: 0o755,
    })
    .expect("format medium image")
}

/// A deliberately cramped filesystem for exhaustion scenarios.
pub fn tiny_fs(nblocks: u32) -> Filesystem {
    Filesystem::format(&FormatOptions {
        nblocks,
        ninodes: 16,
        root_mode: 0o755,
    })
    .expect("format tiny image")
}

/// Create a file in the root and fill it with `len` bytes of a repeating
/// pattern. Returns the inode and the written bytes.
pub fn create_patterned_file(
    fs: &mut Filesystem,
    name: &[u8],
    len: usize,
) -> Result<(InodeNumber, Vec<u8>)> {
    let ino = fs.create(InodeNumber::ROOT, name, 0o644)?;
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    fs.write(ino, 0, &data, false)?;
    Ok((ino, data))
}

/// Burn free blocks with ballast files until exactly `leave` remain.
///
/// Grows one block at a time; when a growth step would need more blocks
/// than are left (crossing into the indirect range costs two), it starts a
/// fresh ballast file whose direct blocks cost one each, so any headroom
/// down to zero is reachable.
pub fn fill_disk_leaving(fs: &mut Filesystem, leave: u32) -> Result<Vec<InodeNumber>> {
    let mut ballast = Vec::new();
    'refill: while fs.free_block_count() > leave {
        let name = format!(".ballast{}", ballast.len());
        let ino = fs.create(InodeNumber::ROOT, name.as_bytes(), 0o600)?;
        ballast.push(ino);
        while fs.free_block_count() > leave {
            let next = fs.stat(ino)?.size + BLKSIZE as u32;
            match fs.truncate(ino, next) {
                Ok(()) => {}
                Err(FsError::NoSpace) => continue 'refill,
                Err(e) => return Err(e),
            }
        }
    }
    Ok(ballast)
}
