//! The file-size engine.
//!
//! Grows and shrinks files one whole block at a time, maintaining the
//! direct / indirect / doubly-indirect index. `add_block` allocates up to
//! three blocks (data plus any newly required index blocks) and frees every
//! one of them if anything fails, so a failed call leaves the inode and the
//! bitmap exactly as they were. `change_size` builds on that to offer
//! all-or-nothing growth: an out-of-space error mid-way shrinks the file
//! back to its original size before reporting.

use crate::index::BlockPath;
use ospfs_alloc::{allocate_block, free_block};
use ospfs_error::{FsError, Result};
use ospfs_image::Image;
use ospfs_ondisk::BlockPtrs;
use ospfs_types::{size_to_blocks, BlockNumber, InodeNumber, BLKSIZE, MAX_FILE_BLOCKS};
use tracing::{debug, trace};

/// Allocate one zero-filled block, or report `NoSpace`.
fn allocate_zeroed(image: &mut Image) -> Result<BlockNumber> {
    let block = allocate_block(image).ok_or(FsError::NoSpace)?;
    image.zero_block(block)?;
    Ok(block)
}

/// Return every block in `allocated` to the bitmap.
fn unwind(image: &mut Image, allocated: &[BlockNumber]) {
    for &block in allocated {
        free_block(image, block);
    }
}

fn load_ptrs(image: &Image, ino: InodeNumber) -> Result<(ospfs_ondisk::Inode, BlockPtrs)> {
    let inode = image.read_inode(ino)?;
    let Some(ptrs) = inode.ptrs() else {
        return Err(FsError::Corruption(format!(
            "inode {ino} is a symlink; symlinks carry no block tree"
        )));
    };
    let ptrs = *ptrs;
    Ok((inode, ptrs))
}

/// Append exactly one data block to the file.
///
/// On success the file's block count grows by one, `size` is rounded up to
/// the new whole-block extent, and the fresh data block (plus any newly
/// required indirect or doubly-indirect block) is zero-filled and wired
/// into the index. On failure the inode is untouched and every block this
/// call allocated has been returned to the bitmap.
pub(crate) fn add_block(image: &mut Image, ino: InodeNumber) -> Result<()> {
    let (mut inode, mut ptrs) = load_ptrs(image, ino)?;

    let n = size_to_blocks(inode.size);
    if n == MAX_FILE_BLOCKS {
        return Err(FsError::NoSpace);
    }
    let path = BlockPath::of(n).ok_or(FsError::NoSpace)?;

    // Blocks allocated by this call, freed again if anything goes wrong.
    let mut allocated: Vec<BlockNumber> = Vec::with_capacity(3);

    match path {
        BlockPath::Direct { slot } => {
            if ptrs.direct[slot] != 0 {
                return Err(FsError::Corruption(format!(
                    "direct slot {slot} of inode {ino} already holds block {}",
                    ptrs.direct[slot]
                )));
            }
            let data = allocate_zeroed(image)?;
            ptrs.direct[slot] = data.0;
        }

        BlockPath::Indirect { slot } => {
            let (indirect, fresh_indirect) = if ptrs.indirect == 0 {
                let b = match allocate_zeroed(image) {
                    Ok(b) => b,
                    Err(e) => {
                        unwind(image, &allocated);
                        return Err(e);
                    }
                };
                allocated.push(b);
                (b, true)
            } else {
                (BlockNumber(ptrs.indirect), false)
            };

            if !fresh_indirect {
                let existing = image.block_ptr(indirect, slot)?;
                if !existing.is_none() {
                    return Err(FsError::Corruption(format!(
                        "indirect slot {slot} of inode {ino} already holds block {existing}"
                    )));
                }
            }

            let data = match allocate_zeroed(image) {
                Ok(b) => b,
                Err(e) => {
                    unwind(image, &allocated);
                    return Err(e);
                }
            };
            image.set_block_ptr(indirect, slot, data)?;
            if fresh_indirect {
                ptrs.indirect = indirect.0;
            }
        }

        BlockPath::DoubleIndirect { index_slot, slot } => {
            let (indirect2, fresh_indirect2) = if ptrs.indirect2 == 0 {
                let b = allocate_zeroed(image)?;
                allocated.push(b);
                (b, true)
            } else {
                (BlockNumber(ptrs.indirect2), false)
            };

            let existing_indirect = if fresh_indirect2 {
                BlockNumber::NONE
            } else {
                image.block_ptr(indirect2, index_slot)?
            };
            let (indirect, fresh_indirect) = if existing_indirect.is_none() {
                let b = match allocate_zeroed(image) {
                    Ok(b) => b,
                    Err(e) => {
                        unwind(image, &allocated);
                        return Err(e);
                    }
                };
                allocated.push(b);
                (b, true)
            } else {
                (existing_indirect, false)
            };

            if !fresh_indirect {
                let existing = image.block_ptr(indirect, slot)?;
                if !existing.is_none() {
                    return Err(FsError::Corruption(format!(
                        "doubly-indirect slot ({index_slot}, {slot}) of inode {ino} \
                         already holds block {existing}"
                    )));
                }
            }

            let data = match allocate_zeroed(image) {
                Ok(b) => b,
                Err(e) => {
                    unwind(image, &allocated);
                    return Err(e);
                }
            };
            image.set_block_ptr(indirect, slot, data)?;
            if fresh_indirect {
                image.set_block_ptr(indirect2, index_slot, indirect)?;
            }
            if fresh_indirect2 {
                ptrs.indirect2 = indirect2.0;
            }
        }
    }

    inode.size = (n + 1) * BLKSIZE as u32;
    if let Some(p) = inode.ptrs_mut() {
        *p = ptrs;
    }
    image.write_inode(ino, &inode)?;
    trace!(target: "ospfs::size", ino = ino.0, blocks = n + 1, "block added");
    Ok(())
}

/// Drop the file's last data block, along with any index block that only
/// existed to reach it.
///
/// A missing indirect or doubly-indirect block is an invariant breach
/// reported as `Corruption`; no attempt is made to restore state in that
/// case.
pub(crate) fn remove_block(image: &mut Image, ino: InodeNumber) -> Result<()> {
    let (mut inode, mut ptrs) = load_ptrs(image, ino)?;

    let n = size_to_blocks(inode.size);
    if n == 0 {
        return Ok(());
    }
    let last = n - 1;
    let path = BlockPath::of(last).ok_or_else(|| {
        FsError::Corruption(format!("inode {ino} claims more blocks than a file can hold"))
    })?;

    match path {
        BlockPath::Direct { slot } => {
            if ptrs.direct[slot] == 0 {
                return Err(FsError::Corruption(format!(
                    "direct slot {slot} of inode {ino} is empty but size says otherwise"
                )));
            }
            free_block(image, BlockNumber(ptrs.direct[slot]));
            ptrs.direct[slot] = 0;
        }

        BlockPath::Indirect { slot } => {
            if ptrs.indirect == 0 {
                return Err(FsError::Corruption(format!(
                    "inode {ino} is missing its indirect block"
                )));
            }
            let indirect = BlockNumber(ptrs.indirect);
            let data = image.block_ptr(indirect, slot)?;
            free_block(image, data);
            image.set_block_ptr(indirect, slot, BlockNumber::NONE)?;
            if slot == 0 {
                free_block(image, indirect);
                ptrs.indirect = 0;
            }
        }

        BlockPath::DoubleIndirect { index_slot, slot } => {
            if ptrs.indirect2 == 0 {
                return Err(FsError::Corruption(format!(
                    "inode {ino} is missing its doubly-indirect block"
                )));
            }
            let indirect2 = BlockNumber(ptrs.indirect2);
            let indirect = image.block_ptr(indirect2, index_slot)?;
            if indirect.is_none() {
                return Err(FsError::Corruption(format!(
                    "doubly-indirect slot {index_slot} of inode {ino} is missing \
                     its indirect block"
                )));
            }
            let data = image.block_ptr(indirect, slot)?;
            free_block(image, data);
            image.set_block_ptr(indirect, slot, BlockNumber::NONE)?;
            if slot == 0 {
                free_block(image, indirect);
                image.set_block_ptr(indirect2, index_slot, BlockNumber::NONE)?;
                if index_slot == 0 {
                    free_block(image, indirect2);
                    ptrs.indirect2 = 0;
                }
            }
        }
    }

    inode.size = last * BLKSIZE as u32;
    if let Some(p) = inode.ptrs_mut() {
        *p = ptrs;
    }
    image.write_inode(ino, &inode)?;
    trace!(target: "ospfs::size", ino = ino.0, blocks = last, "block removed");
    Ok(())
}

fn store_size(image: &mut Image, ino: InodeNumber, size: u32) -> Result<()> {
    let mut inode = image.read_inode(ino)?;
    inode.size = size;
    image.write_inode(ino, &inode)
}

fn current_blocks(image: &Image, ino: InodeNumber) -> Result<u32> {
    Ok(size_to_blocks(image.read_inode(ino)?.size))
}

/// Change a file's size, allocating and freeing blocks as necessary.
///
/// Growth that runs out of space is rolled back: the file is shrunk to its
/// original block count and the original byte size restored before
/// `NoSpace` is reported. A `Corruption` error propagates immediately
/// without rollback, since it already means the image is damaged.
pub(crate) fn change_size(image: &mut Image, ino: InodeNumber, new_size: u32) -> Result<()> {
    let original_size = image.read_inode(ino)?.size;
    let want_blocks = size_to_blocks(new_size);

    while current_blocks(image, ino)? < want_blocks {
        match add_block(image, ino) {
            Ok(()) => {}
            Err(FsError::NoSpace) => {
                debug!(
                    target: "ospfs::size",
                    ino = ino.0,
                    from = original_size,
                    to = new_size,
                    "out of space growing; rolling back"
                );
                while current_blocks(image, ino)? > size_to_blocks(original_size) {
                    remove_block(image, ino)?;
                }
                store_size(image, ino, original_size)?;
                return Err(FsError::NoSpace);
            }
            Err(e) => return Err(e),
        }
    }
    while current_blocks(image, ino)? > want_blocks {
        remove_block(image, ino)?;
    }

    // The block loops round size to whole blocks; record the exact request.
    store_size(image, ino, new_size)?;
    debug!(
        target: "ospfs::size",
        ino = ino.0,
        from = original_size,
        to = new_size,
        "size changed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ospfs_alloc::free_block_count;
    use ospfs_image::FormatOptions;
    use ospfs_ondisk::Inode;

    const ND: u32 = ospfs_types::NDIRECT as u32;
    const NI: u32 = ospfs_types::NINDIRECT as u32;
    const BLK: u32 = BLKSIZE as u32;

    /// Image with a spare regular file at inode 2.
    fn image_with_file(nblocks: u32) -> (Image, InodeNumber) {
        let mut image = Image::format(&FormatOptions {
            nblocks,
            ninodes: 16,
            root_mode: 0o755,
        })
        .expect("format");
        let ino = InodeNumber(2);
        image.write_inode(ino, &Inode::new_regular(0o644)).expect("write");
        (image, ino)
    }

    fn ptrs_of(image: &Image, ino: InodeNumber) -> BlockPtrs {
        *image.read_inode(ino).expect("inode").ptrs().expect("ptrs")
    }

    #[test]
    fn add_block_direct_zeroes_and_wires() {
        let (mut image, ino) = image_with_file(64);
        add_block(&mut image, ino).expect("add");

        let inode = image.read_inode(ino).expect("inode");
        assert_eq!(inode.size, BLK);
        let ptrs = ptrs_of(&image, ino);
        assert_eq!(ptrs.direct[0], image.first_data_block());
        assert_eq!(ptrs.indirect, 0);
        assert!(image
            .block(BlockNumber(ptrs.direct[0]))
            .expect("block")
            .iter()
            .all(|&b| b == 0));
    }

    #[test]
    fn add_block_refuses_occupied_slot() {
        let (mut image, ino) = image_with_file(64);
        let mut inode = image.read_inode(ino).expect("inode");
        inode.ptrs_mut().expect("ptrs").direct[0] = 9;
        image.write_inode(ino, &inode).expect("write");

        assert!(matches!(
            add_block(&mut image, ino),
            Err(FsError::Corruption(_))
        ));
        // Nothing leaked, nothing changed.
        assert_eq!(image.read_inode(ino).expect("inode").size, 0);
    }

    #[test]
    fn grow_to_direct_boundary_has_no_indirect() {
        let (mut image, ino) = image_with_file(64);
        change_size(&mut image, ino, ND * BLK).expect("grow");

        let ptrs = ptrs_of(&image, ino);
        assert!(ptrs.direct.iter().all(|&b| b != 0));
        assert_eq!(ptrs.indirect, 0);
        assert_eq!(ptrs.indirect2, 0);
    }

    #[test]
    fn one_byte_past_direct_allocates_indirect() {
        let (mut image, ino) = image_with_file(64);
        let free_before = free_block_count(&image);
        change_size(&mut image, ino, ND * BLK + 1).expect("grow");

        let ptrs = ptrs_of(&image, ino);
        assert_ne!(ptrs.indirect, 0);
        assert_eq!(ptrs.indirect2, 0);
        let indirect = BlockNumber(ptrs.indirect);
        assert!(!image.block_ptr(indirect, 0).expect("slot 0").is_none());
        for slot in 1..ospfs_types::NINDIRECT {
            assert!(image.block_ptr(indirect, slot).expect("slot").is_none());
        }
        // 10 direct + 1 data + 1 indirect.
        assert_eq!(free_block_count(&image), free_before - 12);
    }

    #[test]
    fn one_byte_past_indirect_allocates_double() {
        let (mut image, ino) = image_with_file(512);
        change_size(&mut image, ino, (ND + NI) * BLK + 1).expect("grow");

        let ptrs = ptrs_of(&image, ino);
        assert_ne!(ptrs.indirect2, 0);
        let indirect2 = BlockNumber(ptrs.indirect2);
        let leaf = image.block_ptr(indirect2, 0).expect("leaf");
        assert!(!leaf.is_none());
        assert!(!image.block_ptr(leaf, 0).expect("slot").is_none());
        assert!(image.block_ptr(leaf, 1).expect("slot").is_none());
        assert!(image.block_ptr(indirect2, 1).expect("slot").is_none());
    }

    #[test]
    fn shrink_releases_indirect_blocks() {
        let (mut image, ino) = image_with_file(64);
        let free_before = free_block_count(&image);

        change_size(&mut image, ino, (ND + 1) * BLK).expect("grow");
        assert_ne!(ptrs_of(&image, ino).indirect, 0);

        change_size(&mut image, ino, ND * BLK).expect("shrink");
        let ptrs = ptrs_of(&image, ino);
        assert_eq!(ptrs.indirect, 0);
        assert_eq!(free_block_count(&image), free_before - ND);

        change_size(&mut image, ino, 0).expect("to zero");
        assert_eq!(free_block_count(&image), free_before);
        assert_eq!(image.read_inode(ino).expect("inode").size, 0);
    }

    #[test]
    fn shrink_releases_double_indirect_chain() {
        let (mut image, ino) = image_with_file(512);
        let free_before = free_block_count(&image);

        change_size(&mut image, ino, (ND + NI + 1) * BLK).expect("grow");
        assert_ne!(ptrs_of(&image, ino).indirect2, 0);

        // Dropping one block sheds the leaf indirect and indirect2 too.
        change_size(&mut image, ino, (ND + NI) * BLK).expect("shrink");
        let ptrs = ptrs_of(&image, ino);
        assert_eq!(ptrs.indirect2, 0);
        assert_ne!(ptrs.indirect, 0);

        change_size(&mut image, ino, 0).expect("to zero");
        assert_eq!(free_block_count(&image), free_before);
    }

    #[test]
    fn change_size_sets_exact_byte_size() {
        let (mut image, ino) = image_with_file(64);
        change_size(&mut image, ino, 1500).expect("grow");
        assert_eq!(image.read_inode(ino).expect("inode").size, 1500);
        assert_eq!(current_blocks(&image, ino).expect("blocks"), 2);
    }

    #[test]
    fn change_size_is_idempotent() {
        let (mut image, ino) = image_with_file(64);
        change_size(&mut image, ino, 3000).expect("first");
        let snapshot = image.clone();
        change_size(&mut image, ino, 3000).expect("second");
        assert_eq!(image, snapshot);
    }

    #[test]
    fn grow_rolls_back_on_no_space() {
        // Enough room for a few blocks, then exhaustion mid-growth.
        let (mut image, ino) = image_with_file(16);
        change_size(&mut image, ino, 2 * BLK + 100).expect("initial");

        let free_before = free_block_count(&image);
        let inode_before = image.read_inode(ino).expect("inode");

        let err = change_size(&mut image, ino, 64 * BLK).expect_err("must fail");
        assert_eq!(err, FsError::NoSpace);
        assert_eq!(free_block_count(&image), free_before);
        assert_eq!(image.read_inode(ino).expect("inode"), inode_before);
    }

    #[test]
    fn rollback_covers_partially_allocated_index_blocks() {
        // Leave exactly one free block while the next append needs two
        // (data + fresh indirect): the lone allocation must be returned.
        let blocks_for_file = ND;
        let (mut image, ino) = image_with_file(64);
        change_size(&mut image, ino, blocks_for_file * BLK).expect("fill direct");

        let mut scratch = Vec::new();
        while free_block_count(&image) > 1 {
            scratch.push(allocate_block(&mut image).expect("drain"));
        }
        let free_before = free_block_count(&image);
        assert_eq!(free_before, 1);
        let inode_before = image.read_inode(ino).expect("inode");

        let err = change_size(&mut image, ino, (blocks_for_file + 1) * BLK).expect_err("full");
        assert_eq!(err, FsError::NoSpace);
        assert_eq!(free_block_count(&image), 1);
        assert_eq!(image.read_inode(ino).expect("inode"), inode_before);
    }

    #[test]
    fn grow_past_max_file_blocks_is_no_space() {
        let (mut image, ino) = image_with_file(64);
        let mut inode = image.read_inode(ino).expect("inode");
        // Pretend the file is already at the cap; add_block must refuse
        // before touching the allocator.
        inode.size = MAX_FILE_BLOCKS * BLK;
        image.write_inode(ino, &inode).expect("write");

        let free_before = free_block_count(&image);
        assert_eq!(add_block(&mut image, ino), Err(FsError::NoSpace));
        assert_eq!(free_block_count(&image), free_before);
    }

    #[test]
    fn remove_block_on_empty_file_is_noop() {
        let (mut image, ino) = image_with_file(64);
        remove_block(&mut image, ino).expect("noop");
        assert_eq!(image.read_inode(ino).expect("inode").size, 0);
    }

    #[test]
    fn remove_block_reports_missing_indirect() {
        let (mut image, ino) = image_with_file(64);
        let mut inode = image.read_inode(ino).expect("inode");
        inode.size = (ND + 1) * BLK;
        image.write_inode(ino, &inode).expect("write");

        assert!(matches!(
            remove_block(&mut image, ino),
            Err(FsError::Corruption(_))
        ));
    }

    #[test]
    fn size_engine_refuses_symlinks() {
        let (mut image, _) = image_with_file(64);
        let ino = InodeNumber(3);
        image
            .write_inode(ino, &Inode::new_symlink(b"/t".to_vec()))
            .expect("write");
        assert!(matches!(
            add_block(&mut image, ino),
            Err(FsError::Corruption(_))
        ));
        assert!(matches!(
            change_size(&mut image, ino, 1024),
            Err(FsError::Corruption(_))
        ));
    }
}
