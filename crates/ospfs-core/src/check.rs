//! Whole-image invariant verification.
//!
//! Walks every live inode and the free bitmap and confirms they agree:
//! every referenced block is an allocated data block referenced exactly
//! once, no index block exists that the file's size does not require, and
//! every allocated data block is accounted for. Directories must stay
//! entry-aligned and may only reference live inodes.

use ospfs_alloc::bitmap_get;
use ospfs_error::{FsError, Result};
use ospfs_image::Image;
use ospfs_ondisk::InodeBody;
use ospfs_types::{
    size_to_blocks, BlockNumber, InodeNumber, DIRENTRY_SIZE, NDIRECT, NINDIRECT,
};
use std::collections::HashMap;

fn claim(
    image: &Image,
    refs: &mut HashMap<u32, InodeNumber>,
    block: u32,
    ino: InodeNumber,
    what: &str,
) -> Result<()> {
    if !image.superblock().is_data_block(BlockNumber(block)) {
        return Err(FsError::Corruption(format!(
            "inode {ino}: {what} {block} lies outside the data range"
        )));
    }
    if bitmap_get(image.freemap(), block) {
        return Err(FsError::Corruption(format!(
            "inode {ino}: {what} {block} is marked free in the bitmap"
        )));
    }
    if let Some(prev) = refs.insert(block, ino) {
        return Err(FsError::Corruption(format!(
            "{what} {block} referenced by both inode {prev} and inode {ino}"
        )));
    }
    Ok(())
}

/// Confirm an indirect block's slots match the number of blocks it must
/// carry: the first `used` slots non-zero, the rest zero.
fn check_table(
    image: &Image,
    refs: &mut HashMap<u32, InodeNumber>,
    table: BlockNumber,
    used: usize,
    ino: InodeNumber,
) -> Result<()> {
    for slot in 0..NINDIRECT {
        let value = image.block_ptr(table, slot)?;
        if slot < used {
            if value.is_none() {
                return Err(FsError::Corruption(format!(
                    "inode {ino}: slot {slot} of block {table} should name a data block"
                )));
            }
            claim(image, refs, value.0, ino, "data block")?;
        } else if !value.is_none() {
            return Err(FsError::Corruption(format!(
                "inode {ino}: slot {slot} of block {table} is past the file end \
                 but holds block {value}"
            )));
        }
    }
    Ok(())
}

/// Verify invariants over the whole image.
pub(crate) fn verify(image: &Image) -> Result<()> {
    let mut refs: HashMap<u32, InodeNumber> = HashMap::new();

    for raw in 1..image.ninodes() {
        let ino = InodeNumber(raw);
        let inode = image.read_inode(ino)?;
        if inode.is_free() {
            continue;
        }

        let ptrs = match &inode.body {
            InodeBody::Symlink { .. } => continue,
            InodeBody::Directory { ptrs, .. } => {
                if inode.size % DIRENTRY_SIZE as u32 != 0 {
                    return Err(FsError::Corruption(format!(
                        "directory {ino} has size {} which is not entry-aligned",
                        inode.size
                    )));
                }
                ptrs
            }
            InodeBody::Regular { ptrs, .. } => ptrs,
        };

        let n = size_to_blocks(inode.size) as usize;

        for (slot, &value) in ptrs.direct.iter().enumerate() {
            if slot < n {
                if value == 0 {
                    return Err(FsError::Corruption(format!(
                        "inode {ino}: direct slot {slot} should name a data block"
                    )));
                }
                claim(image, &mut refs, value, ino, "data block")?;
            } else if value != 0 {
                return Err(FsError::Corruption(format!(
                    "inode {ino}: direct slot {slot} is past the file end \
                     but holds block {value}"
                )));
            }
        }

        let indirect_used = n.saturating_sub(NDIRECT).min(NINDIRECT);
        if indirect_used == 0 {
            if ptrs.indirect != 0 {
                return Err(FsError::Corruption(format!(
                    "inode {ino} holds an indirect block its size does not need"
                )));
            }
        } else {
            if ptrs.indirect == 0 {
                return Err(FsError::Corruption(format!(
                    "inode {ino} is missing its indirect block"
                )));
            }
            claim(image, &mut refs, ptrs.indirect, ino, "indirect block")?;
            check_table(image, &mut refs, BlockNumber(ptrs.indirect), indirect_used, ino)?;
        }

        let double_used = n.saturating_sub(NDIRECT + NINDIRECT);
        if double_used == 0 {
            if ptrs.indirect2 != 0 {
                return Err(FsError::Corruption(format!(
                    "inode {ino} holds a doubly-indirect block its size does not need"
                )));
            }
        } else {
            if ptrs.indirect2 == 0 {
                return Err(FsError::Corruption(format!(
                    "inode {ino} is missing its doubly-indirect block"
                )));
            }
            claim(image, &mut refs, ptrs.indirect2, ino, "doubly-indirect block")?;
            let indirect2 = BlockNumber(ptrs.indirect2);
            let leaves = double_used.div_ceil(NINDIRECT);
            for index_slot in 0..NINDIRECT {
                let leaf = image.block_ptr(indirect2, index_slot)?;
                if index_slot < leaves {
                    if leaf.is_none() {
                        return Err(FsError::Corruption(format!(
                            "inode {ino}: doubly-indirect slot {index_slot} should \
                             name an indirect block"
                        )));
                    }
                    claim(image, &mut refs, leaf.0, ino, "indirect block")?;
                    let used = if index_slot == leaves - 1 {
                        double_used - (leaves - 1) * NINDIRECT
                    } else {
                        NINDIRECT
                    };
                    check_table(image, &mut refs, leaf, used, ino)?;
                } else if !leaf.is_none() {
                    return Err(FsError::Corruption(format!(
                        "inode {ino}: doubly-indirect slot {index_slot} is past the \
                         file end but holds block {leaf}"
                    )));
                }
            }
        }
    }

    // Every allocated data block must belong to somebody.
    let freemap = image.freemap();
    for block in image.first_data_block()..image.nblocks() {
        if !bitmap_get(freemap, block) && !refs.contains_key(&block) {
            return Err(FsError::Corruption(format!(
                "data block {block} is allocated but nothing references it"
            )));
        }
    }

    // Directory entries may only point at live inodes.
    for raw in 1..image.ninodes() {
        let dir = InodeNumber(raw);
        let inode = image.read_inode(dir)?;
        if inode.is_free() || !matches!(inode.body, InodeBody::Directory { .. }) {
            continue;
        }
        crate::dir::iterate_slots(image, &inode, |entry| {
            if entry.ino.0 >= image.ninodes() {
                return Err(FsError::Corruption(format!(
                    "directory {dir} references inode {} past the table",
                    entry.ino
                )));
            }
            if image.read_inode(entry.ino)?.is_free() {
                return Err(FsError::Corruption(format!(
                    "directory {dir} entry {:?} references free inode {}",
                    entry.name_str(),
                    entry.ino
                )));
            }
            Ok(())
        })?;
    }

    Ok(())
}
