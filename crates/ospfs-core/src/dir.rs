//! The directory engine.
//!
//! A directory's content is a packed array of fixed-size entries; empty
//! slots carry inode number 0 and are reused, never compacted. Entries
//! never straddle blocks because the block size is a multiple of the entry
//! size.

use crate::index::block_for_offset;
use crate::size::change_size;
use crate::ReaddirEntry;
use ospfs_error::{FsError, Result};
use ospfs_image::Image;
use ospfs_ondisk::{DirEntryRecord, Inode};
use ospfs_types::{size_to_blocks, FileType, InodeNumber, BLKSIZE, DIRENTRY_SIZE};
use tracing::trace;

fn load_dir(image: &Image, dir: InodeNumber) -> Result<Inode> {
    let inode = image.read_inode(dir)?;
    if inode.file_type() != FileType::Directory {
        return Err(FsError::NotDirectory);
    }
    Ok(inode)
}

/// Number of entry slots the directory currently holds.
fn slot_count(dir_inode: &Inode) -> u32 {
    dir_inode.size / DIRENTRY_SIZE as u32
}

/// Read the entry in slot `slot` of the directory.
fn entry_at(image: &Image, dir_inode: &Inode, slot: u32) -> Result<DirEntryRecord> {
    let offset = slot * DIRENTRY_SIZE as u32;
    let block = block_for_offset(image, dir_inode, offset)?;
    if block.is_none() {
        return Err(FsError::Corruption(format!(
            "directory slot {slot} has no backing block"
        )));
    }
    let data = image.block(block)?;
    let within = offset as usize % BLKSIZE;
    DirEntryRecord::parse_from_bytes(&data[within..within + DIRENTRY_SIZE]).map_err(FsError::from)
}

/// Overwrite slot `slot` of the directory with `entry`.
pub(crate) fn write_entry_at(
    image: &mut Image,
    dir: InodeNumber,
    slot: u32,
    entry: &DirEntryRecord,
) -> Result<()> {
    let dir_inode = load_dir(image, dir)?;
    let offset = slot * DIRENTRY_SIZE as u32;
    let block = block_for_offset(image, &dir_inode, offset)?;
    if block.is_none() {
        return Err(FsError::Corruption(format!(
            "directory slot {slot} has no backing block"
        )));
    }
    let data = image.block_mut(block)?;
    let within = offset as usize % BLKSIZE;
    data[within..within + DIRENTRY_SIZE].copy_from_slice(&entry.to_bytes());
    Ok(())
}

/// Find the entry named `name`, returning its slot index and contents.
///
/// An entry matches when it is occupied, its stored name length equals
/// `name.len()`, and the bytes compare equal.
pub(crate) fn find_entry(
    image: &Image,
    dir: InodeNumber,
    name: &[u8],
) -> Result<Option<(u32, DirEntryRecord)>> {
    let dir_inode = load_dir(image, dir)?;
    for slot in 0..slot_count(&dir_inode) {
        let entry = entry_at(image, &dir_inode, slot)?;
        if !entry.is_empty() && entry.name == name {
            return Ok(Some((slot, entry)));
        }
    }
    Ok(None)
}

/// Find a blank slot, growing the directory by one block if every existing
/// slot is occupied. New blocks come back zero-filled from the size engine,
/// so all their slots are empty.
pub(crate) fn create_blank_entry(image: &mut Image, dir: InodeNumber) -> Result<u32> {
    let dir_inode = load_dir(image, dir)?;
    let slots = slot_count(&dir_inode);
    for slot in 0..slots {
        if entry_at(image, &dir_inode, slot)?.is_empty() {
            return Ok(slot);
        }
    }

    let new_size = (size_to_blocks(dir_inode.size) + 1) * BLKSIZE as u32;
    change_size(image, dir, new_size)?;
    trace!(target: "ospfs::dir", dir = dir.0, slots = slots, "directory grown by one block");
    Ok(slots)
}

/// Visit every occupied slot of an already-loaded directory inode.
pub(crate) fn iterate_slots(
    image: &Image,
    dir_inode: &Inode,
    mut visit: impl FnMut(DirEntryRecord) -> Result<()>,
) -> Result<()> {
    for slot in 0..slot_count(dir_inode) {
        let entry = entry_at(image, dir_inode, slot)?;
        if !entry.is_empty() {
            visit(entry)?;
        }
    }
    Ok(())
}

/// Iterate directory entries from `cursor`, feeding each to `emit` until
/// the callback declines or the directory ends.
///
/// Cursor 0 is `"."` (this directory), cursor 1 is `".."` (the parent,
/// which the host adapter tracks), and cursor `k >= 2` addresses entry
/// `k - 2`. Empty slots advance the cursor without emission. Returns the
/// final cursor and whether the end of the directory was reached.
pub(crate) fn iterate(
    image: &Image,
    dir: InodeNumber,
    parent: InodeNumber,
    cursor: u64,
    mut emit: impl FnMut(ReaddirEntry) -> bool,
) -> Result<(u64, bool)> {
    let dir_inode = load_dir(image, dir)?;
    let mut cursor = cursor;

    if cursor == 0 {
        let keep_going = emit(ReaddirEntry {
            name: b".".to_vec(),
            cursor,
            ino: dir,
            kind: FileType::Directory,
        });
        cursor += 1;
        if !keep_going {
            return Ok((cursor, false));
        }
    }

    if cursor == 1 {
        let keep_going = emit(ReaddirEntry {
            name: b"..".to_vec(),
            cursor,
            ino: parent,
            kind: FileType::Directory,
        });
        cursor += 1;
        if !keep_going {
            return Ok((cursor, false));
        }
    }

    loop {
        let index = cursor - 2;
        if index * DIRENTRY_SIZE as u64 >= u64::from(dir_inode.size) {
            return Ok((cursor, true));
        }
        // Bounded by the directory size, so the narrowing is exact.
        let slot = index as u32;

        let entry = entry_at(image, &dir_inode, slot)?;
        if entry.is_empty() {
            cursor += 1;
            continue;
        }

        // An unknown ftype fails the inode parse and surfaces as Corruption.
        let kind = image.read_inode(entry.ino)?.file_type();
        let keep_going = emit(ReaddirEntry {
            name: entry.name,
            cursor,
            ino: entry.ino,
            kind,
        });
        cursor += 1;
        if !keep_going {
            return Ok((cursor, false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ospfs_image::FormatOptions;
    use ospfs_types::ROOT_INO;

    const ENTRIES_PER_BLOCK: u32 = (BLKSIZE / DIRENTRY_SIZE) as u32;

    fn root() -> InodeNumber {
        InodeNumber(ROOT_INO)
    }

    fn fresh_image() -> Image {
        Image::format(&FormatOptions::default()).expect("format")
    }

    /// Insert a name pointing at `ino`, the way the namespace layer does.
    fn insert(image: &mut Image, name: &[u8], ino: InodeNumber) {
        let slot = create_blank_entry(image, root()).expect("blank entry");
        write_entry_at(image, root(), slot, &DirEntryRecord::new(ino, name)).expect("write");
        let mut target = Inode::new_regular(0o644);
        target.nlink = 1;
        image.write_inode(ino, &target).expect("inode");
    }

    #[test]
    fn blank_entry_grows_empty_directory() {
        let mut image = fresh_image();
        let slot = create_blank_entry(&mut image, root()).expect("grow");
        assert_eq!(slot, 0);
        let root_inode = image.read_inode(root()).expect("root");
        assert_eq!(root_inode.size, BLKSIZE as u32);
        // Every slot of the new block is empty.
        for s in 0..ENTRIES_PER_BLOCK {
            assert!(entry_at(&image, &root_inode, s).expect("entry").is_empty());
        }
    }

    #[test]
    fn blank_entry_reuses_emptied_slot() {
        let mut image = fresh_image();
        insert(&mut image, b"a", InodeNumber(2));
        insert(&mut image, b"b", InodeNumber(3));

        // Empty out "a"'s slot.
        write_entry_at(&mut image, root(), 0, &DirEntryRecord::empty()).expect("clear");
        assert_eq!(create_blank_entry(&mut image, root()).expect("reuse"), 0);
    }

    #[test]
    fn blank_entry_appends_block_when_full() {
        let mut image = fresh_image();
        for i in 0..ENTRIES_PER_BLOCK {
            insert(&mut image, format!("f{i}").as_bytes(), InodeNumber(2 + i));
        }
        let slot = create_blank_entry(&mut image, root()).expect("grow");
        assert_eq!(slot, ENTRIES_PER_BLOCK);
        assert_eq!(
            image.read_inode(root()).expect("root").size,
            2 * BLKSIZE as u32
        );
    }

    #[test]
    fn find_entry_matches_exact_name_only() {
        let mut image = fresh_image();
        insert(&mut image, b"data.bin", InodeNumber(2));

        let (slot, entry) = find_entry(&image, root(), b"data.bin")
            .expect("scan")
            .expect("found");
        assert_eq!(slot, 0);
        assert_eq!(entry.ino, InodeNumber(2));

        assert!(find_entry(&image, root(), b"data").expect("scan").is_none());
        assert!(find_entry(&image, root(), b"data.bin2").expect("scan").is_none());
    }

    #[test]
    fn find_entry_rejects_non_directories() {
        let mut image = fresh_image();
        image
            .write_inode(InodeNumber(2), &Inode::new_regular(0o644))
            .expect("inode");
        assert!(matches!(
            find_entry(&image, InodeNumber(2), b"x"),
            Err(FsError::NotDirectory)
        ));
    }

    #[test]
    fn iterate_emits_dot_and_dotdot_first() {
        let image = fresh_image();
        let mut seen = Vec::new();
        let (cursor, done) = iterate(&image, root(), root(), 0, |e| {
            seen.push((e.name.clone(), e.cursor, e.ino));
            true
        })
        .expect("iterate");

        assert!(done);
        assert_eq!(cursor, 2);
        assert_eq!(
            seen,
            vec![(b".".to_vec(), 0, root()), (b"..".to_vec(), 1, root())]
        );
    }

    #[test]
    fn iterate_skips_empty_slots() {
        let mut image = fresh_image();
        insert(&mut image, b"a", InodeNumber(2));
        insert(&mut image, b"b", InodeNumber(3));
        insert(&mut image, b"c", InodeNumber(4));
        write_entry_at(&mut image, root(), 1, &DirEntryRecord::empty()).expect("clear b");

        let mut names = Vec::new();
        let (_, done) = iterate(&image, root(), root(), 2, |e| {
            names.push(e.name.clone());
            true
        })
        .expect("iterate");

        assert!(done);
        assert_eq!(names, vec![b"a".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn iterate_resumes_from_cursor() {
        let mut image = fresh_image();
        insert(&mut image, b"a", InodeNumber(2));
        insert(&mut image, b"b", InodeNumber(3));

        // Stop after one entry, then resume with the returned cursor.
        let mut first = Vec::new();
        let (cursor, done) = iterate(&image, root(), root(), 2, |e| {
            first.push(e.name.clone());
            false
        })
        .expect("first");
        assert!(!done);
        assert_eq!(first, vec![b"a".to_vec()]);

        let mut rest = Vec::new();
        let (_, done) = iterate(&image, root(), root(), cursor, |e| {
            rest.push(e.name.clone());
            true
        })
        .expect("rest");
        assert!(done);
        assert_eq!(rest, vec![b"b".to_vec()]);
    }

    #[test]
    fn iterate_reports_entry_kinds() {
        let mut image = fresh_image();
        insert(&mut image, b"file", InodeNumber(2));
        image
            .write_inode(InodeNumber(3), &Inode::new_symlink(b"/t".to_vec()))
            .expect("symlink inode");
        let slot = create_blank_entry(&mut image, root()).expect("slot");
        write_entry_at(
            &mut image,
            root(),
            slot,
            &DirEntryRecord::new(InodeNumber(3), b"link"),
        )
        .expect("write");

        let mut kinds = Vec::new();
        iterate(&image, root(), root(), 2, |e| {
            kinds.push((e.name.clone(), e.kind));
            true
        })
        .expect("iterate");

        assert_eq!(
            kinds,
            vec![
                (b"file".to_vec(), FileType::Regular),
                (b"link".to_vec(), FileType::Symlink),
            ]
        );
    }
}
