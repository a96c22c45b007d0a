//! Directory data blocks (§3, §4.4): a flat, unordered array of
//! fixed-size `(name, inode-id)` entries packed across a directory's
//! direct blocks.
//!
//! Grounded on `sfs.c`'s `findFileEntry`/`addFileEntry`/`removeFileEntry`.
//! Directories are capped at `direct[0..11]` (§9: indirect blocks are never
//! used for directory entries, even though one revision of the original
//! source let the cap slip to 14).

use crate::block::BlockDevice;
use crate::error::{Error, Result};
use crate::inode::Inode;
use crate::layout::*;

/// A single `(name, inode-id)` directory entry.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: Vec<u8>,
    pub inode_id: u32,
}

impl FileEntry {
    fn serialize(&self, buf: &mut [u8]) {
        debug_assert!(self.name.len() <= MAX_NAME_LEN);
        buf[..self.name.len()].copy_from_slice(&self.name);
        for b in &mut buf[self.name.len()..MAX_NAME_LEN + 1] {
            *b = 0;
        }
        buf[MAX_NAME_LEN + 1..MAX_NAME_LEN + 1 + 4].copy_from_slice(&self.inode_id.to_le_bytes());
    }

    fn parse(buf: &[u8]) -> Self {
        let nul = buf[..MAX_NAME_LEN + 1]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_NAME_LEN + 1);
        let name = buf[..nul].to_vec();
        let inode_id = u32::from_le_bytes(
            buf[MAX_NAME_LEN + 1..MAX_NAME_LEN + 1 + 4]
                .try_into()
                .unwrap(),
        );
        Self { name, inode_id }
    }
}

fn read_block_entries(dev: &mut dyn BlockDevice, block: u32) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; BLOCK_SIZE as usize];
    dev.read_block(block as u64, &mut buf)?;
    Ok(buf)
}

fn entry_at(buf: &[u8], index: u64) -> FileEntry {
    let off = (index * FILE_ENTRY_SIZE) as usize;
    FileEntry::parse(&buf[off..off + FILE_ENTRY_SIZE as usize])
}

/// Finds `name` among `dir`'s entries. Returns the child's inode id, the
/// block id containing the match and the index within that block.
pub fn find_entry(dev: &mut dyn BlockDevice, dir: &Inode, name: &[u8]) -> Result<(u32, u32, usize)> {
    if !dir.is_dir() {
        return Err(Error::NotDirectory);
    }

    let mut remaining = dir.child_count as u64;
    let mut blk_idx = 0usize;
    while remaining > 0 {
        let block = dir.blocks[blk_idx];
        let buf = read_block_entries(dev, block)?;
        let count = remaining.min(ENTRIES_PER_BLOCK);
        for i in 0..count {
            let entry = entry_at(&buf, i);
            if entry.name == name {
                return Ok((entry.inode_id, block, i as usize));
            }
        }
        remaining -= count;
        blk_idx += 1;
    }

    Err(Error::NotFound)
}

/// Appends `(name, child_id)` to `dir`, allocating a new data block via
/// `alloc` if the current last block is full. Fails with [`Error::NoSpace`]
/// once `child_count` would exceed the direct-block-only capacity.
pub fn add_entry(
    dev: &mut dyn BlockDevice,
    dir: &mut Inode,
    child_id: u32,
    name: &[u8],
    mut alloc: impl FnMut(&mut dyn BlockDevice) -> Result<u32>,
) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(Error::NameTooLong);
    }
    if dir.child_count as u64 >= MAX_DIR_CHILDREN {
        return Err(Error::NoSpace);
    }

    let blk_index = (dir.child_count as u64 / ENTRIES_PER_BLOCK) as usize;
    let idx = (dir.child_count as u64 % ENTRIES_PER_BLOCK) as usize;

    if dir.blocks[blk_index] == 0 {
        let new_block = alloc(dev)?;
        dir.blocks[blk_index] = new_block;
        dir.size += BLOCK_SIZE;
    }

    let block = dir.blocks[blk_index];
    let mut buf = read_block_entries(dev, block)?;
    let entry = FileEntry {
        name: name.to_vec(),
        inode_id: child_id,
    };
    let off = idx * FILE_ENTRY_SIZE as usize;
    entry.serialize(&mut buf[off..off + FILE_ENTRY_SIZE as usize]);
    dev.write_block(block as u64, &buf)?;

    dir.child_count += 1;
    Ok(())
}

/// Removes `name` from `dir` by swapping the last entry into its slot
/// (no ordering guarantee, no tombstones). Does not free the trailing
/// block when `child_count` crosses a block boundary downward; the next
/// `add_entry` reuses the slack.
pub fn remove_entry(dev: &mut dyn BlockDevice, dir: &mut Inode, name: &[u8]) -> Result<()> {
    let (_, removed_block, removed_index) = find_entry(dev, dir, name)?;

    let last = dir.child_count as u64 - 1;
    let last_blk_index = (last / ENTRIES_PER_BLOCK) as usize;
    let last_idx = (last % ENTRIES_PER_BLOCK) as usize;
    let last_block = dir.blocks[last_blk_index];

    if last_block != removed_block || last_idx != removed_index {
        let mut last_buf = read_block_entries(dev, last_block)?;
        let last_off = last_idx * FILE_ENTRY_SIZE as usize;
        let last_entry = entry_at(&last_buf, last_idx as u64);

        let mut removed_buf = if removed_block == last_block {
            std::mem::take(&mut last_buf)
        } else {
            read_block_entries(dev, removed_block)?
        };
        let removed_off = removed_index * FILE_ENTRY_SIZE as usize;
        last_entry.serialize(&mut removed_buf[removed_off..removed_off + FILE_ENTRY_SIZE as usize]);
        dev.write_block(removed_block as u64, &removed_buf)?;

        if removed_block != last_block {
            // Zero the vacated last slot so stray reads (e.g. a future
            // off-by-one) never see stale data.
            for b in &mut last_buf[last_off..last_off + FILE_ENTRY_SIZE as usize] {
                *b = 0;
            }
            dev.write_block(last_block as u64, &last_buf)?;
        }
    }

    dir.child_count -= 1;
    Ok(())
}

/// Iterates the populated entries of `dir` in slot order, calling `f` for
/// each. Stops early (returning `Ok(false)`) if `f` returns `false`.
pub fn for_each_entry(dev: &mut dyn BlockDevice, dir: &Inode, mut f: impl FnMut(&FileEntry) -> bool) -> Result<bool> {
    let mut remaining = dir.child_count as u64;
    let mut blk_idx = 0usize;
    while remaining > 0 {
        let block = dir.blocks[blk_idx];
        let buf = read_block_entries(dev, block)?;
        let count = remaining.min(ENTRIES_PER_BLOCK);
        for i in 0..count {
            let entry = entry_at(&buf, i);
            if !f(&entry) {
                return Ok(false);
            }
        }
        remaining -= count;
        blk_idx += 1;
    }
    Ok(true)
}
