//! Live allocation (§4.2): owns the in-memory superblock and bitmap mirrors
//! and is the only thing that mutates either. Everything above this module
//! (inode growth, directory entry allocation) asks for a block id through
//! the `alloc`/`free` closures threaded into `inode.rs`/`directory.rs`;
//! this is where those closures bottom out.
//!
//! Grounded on `sfs.c`'s `markBlockUsed`/`markBlockFree`/`allocateNextBlock`/
//! `markINodeUsed`/`markINodeFree`/`allocateNextINode`, generalized per §9
//! from module-level globals into a struct owned by the
//! [`crate::filesystem::Filesystem`] context. The `trace!` calls around
//! each decision mirror the original's `log_msg` calls around `readBlock`/
//! `writeBlock`.

use crate::block::BlockDevice;
use crate::error::{Error, Result};
use crate::inode::{Inode, InodeFlags};
use crate::layout::*;
use crate::superblock::Superblock;

/// Owns the live superblock and bitmap; the sole mutator of both.
pub struct Allocator {
    pub superblock: Superblock,
    bitmap: crate::bitmap::Bitmap,
}

impl Allocator {
    pub fn new(superblock: Superblock, bitmap: crate::bitmap::Bitmap) -> Self {
        Self { superblock, bitmap }
    }

    pub fn bitmap(&self) -> &crate::bitmap::Bitmap {
        &self.bitmap
    }

    pub fn persist_superblock(&self, dev: &mut dyn BlockDevice) -> Result<()> {
        let mut buf = vec![0u8; BLOCK_SIZE as usize];
        self.superblock.serialize(&mut buf);
        dev.write_block(SUPERBLOCK_BLOCK, &buf)
    }

    pub fn persist_bitmap(&self, dev: &mut dyn BlockDevice) -> Result<()> {
        dev.write_block(BITMAP_BLOCK, self.bitmap.as_bytes())
    }

    /// Marks `id` used directly, without touching the free counter. Used
    /// only at format time for the fixed metadata block range, whose cost
    /// is already baked into [`Superblock::fresh`]'s counters.
    pub(crate) fn mark_metadata_used(&mut self, dev: &mut dyn BlockDevice, id: u64) -> Result<()> {
        self.bitmap.set(id);
        self.persist_bitmap(dev)
    }

    /// First-fit allocation of a free data block (§4.2, step 1).
    pub fn alloc_block(&mut self, dev: &mut dyn BlockDevice) -> Result<u32> {
        let id = self.bitmap.first_free().ok_or(Error::NoSpace)?;
        self.bitmap.set(id);
        self.persist_bitmap(dev)?;
        self.superblock.num_free_blocks -= 1;
        self.persist_superblock(dev)?;
        log::trace!("alloc_block -> {id} ({} free remaining)", self.superblock.num_free_blocks);
        Ok(id as u32)
    }

    /// Returns `id` to the free pool. A no-op for metadata ids (the bitmap
    /// refuses to clear them; see [`crate::bitmap::Bitmap::clear`]).
    pub fn free_block(&mut self, dev: &mut dyn BlockDevice, id: u32) -> Result<()> {
        self.bitmap.clear(id as u64);
        self.persist_bitmap(dev)?;
        self.superblock.num_free_blocks += 1;
        self.persist_superblock(dev)?;
        log::trace!("free_block {id} ({} free remaining)", self.superblock.num_free_blocks);
        Ok(())
    }

    /// Linear scan of the inode table for a free record (§4.2). Zeroes the
    /// record and marks it in-use; the caller attaches data blocks.
    pub fn alloc_inode(&mut self, dev: &mut dyn BlockDevice, now: i64) -> Result<u32> {
        for block_idx in 0..self.superblock.num_inode_blocks as u64 {
            let block_id = FIRST_INODE_BLOCK + block_idx;
            let mut buf = vec![0u8; BLOCK_SIZE as usize];
            dev.read_block(block_id, &mut buf)?;
            for slot in 0..INODES_PER_BLOCK {
                let off = (slot * INODE_SIZE) as usize;
                let record = Inode::parse(&buf[off..off + INODE_SIZE as usize]);
                if record.is_in_use() {
                    continue;
                }
                let mut fresh = Inode::free();
                fresh.flags = InodeFlags::IN_USE;
                fresh.touch_all(now);
                fresh.serialize(&mut buf[off..off + INODE_SIZE as usize]);
                dev.write_block(block_id, &buf)?;
                self.superblock.num_free_inodes -= 1;
                self.persist_superblock(dev)?;
                let id = (block_idx * INODES_PER_BLOCK + slot) as u32;
                log::trace!("alloc_inode -> {id} ({} free remaining)", self.superblock.num_free_inodes);
                return Ok(id);
            }
        }
        Err(Error::NoSpace)
    }

    /// Zeroes the inode record at `id` and clears its in-use flag.
    pub fn free_inode(&mut self, dev: &mut dyn BlockDevice, id: u32) -> Result<()> {
        let block_id = FIRST_INODE_BLOCK + id as u64 / INODES_PER_BLOCK;
        let off = ((id as u64 % INODES_PER_BLOCK) * INODE_SIZE) as usize;
        let mut buf = vec![0u8; BLOCK_SIZE as usize];
        dev.read_block(block_id, &mut buf)?;
        Inode::free().serialize(&mut buf[off..off + INODE_SIZE as usize]);
        dev.write_block(block_id, &buf)?;
        self.superblock.num_free_inodes += 1;
        self.persist_superblock(dev)?;
        log::trace!("free_inode {id} ({} free remaining)", self.superblock.num_free_inodes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::tests::MemBlockDevice;
    use crate::bitmap::Bitmap;

    #[test]
    fn alloc_block_persists_counter() {
        let mut dev = MemBlockDevice::default();
        let mut alloc = Allocator::new(Superblock::fresh(), Bitmap::fresh());
        let before = alloc.superblock.num_free_blocks;
        let id = alloc.alloc_block(&mut dev).unwrap();
        assert_eq!(id as u64, FIRST_DATA_BLOCK);
        assert_eq!(alloc.superblock.num_free_blocks, before - 1);
        assert!(alloc.bitmap().is_set(id as u64));
    }

    #[test]
    fn free_block_round_trips_counter() {
        let mut dev = MemBlockDevice::default();
        let mut alloc = Allocator::new(Superblock::fresh(), Bitmap::fresh());
        let before = alloc.superblock.num_free_blocks;
        let id = alloc.alloc_block(&mut dev).unwrap();
        alloc.free_block(&mut dev, id).unwrap();
        assert_eq!(alloc.superblock.num_free_blocks, before);
        assert!(!alloc.bitmap().is_set(id as u64));
    }

    #[test]
    fn alloc_inode_finds_first_free_slot() {
        let mut dev = MemBlockDevice::default();
        let mut alloc = Allocator::new(Superblock::fresh(), Bitmap::fresh());
        let before = alloc.superblock.num_free_inodes;
        let id = alloc.alloc_inode(&mut dev, 42).unwrap();
        assert_eq!(id, 0);
        assert_eq!(alloc.superblock.num_free_inodes, before - 1);

        let id2 = alloc.alloc_inode(&mut dev, 42).unwrap();
        assert_eq!(id2, 1);
    }

    #[test]
    fn free_inode_clears_in_use_flag() {
        let mut dev = MemBlockDevice::default();
        let mut alloc = Allocator::new(Superblock::fresh(), Bitmap::fresh());
        let id = alloc.alloc_inode(&mut dev, 1).unwrap();
        alloc.free_inode(&mut dev, id).unwrap();

        let mut buf = vec![0u8; BLOCK_SIZE as usize];
        dev.read_block(FIRST_INODE_BLOCK, &mut buf).unwrap();
        let record = Inode::parse(&buf[..INODE_SIZE as usize]);
        assert!(!record.is_in_use());
    }

    #[test]
    fn alloc_inode_exhausts() {
        let mut dev = MemBlockDevice::default();
        let mut sb = Superblock::fresh();
        sb.num_inode_blocks = 1;
        sb.num_free_inodes = INODES_PER_BLOCK as u32;
        let mut alloc = Allocator::new(sb, Bitmap::fresh());
        for _ in 0..INODES_PER_BLOCK {
            alloc.alloc_inode(&mut dev, 0).unwrap();
        }
        assert!(matches!(alloc.alloc_inode(&mut dev, 0), Err(Error::NoSpace)));
    }
}
