//! The inode record (§3) and the direct/single-indirect/double-indirect
//! block addressing and growth algorithms of §4.3.
//!
//! Grounded on `sfs.c`'s `INode`, `getBlockFromOffset` and
//! `assignNextBlock`, with the block-map layout following the teacher's
//! `mkfs/src/ext2.rs` `INode` (direct pointers, then single- and
//! double-indirect pointers) and its disk-offset arithmetic style. The
//! `InodeFlags` bitset below uses the `bitflags` crate, also reached for by
//! `examples/casys-kaist-KeOS/keos/src/mm/page_table.rs` in this pack for
//! its page-table-entry flag bits.

use crate::block::BlockDevice;
use crate::error::{Error, Result};
use crate::layout::*;
use crate::superblock::{ByteReader, ByteWriter};
use bitflags::bitflags;

bitflags! {
    /// Inode flags (§3): bit 0 is in-use, bits 1-2 are the type.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct InodeFlags: u32 {
        const IN_USE = 0x1;
        const TYPE_FILE = 0x2;
        const TYPE_DIR = 0x4;
    }
}

impl InodeFlags {
    const TYPE_MASK: u32 = Self::TYPE_FILE.bits() | Self::TYPE_DIR.bits();
}

/// The type of a filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    File,
    Dir,
}

/// A fixed 128-byte inode record.
#[derive(Debug, Clone, Copy)]
pub struct Inode {
    pub flags: InodeFlags,
    /// Bytes for files; bytes occupied by directory entries, rounded up to
    /// a block boundary, for directories.
    pub size: u64,
    /// Number of populated directory entries. Ignored for files.
    pub child_count: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    /// 12 direct block ids, then the single- and double-indirect block ids.
    pub blocks: [u32; BLOCK_MAP_LEN],
}

impl Inode {
    /// A zeroed, free inode record.
    pub fn free() -> Self {
        Self {
            flags: InodeFlags::empty(),
            size: 0,
            child_count: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            blocks: [0; BLOCK_MAP_LEN],
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.flags.contains(InodeFlags::IN_USE)
    }

    pub fn kind(&self) -> Option<Kind> {
        match self.flags.bits() & InodeFlags::TYPE_MASK {
            v if v == InodeFlags::TYPE_FILE.bits() => Some(Kind::File),
            v if v == InodeFlags::TYPE_DIR.bits() => Some(Kind::Dir),
            _ => None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == Some(Kind::Dir)
    }

    pub fn touch_access(&mut self, now: i64) {
        self.atime = now;
    }

    pub fn touch_all(&mut self, now: i64) {
        self.atime = now;
        self.mtime = now;
        self.ctime = now;
    }

    /// Serializes this record to exactly [`INODE_SIZE`] bytes.
    pub fn serialize(&self, buf: &mut [u8]) {
        let mut w = ByteWriter::new(buf);
        w.put_u32(self.flags.bits());
        w.put_u64(self.size);
        w.put_u32(self.child_count);
        w.put_i64(self.atime);
        w.put_i64(self.mtime);
        w.put_i64(self.ctime);
        for &b in &self.blocks {
            w.put_u32(b);
        }
        w.skip((INODE_SIZE as usize) - 4 - 8 - 4 - 24 - BLOCK_MAP_LEN * 4);
    }

    /// Parses a record out of exactly [`INODE_SIZE`] bytes.
    pub fn parse(buf: &[u8]) -> Self {
        let mut r = ByteReader::new(buf);
        let flags = InodeFlags::from_bits_truncate(r.get_u32());
        let size = r.get_u64();
        let child_count = r.get_u32();
        let atime = r.get_i64();
        let mtime = r.get_i64();
        let ctime = r.get_i64();
        let mut blocks = [0u32; BLOCK_MAP_LEN];
        for b in &mut blocks {
            *b = r.get_u32();
        }
        Self {
            flags,
            size,
            child_count,
            atime,
            mtime,
            ctime,
            blocks,
        }
    }
}

/// Turns a raw on-disk block id into its optional in-memory form (§9:
/// "encode as an optional/nullable block id in the in-memory type; persist
/// as 0").
pub fn opt_block(id: u32) -> Option<u32> {
    if id == 0 {
        None
    } else {
        Some(id)
    }
}

/// Resolves the block id holding the byte at file offset `offset` (§4.3).
/// Returns `None` ("hole") if `offset` falls in an unallocated region, i.e.
/// any pointer on the path to it is 0.
pub fn block_for_offset(blocks: &[u32; BLOCK_MAP_LEN], offset: u64, dev: &mut dyn BlockDevice) -> Result<Option<u32>> {
    let block_size = BLOCK_SIZE;
    if offset < NUM_DIRECT as u64 * block_size {
        return Ok(opt_block(blocks[(offset / block_size) as usize]));
    }
    let offset = offset - NUM_DIRECT as u64 * block_size;

    if offset < PTRS_PER_BLOCK * block_size {
        let Some(single) = opt_block(blocks[SINGLE_INDIRECT]) else {
            return Ok(None);
        };
        return read_ptr(dev, single, (offset / block_size) as usize);
    }
    let offset = offset - PTRS_PER_BLOCK * block_size;

    let Some(double) = opt_block(blocks[DOUBLE_INDIRECT]) else {
        return Ok(None);
    };
    let per_l1 = PTRS_PER_BLOCK * block_size;
    let l1_index = (offset / per_l1) as usize;
    let Some(l1_block) = read_ptr(dev, double, l1_index)? else {
        return Ok(None);
    };
    let remaining = offset % per_l1;
    read_ptr(dev, l1_block, (remaining / block_size) as usize)
}

/// Reads the `index`th block-id entry out of indirect block `block`.
fn read_ptr(dev: &mut dyn BlockDevice, block: u32, index: usize) -> Result<Option<u32>> {
    let mut buf = vec![0u8; BLOCK_SIZE as usize];
    dev.read_block(block as u64, &mut buf)?;
    let off = index * 4;
    Ok(opt_block(u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())))
}

/// Writes `value` into the `index`th entry of indirect block `block`.
fn write_ptr(dev: &mut dyn BlockDevice, block: u32, index: usize, value: u32) -> Result<()> {
    let mut buf = vec![0u8; BLOCK_SIZE as usize];
    dev.read_block(block as u64, &mut buf)?;
    let off = index * 4;
    buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
    dev.write_block(block as u64, &buf)
}

/// Allocates a data block and attaches it at the inode's lowest
/// unallocated logical slot, allocating intermediate indirect tables as
/// needed (§4.3). `alloc`/`free` are provided by the caller's allocator
/// (the [`crate::filesystem::Filesystem`] context owns the bitmap and the
/// superblock counters); this function only decides *which* slots to fill
/// and rolls back any intermediate block it allocated but could not attach.
pub fn assign_next_block(
    blocks: &mut [u32; BLOCK_MAP_LEN],
    dev: &mut dyn BlockDevice,
    mut alloc: impl FnMut(&mut dyn BlockDevice) -> Result<u32>,
    mut free: impl FnMut(&mut dyn BlockDevice, u32) -> Result<()>,
) -> Result<u32> {
    // 1. A free direct slot.
    if let Some(i) = (0..NUM_DIRECT).find(|&i| blocks[i] == 0) {
        let blk = alloc(dev)?;
        blocks[i] = blk;
        return Ok(blk);
    }

    // 2. No single-indirect table yet: allocate the table and its first
    //    data block together.
    if blocks[SINGLE_INDIRECT] == 0 {
        let table = alloc(dev)?;
        let data = match alloc(dev) {
            Ok(data) => data,
            Err(e) => {
                free(dev, table)?;
                return Err(e);
            }
        };
        zero_block(dev, table)?;
        write_ptr(dev, table, 0, data)?;
        blocks[SINGLE_INDIRECT] = table;
        return Ok(data);
    }

    // 3. A free slot in the existing single-indirect table.
    let single = blocks[SINGLE_INDIRECT];
    if let Some(slot) = find_free_slot(dev, single)? {
        let data = alloc(dev)?;
        write_ptr(dev, single, slot, data)?;
        return Ok(data);
    }

    // 4. No double-indirect table yet: allocate it, zeroed.
    if blocks[DOUBLE_INDIRECT] == 0 {
        let double = alloc(dev)?;
        zero_block(dev, double)?;
        blocks[DOUBLE_INDIRECT] = double;
    }

    // 5. Scan the double-indirect table for a first-level pointer with a
    //    free slot (allocating that first-level table if needed).
    let double = blocks[DOUBLE_INDIRECT];
    for l1_index in 0..PTRS_PER_BLOCK as usize {
        let l1 = read_ptr_raw(dev, double, l1_index)?;
        if l1 == 0 {
            let l1_table = alloc(dev)?;
            let data = match alloc(dev) {
                Ok(data) => data,
                Err(e) => {
                    free(dev, l1_table)?;
                    return Err(e);
                }
            };
            zero_block(dev, l1_table)?;
            write_ptr(dev, l1_table, 0, data)?;
            write_ptr(dev, double, l1_index, l1_table)?;
            return Ok(data);
        }
        if let Some(slot) = find_free_slot(dev, l1)? {
            let data = alloc(dev)?;
            write_ptr(dev, l1, slot, data)?;
            return Ok(data);
        }
    }

    // 6. No slot remains anywhere in the tree.
    Err(Error::NoSpace)
}

fn read_ptr_raw(dev: &mut dyn BlockDevice, block: u32, index: usize) -> Result<u32> {
    let mut buf = vec![0u8; BLOCK_SIZE as usize];
    dev.read_block(block as u64, &mut buf)?;
    let off = index * 4;
    Ok(u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()))
}

fn find_free_slot(dev: &mut dyn BlockDevice, block: u32) -> Result<Option<usize>> {
    let mut buf = vec![0u8; BLOCK_SIZE as usize];
    dev.read_block(block as u64, &mut buf)?;
    Ok((0..PTRS_PER_BLOCK as usize).find(|&i| {
        let off = i * 4;
        u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()) == 0
    }))
}

fn zero_block(dev: &mut dyn BlockDevice, block: u32) -> Result<()> {
    let buf = vec![0u8; BLOCK_SIZE as usize];
    dev.write_block(block as u64, &buf)
}

/// Frees every block reachable from `blocks` (direct, single-indirect and
/// double-indirect), in reverse depth order as specified for `unlink`:
/// double-indirect leaves, then double-indirect tables, then the
/// double-indirect root; single-indirect leaves, then its root; then the
/// direct blocks. `free` is the caller's block-freeing allocator hook.
pub fn free_all_blocks(
    blocks: &[u32; BLOCK_MAP_LEN],
    dev: &mut dyn BlockDevice,
    mut free: impl FnMut(&mut dyn BlockDevice, u32) -> Result<()>,
) -> Result<()> {
    if let Some(double) = opt_block(blocks[DOUBLE_INDIRECT]) {
        for l1_index in 0..PTRS_PER_BLOCK as usize {
            let l1 = read_ptr_raw(dev, double, l1_index)?;
            if l1 == 0 {
                continue;
            }
            for leaf_index in 0..PTRS_PER_BLOCK as usize {
                let leaf = read_ptr_raw(dev, l1, leaf_index)?;
                if leaf != 0 {
                    free(dev, leaf)?;
                }
            }
            free(dev, l1)?;
        }
        free(dev, double)?;
    }

    if let Some(single) = opt_block(blocks[SINGLE_INDIRECT]) {
        for leaf_index in 0..PTRS_PER_BLOCK as usize {
            let leaf = read_ptr_raw(dev, single, leaf_index)?;
            if leaf != 0 {
                free(dev, leaf)?;
            }
        }
        free(dev, single)?;
    }

    for &direct in &blocks[0..NUM_DIRECT] {
        if let Some(b) = opt_block(direct) {
            free(dev, b)?;
        }
    }
    Ok(())
}
