//! The file-operation dispatcher (§4.6): the public surface the FUSE
//! adapter calls into. Owns the block device, the live allocator, and the
//! open-file handle table — the single explicit context called for by §9,
//! replacing the C sources' module-level globals (`superblock`, `bitmap`,
//! `flatFile`, `handles`).
//!
//! Grounded on `sfs.c`'s per-operation functions (`sfs_getattr`,
//! `sfs_create`, `sfs_mkdir`, `sfs_open`/`sfs_release`, `sfs_read`/
//! `sfs_write`, `sfs_unlink`/`sfs_rmdir`, `sfs_opendir`/`sfs_readdir`/
//! `sfs_releasedir`) and its `main()` format-or-load bootstrap. Each
//! mutating operation logs at `debug!` on entry, mirroring the original's
//! `log_msg` wrapper around every handler.

use crate::allocator::Allocator;
use crate::bitmap::Bitmap;
use crate::block::BlockDevice;
use crate::directory;
use crate::error::{Error, Result};
use crate::handle::HandleTable;
use crate::inode::{self, Inode, InodeFlags, Kind};
use crate::layout::*;
use crate::path;
use crate::superblock::Superblock;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// The attributes the bridge needs for `getattr`/`lookup` replies.
#[derive(Debug, Clone, Copy)]
pub struct Attr {
    pub inode_id: u32,
    pub kind: Kind,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub child_count: u32,
}

/// The dispatcher context: the sole owner of the open image, the live
/// allocator state, and the handle table.
pub struct Filesystem<D: BlockDevice> {
    dev: D,
    alloc: Allocator,
    handles: HandleTable,
}

impl<D: BlockDevice> Filesystem<D> {
    /// Mounts `dev`: loads an already-formatted image, or formats a fresh
    /// one if the superblock's magic doesn't match (§6).
    pub fn mount(mut dev: D) -> Result<Self> {
        let mut buf = vec![0u8; BLOCK_SIZE as usize];
        dev.read_block(SUPERBLOCK_BLOCK, &mut buf)?;

        let alloc = if Superblock::is_formatted(&buf) {
            let superblock = Superblock::parse(&buf);
            let mut bitmap_buf = vec![0u8; BLOCK_SIZE as usize];
            dev.read_block(BITMAP_BLOCK, &mut bitmap_buf)?;
            Allocator::new(superblock, Bitmap::from_bytes(&bitmap_buf))
        } else {
            log::info!("superblock magic mismatch, formatting image");
            Self::format(&mut dev)?
        };

        Ok(Self {
            dev,
            alloc,
            handles: HandleTable::new(),
        })
    }

    /// Writes a fresh superblock, bitmap, zeroed inode table and root
    /// directory (inode 0, one data block). Mirrors `sfs.c`'s `main()`
    /// bootstrap: [`Superblock::fresh`] and [`Bitmap::fresh`] already price
    /// in the root inode and its one data block, so the root's block is
    /// marked directly rather than through [`Allocator::alloc_block`]
    /// (which would double-count it).
    fn format(dev: &mut D) -> Result<Allocator> {
        let mut alloc = Allocator::new(Superblock::fresh(), Bitmap::fresh());
        alloc.persist_bitmap(dev)?;
        alloc.persist_superblock(dev)?;

        let zero = vec![0u8; BLOCK_SIZE as usize];
        for block_idx in 0..alloc.superblock.num_inode_blocks as u64 {
            dev.write_block(FIRST_INODE_BLOCK + block_idx, &zero)?;
        }

        alloc.mark_metadata_used(dev, FIRST_DATA_BLOCK)?;

        let now = now_ts();
        let mut root = Inode::free();
        root.flags = InodeFlags::IN_USE | InodeFlags::TYPE_DIR;
        root.size = BLOCK_SIZE;
        root.touch_all(now);
        root.blocks[0] = FIRST_DATA_BLOCK as u32;

        let mut inode_buf = vec![0u8; BLOCK_SIZE as usize];
        dev.read_block(FIRST_INODE_BLOCK, &mut inode_buf)?;
        root.serialize(&mut inode_buf[..INODE_SIZE as usize]);
        dev.write_block(FIRST_INODE_BLOCK, &inode_buf)?;

        Ok(alloc)
    }

    fn read_inode(&mut self, id: u32) -> Result<Inode> {
        let block_id = FIRST_INODE_BLOCK + id as u64 / INODES_PER_BLOCK;
        let off = ((id as u64 % INODES_PER_BLOCK) * INODE_SIZE) as usize;
        let mut buf = vec![0u8; BLOCK_SIZE as usize];
        self.dev.read_block(block_id, &mut buf)?;
        Ok(Inode::parse(&buf[off..off + INODE_SIZE as usize]))
    }

    fn write_inode(&mut self, id: u32, inode: &Inode) -> Result<()> {
        let block_id = FIRST_INODE_BLOCK + id as u64 / INODES_PER_BLOCK;
        let off = ((id as u64 % INODES_PER_BLOCK) * INODE_SIZE) as usize;
        let mut buf = vec![0u8; BLOCK_SIZE as usize];
        self.dev.read_block(block_id, &mut buf)?;
        inode.serialize(&mut buf[off..off + INODE_SIZE as usize]);
        self.dev.write_block(block_id, &buf)
    }

    /// Resolves an absolute path to its inode id (§4.5).
    fn resolve(&mut self, path: &[u8]) -> Result<u32> {
        let mut current = ROOT_INODE;
        for comp in path::components(path)? {
            path::check_component_len(comp)?;
            let dir = self.read_inode(current)?;
            if !dir.is_dir() {
                return Err(Error::NotDirectory);
            }
            let (child_id, _, _) = directory::find_entry(&mut self.dev, &dir, comp)?;
            current = child_id;
        }
        Ok(current)
    }

    /// Resolves the parent directory of `path`'s final component, without
    /// requiring that component to exist (§4.5).
    fn resolve_parent(&mut self, path: &[u8]) -> Result<(u32, Vec<u8>)> {
        let components: Vec<Vec<u8>> = path::components(path)?.map(|c| c.to_vec()).collect();
        let name = components.last().cloned().ok_or(Error::InvalidPath)?;

        let mut current = ROOT_INODE;
        for comp in &components[..components.len() - 1] {
            path::check_component_len(comp)?;
            let dir = self.read_inode(current)?;
            if !dir.is_dir() {
                return Err(Error::NotDirectory);
            }
            let (child_id, _, _) = directory::find_entry(&mut self.dev, &dir, comp)?;
            current = child_id;
        }

        path::check_component_len(&name)?;
        let dir = self.read_inode(current)?;
        if !dir.is_dir() {
            return Err(Error::NotDirectory);
        }
        Ok((current, name))
    }

    fn attr_of(&self, id: u32, inode: &Inode) -> Attr {
        Attr {
            inode_id: id,
            kind: inode.kind().expect("resolved inode must carry a type"),
            size: inode.size,
            atime: inode.atime,
            mtime: inode.mtime,
            ctime: inode.ctime,
            child_count: inode.child_count,
        }
    }

    pub fn getattr(&mut self, path: &[u8]) -> Result<Attr> {
        let id = self.resolve(path)?;
        let inode = self.read_inode(id)?;
        Ok(self.attr_of(id, &inode))
    }

    /// Allocates a file inode with one initial data block, appending it to
    /// `parent`. Shared by `create` and `mkdir`; `kind` picks the flag and
    /// initial size.
    fn make_child(&mut self, parent_id: u32, name: &[u8], kind: Kind, now: i64) -> Result<u32> {
        let mut parent = self.read_inode(parent_id)?;

        let child_id = self.alloc.alloc_inode(&mut self.dev, now)?;
        let mut child = Inode::free();
        child.flags = InodeFlags::IN_USE
            | match kind {
                Kind::File => InodeFlags::TYPE_FILE,
                Kind::Dir => InodeFlags::TYPE_DIR,
            };
        child.touch_all(now);

        {
            let dev = &mut self.dev;
            let alloc = &mut self.alloc;
            inode::assign_next_block(
                &mut child.blocks,
                dev,
                |dev| alloc.alloc_block(dev),
                |dev, id| alloc.free_block(dev, id),
            )?;
        }
        if kind == Kind::Dir {
            child.size = BLOCK_SIZE;
        }
        self.write_inode(child_id, &child)?;

        {
            let dev = &mut self.dev;
            let alloc = &mut self.alloc;
            directory::add_entry(dev, &mut parent, child_id, name, |dev| alloc.alloc_block(dev))?;
        }
        parent.touch_all(now);
        self.write_inode(parent_id, &parent)?;

        Ok(child_id)
    }

    /// If `path` exists, opens it; otherwise allocates a file inode and a
    /// directory entry in its parent, then opens it (§4.6).
    pub fn create(&mut self, path: &[u8]) -> Result<usize> {
        log::debug!("create({:?})", String::from_utf8_lossy(path));
        match self.resolve(path) {
            Ok(id) => self.do_open(id),
            Err(Error::NotFound) => {
                let (parent_id, name) = self.resolve_parent(path)?;
                let now = now_ts();
                let child_id = self.make_child(parent_id, &name, Kind::File, now)?;
                self.do_open(child_id)
            }
            Err(e) => Err(e),
        }
    }

    pub fn mkdir(&mut self, path: &[u8]) -> Result<()> {
        log::debug!("mkdir({:?})", String::from_utf8_lossy(path));
        match self.resolve(path) {
            Ok(_) => Err(Error::Exists),
            Err(Error::NotFound) => {
                let (parent_id, name) = self.resolve_parent(path)?;
                let now = now_ts();
                self.make_child(parent_id, &name, Kind::Dir, now)?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn do_open(&mut self, inode_id: u32) -> Result<usize> {
        self.handles.allocate(inode_id, 0)
    }

    pub fn open(&mut self, path: &[u8], flags: i32) -> Result<usize> {
        log::debug!("open({:?}, flags={flags})", String::from_utf8_lossy(path));
        let id = self.resolve(path)?;
        self.handles.allocate(id, flags)
    }

    pub fn release(&mut self, handle: usize) {
        log::debug!("release(handle={handle})");
        self.handles.release(handle);
    }

    /// Reads up to `size` bytes at `offset`, clamped to the file's current
    /// size; holes read as zero (§4.6).
    pub fn read(&mut self, handle: usize, size: u64, offset: u64) -> Result<Vec<u8>> {
        log::debug!("read(handle={handle}, size={size}, offset={offset})");
        let inode_id = self.handles.get(handle).expect("handle must be valid").inode_id;
        let mut inode = self.read_inode(inode_id)?;

        if offset >= inode.size {
            return Ok(Vec::new());
        }
        let size = size.min(inode.size - offset);
        let mut out = vec![0u8; size as usize];
        let mut done = 0u64;
        while done < size {
            let abs = offset + done;
            let block_off = abs % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - block_off).min(size - done);

            if let Some(block_id) = inode::block_for_offset(&inode.blocks, abs, &mut self.dev)? {
                let mut buf = vec![0u8; BLOCK_SIZE as usize];
                self.dev.read_block(block_id as u64, &mut buf)?;
                out[done as usize..(done + chunk) as usize]
                    .copy_from_slice(&buf[block_off as usize..(block_off + chunk) as usize]);
            }
            done += chunk;
        }

        inode.touch_access(now_ts());
        self.write_inode(inode_id, &inode)?;
        Ok(out)
    }

    /// Writes `buf` at `offset`, growing the file through §4.3 as needed.
    /// `size` grows to `max(old_size, offset + written)` (§9: the POSIX
    /// resolution of the source's additive-size open question).
    pub fn write(&mut self, handle: usize, buf: &[u8], offset: u64) -> Result<u64> {
        log::debug!("write(handle={handle}, len={}, offset={offset})", buf.len());
        let inode_id = self.handles.get(handle).expect("handle must be valid").inode_id;
        let mut inode = self.read_inode(inode_id)?;

        let total = buf.len() as u64;
        let mut written = 0u64;
        while written < total {
            let abs = offset + written;
            let block_off = abs % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - block_off).min(total - written);

            let existing = inode::block_for_offset(&inode.blocks, abs, &mut self.dev)?;
            let block_id = match existing {
                Some(id) => id,
                None => {
                    let dev = &mut self.dev;
                    let alloc = &mut self.alloc;
                    inode::assign_next_block(
                        &mut inode.blocks,
                        dev,
                        |dev| alloc.alloc_block(dev),
                        |dev, id| alloc.free_block(dev, id),
                    )?
                }
            };

            let mut block_buf = vec![0u8; BLOCK_SIZE as usize];
            if chunk < BLOCK_SIZE {
                self.dev.read_block(block_id as u64, &mut block_buf)?;
            }
            block_buf[block_off as usize..(block_off + chunk) as usize]
                .copy_from_slice(&buf[written as usize..(written + chunk) as usize]);
            self.dev.write_block(block_id as u64, &block_buf)?;

            written += chunk;
        }

        let now = now_ts();
        inode.size = inode.size.max(offset + written);
        inode.touch_all(now);
        self.write_inode(inode_id, &inode)?;
        Ok(written)
    }

    /// Frees every block reachable from the inode and its inode record,
    /// then removes its directory entry. Fails on directories: callers must
    /// use [`Self::rmdir`] (§9 open question resolution).
    pub fn unlink(&mut self, path: &[u8]) -> Result<()> {
        log::debug!("unlink({:?})", String::from_utf8_lossy(path));
        let id = self.resolve(path)?;
        let inode = self.read_inode(id)?;
        if inode.is_dir() {
            return Err(Error::NotDirectory);
        }

        {
            let dev = &mut self.dev;
            let alloc = &mut self.alloc;
            inode::free_all_blocks(&inode.blocks, dev, |dev, id| alloc.free_block(dev, id))?;
            alloc.free_inode(dev, id)?;
        }

        let (parent_id, name) = self.resolve_parent(path)?;
        let mut parent = self.read_inode(parent_id)?;
        directory::remove_entry(&mut self.dev, &mut parent, &name)?;
        self.write_inode(parent_id, &parent)?;
        Ok(())
    }

    /// Fails with `NotEmpty` unless `child_count == 0`; otherwise frees the
    /// directory's data blocks and removes it from its parent.
    pub fn rmdir(&mut self, path: &[u8]) -> Result<()> {
        log::debug!("rmdir({:?})", String::from_utf8_lossy(path));
        let id = self.resolve(path)?;
        let inode = self.read_inode(id)?;
        if !inode.is_dir() {
            return Err(Error::NotDirectory);
        }
        if inode.child_count > 0 {
            return Err(Error::NotEmpty);
        }

        {
            let dev = &mut self.dev;
            let alloc = &mut self.alloc;
            inode::free_all_blocks(&inode.blocks, dev, |dev, id| alloc.free_block(dev, id))?;
            alloc.free_inode(dev, id)?;
        }

        let (parent_id, name) = self.resolve_parent(path)?;
        let mut parent = self.read_inode(parent_id)?;
        directory::remove_entry(&mut self.dev, &mut parent, &name)?;
        self.write_inode(parent_id, &parent)?;
        Ok(())
    }

    pub fn opendir(&mut self, _path: &[u8]) -> Result<()> {
        Ok(())
    }

    pub fn releasedir(&mut self, _path: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Iterates `path`'s populated entries in slot order, calling `filler`
    /// for each name. Stops and returns `OutOfMemory` if `filler` signals
    /// its buffer is full (§4.6).
    pub fn readdir(&mut self, path: &[u8], mut filler: impl FnMut(&[u8]) -> bool) -> Result<()> {
        let id = self.resolve(path)?;
        let inode = self.read_inode(id)?;
        let finished = directory::for_each_entry(&mut self.dev, &inode, |entry| filler(&entry.name))?;
        if finished {
            Ok(())
        } else {
            Err(Error::OutOfMemory)
        }
    }

    /// Exposes the current free-block/free-inode counters (used by tests
    /// checking the round-trip invariants of §8).
    pub fn free_counts(&self) -> (u32, u32) {
        (self.alloc.superblock.num_free_blocks, self.alloc.superblock.num_free_inodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::tests::MemBlockDevice;

    fn mounted() -> Filesystem<MemBlockDevice> {
        Filesystem::mount(MemBlockDevice::default()).unwrap()
    }

    #[test]
    fn fresh_mount_has_root_directory() {
        let mut fs = mounted();
        let attr = fs.getattr(b"/").unwrap();
        assert_eq!(attr.kind, Kind::Dir);
        assert_eq!(attr.child_count, 0);
        assert_eq!(attr.inode_id, ROOT_INODE);
    }

    #[test]
    fn fresh_mount_free_counts_exclude_root() {
        let fs = mounted();
        let (blocks, inodes) = fs.free_counts();
        assert_eq!(blocks as u64, TOTAL_BLOCKS - FIRST_DATA_BLOCK - 1);
        assert_eq!(inodes as u64, NUM_INODES - 1);
    }

    #[test]
    fn create_then_open_then_write_then_read() {
        let mut fs = mounted();
        let h = fs.create(b"/hello.txt").unwrap();
        let written = fs.write(h, b"hello world", 0).unwrap();
        assert_eq!(written, 11);
        let data = fs.read(h, 11, 0).unwrap();
        assert_eq!(&data, b"hello world");
        fs.release(h);
    }

    #[test]
    fn mkdir_then_readdir() {
        let mut fs = mounted();
        fs.mkdir(b"/a").unwrap();
        fs.create(b"/a/b.txt").unwrap();

        let mut names = Vec::new();
        fs.readdir(b"/a", |name| {
            names.push(name.to_vec());
            true
        })
        .unwrap();
        assert_eq!(names, vec![b"b.txt".to_vec()]);
    }

    #[test]
    fn mkdir_on_existing_path_fails() {
        let mut fs = mounted();
        fs.mkdir(b"/a").unwrap();
        assert!(matches!(fs.mkdir(b"/a"), Err(Error::Exists)));
    }

    #[test]
    fn rmdir_fails_when_not_empty() {
        let mut fs = mounted();
        fs.mkdir(b"/a").unwrap();
        fs.create(b"/a/f").unwrap();
        assert!(matches!(fs.rmdir(b"/a"), Err(Error::NotEmpty)));
        fs.unlink(b"/a/f").unwrap();
        fs.rmdir(b"/a").unwrap();
        assert!(matches!(fs.getattr(b"/a"), Err(Error::NotFound)));
    }

    #[test]
    fn unlink_on_directory_fails() {
        let mut fs = mounted();
        fs.mkdir(b"/a").unwrap();
        assert!(matches!(fs.unlink(b"/a"), Err(Error::NotDirectory)));
    }

    #[test]
    fn create_unlink_round_trips_free_counts() {
        let mut fs = mounted();
        let (blocks_before, inodes_before) = fs.free_counts();
        let h = fs.create(b"/f").unwrap();
        fs.release(h);
        fs.unlink(b"/f").unwrap();
        assert_eq!(fs.free_counts(), (blocks_before, inodes_before));
    }

    #[test]
    fn large_write_crosses_into_single_indirect() {
        let mut fs = mounted();
        let h = fs.create(b"/big").unwrap();
        let pattern: Vec<u8> = (0..13 * BLOCK_SIZE as usize).map(|i| (i % 256) as u8).collect();
        let written = fs.write(h, &pattern, 0).unwrap();
        assert_eq!(written, pattern.len() as u64);

        let read_back = fs.read(h, pattern.len() as u64, 0).unwrap();
        assert_eq!(read_back, pattern);

        let attr = fs.getattr(b"/big").unwrap();
        assert_eq!(attr.size, pattern.len() as u64);
    }

    #[test]
    fn read_past_eof_clamps() {
        let mut fs = mounted();
        let h = fs.create(b"/f").unwrap();
        fs.write(h, &vec![7u8; 100], 0).unwrap();
        let data = fs.read(h, 1000, 50).unwrap();
        assert_eq!(data.len(), 50);
    }

    #[test]
    fn name_too_long_is_rejected() {
        let mut fs = mounted();
        let long_name = vec![b'a'; MAX_NAME_LEN + 1];
        let mut path = b"/".to_vec();
        path.extend_from_slice(&long_name);
        assert!(matches!(fs.create(&path), Err(Error::NameTooLong)));
    }
}
