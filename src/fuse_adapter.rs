//! The FUSE-facing shell (§2, §6): translates `fuser::Filesystem` callback
//! signatures into calls on the path-based dispatcher of
//! [`crate::filesystem::Filesystem`] and packages its [`crate::error::Error`]
//! back into `errno` replies. Carries no filesystem policy of its own.
//!
//! `fuser` addresses objects by a stable numeric inode (`ino`), not by path;
//! the core dispatcher is path-based, mirroring the original program's
//! path-based bridge contract (§6). This adapter bridges the two with a
//! small `ino -> absolute path` cache, populated as the kernel discovers
//! entries through `lookup`/`readdir`/`create`/`mkdir`, in the same spirit
//! as the wrapper struct in the pack's other from-scratch FUSE filesystem
//! (`allancalix/simplefs`'s `SFS<T>`), adapted to `fuser`'s (rather than the
//! older `fuse` crate's) trait shape.

use crate::block::BlockDevice;
use crate::filesystem::{Attr, Filesystem};
use crate::inode::Kind;
use crate::layout::BLOCK_SIZE;
use fuser::{
    FileAttr, FileType, Filesystem as FuseFilesystem, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, FUSE_ROOT_ID,
};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const TTL: Duration = Duration::from_secs(1);

/// Wraps the dispatcher with the `ino <-> path` bookkeeping `fuser` needs.
pub struct FuseAdapter<D: BlockDevice> {
    fs: Filesystem<D>,
    paths: HashMap<u64, Vec<u8>>,
    /// Bumped for an `ino` whenever it is handed a path different from the
    /// one it last named, so the kernel is told to drop its cached dentry
    /// rather than alias it onto the reused numeric id.
    generations: HashMap<u64, u64>,
}

impl<D: BlockDevice> FuseAdapter<D> {
    pub fn new(fs: Filesystem<D>) -> Self {
        let mut paths = HashMap::new();
        paths.insert(FUSE_ROOT_ID, b"/".to_vec());
        Self {
            fs,
            paths,
            generations: HashMap::new(),
        }
    }

    fn path_of(&self, ino: u64) -> Vec<u8> {
        self.paths
            .get(&ino)
            .cloned()
            .expect("kernel referenced an ino this adapter never handed out")
    }

    fn child_path(parent: &[u8], name: &OsStr) -> Vec<u8> {
        let mut path = parent.to_vec();
        if path != b"/" {
            path.push(b'/');
        }
        path.extend_from_slice(name.as_bytes());
        path
    }

    /// Records `ino -> path`. `Allocator::alloc_inode`'s first-fit scan
    /// reuses the lowest freed inode id, so an `unlink` followed by a
    /// `create` routinely hands the same numeric `ino` to a different
    /// path; the mapping is therefore always overwritten, and the
    /// generation counter is bumped whenever that happens to a path that
    /// actually changed.
    fn remember(&mut self, attr: &Attr, path: Vec<u8>) -> u64 {
        let ino = attr.inode_id as u64 + 1;
        if self.paths.get(&ino).is_some_and(|existing| *existing != path) {
            *self.generations.entry(ino).or_insert(0) += 1;
        }
        self.paths.insert(ino, path);
        ino
    }

    fn generation_of(&self, ino: u64) -> u64 {
        self.generations.get(&ino).copied().unwrap_or(0)
    }

    fn file_attr(attr: &Attr) -> FileAttr {
        let ino = attr.inode_id as u64 + 1;
        let kind = match attr.kind {
            Kind::File => FileType::RegularFile,
            Kind::Dir => FileType::Directory,
        };
        let secs = |t: i64| UNIX_EPOCH + Duration::from_secs(t.max(0) as u64);
        FileAttr {
            ino,
            size: attr.size,
            blocks: attr.size.div_ceil(512),
            atime: secs(attr.atime),
            mtime: secs(attr.mtime),
            ctime: secs(attr.ctime),
            crtime: SystemTime::UNIX_EPOCH,
            kind,
            perm: 0o777,
            nlink: 1,
            uid: 0,
            gid: 0,
            rdev: 0,
            blksize: BLOCK_SIZE as u32,
            flags: 0,
        }
    }
}

impl<D: BlockDevice> FuseFilesystem for FuseAdapter<D> {
    fn init(&mut self, _req: &Request, _config: &mut fuser::KernelConfig) -> Result<(), libc::c_int> {
        log::info!("sfs mounted");
        Ok(())
    }

    fn destroy(&mut self) {
        log::info!("sfs unmounting");
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = Self::child_path(&self.path_of(parent), name);
        log::debug!("lookup({:?})", String::from_utf8_lossy(&path));
        match self.fs.getattr(&path) {
            Ok(attr) => {
                let file_attr = Self::file_attr(&attr);
                let ino = self.remember(&attr, path);
                reply.entry(&TTL, &file_attr, self.generation_of(ino));
            }
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn forget(&mut self, _req: &Request, _ino: u64, _nlookup: u64) {}

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        let path = self.path_of(ino);
        match self.fs.getattr(&path) {
            Ok(attr) => reply.attr(&TTL, &Self::file_attr(&attr)),
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = Self::child_path(&self.path_of(parent), name);
        log::debug!("mkdir({:?})", String::from_utf8_lossy(&path));
        if let Err(e) = self.fs.mkdir(&path) {
            reply.error(e.as_errno());
            return;
        }
        match self.fs.getattr(&path) {
            Ok(attr) => {
                let file_attr = Self::file_attr(&attr);
                let ino = self.remember(&attr, path);
                reply.entry(&TTL, &file_attr, self.generation_of(ino));
            }
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = Self::child_path(&self.path_of(parent), name);
        log::debug!("unlink({:?})", String::from_utf8_lossy(&path));
        match self.fs.unlink(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = Self::child_path(&self.path_of(parent), name);
        log::debug!("rmdir({:?})", String::from_utf8_lossy(&path));
        match self.fs.rmdir(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let path = Self::child_path(&self.path_of(parent), name);
        log::debug!("create({:?})", String::from_utf8_lossy(&path));
        let handle = match self.fs.create(&path) {
            Ok(h) => h,
            Err(e) => {
                reply.error(e.as_errno());
                return;
            }
        };
        match self.fs.getattr(&path) {
            Ok(attr) => {
                let file_attr = Self::file_attr(&attr);
                let ino = self.remember(&attr, path);
                reply.created(&TTL, &file_attr, self.generation_of(ino), handle as u64, flags as u32);
            }
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = self.path_of(ino);
        match self.fs.open(&path, flags) {
            Ok(handle) => reply.opened(handle as u64, 0),
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.fs.release(fh as usize);
        reply.ok();
    }

    fn read(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self.fs.read(fh as usize, size as u64, offset as u64) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        match self.fs.write(fh as usize, data, offset as u64) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        let path = self.path_of(ino);
        match self.fs.opendir(&path) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn releasedir(&mut self, _req: &Request, ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        let path = self.path_of(ino);
        match self.fs.releasedir(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.as_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = self.path_of(ino);

        // `readdir`'s filler can't borrow `self.fs` again to fetch each
        // child's type, so the names are collected first and the inode
        // lookups happen in a second pass once that borrow has ended.
        let mut names: Vec<Vec<u8>> = Vec::new();
        if let Err(e) = self.fs.readdir(&path, |name| {
            names.push(name.to_vec());
            true
        }) {
            reply.error(e.as_errno());
            return;
        }

        let mut entries: Vec<(u64, FileType, Vec<u8>)> = vec![
            (ino, FileType::Directory, b".".to_vec()),
            (ino, FileType::Directory, b"..".to_vec()),
        ];
        for name in &names {
            let child_path = Self::child_path(&path, OsStr::from_bytes(name));
            if let Ok(attr) = self.fs.getattr(&child_path) {
                let kind = match attr.kind {
                    Kind::File => FileType::RegularFile,
                    Kind::Dir => FileType::Directory,
                };
                let child_ino = attr.inode_id as u64 + 1;
                self.remember(&attr, child_path);
                entries.push((child_ino, kind, name.clone()));
            }
        }

        for (i, (child_ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(child_ino, (i + 1) as i64, kind, OsStr::from_bytes(&name)) {
                break;
            }
        }
        reply.ok();
    }
}
