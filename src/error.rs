//! Abstract error kinds (§7) and their mapping onto POSIX error codes.
//!
//! Grounded on the `thiserror`-based `SFSError` of the pack's other
//! from-scratch FUSE filesystem (`allancalix/simplefs`), rather than the
//! teacher's plain `io::Result` + `eprintln!` convention: the dispatcher
//! needs a typed error it can map to an `errno` on the FUSE reply path,
//! which `io::Result<T, String>`-style error handling does not give us.

use thiserror::Error;

/// An error produced by the filesystem core.
#[derive(Error, Debug)]
pub enum Error {
    /// The resolver could not locate a path component.
    #[error("no such file or directory")]
    NotFound,
    /// A path component exceeded `MAX_NAME_LEN` bytes.
    #[error("file name too long")]
    NameTooLong,
    /// A non-directory inode was used as a directory during resolution.
    #[error("not a directory")]
    NotDirectory,
    /// `mkdir`'s target already exists.
    #[error("file exists")]
    Exists,
    /// `rmdir` was called on a directory that still has children.
    #[error("directory not empty")]
    NotEmpty,
    /// The free-block or free-inode allocator is exhausted.
    #[error("no space left on device")]
    NoSpace,
    /// The open-file handle table is full.
    #[error("too many open files")]
    TooManyOpen,
    /// A path given to the resolver was not absolute.
    #[error("invalid path")]
    InvalidPath,
    /// `readdir`'s filler signalled that its buffer is full.
    #[error("out of memory")]
    OutOfMemory,
    /// A lower-level I/O failure against the backing image.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Maps this error to the POSIX error code the bridge should report.
    pub fn as_errno(&self) -> i32 {
        match self {
            Error::NotFound => libc::ENOENT,
            Error::NameTooLong => libc::ENAMETOOLONG,
            Error::NotDirectory => libc::ENOTDIR,
            Error::Exists => libc::EEXIST,
            Error::NotEmpty => libc::ENOTEMPTY,
            Error::NoSpace => libc::ENOSPC,
            Error::TooManyOpen => libc::ENFILE,
            Error::InvalidPath => libc::EIO,
            Error::OutOfMemory => libc::ENOMEM,
            Error::Io(_) => libc::EIO,
        }
    }
}

/// Convenience alias for results produced by the filesystem core.
pub type Result<T> = std::result::Result<T, Error>;
