//! `sfs` — a user-space block-structured filesystem that stores an entire
//! hierarchical namespace inside one backing image file, mounted over FUSE.
//!
//! The module layout follows the component list of the core specification,
//! leaves first: [`block`] and [`layout`] at the bottom, [`allocator`] and
//! [`inode`]/[`directory`] above them, [`path`] and [`filesystem`] (the
//! dispatcher) on top, with [`fuse_adapter`] as the thin FUSE-facing shell.

pub mod allocator;
pub mod bitmap;
pub mod block;
pub mod directory;
pub mod error;
pub mod filesystem;
pub mod fuse_adapter;
pub mod handle;
pub mod inode;
pub mod layout;
pub mod path;
pub mod superblock;
