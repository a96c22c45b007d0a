//! The in-memory open-file handle table (§3): a fixed-size array, process
//! local, destroyed at unmount. Grounded on `sfs.c`'s `allocateNextHandle`/
//! `freeHandle`, generalized from a global array into a field owned by the
//! [`crate::filesystem::Filesystem`] context (§9).

use crate::error::{Error, Result};
use crate::layout::NUM_OPEN_FILES;

/// An open file's state: which inode it refers to, the flags it was opened
/// with, and its current read/write cursor.
#[derive(Debug, Clone, Copy)]
pub struct OpenFile {
    pub inode_id: u32,
    pub flags: i32,
    pub cursor: u64,
}

/// A fixed-size table of open-file slots.
pub struct HandleTable {
    slots: Vec<Option<OpenFile>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            slots: vec![None; NUM_OPEN_FILES],
        }
    }

    /// Allocates a free slot for `inode_id`, returning its handle index.
    pub fn allocate(&mut self, inode_id: u32, flags: i32) -> Result<usize> {
        let slot = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(Error::TooManyOpen)?;
        self.slots[slot] = Some(OpenFile {
            inode_id,
            flags,
            cursor: 0,
        });
        Ok(slot)
    }

    /// Frees the handle at `index`.
    pub fn release(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = None;
        }
    }

    pub fn get(&self, index: usize) -> Option<&OpenFile> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_release_round_trip() {
        let mut table = HandleTable::new();
        let h = table.allocate(3, 0).unwrap();
        assert_eq!(table.get(h).unwrap().inode_id, 3);
        table.release(h);
        assert!(table.get(h).is_none());
    }

    #[test]
    fn exhausts_after_num_open_files() {
        let mut table = HandleTable::new();
        for i in 0..NUM_OPEN_FILES {
            table.allocate(i as u32, 0).unwrap();
        }
        assert!(matches!(table.allocate(0, 0), Err(Error::TooManyOpen)));
    }
}
