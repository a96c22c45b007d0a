//! On-disk layout constants.
//!
//! Mirrors the `#define`-based configuration of the original C sources and
//! the constants block at the top of the teacher's `mkfs/src/ext2.rs`:
//! everything that shapes the image is a compile-time constant, not a
//! runtime-configurable value.

/// Size of a block, in bytes.
pub const BLOCK_SIZE: u64 = 4096;

/// Total number of blocks in an image. Bounded by the single bitmap block:
/// `TOTAL_BLOCKS` bits must fit in one `BLOCK_SIZE`-byte block
/// (`4096 * 8 = 32768`).
pub const TOTAL_BLOCKS: u64 = 32768;

/// Total size of the backing image, in bytes.
pub const TOTAL_SIZE: u64 = TOTAL_BLOCKS * BLOCK_SIZE;

/// On-disk size of a single inode record, in bytes.
pub const INODE_SIZE: u64 = 128;

/// Number of inodes that fit in one block.
pub const INODES_PER_BLOCK: u64 = BLOCK_SIZE / INODE_SIZE;

/// Number of inode blocks `N`, chosen so that the inode table can address
/// every remaining data block individually:
/// `N = (TOTAL_BLOCKS - 1) / (BLOCK_SIZE / sizeof(Inode) + 1)`.
pub const NUM_INODE_BLOCKS: u64 = (TOTAL_BLOCKS - 1) / (INODES_PER_BLOCK + 1);

/// Total number of inodes addressable by the inode table.
pub const NUM_INODES: u64 = NUM_INODE_BLOCKS * INODES_PER_BLOCK;

/// Block id of the superblock.
pub const SUPERBLOCK_BLOCK: u64 = 0;

/// Block id of the first inode block.
pub const FIRST_INODE_BLOCK: u64 = 1;

/// Block id of the free-block bitmap.
pub const BITMAP_BLOCK: u64 = FIRST_INODE_BLOCK + NUM_INODE_BLOCKS;

/// Block id of the first data block.
pub const FIRST_DATA_BLOCK: u64 = BITMAP_BLOCK + 1;

/// Number of block-id entries per indirect block (`P` in the spec).
pub const PTRS_PER_BLOCK: u64 = BLOCK_SIZE / 4;

/// Number of direct block pointers carried in an inode.
pub const NUM_DIRECT: usize = 12;
/// Index of the single-indirect pointer in the inode's block map.
pub const SINGLE_INDIRECT: usize = 12;
/// Index of the double-indirect pointer in the inode's block map.
pub const DOUBLE_INDIRECT: usize = 13;
/// Total number of entries in an inode's block map.
pub const BLOCK_MAP_LEN: usize = 14;

/// Maximum representable file size, in bytes.
pub const MAX_FILE_SIZE: u64 =
    (NUM_DIRECT as u64 + PTRS_PER_BLOCK + PTRS_PER_BLOCK * PTRS_PER_BLOCK) * BLOCK_SIZE;

/// On-disk size of a single `FileEntry` record, in bytes.
pub const FILE_ENTRY_SIZE: u64 = 128;
/// Maximum length of a name stored in a `FileEntry`, NUL terminator excluded.
pub const MAX_NAME_LEN: usize = 123;
/// Number of `FileEntry` records per directory data block.
pub const ENTRIES_PER_BLOCK: u64 = BLOCK_SIZE / FILE_ENTRY_SIZE;
/// Maximum number of children a directory can hold (direct blocks only, §9).
pub const MAX_DIR_CHILDREN: u64 = ENTRIES_PER_BLOCK * NUM_DIRECT as u64;

/// Number of in-memory open-file handle slots.
pub const NUM_OPEN_FILES: usize = 128;

/// Inode number of the root directory.
pub const ROOT_INODE: u32 = 0;

/// Superblock magic number identifying a formatted image.
pub const SUPERBLOCK_MAGIC: u32 = 0xEF53;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inode_table_covers_itself() {
        assert_eq!(NUM_INODE_BLOCKS, 992);
        assert_eq!(NUM_INODES, 31744);
        assert_eq!(FIRST_DATA_BLOCK, NUM_INODE_BLOCKS + 2);
    }

    #[test]
    fn layout_fits_one_bitmap_block() {
        assert!(TOTAL_BLOCKS <= BLOCK_SIZE * 8);
    }

    #[test]
    fn max_file_size_is_about_4gib() {
        assert!(MAX_FILE_SIZE > 4_000_000_000);
        assert!(MAX_FILE_SIZE < 5_000_000_000);
    }
}
