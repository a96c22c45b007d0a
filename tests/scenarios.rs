//! Black-box scenarios against a real backing image file, exercising the
//! dispatcher the way the FUSE bridge would: one `Filesystem` per image,
//! no in-memory shortcuts.

use sfs::block::FileBlockDevice;
use sfs::error::Error;
use sfs::filesystem::Filesystem;
use sfs::inode::Kind;
use tempfile::NamedTempFile;

fn mounted() -> Filesystem<FileBlockDevice> {
    // `FileBlockDevice::open` takes its own file descriptor, so the backing
    // path can be unlinked by `NamedTempFile`'s drop without disturbing it.
    let image = NamedTempFile::new().unwrap();
    let dev = FileBlockDevice::open(image.path()).unwrap();
    Filesystem::mount(dev).unwrap()
}

#[test]
fn formats_fresh_image_with_empty_root() {
    let mut fs = mounted();
    let attr = fs.getattr(b"/").unwrap();
    assert_eq!(attr.kind, Kind::Dir);
    assert_eq!(attr.child_count, 0);
}

#[test]
fn nested_directories_and_files_are_reachable() {
    let mut fs = mounted();
    fs.mkdir(b"/a").unwrap();
    fs.mkdir(b"/a/b").unwrap();
    let h = fs.create(b"/a/b/c.txt").unwrap();
    fs.write(h, b"payload", 0).unwrap();
    fs.release(h);

    let attr = fs.getattr(b"/a/b/c.txt").unwrap();
    assert_eq!(attr.kind, Kind::File);
    assert_eq!(attr.size, 7);

    let mut names = Vec::new();
    fs.readdir(b"/a/b", |name| {
        names.push(name.to_vec());
        true
    })
    .unwrap();
    assert_eq!(names, vec![b"c.txt".to_vec()]);
}

#[test]
fn large_write_crosses_direct_into_single_indirect() {
    let mut fs = mounted();
    let h = fs.create(b"/big").unwrap();

    // 12 direct blocks plus a couple into the single-indirect range.
    let len = 14 * 4096;
    let pattern: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    let written = fs.write(h, &pattern, 0).unwrap();
    assert_eq!(written, len as u64);

    let back = fs.read(h, len as u64, 0).unwrap();
    assert_eq!(back, pattern);

    let attr = fs.getattr(b"/big").unwrap();
    assert_eq!(attr.size, len as u64);
    fs.release(h);
}

#[test]
fn partial_read_past_eof_returns_only_what_exists() {
    let mut fs = mounted();
    let h = fs.create(b"/f").unwrap();
    fs.write(h, b"0123456789", 0).unwrap();

    // Ask for 100 bytes starting 5 bytes in; only 5 bytes remain.
    let data = fs.read(h, 100, 5).unwrap();
    assert_eq!(data, b"56789");

    // Entirely past EOF comes back empty, not an error.
    let data = fs.read(h, 10, 1000).unwrap();
    assert!(data.is_empty());
    fs.release(h);
}

#[test]
fn unlink_reclaims_blocks_and_inode() {
    let mut fs = mounted();
    let (blocks_before, inodes_before) = fs.free_counts();

    let h = fs.create(b"/f").unwrap();
    fs.write(h, &vec![1u8; 5 * 4096], 0).unwrap();
    fs.release(h);
    assert_ne!(fs.free_counts(), (blocks_before, inodes_before));

    fs.unlink(b"/f").unwrap();
    assert_eq!(fs.free_counts(), (blocks_before, inodes_before));
    assert!(matches!(fs.getattr(b"/f"), Err(Error::NotFound)));
}

#[test]
fn rmdir_refuses_nonempty_directory() {
    let mut fs = mounted();
    fs.mkdir(b"/a").unwrap();
    let h = fs.create(b"/a/f").unwrap();
    fs.release(h);

    assert!(matches!(fs.rmdir(b"/a"), Err(Error::NotEmpty)));
    fs.unlink(b"/a/f").unwrap();
    fs.rmdir(b"/a").unwrap();
    assert!(matches!(fs.getattr(b"/a"), Err(Error::NotFound)));
}

#[test]
fn remounting_an_existing_image_preserves_contents() {
    let image = NamedTempFile::new().unwrap();
    {
        let dev = FileBlockDevice::open(image.path()).unwrap();
        let mut fs = Filesystem::mount(dev).unwrap();
        let h = fs.create(b"/persisted.txt").unwrap();
        fs.write(h, b"still here", 0).unwrap();
        fs.release(h);
    }
    {
        let dev = FileBlockDevice::open(image.path()).unwrap();
        let mut fs = Filesystem::mount(dev).unwrap();
        let attr = fs.getattr(b"/persisted.txt").unwrap();
        assert_eq!(attr.size, 10);
        let h = fs.open(b"/persisted.txt", 0).unwrap();
        let data = fs.read(h, 10, 0).unwrap();
        assert_eq!(data, b"still here");
    }
}
