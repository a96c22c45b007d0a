//! Property-based checks of the invariants that must hold no matter what
//! sequence of operations produced the current state: free counters track
//! the bitmap, and create/unlink (mkdir/rmdir) round-trip back to the
//! starting free counts.

use proptest::prelude::*;
use sfs::block::FileBlockDevice;
use sfs::filesystem::Filesystem;
use tempfile::NamedTempFile;

fn mounted() -> Filesystem<FileBlockDevice> {
    let image = NamedTempFile::new().unwrap();
    let dev = FileBlockDevice::open(image.path()).unwrap();
    Filesystem::mount(dev).unwrap()
}

#[derive(Debug, Clone)]
enum Op {
    CreateFile(String),
    WriteBlocks(String, u8),
    UnlinkFile(String),
    MakeDir(String),
    RemoveDir(String),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    // Files and directories draw from disjoint name pools so a create and a
    // mkdir can never collide on the same path and leave the other op
    // operating on the wrong kind of inode.
    let file_name = "f_[a-z]{1,8}";
    let dir_name = "d_[a-z]{1,8}";
    prop_oneof![
        file_name.prop_map(Op::CreateFile),
        (file_name, 0u8..4).prop_map(|(n, b)| Op::WriteBlocks(n, b)),
        file_name.prop_map(Op::UnlinkFile),
        dir_name.prop_map(Op::MakeDir),
        dir_name.prop_map(Op::RemoveDir),
    ]
}

proptest! {
    /// After any sequence of creates/writes/unlinks/mkdirs/rmdirs (each of
    /// which may legitimately fail, e.g. unlinking something that was never
    /// created), the free-block counter never goes negative or past the
    /// total, and removing everything this run created brings the free
    /// counters back to where they started.
    #[test]
    fn create_unlink_round_trips_to_starting_free_counts(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let mut fs = mounted();
        let baseline = fs.free_counts();

        let mut files: Vec<String> = Vec::new();
        let mut dirs: Vec<String> = Vec::new();

        for op in &ops {
            match op {
                Op::CreateFile(name) => {
                    let path = format!("/{name}");
                    if let Ok(h) = fs.create(path.as_bytes()) {
                        fs.release(h);
                        if !files.contains(name) {
                            files.push(name.clone());
                        }
                    }
                }
                Op::WriteBlocks(name, blocks) => {
                    let path = format!("/{name}");
                    if let Ok(h) = fs.open(path.as_bytes(), 0) {
                        let buf = vec![0xAAu8; *blocks as usize * 4096];
                        let _ = fs.write(h, &buf, 0);
                        fs.release(h);
                    }
                }
                Op::UnlinkFile(name) => {
                    let path = format!("/{name}");
                    if fs.unlink(path.as_bytes()).is_ok() {
                        files.retain(|f| f != name);
                    }
                }
                Op::MakeDir(name) => {
                    let path = format!("/{name}");
                    if fs.mkdir(path.as_bytes()).is_ok() {
                        dirs.push(name.clone());
                    }
                }
                Op::RemoveDir(name) => {
                    let path = format!("/{name}");
                    if fs.rmdir(path.as_bytes()).is_ok() {
                        dirs.retain(|d| d != name);
                    }
                }
            }

            let (free_blocks, free_inodes) = fs.free_counts();
            prop_assert!(free_blocks <= baseline.0);
            prop_assert!(free_inodes <= baseline.1);
        }

        for name in &files {
            let _ = fs.unlink(format!("/{name}").as_bytes());
        }
        for name in &dirs {
            let _ = fs.rmdir(format!("/{name}").as_bytes());
        }

        prop_assert_eq!(fs.free_counts(), baseline);
    }
}
