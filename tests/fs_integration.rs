//! End-to-end scenarios from spec §8 (S1, S2, S3, S5), driven entirely
//! through the crate's public API against an in-memory fixture image
//! built by `mkfs::format`.

use rv6fs::disk::MemBlockDevice;
use rv6fs::fs::mkfs;
use rv6fs::fs::{FileSystem, InodeType, OpenFlags, Path};

fn new_fs(nblocks: u32, ninodes: u32) -> FileSystem {
    let device: &'static MemBlockDevice = Box::leak(Box::new(MemBlockDevice::new(nblocks)));
    mkfs::format(device, nblocks, ninodes);
    FileSystem::mount(1, device)
}

/// S1 — create + read-back.
#[test]
fn create_write_read_back() {
    let fs = new_fs(2_000, 200);
    let root = fs.root();

    let mut ip = fs
        .create(Path::new("/a"), InodeType::File, 0, 0, &root)
        .expect("create /a");
    // `create` already returned outside its own transaction, so a direct
    // `write` against the already-open inode brackets its own, exactly as
    // a `sys_write` syscall layer would around a raw `writei`.
    fs.begin_op();
    let n = ip.write(b"hello", 0).expect("write");
    fs.end_op();
    assert_eq!(n, 5);
    assert_eq!(ip.size, 5);
    assert_eq!(ip.nlink, 1);

    let mut buf = [0u8; 5];
    let read = ip.read(&mut buf, 0);
    assert_eq!(read, 5);
    assert_eq!(&buf, b"hello");

    fs.iunlockput(ip);
}

/// S2 — hard link + unlink.
#[test]
fn hard_link_and_unlink() {
    let fs = new_fs(2_000, 200);
    let root = fs.root();

    let mut ip = fs
        .create(Path::new("/x"), InodeType::File, 0, 0, &root)
        .expect("create /x");
    let data = vec![7u8; 100];
    fs.begin_op();
    ip.write(&data, 0).expect("write 100 bytes");
    fs.end_op();
    let x_inum = ip.inum();
    let data_block = ip.addrs[0];
    assert_ne!(data_block, 0);
    fs.iunlockput(ip);

    fs.link(Path::new("/x"), Path::new("/y"), &root)
        .expect("link /x -> /y");

    let y = fs.namei(Path::new("/y"), &root).expect("namei /y");
    assert_eq!(y.inum, x_inum);
    let y_guard = y.lock();
    assert_eq!(y_guard.nlink, 2);
    fs.iunlockput(y_guard);

    fs.unlink(Path::new("/x"), &root).expect("unlink /x");
    assert!(matches!(
        fs.namei(Path::new("/x"), &root),
        Err(rv6fs::error::FsError::NotFound)
    ));

    let y = fs.namei(Path::new("/y"), &root).expect("namei /y after unlink /x");
    let y_guard = y.lock();
    assert_eq!(y_guard.nlink, 1);
    fs.iunlockput(y_guard);

    fs.unlink(Path::new("/y"), &root).expect("unlink /y");
    assert!(matches!(
        fs.namei(Path::new("/y"), &root),
        Err(rv6fs::error::FsError::NotFound)
    ));

    // The freed data block is the lowest free block; first-fit balloc must
    // hand it straight back out. `balloc`/`bfree` log their writes, so they
    // need an active transaction just like the composite ops above.
    fs.begin_op();
    let reallocated = fs.balloc();
    assert_eq!(reallocated, data_block);
    fs.bfree(reallocated);
    fs.end_op();
}

/// S3 — directory empty check.
#[test]
fn directory_must_be_empty_to_unlink() {
    let fs = new_fs(2_000, 200);
    let root = fs.root();

    fs.mkdir(Path::new("/d"), &root).expect("mkdir /d");
    fs.unlink(Path::new("/d"), &root).expect("unlink empty /d");

    fs.mkdir(Path::new("/d"), &root).expect("mkdir /d again");
    let ip = fs
        .create(Path::new("/d/f"), InodeType::File, 0, 0, &root)
        .expect("create /d/f");
    fs.iunlockput(ip);

    let err = fs.unlink(Path::new("/d"), &root).unwrap_err();
    assert_eq!(err, rv6fs::error::FsError::DirectoryNotEmpty);
}

/// S5 — symlink loop bound: `open` must fail with "too many links" rather
/// than looping forever.
#[test]
fn symlink_loop_is_bounded() {
    let fs = new_fs(2_000, 200);
    let root = fs.root();

    fs.symlink("/a", Path::new("/b"), &root).expect("symlink /b -> /a");
    fs.symlink("/b", Path::new("/a"), &root).expect("symlink /a -> /b");

    let err = fs
        .open(Path::new("/a"), OpenFlags::O_RDONLY, &root)
        .unwrap_err();
    assert_eq!(err, rv6fs::error::FsError::TooManyLinks);
}

/// `O_NOFOLLOW` must return the symlink itself, not chase it.
#[test]
fn o_nofollow_returns_the_symlink_inode() {
    let fs = new_fs(2_000, 200);
    let root = fs.root();

    let ip = fs
        .create(Path::new("/f"), InodeType::File, 0, 0, &root)
        .expect("create /f");
    fs.iunlockput(ip);
    fs.symlink("/f", Path::new("/s"), &root).expect("symlink /s -> /f");

    let ip = fs
        .open(Path::new("/s"), OpenFlags::O_NOFOLLOW, &root)
        .expect("open /s with O_NOFOLLOW");
    assert_eq!(ip.typ, InodeType::Symlink);
    fs.iunlockput(ip);
}

/// Writing past `off == size` is rejected; a sparse write can't skip ahead.
#[test]
fn write_past_end_of_file_is_rejected() {
    let fs = new_fs(2_000, 200);
    let root = fs.root();

    let mut ip = fs
        .create(Path::new("/g"), InodeType::File, 0, 0, &root)
        .expect("create /g");
    fs.begin_op();
    let err = ip.write(b"x", 10).unwrap_err();
    fs.end_op();
    assert_eq!(err, rv6fs::error::FsError::FileTooLarge);
    fs.iunlockput(ip);
}

/// A write spanning the direct/single-indirect boundary round-trips,
/// exercising `bmap`'s indirect-block allocation path.
#[test]
fn write_crossing_into_indirect_blocks_round_trips() {
    let fs = new_fs(4_000, 200);
    let root = fs.root();

    let mut ip = fs
        .create(Path::new("/big"), InodeType::File, 0, 0, &root)
        .expect("create /big");

    let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    fs.begin_op();
    let n = ip.write(&data, 0).expect("write 20000 bytes");
    fs.end_op();
    assert_eq!(n, data.len());
    assert_eq!(ip.size as usize, data.len());

    let mut out = vec![0u8; data.len()];
    let read = ip.read(&mut out, 0);
    assert_eq!(read, data.len());
    assert_eq!(out, data);

    fs.iunlockput(ip);
}
