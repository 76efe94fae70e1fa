//! Offline disk formatter. Test/tooling only, not part of the runtime
//! operation surface: [`FileSystem::mount`] only ever reads a layout this
//! produced. Grounded on the reference `mkfs` tool
//! (`examples/Yuleo1-octox/src/mkfs/main.rs`): same disk layout arithmetic
//! (`[boot | super | log | inodes | bitmap | data]`) and the same
//! "zero everything, write the superblock, hand-build the root directory"
//! sequence, just writing through a [`BlockDevice`] instead of a plain
//! file opened by path.

use zerocopy::AsBytes;

use super::inode::{Dirent, InodeType, RawDinode};
use super::path::FileName;
use super::superblock::{Superblock, BPB, IPB};
use crate::disk::BlockDevice;
use crate::param::{BSIZE, DIRENT_SIZE, LOGSIZE, ROOTINO};

/// Formats a fresh, empty file system of `total_blocks` blocks with room
/// for `ninodes` inodes onto `device`, including a root directory holding
/// only `.` and `..`. Returns the superblock `FileSystem::mount` would
/// read back from it.
pub fn format(device: &dyn BlockDevice, total_blocks: u32, ninodes: u32) -> Superblock {
    let nlog = LOGSIZE as u32;
    let ninodeblocks = ninodes / IPB + 1;
    let nbitmap = total_blocks / BPB + 1;
    let nmeta = 2 + nlog + ninodeblocks + nbitmap;
    assert!(
        total_blocks > nmeta,
        "format: disk too small to hold its own metadata"
    );
    let nblocks = total_blocks - nmeta;

    let zero = [0u8; BSIZE];
    for b in 0..total_blocks {
        device.write_block(b, &zero);
    }

    let sb = Superblock {
        size: total_blocks,
        nblocks,
        ninodes,
        nlog,
        logstart: 2,
        inodestart: 2 + nlog,
        bmapstart: 2 + nlog + ninodeblocks,
    };
    write_superblock(device, &sb);

    let root_block = nmeta;
    write_root_inode(device, &sb, root_block);
    write_bitmap(device, &sb, nmeta + 1);

    sb
}

fn write_superblock(device: &dyn BlockDevice, sb: &Superblock) {
    let raw = sb.to_raw();
    let mut buf = [0u8; BSIZE];
    buf[..core::mem::size_of_val(&raw)].copy_from_slice(raw.as_bytes());
    device.write_block(1, &buf);
}

fn write_root_inode(device: &dyn BlockDevice, sb: &Superblock, data_block: u32) {
    let dot = FileName::from_bytes(b".").expect("'.' is always a valid name");
    let dotdot = FileName::from_bytes(b"..").expect("'..' is always a valid name");

    let mut de0 = Dirent::empty();
    de0.set(ROOTINO as u16, &dot);
    let mut de1 = Dirent::empty();
    de1.set(ROOTINO as u16, &dotdot);

    let mut buf = [0u8; BSIZE];
    buf[..DIRENT_SIZE].copy_from_slice(de0.as_bytes());
    buf[DIRENT_SIZE..2 * DIRENT_SIZE].copy_from_slice(de1.as_bytes());
    device.write_block(data_block, &buf);

    let bno = sb.iblock(ROOTINO);
    let mut iblock = [0u8; BSIZE];
    device.read_block(bno, &mut iblock);
    let idx = (ROOTINO % IPB) as usize;

    let mut raw = RawDinode::default();
    raw.typ = InodeType::Dir.to_raw();
    raw.nlink = 2;
    raw.size = 2 * DIRENT_SIZE as u32;
    raw.addrs[0] = data_block;

    let sz = core::mem::size_of::<RawDinode>();
    iblock[idx * sz..(idx + 1) * sz].copy_from_slice(raw.as_bytes());
    device.write_block(bno, &iblock);
}

fn write_bitmap(device: &dyn BlockDevice, sb: &Superblock, used: u32) {
    assert!(
        used <= BPB,
        "format: metadata plus root spill past the first bitmap block"
    );
    let mut buf = [0u8; BSIZE];
    for i in 0..used {
        buf[(i / 8) as usize] |= 1 << (i % 8);
    }
    device.write_block(sb.bmapstart, &buf);
}
