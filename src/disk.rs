//! The block device collaborator.
//!
//! Everything above this trait is oblivious to what backs a block: a real
//! file, a ramdisk, a partition. Grounded on the `wsect`/`rsect` pair in
//! the reference `mkfs` tool, which is the only place in this codebase's
//! lineage that drives a disk image through ordinary file I/O rather than
//! a virtio queue.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use crate::param::BSIZE;

pub trait BlockDevice: Send + Sync {
    fn read_block(&self, blockno: u32, buf: &mut [u8; BSIZE]);
    fn write_block(&self, blockno: u32, buf: &[u8; BSIZE]);
}

/// A block device backed by a plain file, opened read-write.
pub struct FileBlockDevice {
    file: Mutex<File>,
}

impl FileBlockDevice {
    pub fn open(file: File) -> Self {
        Self {
            file: Mutex::new(file),
        }
    }

    fn seek_to(file: &mut File, blockno: u32) -> io::Result<()> {
        file.seek(SeekFrom::Start(blockno as u64 * BSIZE as u64))?;
        Ok(())
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_block(&self, blockno: u32, buf: &mut [u8; BSIZE]) {
        let mut file = self.file.lock().expect("FileBlockDevice poisoned");
        Self::seek_to(&mut file, blockno).expect("seek failed");
        file.read_exact(buf).expect("short read from disk image");
    }

    fn write_block(&self, blockno: u32, buf: &[u8; BSIZE]) {
        let mut file = self.file.lock().expect("FileBlockDevice poisoned");
        Self::seek_to(&mut file, blockno).expect("seek failed");
        file.write_all(buf).expect("short write to disk image");
        file.flush().expect("flush failed");
    }
}

/// An in-memory block device, for fast tests that don't need a real file.
pub struct MemBlockDevice {
    blocks: Mutex<Vec<[u8; BSIZE]>>,
}

impl MemBlockDevice {
    pub fn new(nblocks: u32) -> Self {
        Self {
            blocks: Mutex::new(vec![[0u8; BSIZE]; nblocks as usize]),
        }
    }
}

impl BlockDevice for MemBlockDevice {
    fn read_block(&self, blockno: u32, buf: &mut [u8; BSIZE]) {
        let blocks = self.blocks.lock().expect("MemBlockDevice poisoned");
        buf.copy_from_slice(&blocks[blockno as usize]);
    }

    fn write_block(&self, blockno: u32, buf: &[u8; BSIZE]) {
        let mut blocks = self.blocks.lock().expect("MemBlockDevice poisoned");
        blocks[blockno as usize].copy_from_slice(buf);
    }
}
