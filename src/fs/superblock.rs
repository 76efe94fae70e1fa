//! On-disk superblock: read-only at runtime, written offline by `mkfs`.
//!
//! Disk layout: `[ boot | super | log | inodes | bitmap | data ]`. Block 1
//! holds the superblock. Field order and the magic constant are bit-exact
//! per the on-disk format this crate's `mkfs` produces.

use zerocopy::{AsBytes, FromBytes};

use crate::param::BSIZE;
use super::inode::RawDinode;

pub const FSMAGIC: u32 = 0x10203040;

/// Bits per bitmap block.
pub const BPB: u32 = (BSIZE * 8) as u32;

/// Inodes per block.
pub const IPB: u32 = (BSIZE / core::mem::size_of::<RawDinode>()) as u32;

#[derive(Copy, Clone, Debug, Default, AsBytes, FromBytes)]
#[repr(C)]
pub struct RawSuperblock {
    pub magic: u32,
    pub size: u32,
    pub nblocks: u32,
    pub ninodes: u32,
    pub nlog: u32,
    pub logstart: u32,
    pub inodestart: u32,
    pub bmapstart: u32,
}

#[derive(Copy, Clone, Debug)]
pub struct Superblock {
    pub size: u32,
    pub nblocks: u32,
    pub ninodes: u32,
    pub nlog: u32,
    pub logstart: u32,
    pub inodestart: u32,
    pub bmapstart: u32,
}

impl Superblock {
    pub fn from_raw(raw: &RawSuperblock) -> Self {
        assert_eq!(raw.magic, FSMAGIC, "superblock: bad magic");
        Self {
            size: raw.size,
            nblocks: raw.nblocks,
            ninodes: raw.ninodes,
            nlog: raw.nlog,
            logstart: raw.logstart,
            inodestart: raw.inodestart,
            bmapstart: raw.bmapstart,
        }
    }

    pub fn to_raw(&self) -> RawSuperblock {
        RawSuperblock {
            magic: FSMAGIC,
            size: self.size,
            nblocks: self.nblocks,
            ninodes: self.ninodes,
            nlog: self.nlog,
            logstart: self.logstart,
            inodestart: self.inodestart,
            bmapstart: self.bmapstart,
        }
    }

    /// Block containing inode `i`.
    pub fn iblock(&self, i: u32) -> u32 {
        i / IPB + self.inodestart
    }

    /// Bitmap block containing the allocation bit for data block `b`.
    pub fn bblock(&self, b: u32) -> u32 {
        b / BPB + self.bmapstart
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sb() -> Superblock {
        Superblock {
            size: 10_000,
            nblocks: 9_000,
            ninodes: 200,
            nlog: 30,
            logstart: 2,
            inodestart: 32,
            bmapstart: 45,
        }
    }

    #[test]
    fn iblock_addresses_the_containing_block() {
        let sb = sb();
        assert_eq!(sb.iblock(0), sb.inodestart);
        assert_eq!(sb.iblock(IPB - 1), sb.inodestart);
        assert_eq!(sb.iblock(IPB), sb.inodestart + 1);
    }

    #[test]
    fn bblock_addresses_the_containing_bitmap_block() {
        let sb = sb();
        assert_eq!(sb.bblock(0), sb.bmapstart);
        assert_eq!(sb.bblock(BPB - 1), sb.bmapstart);
        assert_eq!(sb.bblock(BPB), sb.bmapstart + 1);
    }

    #[test]
    fn raw_roundtrip_preserves_fields_and_magic() {
        let sb = sb();
        let raw = sb.to_raw();
        assert_eq!(raw.magic, FSMAGIC);
        let back = Superblock::from_raw(&raw);
        assert_eq!(back.size, sb.size);
        assert_eq!(back.ninodes, sb.ninodes);
        assert_eq!(back.bmapstart, sb.bmapstart);
    }

    #[test]
    #[should_panic(expected = "bad magic")]
    fn bad_magic_panics() {
        let mut raw = sb().to_raw();
        raw.magic = 0xdead_beef;
        Superblock::from_raw(&raw);
    }
}
