//! `stat`-style inode metadata snapshot, returned to the embedder.
//!
//! Grounded on the teacher's `fs/stat.rs` / `Ufs::inode_stat`: same field
//! set, read out from the locked inode under its sleep-lock.

use super::inode::{InodeGuard, InodeType};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Stat {
    pub dev: u32,
    pub inum: u32,
    pub typ: InodeType,
    pub nlink: u16,
    pub size: u32,
}

impl InodeGuard<'_> {
    pub fn stat(&self) -> Stat {
        Stat {
            dev: self.dev(),
            inum: self.inum(),
            typ: self.typ,
            nlink: self.nlink,
            size: self.size,
        }
    }
}
