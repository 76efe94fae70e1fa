//! On-disk filesystem: superblock, logging, block allocation, inodes,
//! directories, path resolution, symlinks, and the composite operations
//! layer built on top of them.
//!
//! Grounded on the teacher's `fs/ufs/mod.rs` `Ufs` struct: the same five
//! pieces (superblock, log, block allocator, inode table, buffer cache)
//! composed the same way. The teacher stores them behind a lazily
//! initialized static (`Sleepablelock<Option<Superblock>>` etc.) because
//! it boots before any disk is attached; this crate is handed a device up
//! front, so [`FileSystem::mount`] builds all of it eagerly and there is
//! no "not yet initialized" state to model.

mod balloc;
mod inode;
mod log;
pub mod mkfs;
mod ops;
mod path;
mod stat;
mod superblock;

use zerocopy::FromBytes;

use crate::bio::{Bio, Buf};
use crate::disk::BlockDevice;
use crate::lock::SleepableLock;
use inode::Itable;
use log::Log;
use superblock::RawSuperblock;

pub use inode::{InodeGuard, InodeType, RcInode};
pub use ops::OpenFlags;
pub use path::{FileName, Path};
pub use stat::Stat;
pub use superblock::{Superblock, FSMAGIC};
pub use crate::param::{ROOTDEV, ROOTINO};

pub struct FileSystem {
    dev: u32,
    superblock: Superblock,
    bio: Bio,
    log: SleepableLock<Log>,
    itable: Itable,
}

impl FileSystem {
    /// Mounts `device` as device number `dev`: reads the superblock off
    /// block 1 and replays any transaction that committed but was not yet
    /// installed before a prior crash.
    pub fn mount(dev: u32, device: &'static dyn BlockDevice) -> Self {
        let bio = Bio::new(device);
        let sb = {
            let buf = bio.bread(dev, 1);
            let raw = RawSuperblock::read_from_prefix(&buf[..]).expect("mount: superblock misaligned");
            Superblock::from_raw(&raw)
        };

        let mut log = Log::new(dev, sb.logstart, sb.nlog);
        log.recover_from_log(&bio);

        Self {
            dev,
            superblock: sb,
            bio,
            log: SleepableLock::new("log", log),
            itable: Itable::new(),
        }
    }

    /// The root directory inode, for the embedder to seed its own `cwd`
    /// state with — this crate holds no current-directory state itself
    /// (spec §1 Non-goals).
    pub fn root(&self) -> RcInode<'_> {
        self.iget(self.dev, ROOTINO)
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Starts a transaction. Composite operations (`create`, `link`, ...)
    /// bracket themselves; an embedder driving `InodeGuard::write` or
    /// `InodeGuard::truncate` directly against an already-open inode must
    /// bracket that call itself, the same way a syscall layer would
    /// bracket `sys_write` around a raw `writei`.
    pub fn begin_op(&self) {
        self.log.begin_op()
    }

    /// Ends a transaction started with [`Self::begin_op`]. Commits if this
    /// was the last outstanding operation.
    pub fn end_op(&self) {
        self.log.end_op(&self.bio)
    }

    fn log_write(&self, buf: Buf<'_>) {
        self.log.lock().record(&self.bio, buf);
    }
}
