//! Group-commit redo log (spec §4.2).
//!
//! A transaction contains the updates of possibly many FS operations; the
//! log only commits once none are outstanding, so there is never a need to
//! reason about a commit racing an uncommitted operation. Grounded
//! directly on the teacher's `fs/ufs/log.rs`: same state machine, same
//! absorption behavior in `record` (this crate's `log_write`), same
//! commit point (`write_head`, called once with the real block list and
//! again to erase it).
//!
//! On-disk log format: a header block listing the logged block numbers,
//! followed by that many data blocks. Log appends are synchronous.

use arrayvec::ArrayVec;
use zerocopy::{AsBytes, FromBytes};

use crate::bio::{Bio, Buf};
use crate::lock::SleepableLock;
use crate::param::{BSIZE, LOGSIZE, MAXOPBLOCKS};

pub struct Log {
    dev: u32,
    start: u32,
    size: u32,
    /// How many FS operations are currently executing.
    outstanding: u32,
    /// Set while a commit is in flight; blocks new transactions from
    /// starting even though the lock itself is released during the commit.
    committing: bool,
    /// Block numbers written this transaction, in log order. Doubles as
    /// the in-memory mirror of the on-disk header.
    bufs: ArrayVec<u32, LOGSIZE>,
}

#[derive(Copy, Clone, Debug, Default, AsBytes, FromBytes)]
#[repr(C)]
struct LogHeader {
    n: u32,
    block: [u32; LOGSIZE],
}

static_assertions::const_assert!(core::mem::size_of::<LogHeader>() <= BSIZE);

impl Log {
    pub(crate) fn new(dev: u32, start: u32, size: u32) -> Self {
        Self {
            dev,
            start,
            size,
            outstanding: 0,
            committing: false,
            bufs: ArrayVec::new(),
        }
    }

    /// Copies every logged block from the log area to its home location.
    fn install_trans(&mut self, bio: &Bio) {
        for (tail, &blockno) in self.bufs.iter().enumerate() {
            let lbuf = bio.bread(self.dev, self.start + tail as u32 + 1);
            let mut dbuf = bio.bread(self.dev, blockno);
            dbuf.copy_from_slice(&*lbuf);
            bio.bwrite(&mut dbuf);
        }
    }

    /// Loads the on-disk header into `bufs`, picking up any transaction
    /// that committed but was not yet installed before a crash.
    fn read_head(&mut self, bio: &Bio) {
        let buf = bio.bread(self.dev, self.start);
        let hdr = LogHeader::read_from_prefix(&buf[..]).expect("log: header misaligned");
        self.bufs.clear();
        for &b in &hdr.block[..hdr.n as usize] {
            self.bufs.push(b);
        }
    }

    /// Writes the in-memory block list to the on-disk header. This is the
    /// true commit point: a crash before this write leaves the log empty
    /// on replay; a crash after it guarantees replay installs every block.
    fn write_head(&self, bio: &Bio) {
        let mut buf = bio.bread(self.dev, self.start);
        let mut hdr = LogHeader::default();
        hdr.n = self.bufs.len() as u32;
        hdr.block[..self.bufs.len()].copy_from_slice(&self.bufs);
        buf[..core::mem::size_of::<LogHeader>()].copy_from_slice(hdr.as_bytes());
        bio.bwrite(&mut buf);
    }

    pub(crate) fn recover_from_log(&mut self, bio: &Bio) {
        self.read_head(bio);
        self.install_trans(bio);
        self.bufs.clear();
        self.write_head(bio);
    }

    /// Copies each logged block's current cached contents into the log
    /// area.
    fn write_log(&self, bio: &Bio) {
        for (tail, &blockno) in self.bufs.iter().enumerate() {
            let mut to = bio.bread(self.dev, self.start + tail as u32 + 1);
            let from = bio.bread(self.dev, blockno);
            to.copy_from_slice(&*from);
            bio.bwrite(&mut to);
        }
    }

    fn commit(&mut self, bio: &Bio) {
        if self.bufs.is_empty() {
            return;
        }
        self.write_log(bio);
        self.write_head(bio);
        self.install_trans(bio);
        for &blockno in &self.bufs {
            bio.bunpin(self.dev, blockno);
        }
        self.bufs.clear();
        self.write_head(bio);
    }

    /// Records that `buf` was modified by the current transaction, pinning
    /// it in the cache so it cannot be evicted before the commit installs
    /// it. Absorbs repeated writes to the same block within one
    /// transaction instead of logging it twice.
    pub(crate) fn record(&mut self, bio: &Bio, buf: Buf<'_>) {
        assert!(
            self.bufs.len() < LOGSIZE && (self.bufs.len() as u32) < self.size - 1,
            "log: transaction too big"
        );
        assert!(self.outstanding >= 1, "log_write: called outside a transaction");

        let dev = buf.dev();
        let blockno = buf.blockno();
        if !self.bufs.contains(&blockno) {
            bio.bpin(dev, blockno);
            self.bufs.push(blockno);
        }
    }
}

impl SleepableLock<Log> {
    /// Called at the start of each FS operation. Blocks if a commit is in
    /// flight or if this operation might exhaust the log's reserved
    /// space.
    pub fn begin_op(&self) {
        let mut guard = self.lock();
        loop {
            if guard.committing {
                guard.sleep();
            } else {
                let would_overflow = guard.bufs.len() as u32
                    + (guard.outstanding + 1) * MAXOPBLOCKS as u32
                    > LOGSIZE as u32;
                if would_overflow {
                    guard.sleep();
                } else {
                    guard.outstanding += 1;
                    break;
                }
            }
        }
    }

    /// Called at the end of each FS operation. Commits if this was the
    /// last outstanding operation.
    pub fn end_op(&self, bio: &Bio) {
        let mut guard = self.lock();
        guard.outstanding -= 1;
        assert!(!guard.committing, "end_op: called while already committing");

        if guard.outstanding == 0 {
            guard.committing = true;
            guard.reacquire_after(|| {
                // SAFETY: `committing` stays true for the entire unlocked
                // window, and nothing else reads or writes `Log` without
                // first taking this lock, so no other access is live.
                unsafe { &mut *self.get_mut_raw() }.commit(bio);
            });
            guard.committing = false;
        }

        // begin_op() may be waiting for log space that this end_op just
        // freed up.
        guard.wakeup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemBlockDevice;

    fn leak_device(nblocks: u32) -> &'static MemBlockDevice {
        Box::leak(Box::new(MemBlockDevice::new(nblocks)))
    }

    /// Spec §8 S6: modifying the same block five times in one transaction
    /// logs it exactly once.
    #[test]
    fn absorption_logs_a_repeated_block_once() {
        let dev = leak_device(16);
        let bio = Bio::new(dev);
        let mut log = Log::new(0, 1, 10);
        log.outstanding = 1;

        for i in 0..5u8 {
            let mut buf = bio.bread(0, 5);
            buf[0] = i;
            log.record(&bio, buf);
        }

        assert_eq!(log.bufs.len(), 1);
        assert_eq!(log.bufs[0], 5);
    }

    /// Spec §8 invariant 5 / S4: a crash after the header write (but before
    /// `install_trans`) is recovered on the next mount by replaying the log
    /// into home locations.
    #[test]
    fn recovery_replays_a_committed_but_uninstalled_transaction() {
        let dev = leak_device(16);
        // The working `Bio` models the volatile cache the live system uses.
        let bio = Bio::new(dev);
        let mut log = Log::new(0, 1, 10);
        log.outstanding = 1;

        let mut buf = bio.bread(0, 5);
        buf[0] = 0xAB;
        log.record(&bio, buf);

        // Simulate a crash between the header write (the commit point) and
        // `install_trans`: log the block and commit the header, but never
        // install it into its home location.
        log.write_log(&bio);
        log.write_head(&bio);

        // A fresh `Bio` over the same device has no cache to warm-read
        // from, so it sees exactly what was actually persisted: the home
        // block untouched, because `install_trans` never ran.
        let check = Bio::new(dev);
        assert_eq!(check.bread(0, 5)[0], 0, "home block must still be untouched");

        // "Reboot": a fresh `Log` over a fresh `Bio` recovers from the
        // on-disk header.
        let boot_bio = Bio::new(dev);
        let mut recovered = Log::new(0, 1, 10);
        recovered.recover_from_log(&boot_bio);

        assert_eq!(boot_bio.bread(0, 5)[0], 0xAB);
        assert_eq!(recovered.bufs.len(), 0, "recovery must erase the header");
    }

    /// A crash *before* the header write must leave home blocks untouched
    /// (spec §8 invariant 5, the other half).
    #[test]
    fn no_header_write_means_no_recovery_to_do() {
        let dev = leak_device(16);
        let bio = Bio::new(dev);
        let mut log = Log::new(0, 1, 10);
        log.outstanding = 1;

        let mut buf = bio.bread(0, 5);
        buf[0] = 0xCD;
        log.record(&bio, buf);
        log.write_log(&bio);
        // No write_head(): the transaction never committed, so the header
        // block on the real device is still all zero (n = 0).

        let boot_bio = Bio::new(dev);
        let mut recovered = Log::new(0, 1, 10);
        recovered.recover_from_log(&boot_bio);

        assert_eq!(
            boot_bio.bread(0, 5)[0],
            0,
            "home block must stay untouched"
        );
    }
}
