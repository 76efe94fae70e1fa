//! Shared block-buffer cache.
//!
//! A fixed pool of `NBUF` buffers, sharded into `NBUCKET` hash buckets each
//! guarded by its own spin-lock. Buffer contents (and the `valid` bit) are
//! guarded by a per-buffer sleep-lock so a reader can block on disk I/O
//! without holding a bucket lock. Eviction is global LRU by `last_use`,
//! which requires taking every bucket lock in ascending index order; the
//! common case (a cache hit) only ever pays for its own bucket's lock.
//!
//! Mirrors the contract of the teacher's `bio.rs`, generalized from its
//! single-arena `MruArena` into the sharded-bucket design this crate's
//! concurrency model calls for.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::disk::BlockDevice;
use crate::lock::{LockLevel, SleepLock, SleepLockGuard, Spinlock};
use crate::param::{BSIZE, NBUCKET, NBUF};

/// Bucket-protected identity/refcount fields of one buffer slot.
#[derive(Clone, Copy)]
struct BufEntry {
    slot: usize,
    dev: u32,
    blockno: u32,
    refcnt: u32,
    last_use: u64,
}

struct Bucket {
    entries: Spinlock<Vec<BufEntry>>,
}

/// Sleep-lock-protected body of a buffer: its data and whether it has been
/// read from disk yet.
pub struct BufBody {
    valid: bool,
    data: [u8; BSIZE],
}

pub struct Bio {
    device: &'static dyn BlockDevice,
    buckets: [Bucket; NBUCKET],
    bodies: Vec<SleepLock<BufBody>>,
    tick: AtomicU64,
}

fn bucket_index(blockno: u32) -> usize {
    blockno as usize % NBUCKET
}

impl Bio {
    pub fn new(device: &'static dyn BlockDevice) -> Self {
        let buckets = core::array::from_fn(|_| Bucket {
            entries: Spinlock::new("bcache.bucket", LockLevel::BufBucket, Vec::new()),
        });
        let mut bodies = Vec::with_capacity(NBUF);
        for _ in 0..NBUF {
            bodies.push(SleepLock::new(
                "buffer",
                LockLevel::BufSleep,
                BufBody {
                    valid: false,
                    data: [0u8; BSIZE],
                },
            ));
        }
        // Every slot starts parked in bucket 0 with refcnt 0 so the initial
        // LRU scan can find it; identity is assigned on first use.
        for (slot, _) in bodies.iter().enumerate() {
            buckets[0].entries.lock().push(BufEntry {
                slot,
                dev: u32::MAX,
                blockno: u32::MAX,
                refcnt: 0,
                last_use: 0,
            });
        }
        Self {
            device,
            buckets,
            bodies,
            tick: AtomicU64::new(1),
        }
    }

    fn tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    /// Finds or allocates a cache slot for `(dev, blockno)` and returns it
    /// with `refcnt` already bumped, but without touching the sleep-lock.
    fn bget(&self, dev: u32, blockno: u32) -> usize {
        let idx = bucket_index(blockno);

        {
            let mut bucket = self.buckets[idx].entries.lock();
            if let Some(e) = bucket
                .iter_mut()
                .find(|e| e.dev == dev && e.blockno == blockno)
            {
                e.refcnt += 1;
                return e.slot;
            }
        }

        // Miss: take every bucket lock, ascending, then re-check.
        let mut guards: Vec<_> = self
            .buckets
            .iter()
            .map(|b| b.entries.lock())
            .collect();

        if let Some(e) = guards[idx]
            .iter_mut()
            .find(|e| e.dev == dev && e.blockno == blockno)
        {
            let slot = e.slot;
            e.refcnt += 1;
            drop_guards_reverse(guards);
            return slot;
        }

        // Global LRU: smallest last_use among refcnt == 0 entries, any bucket.
        let mut victim: Option<(usize, usize, u64)> = None; // (bucket, pos, last_use)
        for (b, guard) in guards.iter().enumerate() {
            for (pos, e) in guard.iter().enumerate() {
                if e.refcnt == 0 {
                    let better = match victim {
                        None => true,
                        Some((_, _, last)) => e.last_use < last,
                    };
                    if better {
                        victim = Some((b, pos, e.last_use));
                    }
                }
            }
        }
        let (vb, vp, _) = victim.expect("bget: no buffers");
        let entry = guards[vb].remove(vp);
        let slot = entry.slot;
        guards[idx].push(BufEntry {
            slot,
            dev,
            blockno,
            refcnt: 1,
            last_use: 0,
        });

        // Identity changed: the cached bytes no longer correspond to this
        // block until bread re-reads them. Must happen before the new entry
        // is visible to other bget callers (i.e. before the bucket locks are
        // dropped), or a concurrent bread of the same (dev, blockno) can
        // race the fast path, find `valid == true` from the evicted
        // buffer's old identity, and skip the disk read entirely.
        self.bodies[slot].lock().valid = false;
        drop_guards_reverse(guards);
        slot
    }

    /// Returns a buffer whose data reflects disk contents of `(dev,
    /// blockno)`, locked.
    pub fn bread(&self, dev: u32, blockno: u32) -> Buf<'_> {
        let slot = self.bget(dev, blockno);
        let mut guard = self.bodies[slot].lock();
        if !guard.valid {
            self.device.read_block(blockno, &mut guard.data);
            guard.valid = true;
        }
        Buf {
            bio: self,
            slot,
            dev,
            blockno,
            guard: Some(guard),
        }
    }

    /// Returns a locked buffer for `(dev, blockno)` with its contents
    /// zeroed and marked valid, without touching disk. Used to hand a
    /// freshly allocated block to a transaction.
    pub fn bread_zeroed(&self, dev: u32, blockno: u32) -> Buf<'_> {
        let slot = self.bget(dev, blockno);
        let mut guard = self.bodies[slot].lock();
        guard.data = [0u8; BSIZE];
        guard.valid = true;
        Buf {
            bio: self,
            slot,
            dev,
            blockno,
            guard: Some(guard),
        }
    }

    /// Writes `buf`'s data to disk synchronously. Caller must hold the lock
    /// (enforced by `buf` being a `&mut Buf`, which can only exist while
    /// locked).
    pub fn bwrite(&self, buf: &mut Buf<'_>) {
        let guard = buf.guard.as_ref().expect("bwrite: not locked");
        self.device.write_block(buf.blockno, &guard.data);
    }

    fn brelse(&self, slot: usize, dev: u32, blockno: u32) {
        let idx = bucket_index(blockno);
        let mut bucket = self.buckets[idx].entries.lock();
        if let Some(e) = bucket
            .iter_mut()
            .find(|e| e.slot == slot && e.dev == dev && e.blockno == blockno)
        {
            e.refcnt -= 1;
            if e.refcnt == 0 {
                e.last_use = self.tick();
            }
        } else {
            panic!("brelse: buffer not in its bucket");
        }
    }

    /// Increments `refcnt` for `(dev, blockno)` without touching the
    /// sleep-lock. Used by the log to keep a dirty buffer resident across
    /// operation boundaries.
    pub fn bpin(&self, dev: u32, blockno: u32) {
        let mut bucket = self.buckets[bucket_index(blockno)].entries.lock();
        let e = bucket
            .iter_mut()
            .find(|e| e.dev == dev && e.blockno == blockno)
            .expect("bpin: buffer not cached");
        e.refcnt += 1;
    }

    /// Decrements `refcnt` for `(dev, blockno)`, the inverse of [`Self::bpin`].
    pub fn bunpin(&self, dev: u32, blockno: u32) {
        let mut bucket = self.buckets[bucket_index(blockno)].entries.lock();
        let e = bucket
            .iter_mut()
            .find(|e| e.dev == dev && e.blockno == blockno)
            .expect("bunpin: buffer not cached");
        assert!(e.refcnt > 0, "bunpin: refcnt underflow");
        e.refcnt -= 1;
        if e.refcnt == 0 {
            e.last_use = self.tick();
        }
    }
}

fn drop_guards_reverse<T>(guards: Vec<T>) {
    for g in guards.into_iter().rev() {
        drop(g);
    }
}

/// A locked buffer. The sleep-lock is released (and the buffer released
/// back to the cache, stamping `last_use` if this was the last reference)
/// when this value is dropped.
pub struct Buf<'a> {
    bio: &'a Bio,
    slot: usize,
    dev: u32,
    blockno: u32,
    guard: Option<SleepLockGuard<'a, BufBody>>,
}

impl Buf<'_> {
    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn blockno(&self) -> u32 {
        self.blockno
    }
}

impl Deref for Buf<'_> {
    type Target = [u8; BSIZE];

    fn deref(&self) -> &Self::Target {
        &self.guard.as_ref().expect("use after release").data
    }
}

impl DerefMut for Buf<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard.as_mut().expect("use after release").data
    }
}

impl Drop for Buf<'_> {
    fn drop(&mut self) {
        self.guard = None;
        self.bio.brelse(self.slot, self.dev, self.blockno);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemBlockDevice;

    fn leak_device(nblocks: u32) -> &'static MemBlockDevice {
        Box::leak(Box::new(MemBlockDevice::new(nblocks)))
    }

    #[test]
    fn read_after_write_roundtrips() {
        let dev = leak_device(8);
        let bio = Bio::new(dev);
        {
            let mut b = bio.bread(0, 3);
            b[0] = 42;
            bio.bwrite(&mut b);
        }
        let b = bio.bread(0, 3);
        assert_eq!(b[0], 42);
    }

    #[test]
    fn concurrent_reads_of_same_block_see_one_identity() {
        let dev = leak_device(8);
        let bio = Bio::new(dev);
        let b1 = bio.bread(0, 1);
        drop(b1);
        let b2 = bio.bread(0, 1);
        assert_eq!(b2.blockno(), 1);
    }

    #[test]
    #[should_panic(expected = "no buffers")]
    fn exhausting_cache_without_release_panics() {
        let dev = leak_device((NBUF as u32) + 4);
        let bio = Bio::new(dev);
        let mut held = Vec::new();
        for i in 0..(NBUF as u32 + 1) {
            held.push(bio.bread(0, i));
        }
    }
}
