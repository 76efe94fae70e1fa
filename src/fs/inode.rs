//! On-disk inodes, the in-memory inode cache, and the block map.
//!
//! Two-tier protection (spec §4.4): the inode-table spin-lock guards the
//! slot array's `(dev, inum, ref)` fields only; each slot's sleep-lock
//! guards the cached on-disk fields once obtained. `valid` is written only
//! while the table spin-lock is held (by `iget`) or while the per-slot
//! sleep-lock is held (by `ilock`/`iput`), mirroring the benign race the
//! teacher's original C source relies on: a slot with `ref > 0` cannot be
//! reused by `iget`, so a plain atomic is enough to publish the bit across
//! threads without a third lock.

use std::sync::atomic::{AtomicBool, Ordering};

use zerocopy::{AsBytes, FromBytes};

use super::superblock::{IPB, Superblock};
use super::{FileName, FileSystem};
use crate::error::FsError;
use crate::lock::{LockLevel, SleepLock, SleepLockGuard, Spinlock};
use crate::param::{
    BSIZE, DIRENT_SIZE, DIRSIZ, MAXFILE, NDIRECT, NINDIRECT, NINODE,
};

/// On-disk inode record. Fixed at 64 bytes so `IPB = BSIZE / 64 = 16`
/// divides evenly, per spec §3.
#[derive(Copy, Clone, Debug, Default, AsBytes, FromBytes)]
#[repr(C)]
pub struct RawDinode {
    pub typ: u16,
    pub major: u16,
    pub minor: u16,
    pub nlink: u16,
    pub size: u32,
    pub addrs: [u32; NDIRECT + 2],
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawDinode>(), 64);
static_assertions::const_assert_eq!(BSIZE % core::mem::size_of::<RawDinode>(), 0);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InodeType {
    Free,
    File,
    Dir,
    Device,
    Symlink,
}

impl InodeType {
    fn from_raw(v: u16) -> Self {
        match v {
            0 => InodeType::Free,
            1 => InodeType::File,
            2 => InodeType::Dir,
            3 => InodeType::Device,
            4 => InodeType::Symlink,
            other => panic!("inode: corrupt on-disk type {other}"),
        }
    }

    pub(crate) fn to_raw(self) -> u16 {
        match self {
            InodeType::Free => 0,
            InodeType::File => 1,
            InodeType::Dir => 2,
            InodeType::Device => 3,
            InodeType::Symlink => 4,
        }
    }
}

/// The cached copy of an on-disk inode's fields, held behind the slot's
/// sleep-lock.
#[derive(Clone, Debug)]
pub struct InodeInner {
    pub typ: InodeType,
    pub major: u16,
    pub minor: u16,
    pub nlink: u16,
    pub size: u32,
    pub addrs: [u32; NDIRECT + 2],
}

impl InodeInner {
    fn from_raw(raw: &RawDinode) -> Self {
        Self {
            typ: InodeType::from_raw(raw.typ),
            major: raw.major,
            minor: raw.minor,
            nlink: raw.nlink,
            size: raw.size,
            addrs: raw.addrs,
        }
    }

    fn to_raw(&self) -> RawDinode {
        RawDinode {
            typ: self.typ.to_raw(),
            major: self.major,
            minor: self.minor,
            nlink: self.nlink,
            size: self.size,
            addrs: self.addrs,
        }
    }
}

/// A packed directory entry: exactly 16 bytes (spec §3/§6).
#[derive(Copy, Clone, Debug, Default, AsBytes, FromBytes)]
#[repr(C)]
pub struct Dirent {
    pub inum: u16,
    name: [u8; DIRSIZ],
}

static_assertions::const_assert_eq!(core::mem::size_of::<Dirent>(), DIRENT_SIZE);

impl Dirent {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.inum == 0
    }

    /// Name bytes with trailing NULs stripped. Accepts both the padded and
    /// unpadded (exactly `DIRSIZ` bytes, no terminator) on-disk forms, per
    /// spec §9(a).
    pub fn name_bytes(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(DIRSIZ);
        &self.name[..len]
    }

    pub fn set(&mut self, inum: u16, name: &FileName) {
        self.inum = inum;
        self.name = [0u8; DIRSIZ];
        let bytes = name.as_bytes();
        self.name[..bytes.len()].copy_from_slice(bytes);
    }
}

struct SlotMeta {
    dev: u32,
    inum: u32,
    refcnt: u32,
}

pub struct Itable {
    slots: Spinlock<Vec<SlotMeta>>,
    valid: Vec<AtomicBool>,
    bodies: Vec<SleepLock<InodeInner>>,
}

impl Itable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(NINODE);
        let mut valid = Vec::with_capacity(NINODE);
        let mut bodies = Vec::with_capacity(NINODE);
        for _ in 0..NINODE {
            slots.push(SlotMeta {
                dev: 0,
                inum: 0,
                refcnt: 0,
            });
            valid.push(AtomicBool::new(false));
            bodies.push(SleepLock::new(
                "inode",
                LockLevel::InodeSleep,
                InodeInner {
                    typ: InodeType::Free,
                    major: 0,
                    minor: 0,
                    nlink: 0,
                    size: 0,
                    addrs: [0; NDIRECT + 2],
                },
            ));
        }
        Self {
            slots: Spinlock::new("itable", LockLevel::InodeTable, slots),
            valid,
            bodies,
        }
    }
}

/// A live, ref-counted, unlocked reference to an in-memory inode slot.
///
/// Mirrors the teacher's `RcInode`: dropping it releases the reference
/// without examining link count. Use [`FileSystem::iput`] to release a
/// reference that might be the inode's last (which may free its blocks,
/// and so must run inside a transaction).
pub struct RcInode<'a> {
    fs: &'a FileSystem,
    slot: usize,
    pub dev: u32,
    pub inum: u32,
}

impl<'a> RcInode<'a> {
    /// Acquires the sleep-lock, loading the on-disk fields on first use.
    pub fn lock(self) -> InodeGuard<'a> {
        let fs = self.fs;
        let body = fs.itable.bodies[self.slot].lock();
        let guard = InodeGuard {
            ip: self,
            body,
        };
        guard.load_if_needed()
    }

    /// A fresh reference to the same inode (bumps the in-memory refcount).
    pub fn dup(&self) -> RcInode<'a> {
        let mut slots = self.fs.itable.slots.lock();
        slots[self.slot].refcnt += 1;
        RcInode {
            fs: self.fs,
            slot: self.slot,
            dev: self.dev,
            inum: self.inum,
        }
    }
}

impl Drop for RcInode<'_> {
    fn drop(&mut self) {
        let mut slots = self.fs.itable.slots.lock();
        assert!(slots[self.slot].refcnt > 0, "RcInode: refcount underflow");
        slots[self.slot].refcnt -= 1;
    }
}

/// An inode with its sleep-lock held; cached fields are guaranteed loaded.
pub struct InodeGuard<'a> {
    ip: RcInode<'a>,
    body: SleepLockGuard<'a, InodeInner>,
}

impl<'a> InodeGuard<'a> {
    fn load_if_needed(mut self) -> Self {
        let slot = self.ip.slot;
        if !self.ip.fs.itable.valid[slot].load(Ordering::Acquire) {
            let bno = self.ip.fs.superblock.iblock(self.ip.inum);
            let buf = self.ip.fs.bio.bread(self.ip.dev, bno);
            let idx = (self.ip.inum % IPB) as usize;
            let raw = dinode_at(&buf, idx);
            assert!(
                raw.typ != 0,
                "ilock: on-disk inode {} has type 0",
                self.ip.inum
            );
            *self.body = InodeInner::from_raw(raw);
            self.ip.fs.itable.valid[slot].store(true, Ordering::Release);
        }
        self
    }

    pub fn dev(&self) -> u32 {
        self.ip.dev
    }

    pub fn inum(&self) -> u32 {
        self.ip.inum
    }

    /// Releases the sleep-lock, returning the unlocked, still-referenced
    /// handle.
    pub fn unlock(self) -> RcInode<'a> {
        self.ip
    }

    /// Writes the cached fields through to the containing inode block via
    /// the log. Must be called inside a transaction.
    pub fn update(&mut self) {
        let bno = self.ip.fs.superblock.iblock(self.ip.inum);
        let mut buf = self.ip.fs.bio.bread(self.ip.dev, bno);
        let idx = (self.ip.inum % IPB) as usize;
        *dinode_at_mut(&mut buf, idx) = self.body.to_raw();
        self.ip.fs.log_write(buf);
    }

    /// Translates a logical block number into a disk block number,
    /// allocating direct/indirect/double-indirect blocks on first access
    /// (spec §4.4). Returns 0 if the allocator is out of space; the caller
    /// stops writing (spec §9(b)).
    fn bmap(&mut self, bn: usize) -> u32 {
        let fs = self.ip.fs;

        if bn < NDIRECT {
            let addr = self.body.addrs[bn];
            if addr == 0 {
                let new = fs.balloc();
                if new == 0 {
                    return 0;
                }
                self.body.addrs[bn] = new;
            }
            return self.body.addrs[bn];
        }

        let bn = bn - NDIRECT;
        if bn < NINDIRECT {
            return self.bmap_indirect(NDIRECT, bn);
        }

        let bn = bn - NINDIRECT;
        assert!(bn < NINDIRECT * NINDIRECT, "bmap: block out of range");

        let l1 = bn / NINDIRECT;
        let l2 = bn % NINDIRECT;

        let mut l1_addr = self.body.addrs[NDIRECT + 1];
        if l1_addr == 0 {
            l1_addr = fs.balloc();
            if l1_addr == 0 {
                return 0;
            }
            self.body.addrs[NDIRECT + 1] = l1_addr;
        }

        let mut l1_buf = fs.bio.bread(self.ip.dev, l1_addr);
        let mut l1_table = read_u32_table(&l1_buf);
        let mut l2_addr = l1_table[l1];
        if l2_addr == 0 {
            l2_addr = fs.balloc();
            if l2_addr == 0 {
                return 0;
            }
            l1_table[l1] = l2_addr;
            write_u32_table(&mut l1_buf, &l1_table);
            fs.log_write(l1_buf);
        } else {
            drop(l1_buf);
        }

        let mut l2_buf = fs.bio.bread(self.ip.dev, l2_addr);
        let mut l2_table = read_u32_table(&l2_buf);
        let mut target = l2_table[l2];
        if target == 0 {
            target = fs.balloc();
            if target == 0 {
                return 0;
            }
            l2_table[l2] = target;
            write_u32_table(&mut l2_buf, &l2_table);
            fs.log_write(l2_buf);
        }
        target
    }

    fn bmap_indirect(&mut self, addr_slot: usize, bn: usize) -> u32 {
        let fs = self.ip.fs;
        let mut ind_addr = self.body.addrs[addr_slot];
        if ind_addr == 0 {
            ind_addr = fs.balloc();
            if ind_addr == 0 {
                return 0;
            }
            self.body.addrs[addr_slot] = ind_addr;
        }
        let mut buf = fs.bio.bread(self.ip.dev, ind_addr);
        let mut table = read_u32_table(&buf);
        let mut target = table[bn];
        if target == 0 {
            target = fs.balloc();
            if target == 0 {
                return 0;
            }
            table[bn] = target;
            write_u32_table(&mut buf, &table);
            fs.log_write(buf);
        }
        target
    }

    /// Frees every block reachable from `addrs` and zeroes `size`. Must be
    /// called inside a transaction.
    pub fn truncate(&mut self) {
        let fs = self.ip.fs;
        let dev = self.ip.dev;

        for i in 0..NDIRECT {
            if self.body.addrs[i] != 0 {
                fs.bfree(self.body.addrs[i]);
                self.body.addrs[i] = 0;
            }
        }

        if self.body.addrs[NDIRECT] != 0 {
            let buf = fs.bio.bread(dev, self.body.addrs[NDIRECT]);
            let table = read_u32_table(&buf);
            drop(buf);
            for &a in table.iter() {
                if a != 0 {
                    fs.bfree(a);
                }
            }
            fs.bfree(self.body.addrs[NDIRECT]);
            self.body.addrs[NDIRECT] = 0;
        }

        if self.body.addrs[NDIRECT + 1] != 0 {
            let l1_buf = fs.bio.bread(dev, self.body.addrs[NDIRECT + 1]);
            let l1_table = read_u32_table(&l1_buf);
            drop(l1_buf);
            for &l1_addr in l1_table.iter() {
                if l1_addr != 0 {
                    let l2_buf = fs.bio.bread(dev, l1_addr);
                    let l2_table = read_u32_table(&l2_buf);
                    drop(l2_buf);
                    for &a in l2_table.iter() {
                        if a != 0 {
                            fs.bfree(a);
                        }
                    }
                    fs.bfree(l1_addr);
                }
            }
            fs.bfree(self.body.addrs[NDIRECT + 1]);
            self.body.addrs[NDIRECT + 1] = 0;
        }

        self.body.size = 0;
        self.update();
    }

    /// Reads up to `dst.len()` bytes starting at `off`, clamped to the
    /// inode's size. An unallocated logical block (a hole) ends the read
    /// early, same as end-of-file.
    pub fn read(&mut self, dst: &mut [u8], off: u32) -> usize {
        let size = self.body.size;
        if off >= size {
            return 0;
        }
        let n = (dst.len() as u32).min(size - off) as usize;
        let mut total = 0usize;
        while total < n {
            let cur = off as usize + total;
            let bn = cur / BSIZE;
            let boff = cur % BSIZE;
            let disk_bno = self.bmap(bn);
            if disk_bno == 0 {
                break;
            }
            let buf = self.ip.fs.bio.bread(self.ip.dev, disk_bno);
            let take = (n - total).min(BSIZE - boff);
            dst[total..total + take].copy_from_slice(&buf[boff..boff + take]);
            total += take;
        }
        total
    }

    /// Writes `src` at `off`, allocating blocks as needed via `bmap`.
    /// Rejects writes that would start past the current size or exceed
    /// `MAXFILE` blocks. Always calls `update()` even if `size` is
    /// unchanged, since indirect pointers may have been added.
    pub fn write(&mut self, src: &[u8], off: u32) -> Result<usize, FsError> {
        if off > self.body.size {
            return Err(FsError::FileTooLarge);
        }
        if (off as usize)
            .checked_add(src.len())
            .map(|end| end > MAXFILE * BSIZE)
            .unwrap_or(true)
        {
            return Err(FsError::FileTooLarge);
        }

        let mut total = 0usize;
        while total < src.len() {
            let cur = off as usize + total;
            let bn = cur / BSIZE;
            let boff = cur % BSIZE;
            let disk_bno = self.bmap(bn);
            if disk_bno == 0 {
                break;
            }
            let mut buf = self.ip.fs.bio.bread(self.ip.dev, disk_bno);
            let take = (src.len() - total).min(BSIZE - boff);
            buf[boff..boff + take].copy_from_slice(&src[total..total + take]);
            self.ip.fs.log_write(buf);
            total += take;
        }

        if off as usize + total > self.body.size as usize {
            self.body.size = off + total as u32;
        }
        self.update();
        Ok(total)
    }

    // --- directory layer (spec §4.5) ---

    fn dirent_at(&mut self, off: u32) -> Dirent {
        let mut raw = [0u8; DIRENT_SIZE];
        let n = self.read(&mut raw, off);
        assert_eq!(n, DIRENT_SIZE, "dirent_at: short directory read");
        Dirent::read_from(&raw[..]).expect("dirent_at: misaligned read")
    }

    fn write_dirent_at(&mut self, off: u32, de: &Dirent) {
        let n = self.write(de.as_bytes(), off).expect("write_dirent_at");
        assert_eq!(n, DIRENT_SIZE, "write_dirent_at: short write");
    }

    /// Linear scan for `name`; first match wins. Returns an `iget`'d,
    /// unlocked reference plus the byte offset of the entry.
    pub fn dirlookup(&mut self, name: &FileName) -> Option<(RcInode<'a>, u32)> {
        assert_eq!(self.body.typ, InodeType::Dir, "dirlookup: not a directory");
        let size = self.body.size;
        let mut off = 0;
        while off < size {
            let de = self.dirent_at(off);
            if !de.is_empty() && de.name_bytes() == name.as_bytes() {
                return Some((self.ip.fs.iget(self.ip.dev, de.inum as u32), off));
            }
            off += DIRENT_SIZE as u32;
        }
        None
    }

    /// Links `name -> inum` into this directory: fails if `name` is
    /// already present, otherwise reuses the first empty slot or appends.
    pub fn dirlink(&mut self, name: &FileName, inum: u32) -> Result<(), FsError> {
        if self.dirlookup(name).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let size = self.body.size;
        let mut off = 0;
        while off < size {
            let de = self.dirent_at(off);
            if de.is_empty() {
                break;
            }
            off += DIRENT_SIZE as u32;
        }

        let mut de = Dirent::empty();
        de.set(inum as u16, name);
        self.write_dirent_at(off, &de);
        Ok(())
    }

    /// Zeroes the directory entry at `off` (deletion in place).
    pub fn dirunlink_at(&mut self, off: u32) {
        let de = Dirent::empty();
        self.write_dirent_at(off, &de);
    }

    /// True iff every entry after the first two (`.` and `..`) is empty.
    pub fn is_dir_empty(&mut self) -> bool {
        let size = self.body.size;
        let mut off = 2 * DIRENT_SIZE as u32;
        while off < size {
            let de = self.dirent_at(off);
            if !de.is_empty() {
                return false;
            }
            off += DIRENT_SIZE as u32;
        }
        true
    }
}

impl std::ops::Deref for InodeGuard<'_> {
    type Target = InodeInner;

    fn deref(&self) -> &Self::Target {
        &self.body
    }
}

impl std::ops::DerefMut for InodeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.body
    }
}

fn dinode_at<'b>(buf: &'b [u8; BSIZE], idx: usize) -> &'b RawDinode {
    let bytes = &buf[idx * core::mem::size_of::<RawDinode>()..][..core::mem::size_of::<RawDinode>()];
    RawDinode::ref_from(bytes).expect("dinode_at: misaligned")
}

fn dinode_at_mut<'b>(buf: &'b mut [u8; BSIZE], idx: usize) -> &'b mut RawDinode {
    let sz = core::mem::size_of::<RawDinode>();
    let bytes = &mut buf[idx * sz..][..sz];
    RawDinode::mut_from(bytes).expect("dinode_at_mut: misaligned")
}

fn read_u32_table(buf: &[u8; BSIZE]) -> Vec<u32> {
    buf.chunks_exact(4)
        .map(|c| u32::from_ne_bytes(c.try_into().unwrap()))
        .collect()
}

fn write_u32_table(buf: &mut [u8; BSIZE], table: &[u32]) {
    for (chunk, v) in buf.chunks_exact_mut(4).zip(table.iter()) {
        chunk.copy_from_slice(&v.to_ne_bytes());
    }
}

impl FileSystem {
    /// Finds or creates an in-memory slot for `(dev, inum)`, bumping its
    /// reference count. Does not touch disk or the sleep-lock.
    pub fn iget(&self, dev: u32, inum: u32) -> RcInode<'_> {
        let mut slots = self.itable.slots.lock();
        if let Some((slot, meta)) = slots
            .iter_mut()
            .enumerate()
            .find(|(_, m)| m.refcnt > 0 && m.dev == dev && m.inum == inum)
        {
            meta.refcnt += 1;
            return RcInode {
                fs: self,
                slot,
                dev,
                inum,
            };
        }
        let (slot, meta) = slots
            .iter_mut()
            .enumerate()
            .find(|(_, m)| m.refcnt == 0)
            .expect("iget: no inodes");
        meta.dev = dev;
        meta.inum = inum;
        meta.refcnt = 1;
        self.itable.valid[slot].store(false, Ordering::Release);
        RcInode {
            fs: self,
            slot,
            dev,
            inum,
        }
    }

    /// Allocates a fresh on-disk inode of type `typ`: scans inode blocks
    /// for the first with on-disk type 0. Returns it locked via `iget`.
    pub fn ialloc(&self, dev: u32, typ: InodeType) -> Option<RcInode<'_>> {
        for inum in 1..self.superblock.ninodes {
            let bno = self.superblock.iblock(inum);
            let mut buf = self.bio.bread(dev, bno);
            let idx = (inum % IPB) as usize;
            if dinode_at(&buf, idx).typ == 0 {
                let mut raw = RawDinode::default();
                raw.typ = typ.to_raw();
                *dinode_at_mut(&mut buf, idx) = raw;
                self.log_write(buf);
                return Some(self.iget(dev, inum));
            }
        }
        None
    }

    /// Releases a reference that may be the inode's last. If `ref` drops
    /// to 1 with `nlink == 0`, frees its blocks and zeroes its on-disk
    /// type. Must be called inside a transaction (spec §4.4).
    pub fn iput(&self, ip: RcInode<'_>) {
        // Held continuously across the check-and-decide step: while it's
        // held, no concurrent iget can observe refcnt == 1 and bump it back
        // up underneath a truncate this thread is about to commit to.
        let mut slots = self.itable.slots.lock();
        let slot_is_last = slots[ip.slot].refcnt == 1;

        if slot_is_last && self.itable.valid[ip.slot].load(Ordering::Acquire) {
            let mut body = self.itable.bodies[ip.slot].lock();
            if body.nlink == 0 {
                let mut guard = InodeGuard { ip: ip.dup(), body };
                guard.truncate();
                guard.body.typ = InodeType::Free;
                guard.update();
                self.itable.valid[ip.slot].store(false, Ordering::Release);
                std::mem::forget(guard.ip);
            }
        }

        assert!(slots[ip.slot].refcnt > 0, "iput: refcount underflow");
        slots[ip.slot].refcnt -= 1;
        drop(slots);
        std::mem::forget(ip);
    }

    /// Convenience: `ilock` then `iput` is never right inside the same
    /// call, but callers that locked an inode and are done with it at once
    /// commonly want this.
    pub fn iunlockput(&self, guard: InodeGuard<'_>) {
        self.iput(guard.unlock());
    }
}
