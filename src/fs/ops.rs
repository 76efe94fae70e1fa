//! Composite, transaction-bracketed file-system operations (spec §4.8).
//!
//! Each public entry point here brackets its own work with `begin_op`/
//! `end_op`; the private `*_inner` helpers assume they're already inside
//! one, so `open`'s `O_CREATE` path can call straight into `create_inner`
//! without nesting a second transaction inside its own. Grounded on the
//! teacher's `impl FileSystem for Ufs` (`create`/`link`/`unlink`/`open`/
//! `chdir`): same open-with-create semantics, same parent-locked-before-
//! child ordering, same rollback-via-nlink pattern on failure.
//!
//! Process/cwd state is out of scope for this crate (spec §1 Non-goals),
//! so every path-taking operation here takes the starting directory as an
//! explicit `cwd` argument rather than holding one itself.

use scopeguard::ScopeGuard;

use super::inode::{InodeGuard, InodeType, RcInode};
use super::path::{FileName, Path};
use super::FileSystem;
use crate::error::FsError;
use crate::param::{MAXPATH, MAXSYMLINKS};

bitflags::bitflags! {
    /// Flags the embedder passes to [`FileSystem::open`]. Access-mode bits
    /// (`O_RDONLY`/`O_WRONLY`/`O_RDWR`) are carried through but not
    /// enforced here — permission checking belongs to whatever open-file
    /// table the embedder builds on top (spec §1 Non-goals) — while
    /// `O_CREATE`/`O_TRUNC`/`O_NOFOLLOW` drive this crate's own behavior.
    pub struct OpenFlags: u32 {
        const O_RDONLY = 0;
        const O_WRONLY = 1 << 0;
        const O_RDWR = 1 << 1;
        const O_CREATE = 1 << 2;
        const O_TRUNC = 1 << 3;
        const O_NOFOLLOW = 1 << 4;
    }
}

impl FileSystem {
    /// Creates `path` as a fresh inode of type `typ`. If `typ` is `File`
    /// and a non-directory already exists at `path`, returns it instead of
    /// failing (open-with-create semantics).
    pub fn create<'a>(
        &'a self,
        path: Path<'_>,
        typ: InodeType,
        major: u16,
        minor: u16,
        cwd: &RcInode<'a>,
    ) -> Result<InodeGuard<'a>, FsError> {
        self.begin_op();
        let result = self.create_inner(path, typ, major, minor, cwd);
        self.end_op();
        result
    }

    fn create_inner<'a>(
        &'a self,
        path: Path<'_>,
        typ: InodeType,
        major: u16,
        minor: u16,
        cwd: &RcInode<'a>,
    ) -> Result<InodeGuard<'a>, FsError> {
        let (parent, name) = self.nameiparent(path, cwd)?;
        let mut dp = parent.lock();

        if let Some((existing, _off)) = dp.dirlookup(&name) {
            self.iput(dp.unlock());
            let ip = existing.lock();
            if typ != InodeType::File || !matches!(ip.typ, InodeType::File | InodeType::Device) {
                self.iput(ip.unlock());
                return Err(FsError::AlreadyExists);
            }
            return Ok(ip);
        }

        let new = match self.ialloc(dp.dev(), typ) {
            Some(rc) => rc,
            None => {
                self.iput(dp.unlock());
                return Err(FsError::NoSpace);
            }
        };
        let mut ip = new.lock();
        ip.major = major;
        ip.minor = minor;
        ip.nlink = 1;
        ip.update();

        if typ == InodeType::Dir {
            let dot = FileName::from_bytes(b".").expect("'.' is always a valid name");
            let dotdot = FileName::from_bytes(b"..").expect("'..' is always a valid name");
            let inum = ip.inum();
            let parent_inum = dp.inum();
            ip.dirlink(&dot, inum).expect("create: fresh inode can't already have '.'");
            ip.dirlink(&dotdot, parent_inum)
                .expect("create: fresh inode can't already have '..'");
            dp.nlink += 1;
            dp.update();
        }

        if let Err(e) = dp.dirlink(&name, ip.inum()) {
            if typ == InodeType::Dir {
                dp.nlink -= 1;
                dp.update();
            }
            ip.nlink = 0;
            ip.update();
            self.iput(ip.unlock());
            self.iput(dp.unlock());
            return Err(e);
        }

        self.iput(dp.unlock());
        Ok(ip)
    }

    /// Makes a new directory at `path`.
    pub fn mkdir(&self, path: Path<'_>, cwd: &RcInode<'_>) -> Result<(), FsError> {
        let ip = self.create(path, InodeType::Dir, 0, 0, cwd)?;
        self.iunlockput(ip);
        Ok(())
    }

    /// Makes a new device special file at `path`.
    pub fn mknod(
        &self,
        path: Path<'_>,
        major: u16,
        minor: u16,
        cwd: &RcInode<'_>,
    ) -> Result<(), FsError> {
        let ip = self.create(path, InodeType::Device, major, minor, cwd)?;
        self.iunlockput(ip);
        Ok(())
    }

    /// Adds `new` as another name for the file at `old`. Refuses
    /// directories (would create a cycle `namex` can't detect) and names
    /// that would span devices.
    pub fn link(&self, old: Path<'_>, new: Path<'_>, cwd: &RcInode<'_>) -> Result<(), FsError> {
        self.begin_op();
        let result = self.link_inner(old, new, cwd);
        self.end_op();
        result
    }

    fn link_inner(&self, old: Path<'_>, new: Path<'_>, cwd: &RcInode<'_>) -> Result<(), FsError> {
        let old_rc = self.namei(old, cwd)?;
        let mut ip = old_rc.lock();
        if ip.typ == InodeType::Dir {
            self.iput(ip.unlock());
            return Err(FsError::InvalidName);
        }
        ip.nlink += 1;
        ip.update();
        let dev = ip.dev();
        let inum = ip.inum();

        // Guards the nlink bump: any early return below drops this and
        // puts the inode back the way it was.
        let ip_rc = scopeguard::guard(ip.unlock(), |rc| {
            let mut ip = rc.lock();
            ip.nlink -= 1;
            ip.update();
            self.iput(ip.unlock());
        });

        let (parent, name) = self.nameiparent(new, cwd)?;
        if parent.dev != dev {
            self.iput(parent);
            return Err(FsError::CrossDevice);
        }
        let mut dp = parent.lock();
        let r = dp.dirlink(&name, inum);
        self.iput(dp.unlock());
        r?;

        drop(ScopeGuard::into_inner(ip_rc));
        Ok(())
    }

    /// Removes the directory entry at `path`. Refuses `.`/`..` and
    /// non-empty directories.
    pub fn unlink(&self, path: Path<'_>, cwd: &RcInode<'_>) -> Result<(), FsError> {
        self.begin_op();
        let result = self.unlink_inner(path, cwd);
        self.end_op();
        result
    }

    fn unlink_inner(&self, path: Path<'_>, cwd: &RcInode<'_>) -> Result<(), FsError> {
        let (parent, name) = self.nameiparent(path, cwd)?;

        if name.is_dot() || name.is_dotdot() {
            self.iput(parent);
            return Err(FsError::InvalidName);
        }

        let mut dp = parent.lock();
        let (target, off) = match dp.dirlookup(&name) {
            Some(t) => t,
            None => {
                self.iput(dp.unlock());
                return Err(FsError::NotFound);
            }
        };

        let mut ip = target.lock();
        assert!(ip.nlink >= 1, "unlink: on-disk nlink underflow");

        if ip.typ == InodeType::Dir && !ip.is_dir_empty() {
            self.iput(ip.unlock());
            self.iput(dp.unlock());
            return Err(FsError::DirectoryNotEmpty);
        }

        dp.dirunlink_at(off);
        if ip.typ == InodeType::Dir {
            dp.nlink -= 1;
            dp.update();
        }
        self.iput(dp.unlock());

        ip.nlink -= 1;
        ip.update();
        self.iput(ip.unlock());
        Ok(())
    }

    /// Creates a symlink at `path` whose content is `target`. `target` is
    /// stored verbatim, unresolved, same as ordinary file content.
    pub fn symlink(&self, target: &str, path: Path<'_>, cwd: &RcInode<'_>) -> Result<(), FsError> {
        self.begin_op();
        let result = self.symlink_inner(target, path, cwd);
        self.end_op();
        result
    }

    fn symlink_inner(
        &self,
        target: &str,
        path: Path<'_>,
        cwd: &RcInode<'_>,
    ) -> Result<(), FsError> {
        if target.len() > MAXPATH {
            return Err(FsError::FileTooLarge);
        }
        let mut ip = self.create_inner(path, InodeType::Symlink, 0, 0, cwd)?;
        ip.write(target.as_bytes(), 0)?;
        self.iunlockput(ip);
        Ok(())
    }

    /// Opens `path`, optionally creating it (`O_CREATE`) and/or following
    /// symlinks at the final component (everything but `O_NOFOLLOW`).
    pub fn open<'a>(
        &'a self,
        path: Path<'_>,
        flags: OpenFlags,
        cwd: &RcInode<'a>,
    ) -> Result<InodeGuard<'a>, FsError> {
        self.begin_op();
        let result = self.open_inner(path, flags, cwd);
        self.end_op();
        result
    }

    fn open_inner<'a>(
        &'a self,
        path: Path<'_>,
        flags: OpenFlags,
        cwd: &RcInode<'a>,
    ) -> Result<InodeGuard<'a>, FsError> {
        let mut ip = if flags.contains(OpenFlags::O_CREATE) {
            self.create_inner(path, InodeType::File, 0, 0, cwd)?
        } else {
            self.namei(path, cwd)?.lock()
        };

        if ip.typ == InodeType::Dir && flags.intersects(OpenFlags::O_WRONLY | OpenFlags::O_RDWR) {
            self.iput(ip.unlock());
            return Err(FsError::IsADirectory);
        }

        if ip.typ == InodeType::Symlink {
            if flags.contains(OpenFlags::O_NOFOLLOW) {
                return Ok(ip);
            }
            ip = self.follow_symlink(ip, cwd)?;
        }

        if flags.contains(OpenFlags::O_TRUNC) && ip.typ == InodeType::File {
            ip.truncate();
        }

        Ok(ip)
    }

    /// Chases a chain of symlinks up to `MAXSYMLINKS` hops, reading each
    /// target through the ordinary file-content path. Fails on the hop
    /// that would exceed the cap, not before.
    fn follow_symlink<'a>(
        &'a self,
        mut ip: InodeGuard<'a>,
        cwd: &RcInode<'a>,
    ) -> Result<InodeGuard<'a>, FsError> {
        let mut hops = 0usize;
        loop {
            if ip.typ != InodeType::Symlink {
                return Ok(ip);
            }
            if hops == MAXSYMLINKS {
                self.iput(ip.unlock());
                return Err(FsError::TooManyLinks);
            }
            hops += 1;

            let mut buf = [0u8; MAXPATH];
            let n = ip.read(&mut buf, 0);
            let prev = ip.unlock();

            let target = match core::str::from_utf8(&buf[..n]) {
                Ok(t) => t,
                Err(_) => {
                    self.iput(prev);
                    return Err(FsError::InvalidName);
                }
            };

            let next = match self.namei(Path::new(target), cwd) {
                Ok(next) => next,
                Err(e) => {
                    self.iput(prev);
                    return Err(e);
                }
            };
            self.iput(prev);
            ip = next.lock();
        }
    }

    /// Resolves `path` to a directory and hands it back as the new
    /// current directory. On success the old `cwd` is released (inside
    /// this same transaction, since that release may free blocks); on
    /// failure `cwd` is handed back untouched, since the embedder — not
    /// this crate — owns the "current directory" slot (spec §1
    /// Non-goals) and nothing should change when the call fails.
    pub fn chdir<'a>(
        &'a self,
        path: Path<'_>,
        cwd: RcInode<'a>,
    ) -> Result<RcInode<'a>, (FsError, RcInode<'a>)> {
        self.begin_op();
        let resolved = self.namei(path, &cwd).and_then(|next| {
            let mut guard = next.lock();
            if guard.typ != InodeType::Dir {
                self.iput(guard.unlock());
                Err(FsError::NotADirectory)
            } else {
                Ok(guard.unlock())
            }
        });
        let result = match resolved {
            Ok(next) => {
                self.iput(cwd);
                Ok(next)
            }
            Err(e) => Err((e, cwd)),
        };
        self.end_op();
        result
    }
}
