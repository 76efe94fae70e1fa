//! Path resolution (spec §4.6).
//!
//! Grounded on the teacher's `fs/path.rs` (`Path`, `FileName`, `skipelem`)
//! and `Itable::namex`. The teacher's `FileName` is `repr(transparent)`
//! over a DST `[u8]`, built with `unsafe` from raw bytes; this crate uses
//! an owned, fixed-capacity `FileName([u8; DIRSIZ], len)` instead; a
//! hosted crate has no need for the teacher's no_std/static-allocation
//! constraints, so the unsafe construction buys nothing here. Comparison
//! still treats a name as its bytes up to the first NUL or `DIRSIZ`,
//! whichever comes first, matching spec §9(a).

use super::inode::{Dirent, InodeType, RcInode};
use super::{FileSystem, ROOTINO};
use crate::error::FsError;
use crate::param::DIRSIZ;

/// An owned path component, at most `DIRSIZ` bytes, containing no `/`.
#[derive(Clone, Debug)]
pub struct FileName {
    bytes: [u8; DIRSIZ],
    len: usize,
}

impl FileName {
    /// Truncates silently to `DIRSIZ` bytes. Used only when tokenizing an
    /// existing path's elements: spec §9(a) calls this out explicitly
    /// ("longer elements are silently truncated at the copy step —
    /// callers must not rely on this"), as opposed to linking a brand new
    /// name into a directory, which rejects overlong names outright (see
    /// [`Self::from_bytes`]).
    fn from_path_component(s: &[u8]) -> Self {
        let len = s.len().min(DIRSIZ);
        let mut bytes = [0u8; DIRSIZ];
        bytes[..len].copy_from_slice(&s[..len]);
        Self { bytes, len }
    }

    /// Rejects names that don't fit or contain `/`/NUL. Used for names the
    /// caller supplies directly (the new name in `create`/`link`/`mkdir`/
    /// `symlink`) — spec §3: "Longer names are rejected at directory-link
    /// time."
    pub fn from_bytes(s: &[u8]) -> Result<Self, FsError> {
        if s.is_empty() || s.len() > DIRSIZ || s.contains(&b'/') || s.contains(&0) {
            return Err(FsError::InvalidName);
        }
        Ok(Self::from_path_component(s))
    }

    pub fn from_str(s: &str) -> Result<Self, FsError> {
        Self::from_bytes(s.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn is_dot(&self) -> bool {
        self.as_bytes() == b"."
    }

    pub fn is_dotdot(&self) -> bool {
        self.as_bytes() == b".."
    }

    pub fn matches(&self, dirent: &Dirent) -> bool {
        dirent.name_bytes() == self.as_bytes()
    }
}

/// A `/`-separated path, tokenized one component at a time. Cheap to copy:
/// it's just a slice and a cursor.
#[derive(Clone, Copy)]
pub struct Path<'a> {
    rest: &'a [u8],
}

impl<'a> Path<'a> {
    pub fn new(s: &'a str) -> Self {
        Self { rest: s.as_bytes() }
    }

    pub fn is_absolute(&self) -> bool {
        self.rest.first() == Some(&b'/')
    }

    /// Strips leading slashes, then takes bytes up to the next `/` (or the
    /// end of the path) as the next component. Returns `None` once nothing
    /// but slashes remains. Overlong components are truncated, not
    /// rejected (spec §9(a)) — only `dirlink` time rejects those.
    pub fn next_component(&mut self) -> Option<FileName> {
        while self.rest.first() == Some(&b'/') {
            self.rest = &self.rest[1..];
        }
        if self.rest.is_empty() {
            return None;
        }
        let end = self
            .rest
            .iter()
            .position(|&b| b == b'/')
            .unwrap_or(self.rest.len());
        let (name, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(FileName::from_path_component(name))
    }
}

impl FileSystem {
    /// Walks `path` element by element, starting from the root if `path`
    /// is absolute or from `cwd` otherwise. If `wantparent`, stops one
    /// element short and returns the parent directory plus the final
    /// element's name instead of resolving it.
    ///
    /// Grounded on `Itable::namex` in the teacher: same `ilock`/`dirlookup`/
    /// `iunlockput` walk, same early return for the `wantparent` case.
    pub fn namex<'a>(
        &'a self,
        mut path: Path<'_>,
        wantparent: bool,
        cwd: &RcInode<'a>,
    ) -> Result<(RcInode<'a>, FileName), FsError> {
        let mut cur = if path.is_absolute() {
            self.iget(self.dev, ROOTINO)
        } else {
            cwd.dup()
        };

        let mut name = match path.next_component() {
            Some(n) => n,
            None => {
                if wantparent {
                    self.iput(cur);
                    return Err(FsError::NotFound);
                }
                return Ok((cur, FileName::from_path_component(b".")));
            }
        };

        loop {
            let mut guard = cur.lock();
            if guard.typ != InodeType::Dir {
                self.iput(guard.unlock());
                return Err(FsError::NotADirectory);
            }

            if wantparent {
                let mut peek = path;
                if peek.next_component().is_none() {
                    return Ok((guard.unlock(), name));
                }
            }

            let next = match guard.dirlookup(&name) {
                Some((next, _off)) => next,
                None => {
                    self.iput(guard.unlock());
                    return Err(FsError::NotFound);
                }
            };
            self.iput(guard.unlock());

            match path.next_component() {
                Some(n) => {
                    cur = next;
                    name = n;
                }
                None => return Ok((next, name)),
            }
        }
    }

    /// Resolves `path` to its final inode (spec: `namei(path) =
    /// namex(path, 0, _)`).
    pub fn namei<'a>(&'a self, path: Path<'_>, cwd: &RcInode<'a>) -> Result<RcInode<'a>, FsError> {
        self.namex(path, false, cwd).map(|(ip, _)| ip)
    }

    /// Resolves `path`'s parent directory, returning it plus the final
    /// element's name unresolved (spec: `nameiparent(path, name) =
    /// namex(path, 1, name)`).
    pub fn nameiparent<'a>(
        &'a self,
        path: Path<'_>,
        cwd: &RcInode<'a>,
    ) -> Result<(RcInode<'a>, FileName), FsError> {
        self.namex(path, true, cwd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_absolute_path_elements() {
        let mut p = Path::new("/a/bb/ccc");
        assert!(p.is_absolute());
        assert_eq!(p.next_component().unwrap().as_bytes(), b"a");
        assert_eq!(p.next_component().unwrap().as_bytes(), b"bb");
        assert_eq!(p.next_component().unwrap().as_bytes(), b"ccc");
        assert!(p.next_component().is_none());
    }

    #[test]
    fn collapses_repeated_slashes() {
        let mut p = Path::new("//a///b/");
        assert_eq!(p.next_component().unwrap().as_bytes(), b"a");
        assert_eq!(p.next_component().unwrap().as_bytes(), b"b");
        assert!(p.next_component().is_none());
    }

    #[test]
    fn relative_path_is_not_absolute() {
        let p = Path::new("a/b");
        assert!(!p.is_absolute());
    }

    #[test]
    fn overlong_component_is_silently_truncated_on_tokenize() {
        let mut p = Path::new("/aaaaaaaaaaaaaaaaaaaa"); // 20 'a's, > DIRSIZ
        let name = p.next_component().unwrap();
        assert_eq!(name.as_bytes().len(), DIRSIZ);
    }

    #[test]
    fn overlong_name_is_rejected_at_link_time() {
        assert_eq!(
            FileName::from_bytes(b"aaaaaaaaaaaaaaaaaaaa").unwrap_err(),
            FsError::InvalidName
        );
    }

    #[test]
    fn name_with_slash_is_rejected() {
        assert!(FileName::from_bytes(b"a/b").is_err());
    }

    #[test]
    fn dot_and_dotdot_are_recognized() {
        assert!(FileName::from_str(".").unwrap().is_dot());
        assert!(FileName::from_str("..").unwrap().is_dotdot());
        assert!(!FileName::from_str("...").unwrap().is_dot());
    }
}
