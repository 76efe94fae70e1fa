//! Recoverable error surface.
//!
//! Structural violations (corrupt on-disk data, cache/table exhaustion, lock
//! misuse, a transaction exceeding its reservation) stay `panic!`/`assert!`,
//! matching how every layer beneath this one treats them: a bug, not
//! something a caller can sensibly recover from. Everything a caller might
//! reasonably want to branch on comes back as `FsError`.

use core::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FsError {
    /// No directory entry (or inode) exists for the given name/path.
    NotFound,
    /// A path component that should have been a directory was not one.
    NotADirectory,
    /// `open` was asked to open a directory for writing.
    IsADirectory,
    /// `create` or `mkdir` was asked to overwrite something it cannot.
    AlreadyExists,
    /// `unlink`/`rmdir` was asked to remove a non-empty directory.
    DirectoryNotEmpty,
    /// A `link`/`unlink` target path refers to `.` or `..`.
    InvalidName,
    /// Open requested `O_NOFOLLOW` and the final component is a symlink,
    /// or symlink resolution exceeded `MAXSYMLINKS` hops.
    TooManyLinks,
    /// The requested offset/length would run past `MAXFILE` blocks.
    FileTooLarge,
    /// The disk ran out of free blocks or free inodes.
    NoSpace,
    /// A link/create attempted to span devices, or cross a symlink across
    /// a point the caller forbade.
    CrossDevice,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FsError::NotFound => "no such file or directory",
            FsError::NotADirectory => "not a directory",
            FsError::IsADirectory => "is a directory",
            FsError::AlreadyExists => "file exists",
            FsError::DirectoryNotEmpty => "directory not empty",
            FsError::InvalidName => "invalid name",
            FsError::TooManyLinks => "too many levels of symbolic links",
            FsError::FileTooLarge => "file too large",
            FsError::NoSpace => "no space left on device",
            FsError::CrossDevice => "cross-device link",
        };
        f.write_str(msg)
    }
}
