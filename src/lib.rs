//! rv6fs: an on-disk Unix-style file system — buffer cache, write-ahead
//! log, bitmap block allocator, inodes, directories, symlinks, and path
//! resolution — as a standalone, embeddable library.
//!
//! The concurrency control (lock ordering, the sharded buffer cache, the
//! group-commit log) is carried over from a teaching kernel's in-kernel
//! file system; this crate runs it hosted, on real OS threads, against any
//! [`disk::BlockDevice`] rather than a virtio queue.

#![deny(rust_2018_idioms)]
#![deny(unused_import_braces)]
#![deny(unused_qualifications)]

mod bio;
pub mod disk;
pub mod error;
pub mod fs;
mod lock;
pub mod param;
