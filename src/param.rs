//! Compile-time layout and capacity constants.

/// Block size, in bytes.
pub const BSIZE: usize = 1024;

/// Device number of the file system disk.
pub const ROOTDEV: u32 = 1;

/// Root i-number.
pub const ROOTINO: u32 = 1;

/// Number of direct block addresses kept in an inode.
pub const NDIRECT: usize = 11;

/// Block addresses per indirect block.
pub const NINDIRECT: usize = BSIZE / core::mem::size_of::<u32>();

/// Largest file size expressible with direct + single-indirect + double-indirect blocks.
pub const MAXFILE: usize = NDIRECT + NINDIRECT + NINDIRECT * NINDIRECT;

/// Bytes of a directory entry name, not including the inum.
pub const DIRSIZ: usize = 14;

/// Size in bytes of a packed directory entry (2-byte inum + DIRSIZ name bytes).
pub const DIRENT_SIZE: usize = 2 + DIRSIZ;

/// Maximum number of in-memory inode cache slots.
pub const NINODE: usize = 50;

/// Number of buffer cache slots.
pub const NBUF: usize = 30;

/// Number of hash buckets the buffer cache shards its slots across.
pub const NBUCKET: usize = 13;

/// Max # of distinct blocks any single FS operation may write to the log.
pub const MAXOPBLOCKS: usize = 10;

/// Max number of concurrently outstanding FS operations the log reserves space for.
pub const MAXOPS: usize = 3;

/// Max data blocks in the on-disk log.
pub const LOGSIZE: usize = MAXOPBLOCKS * MAXOPS;

/// Maximum file path name length.
pub const MAXPATH: usize = 128;

/// Maximum number of symlink hops `open` will chase before giving up.
pub const MAXSYMLINKS: usize = 10;
