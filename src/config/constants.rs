//! # ShaleDB Configuration Constants
//!
//! This module centralizes all configuration constants, grouping
//! interdependent values together and documenting their relationships.
//!
//! ## Dependency Graph
//!
//! ```text
//! DEFAULT_BLOCK_SIZE (4096 bytes, main record file)
//! DEFAULT_INDEX_BLOCK_SIZE (40960 bytes, index files)
//!       │
//!       ├─> BLOCK_HEADER_SIZE (48 bytes, both)
//!       │     Must stay a multiple of 8: the header is an array of
//!       │     little-endian i64 fields indexed by slot.
//!       │
//!       └─> DISK_SECTOR_SIZE (4096) / SMALL_DISK_SECTOR_SIZE (128)
//!             The buffered first sector of a block. Blocks of at least
//!             4096 bytes buffer a full 4096-byte sector; smaller blocks
//!             buffer 128 bytes. MIN_BLOCK_SIZE guarantees the sector
//!             never exceeds the block.
//!
//! MAX_RECORD_SIZE (4 MiB)
//!       │
//!       └─> An upper bound on a record chain's total payload. Read paths
//!           reject anything larger as corruption.
//!
//! MIN_ENTRIES_PER_NODE (36)
//!       │
//!       └─> T in the B-tree invariants: non-root nodes hold T..=2T
//!           entries; a node with more than 2T entries splits.
//!
//! NODE_CACHE_CAPACITY (200)
//!       │
//!       └─> Strong FIFO queue length in the node manager. When the queue
//!           fills, the oldest half is dropped.
//! ```
//!
//! ## Reserved Record Ids
//!
//! Record id 0 is the free-block stack, record id 1 stores the current root
//! node id (4-byte little-endian payload), and record id 2 is the initial
//! root node of a fresh index file.

/// Block size of the main record file in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Block size of index files in bytes.
///
/// Index blocks are larger than data blocks so a serialized tree node
/// (< 64 KiB) spans few blocks.
pub const DEFAULT_INDEX_BLOCK_SIZE: usize = 40960;

/// Size of the block header in bytes. Must be a multiple of 8 and at
/// least 48 so the five reserved i64 fields fit.
pub const BLOCK_HEADER_SIZE: usize = 48;

/// Smallest supported block size.
pub const MIN_BLOCK_SIZE: usize = 128;

/// Smallest supported block header size.
pub const MIN_BLOCK_HEADER_SIZE: usize = 48;

/// First-sector size for blocks of at least 4096 bytes.
pub const DISK_SECTOR_SIZE: usize = 4096;

/// First-sector size for blocks smaller than 4096 bytes.
pub const SMALL_DISK_SECTOR_SIZE: usize = 128;

/// Maximum total payload of a single record (4 MiB).
pub const MAX_RECORD_SIZE: usize = 4 * 1024 * 1024;

/// Maximum serialized size of a tree node (64 KiB).
pub const MAX_NODE_SIZE: usize = 64 * 1024;

/// T: minimum entry count of a non-root B-tree node. Non-root nodes hold
/// `T..=2T` entries; the root holds `0..=2T`.
pub const MIN_ENTRIES_PER_NODE: usize = 36;

/// Capacity of the node manager's strong FIFO queue.
pub const NODE_CACHE_CAPACITY: usize = 200;

/// Number of cache inserts between sweeps of dead weak references in the
/// node manager's id map.
pub const WEAK_SWEEP_INTERVAL: usize = 1000;

/// Record id of the free-block stack.
pub const FREE_LIST_RECORD_ID: u32 = 0;

/// Record id whose 4-byte payload is the current root node id.
pub const ROOT_POINTER_RECORD_ID: u32 = 1;

/// Record id of the root node in a freshly initialized index file.
pub const INITIAL_ROOT_NODE_ID: u32 = 2;

/// File extension of the primary index.
pub const PRIMARY_INDEX_EXTENSION: &str = "pidx";

/// File extension of the secondary index.
pub const SECONDARY_INDEX_EXTENSION: &str = "sidx";

const _: () = assert!(
    BLOCK_HEADER_SIZE % 8 == 0,
    "BLOCK_HEADER_SIZE must be a multiple of 8 (header fields are i64 slots)"
);

const _: () = assert!(
    BLOCK_HEADER_SIZE >= MIN_BLOCK_HEADER_SIZE,
    "BLOCK_HEADER_SIZE must fit the five reserved header fields"
);

const _: () = assert!(
    SMALL_DISK_SECTOR_SIZE <= MIN_BLOCK_SIZE,
    "the small first sector must fit in the smallest block"
);

const _: () = assert!(
    BLOCK_HEADER_SIZE < MIN_BLOCK_SIZE,
    "a block must have room for content after the header"
);

const _: () = assert!(
    DEFAULT_INDEX_BLOCK_SIZE >= DISK_SECTOR_SIZE,
    "index blocks buffer a full disk sector"
);
