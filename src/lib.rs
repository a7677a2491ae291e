//! # ShaleDB - Embedded Record Store with B-Tree Indexes
//!
//! ShaleDB is a single-node, embedded, disk-backed table-and-index engine.
//! It persists variable-length opaque byte records to a file using a
//! fixed-size block layout with an intrusive free list, and builds key/value
//! B-tree indexes on top of the same block abstraction.
//!
//! ## Quick Start
//!
//! ```ignore
//! use shaledb::{Database, Row};
//!
//! let mut db = Database::<Person>::open("./people.db")?;
//!
//! db.insert(&Person::new(*b"0123456789abcdef", "Nadia", "US", 30))?;
//!
//! for row in db.find_by("US", 30)? {
//!     println!("{:?}", row?);
//! }
//!
//! db.close()?;
//! ```
//!
//! ## Architecture
//!
//! ShaleDB uses a three-layer storage stack:
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │       Public API (Database)          │
//! ├─────────────────────────────────────┤
//! │  Primary Index   │  Secondary Index  │
//! ├─────────────────────────────────────┤
//! │      B-Tree (nodes + manager)        │
//! ├─────────────────────────────────────┤
//! │   Record Layer (chains of blocks)    │
//! ├─────────────────────────────────────┤
//! │   Block Layer (fixed-size pages)     │
//! ├─────────────────────────────────────┤
//! │     Byte Device (positioned I/O)     │
//! └─────────────────────────────────────┘
//! ```
//!
//! - **Block layer**: the file is partitioned into fixed-size blocks, each
//!   with a small header of little-endian `i64` fields and a contents area.
//!   The first sector of every block is buffered in memory and written back
//!   when the block is released.
//! - **Record layer**: variable-length records are doubly linked chains of
//!   blocks. Freed blocks are tracked in-band by record 0, a LIFO stack of
//!   reusable block ids.
//! - **B-tree layer**: classic top-down B-tree (split on overflow, rebalance
//!   on underflow) whose nodes serialize into records. Record 1 pins the
//!   current root node id.
//!
//! ## File Layout
//!
//! A database at path `P` consists of three block files:
//!
//! ```text
//! P        # main record file    (4096-byte blocks, 48-byte headers)
//! P.pidx   # primary key index   (40960-byte blocks)
//! P.sidx   # secondary index     (40960-byte blocks)
//! ```
//!
//! ## Concurrency Model
//!
//! Single-threaded and synchronous. Mutations become visible to subsequent
//! reads immediately through the block cache; tree mutations become durable
//! when the dirty nodes are flushed at the end of each operation. There is no
//! write-ahead log and no fsync barrier; crash consistency is best-effort.
//!
//! ## Module Overview
//!
//! - [`storage`]: byte device, block layer, record layer, free-block stack
//! - [`btree`]: tree nodes, node serializer, node manager, tree operations
//! - [`encoding`]: little-endian helpers and duplicate-aware binary search
//! - [`config`]: geometry and cache constants
//! - [`database`]: domain boundary wiring three files into one handle

#[macro_use]
mod macros;

pub mod btree;
pub mod config;
pub mod database;
pub mod encoding;
pub mod storage;

pub use btree::{BTree, Codec, KeyExistsError};
pub use database::{Database, DatabaseBuilder, Row, RowNotFoundError};
pub use storage::{BlockConfig, BlockStore, Device, FileDevice, MemDevice, RecordStore};
