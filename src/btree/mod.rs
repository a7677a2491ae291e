//! # B-Tree Index Layer
//!
//! A classic top-down B-tree stored through the record layer: every node is
//! one record, and the tree is identified by two reserved records in its
//! file — record 1 holds the current root node id as a 4-byte little-endian
//! integer, record 2 is the initial root of a fresh file.
//!
//! ## Structure
//!
//! With `T = MIN_ENTRIES_PER_NODE`, non-root nodes hold `T..=2T` sorted
//! `(key, value)` entries; the root holds `0..=2T`. Internal nodes carry
//! `entries + 1` child ids. A node exceeding `2T` entries splits around its
//! middle entry; a non-root node falling below `T` borrows from a sibling
//! or merges with one. All leaves sit at the same depth.
//!
//! ## Unique vs Non-Unique
//!
//! A unique tree rejects duplicate keys with [`KeyExistsError`]. A
//! non-unique tree permits equal keys; inserts route duplicates through the
//! matched child so they accumulate leftward, and scans position on the
//! first or last member of a duplicate run.
//!
//! ## Modules
//!
//! - `node`: the in-memory node with occurrence-aware entry search
//! - `codec`: byte codecs for keys/values and the node wire format
//! - `manager`: node lifetime layer (cache, dirty set, root pinning)
//! - `tree`: search, insert, delete, split and rebalance
//! - `scan`: lazy ascending/descending range iteration

mod codec;
mod manager;
mod node;
mod scan;
mod tree;

pub use codec::{Bytes16Codec, Codec, I32Codec, NodeCodec, StringCodec, U32Codec};
pub use manager::{NodeManager, NodeRef};
pub use node::TreeNode;
pub use scan::TreeScan;
pub use tree::BTree;

/// Insert conflict in a unique tree.
///
/// Surfaced through `eyre::Report`; recover it with
/// `report.downcast_ref::<KeyExistsError>()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyExistsError;

impl std::fmt::Display for KeyExistsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "key already exists in unique index")
    }
}

impl std::error::Error for KeyExistsError {}
