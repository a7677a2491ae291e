//! # Database Open Options
//!
//! Builder for opening a [`Database`](super::Database) with non-default
//! geometry. The defaults match the documented file layout: 4096-byte
//! blocks for the main record file, 40960-byte blocks for the two index
//! files, 48-byte headers everywhere, and `T = 36`.
//!
//! ```ignore
//! let db = Database::<Person>::builder("./people.db")
//!     .index_block_size(16384)
//!     .min_entries_per_node(8)
//!     .open()?;
//! ```

use std::path::{Path, PathBuf};

use eyre::Result;

use super::{Database, Row};
use crate::config::{
    BLOCK_HEADER_SIZE, DEFAULT_BLOCK_SIZE, DEFAULT_INDEX_BLOCK_SIZE, MIN_ENTRIES_PER_NODE,
};
use crate::storage::BlockConfig;

/// Options for opening a database; constructed via `Database::builder`.
#[derive(Debug, Clone)]
pub struct DatabaseBuilder {
    path: PathBuf,
    data_block_size: usize,
    index_block_size: usize,
    block_header_size: usize,
    min_entries_per_node: usize,
}

impl DatabaseBuilder {
    pub(super) fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            data_block_size: DEFAULT_BLOCK_SIZE,
            index_block_size: DEFAULT_INDEX_BLOCK_SIZE,
            block_header_size: BLOCK_HEADER_SIZE,
            min_entries_per_node: MIN_ENTRIES_PER_NODE,
        }
    }

    /// Block size of the main record file.
    pub fn data_block_size(mut self, size: usize) -> Self {
        self.data_block_size = size;
        self
    }

    /// Block size of the two index files.
    pub fn index_block_size(mut self, size: usize) -> Self {
        self.index_block_size = size;
        self
    }

    /// Header size used by all three files.
    pub fn block_header_size(mut self, size: usize) -> Self {
        self.block_header_size = size;
        self
    }

    /// T: minimum entries per non-root tree node.
    pub fn min_entries_per_node(mut self, min_entries: usize) -> Self {
        self.min_entries_per_node = min_entries;
        self
    }

    pub(super) fn path(&self) -> &Path {
        &self.path
    }

    pub(super) fn data_config(&self) -> Result<BlockConfig> {
        BlockConfig::new(self.data_block_size, self.block_header_size)
    }

    pub(super) fn index_config(&self) -> Result<BlockConfig> {
        BlockConfig::new(self.index_block_size, self.block_header_size)
    }

    pub(super) fn min_entries(&self) -> usize {
        self.min_entries_per_node
    }

    /// Opens the three backing files and assembles the database handle.
    pub fn open<R: Row>(self) -> Result<Database<R>> {
        Database::from_builder(self)
    }
}
