//! # Database Handle
//!
//! The domain boundary: one logical table backed by three block files.
//! For a database at path `P`:
//!
//! ```text
//! P        main record file; rows stored as opaque byte records
//! P.pidx   unique primary index: 16-byte row id -> record id
//! P.sidx   non-unique secondary index: (String, i32) -> record id
//! ```
//!
//! Row semantics belong to the caller: the [`Row`] trait supplies the
//! 16-byte id, the composite secondary key, and the byte encoding. The
//! engine never interprets row bytes.
//!
//! ## Lookup Semantics
//!
//! `find` resolves the primary index and reads the record. `find_by` scans
//! the secondary index from the first entry at or above the composite key
//! and stops at the first strictly greater key, yielding rows lazily.
//!
//! `close` consumes the handle after flushing all three files, so a closed
//! database cannot be used again by construction. Dropping the handle
//! without `close` flushes best-effort through the block layer.

mod config;

pub use config::DatabaseBuilder;

use std::marker::PhantomData;
use std::path::Path;
use std::rc::Rc;

use eyre::{ensure, eyre, Result};

use crate::btree::{BTree, Bytes16Codec, Codec, KeyExistsError, NodeCodec, U32Codec};
use crate::config::{PRIMARY_INDEX_EXTENSION, SECONDARY_INDEX_EXTENSION};
use crate::storage::{BlockConfig, BlockStore, FileDevice, RecordStore};

/// Caller-supplied row semantics. Rows are opaque bytes to the engine.
pub trait Row: Sized {
    /// Unique 16-byte row id (primary key).
    fn id(&self) -> [u8; 16];

    /// Composite secondary key; non-unique across rows.
    fn secondary_key(&self) -> (String, i32);

    /// Serializes the row to bytes.
    fn encode(&self) -> Vec<u8>;

    /// Rebuilds a row from bytes produced by `encode`.
    fn decode(bytes: &[u8]) -> Result<Self>;
}

/// `delete` of a row whose id is not in the primary index.
///
/// Surfaced through `eyre::Report`; recover it with
/// `report.downcast_ref::<RowNotFoundError>()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowNotFoundError;

impl std::fmt::Display for RowNotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "row not found in primary index")
    }
}

impl std::error::Error for RowNotFoundError {}

/// Codec for the secondary index key: raw UTF-8 string bytes followed by a
/// little-endian i32. The node serializer length-prefixes the whole key,
/// so the split point is always the last four bytes.
#[derive(Debug, Clone, Copy, Default)]
struct CompositeKeyCodec;

impl Codec<(String, i32)> for CompositeKeyCodec {
    fn fixed_len(&self) -> Option<usize> {
        None
    }

    fn encode(&self, value: &(String, i32), out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(value.0.as_bytes());
        out.extend_from_slice(&value.1.to_le_bytes());
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<(String, i32)> {
        ensure!(
            bytes.len() >= 4,
            "composite key of {} bytes is too short",
            bytes.len()
        );
        let split = bytes.len() - 4;
        let text = String::from_utf8(bytes[..split].to_vec())?;
        let number = i32::from_le_bytes(bytes[split..].try_into().unwrap());
        Ok((text, number))
    }
}

/// One logical table: a record file plus its two indexes.
pub struct Database<R: Row> {
    rows: Rc<RecordStore>,
    primary: BTree<[u8; 16], u32>,
    secondary: BTree<(String, i32), u32>,
    _row: PhantomData<R>,
}

impl<R: Row> Database<R> {
    /// Opens (or creates) a database at `path` with default geometry.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        DatabaseBuilder::new(path).open()
    }

    /// Opens with overridable geometry; see [`DatabaseBuilder`].
    pub fn builder<P: AsRef<Path>>(path: P) -> DatabaseBuilder {
        DatabaseBuilder::new(path)
    }

    fn from_builder(builder: DatabaseBuilder) -> Result<Self> {
        let rows = Rc::new(open_records(builder.path(), builder.data_config()?)?);

        let primary_records = Rc::new(open_records(
            &indexed_path(builder.path(), PRIMARY_INDEX_EXTENSION),
            builder.index_config()?,
        )?);
        let primary_codec = NodeCodec::new(Box::new(Bytes16Codec), Box::new(U32Codec))?;
        let primary = BTree::new(
            crate::btree::NodeManager::new(primary_records, primary_codec, builder.min_entries())?,
            true,
        );

        let secondary_records = Rc::new(open_records(
            &indexed_path(builder.path(), SECONDARY_INDEX_EXTENSION),
            builder.index_config()?,
        )?);
        let secondary_codec = NodeCodec::new(Box::new(CompositeKeyCodec), Box::new(U32Codec))?;
        let secondary = BTree::new(
            crate::btree::NodeManager::new(
                secondary_records,
                secondary_codec,
                builder.min_entries(),
            )?,
            false,
        );

        Ok(Self {
            rows,
            primary,
            secondary,
            _row: PhantomData,
        })
    }

    /// Inserts a row. Fails with [`KeyExistsError`] when a row with the
    /// same id already exists; nothing is written in that case.
    pub fn insert(&mut self, row: &R) -> Result<()> {
        let id = row.id();
        if self.primary.get(&id)?.is_some() {
            return Err(KeyExistsError.into());
        }

        let record_id = self.rows.create_bytes(&row.encode())?;
        self.primary.insert(id, record_id)?;
        self.secondary.insert(row.secondary_key(), record_id)?;
        Ok(())
    }

    /// Looks a row up by its 16-byte id.
    pub fn find(&self, id: &[u8; 16]) -> Result<Option<R>> {
        let Some((_, record_id)) = self.primary.get(id)? else {
            return Ok(None);
        };
        let bytes = self.rows.find(record_id)?.ok_or_else(|| {
            eyre!("primary index references missing record {}", record_id)
        })?;
        Ok(Some(R::decode(&bytes)?))
    }

    /// Lazily yields every row whose secondary key equals the composite
    /// `(nationality, age)` key, in insertion-independent ascending key
    /// order.
    pub fn find_by(
        &self,
        nationality: &str,
        age: i32,
    ) -> Result<impl Iterator<Item = Result<R>> + '_> {
        let key = (nationality.to_string(), age);
        let scan = self.secondary.larger_than_or_equal(&key)?;
        let rows = Rc::clone(&self.rows);

        Ok(scan
            .take_while(move |entry| match entry {
                Ok((entry_key, _)) => *entry_key == key,
                Err(_) => true,
            })
            .map(move |entry| {
                let (_, record_id) = entry?;
                let bytes = rows.find(record_id)?.ok_or_else(|| {
                    eyre!("secondary index references missing record {}", record_id)
                })?;
                R::decode(&bytes)
            }))
    }

    /// Deletes a row: both index entries and the backing record. Fails
    /// with [`RowNotFoundError`] when the id is absent.
    pub fn delete(&mut self, row: &R) -> Result<()> {
        let id = row.id();
        let Some((_, record_id)) = self.primary.get(&id)? else {
            return Err(RowNotFoundError.into());
        };

        self.primary.delete(&id)?;
        self.secondary.delete_entry(&row.secondary_key(), &record_id)?;
        self.rows.delete(record_id)?;
        Ok(())
    }

    /// Flushes all three files and consumes the handle.
    pub fn close(self) -> Result<()> {
        self.rows.sync()?;
        self.primary.sync()?;
        self.secondary.sync()?;
        Ok(())
    }
}

impl<R: Row> std::fmt::Debug for Database<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

fn open_records(path: &Path, config: BlockConfig) -> Result<RecordStore> {
    let device = FileDevice::open(path)?;
    RecordStore::new(BlockStore::new(Box::new(device), config)?)
}

/// `P` plus an index extension: `people.db` -> `people.db.pidx`.
fn indexed_path(path: &Path, extension: &str) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    std::path::PathBuf::from(name)
}
