//! # Record Store
//!
//! Composes blocks into variable-length records. A record is an ordered
//! chain of blocks linked through `NEXT/PREV_BLOCK_ID`; the record's id is
//! its head block's id, and the head carries the total payload length.
//!
//! ## Lifecycle
//!
//! - **Create** allocates a head block first and hands its id to the
//!   caller's payload generator before anything is written, so self-
//!   referential payloads (a tree node that embeds its own id) can be
//!   built. Payload is striped across further blocks as needed.
//! - **Find** walks the chain head to tail, concatenating each block's
//!   `CONTENT_LENGTH` bytes. Tombstoned heads and non-head ids read as
//!   absent; broken links, oversized lengths, and tombstones mid-chain are
//!   corruption.
//! - **Update** rewrites the chain in order, extending it with allocated
//!   blocks or releasing surplus ones to the free stack. The head id never
//!   changes.
//! - **Delete** tombstones every block of the chain and pushes their ids
//!   onto the free stack.
//!
//! Allocation always consults the free stack before extending the file;
//! a reused block gets its reserved header fields reset.
//!
//! ## Bootstrap
//!
//! Opening a record store on an empty device creates block 0 as the empty
//! free-block record, so record ids handed to callers start at 1.

use std::cmp::min;
use std::rc::Rc;

use eyre::{bail, ensure, eyre, Result};

use super::block::Block;
use super::freelist::FreeStack;
use super::{
    BlockStore, HEADER_CONTENT_LENGTH, HEADER_IS_DELETED, HEADER_NEXT_BLOCK_ID,
    HEADER_PREV_BLOCK_ID, HEADER_RECORD_LENGTH, RESERVED_HEADER_SLOTS,
};
use crate::config::{FREE_LIST_RECORD_ID, MAX_RECORD_SIZE};

/// Variable-length records as linked block chains.
pub struct RecordStore {
    blocks: BlockStore,
}

impl RecordStore {
    pub fn new(blocks: BlockStore) -> Result<Self> {
        if blocks.block_count()? == 0 {
            // Fresh file: block 0 becomes the empty free-block record.
            let head = blocks.create()?;
            debug_assert_eq!(head.id(), FREE_LIST_RECORD_ID);
        }
        Ok(Self { blocks })
    }

    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    /// Pushes buffered device writes down to the backing handle.
    pub fn sync(&self) -> Result<()> {
        self.blocks.sync()
    }

    /// Creates an empty record and returns its id.
    pub fn create(&self) -> Result<u32> {
        self.create_with(|_| Ok(Vec::new()))
    }

    /// Creates a record holding `data` and returns its id.
    pub fn create_bytes(&self, data: &[u8]) -> Result<u32> {
        self.create_with(|_| Ok(data.to_vec()))
    }

    /// Creates a record whose payload is produced by `generate`, which
    /// receives the new record's id before anything is written.
    pub fn create_with<F>(&self, generate: F) -> Result<u32>
    where
        F: FnOnce(u32) -> Result<Vec<u8>>,
    {
        let head = self.allocate()?;
        let id = head.id();

        let data = generate(id)?;
        ensure!(
            data.len() <= MAX_RECORD_SIZE,
            "record payload of {} bytes exceeds the {}-byte limit",
            data.len(),
            MAX_RECORD_SIZE
        );

        self.write_chain(head, &data)?;
        Ok(id)
    }

    /// Reads a record's full payload.
    ///
    /// Returns `None` when the head block is missing, tombstoned, or not a
    /// chain head.
    pub fn find(&self, id: u32) -> Result<Option<Vec<u8>>> {
        let Some(head) = self.blocks.find(id)? else {
            return Ok(None);
        };
        if head.header(HEADER_IS_DELETED)? == 1 {
            return Ok(None);
        }
        if head.header(HEADER_PREV_BLOCK_ID)? != 0 {
            return Ok(None);
        }

        let total = head.header(HEADER_RECORD_LENGTH)?;
        ensure!(
            (0..=MAX_RECORD_SIZE as i64).contains(&total),
            "record {} declares invalid length {}",
            id,
            total
        );
        let total = total as usize;

        let content_size = self.blocks.config().content_size();
        let mut payload = vec![0u8; total];
        let mut filled = 0usize;
        let mut current = head;

        loop {
            let len = current.header(HEADER_CONTENT_LENGTH)?;
            ensure!(
                (0..=content_size as i64).contains(&len),
                "block {} of record {} declares invalid content length {}",
                current.id(),
                id,
                len
            );
            let len = len as usize;
            ensure!(
                filled + len <= total,
                "record {} chain holds more bytes than its declared length {}",
                id,
                total
            );

            current.read(&mut payload[filled..filled + len], 0, 0, len)?;
            filled += len;

            let next = current.header(HEADER_NEXT_BLOCK_ID)?;
            if next == 0 {
                break;
            }
            current = self
                .blocks
                .find(next as u32)?
                .ok_or_else(|| eyre!("record {} chain link {} is missing", id, next))?;
            ensure!(
                current.header(HEADER_IS_DELETED)? == 0,
                "record {} chain passes through tombstoned block {}",
                id,
                current.id()
            );
        }

        ensure!(
            filled == total,
            "record {} chain holds {} bytes but declares {}",
            id,
            filled,
            total
        );
        Ok(Some(payload))
    }

    /// Rewrites a record's payload in place. The head id is preserved;
    /// the chain grows or shrinks as needed.
    pub fn update(&self, id: u32, data: &[u8]) -> Result<()> {
        ensure!(
            id != FREE_LIST_RECORD_ID,
            "the free-block record cannot be updated directly"
        );
        ensure!(
            data.len() <= MAX_RECORD_SIZE,
            "record payload of {} bytes exceeds the {}-byte limit",
            data.len(),
            MAX_RECORD_SIZE
        );

        let chain = self.find_blocks(id)?;
        let content_size = self.blocks.config().content_size();
        let needed = chain_blocks_for(data.len(), content_size);

        let mut used = chain;
        let surplus = used.split_off(min(needed, used.len()));
        while used.len() < needed {
            used.push(self.allocate()?);
        }

        let mut offset = 0usize;
        for (i, block) in used.iter().enumerate() {
            let len = min(content_size, data.len() - offset);
            block.write(&data[offset..offset + len], 0, 0, len)?;
            block.set_header(HEADER_CONTENT_LENGTH, len as i64)?;
            offset += len;

            let next = used.get(i + 1).map(|b| b.id()).unwrap_or(0);
            block.set_header(HEADER_NEXT_BLOCK_ID, next as i64)?;
            let prev = if i == 0 { 0 } else { used[i - 1].id() };
            block.set_header(HEADER_PREV_BLOCK_ID, prev as i64)?;
        }
        used[0].set_header(HEADER_RECORD_LENGTH, data.len() as i64)?;

        let stack = FreeStack::new(&self.blocks);
        for block in &surplus {
            block.set_header(HEADER_IS_DELETED, 1)?;
        }
        for block in &surplus {
            stack.push(block.id())?;
        }

        Ok(())
    }

    /// Tombstones a record's chain and releases its blocks to the free
    /// stack.
    pub fn delete(&self, id: u32) -> Result<()> {
        ensure!(
            id != FREE_LIST_RECORD_ID,
            "the free-block record cannot be deleted"
        );

        let chain = self.find_blocks(id)?;
        let stack = FreeStack::new(&self.blocks);
        for block in &chain {
            block.set_header(HEADER_IS_DELETED, 1)?;
        }
        for block in &chain {
            stack.push(block.id())?;
        }

        Ok(())
    }

    /// Walks an existing record's chain. Unlike `find`, absence and
    /// tombstones are hard errors here: callers mutate the chain.
    fn find_blocks(&self, id: u32) -> Result<Vec<Rc<Block>>> {
        let head = self
            .blocks
            .find(id)?
            .ok_or_else(|| eyre!("record {} does not exist", id))?;
        ensure!(
            head.header(HEADER_IS_DELETED)? == 0,
            "record {} is deleted",
            id
        );
        ensure!(
            head.header(HEADER_PREV_BLOCK_ID)? == 0,
            "block {} is not the head of a record",
            id
        );

        let limit = self.blocks.block_count()?;
        let mut current = Rc::clone(&head);
        let mut chain = vec![head];
        loop {
            let next = current.header(HEADER_NEXT_BLOCK_ID)?;
            if next == 0 {
                return Ok(chain);
            }
            ensure!(
                chain.len() as u32 <= limit,
                "record {} chain is cyclic after {} links",
                id,
                chain.len()
            );

            let next_block = self
                .blocks
                .find(next as u32)?
                .ok_or_else(|| eyre!("record {} chain link {} is missing", id, next))?;
            ensure!(
                next_block.header(HEADER_IS_DELETED)? == 0,
                "record {} chain passes through tombstoned block {}",
                id,
                next_block.id()
            );
            current = Rc::clone(&next_block);
            chain.push(next_block);
        }
    }

    /// Stripes `data` over the chain rooted at `head`, allocating links as
    /// needed. `head` must be freshly allocated (headers zeroed).
    fn write_chain(&self, head: Rc<Block>, data: &[u8]) -> Result<()> {
        let content_size = self.blocks.config().content_size();
        head.set_header(HEADER_RECORD_LENGTH, data.len() as i64)?;

        let mut current = head;
        let mut offset = 0usize;
        loop {
            let len = min(content_size, data.len() - offset);
            current.write(&data[offset..offset + len], 0, 0, len)?;
            current.set_header(HEADER_CONTENT_LENGTH, len as i64)?;
            offset += len;

            if offset >= data.len() {
                current.set_header(HEADER_NEXT_BLOCK_ID, 0)?;
                return Ok(());
            }

            let next = self.allocate()?;
            current.set_header(HEADER_NEXT_BLOCK_ID, next.id() as i64)?;
            next.set_header(HEADER_PREV_BLOCK_ID, current.id() as i64)?;
            current = next;
        }
    }

    /// Pops the free stack, falling back to file extension. Reused blocks
    /// get their reserved headers reset.
    fn allocate(&self) -> Result<Rc<Block>> {
        if let Some(id) = FreeStack::new(&self.blocks).pop()? {
            let block = self
                .blocks
                .find(id)?
                .ok_or_else(|| eyre!("free stack produced missing block {}", id))?;
            if id == FREE_LIST_RECORD_ID {
                bail!("free stack produced the free-block record itself");
            }
            for slot in 0..RESERVED_HEADER_SLOTS {
                block.set_header(slot, 0)?;
            }
            return Ok(block);
        }

        self.blocks.create()
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("blocks", &self.blocks)
            .finish()
    }
}

/// Number of blocks a payload of `len` bytes occupies; even an empty
/// record keeps its head block.
fn chain_blocks_for(len: usize, content_size: usize) -> usize {
    if len == 0 {
        1
    } else {
        len.div_ceil(content_size)
    }
}
