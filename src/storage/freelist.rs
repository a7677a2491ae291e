//! # Free-Block Stack
//!
//! Freed blocks are tracked in-band: record 0's payload is a LIFO stack of
//! little-endian u32 block ids, appended four bytes at a time to the last
//! block of the record's chain.
//!
//! ## Layout
//!
//! ```text
//! record 0 chain:   [block 0] -> [tail 1] -> ... -> [tail N]
//! tail content:     id id id id ...            (4 bytes each, LIFO)
//! ```
//!
//! `CONTENT_LENGTH` of every block in this chain is always a multiple of 4;
//! anything else is a fatal format error.
//!
//! ## Push
//!
//! Appends the id to the tail block when it fits (`CONTENT_LENGTH` becomes
//! `old + 4`). A full tail gets a fresh successor block allocated by file
//! extension (never from the stack itself), whose `CONTENT_LENGTH` becomes 4.
//!
//! ## Pop
//!
//! Pops the trailing entry of the tail block. When the tail is empty but a
//! predecessor exists, the predecessor's trailing entry is the reused id,
//! and the now-detached empty tail takes its place in that slot, so the
//! tail block itself becomes the next free candidate and the chain shrinks
//! by one block.

use std::rc::Rc;

use eyre::{bail, ensure, eyre, Result};

use super::block::Block;
use super::{
    BlockStore, HEADER_CONTENT_LENGTH, HEADER_NEXT_BLOCK_ID, HEADER_PREV_BLOCK_ID,
};
use crate::config::FREE_LIST_RECORD_ID;

/// LIFO stack of reusable block ids, stored as record 0.
pub struct FreeStack<'a> {
    blocks: &'a BlockStore,
}

impl<'a> FreeStack<'a> {
    pub fn new(blocks: &'a BlockStore) -> Self {
        Self { blocks }
    }

    /// Pops the most recently freed block id, if any.
    pub fn pop(&self) -> Result<Option<u32>> {
        let (tail, prev) = self.tail()?;
        let len = self.aligned_content_len(&tail)?;

        if len > 0 {
            let id = self.entry_at(&tail, len - 4)?;
            tail.set_header(HEADER_CONTENT_LENGTH, (len - 4) as i64)?;
            return Ok(Some(id));
        }

        let Some(prev) = prev else {
            return Ok(None);
        };

        // Empty tail: reuse the predecessor's trailing entry and park the
        // detached tail's own id in the vacated slot.
        let prev_len = self.aligned_content_len(&prev)?;
        ensure!(
            prev_len >= 4,
            "free stack block {} precedes the tail but holds no entries",
            prev.id()
        );

        let freed = self.entry_at(&prev, prev_len - 4)?;
        prev.write(&tail.id().to_le_bytes(), 0, prev_len - 4, 4)?;
        prev.set_header(HEADER_NEXT_BLOCK_ID, 0)?;
        tail.set_header(HEADER_PREV_BLOCK_ID, 0)?;

        Ok(Some(freed))
    }

    /// Pushes a freed block id onto the stack.
    pub fn push(&self, id: u32) -> Result<()> {
        let (tail, _) = self.tail()?;
        let len = self.aligned_content_len(&tail)?;

        if len + 4 <= tail.config().content_size() {
            tail.write(&id.to_le_bytes(), 0, len, 4)?;
            tail.set_header(HEADER_CONTENT_LENGTH, (len + 4) as i64)?;
            return Ok(());
        }

        // Tail is full: extend the chain. The successor comes from file
        // extension, never from the stack, so push cannot recurse.
        let successor = self.blocks.create()?;
        tail.set_header(HEADER_NEXT_BLOCK_ID, successor.id() as i64)?;
        successor.set_header(HEADER_PREV_BLOCK_ID, tail.id() as i64)?;
        successor.write(&id.to_le_bytes(), 0, 0, 4)?;
        successor.set_header(HEADER_CONTENT_LENGTH, 4)?;

        Ok(())
    }

    /// Walks record 0's chain to its last block, returning it along with
    /// its predecessor (absent when the chain is a single block).
    fn tail(&self) -> Result<(Rc<Block>, Option<Rc<Block>>)> {
        let head = self
            .blocks
            .find(FREE_LIST_RECORD_ID)?
            .ok_or_else(|| eyre!("free-block record is missing"))?;

        let mut prev: Option<Rc<Block>> = None;
        let mut current = head;
        let mut steps = 0u32;
        let limit = self.blocks.block_count()?;

        loop {
            let next = current.header(HEADER_NEXT_BLOCK_ID)?;
            if next == 0 {
                return Ok((current, prev));
            }

            steps += 1;
            ensure!(
                steps <= limit,
                "free-block record chain is cyclic after {} links",
                steps
            );

            let next_block = self
                .blocks
                .find(next as u32)?
                .ok_or_else(|| eyre!("free-block record chain link {} is missing", next))?;
            prev = Some(current);
            current = next_block;
        }
    }

    fn aligned_content_len(&self, block: &Block) -> Result<usize> {
        let len = block.header(HEADER_CONTENT_LENGTH)?;
        if len < 0 || len as usize > block.config().content_size() || len % 4 != 0 {
            bail!(
                "free stack block {} has invalid content length {}",
                block.id(),
                len
            );
        }
        Ok(len as usize)
    }

    fn entry_at(&self, block: &Block, offset: usize) -> Result<u32> {
        let mut raw = [0u8; 4];
        block.read(&mut raw, 0, offset, 4)?;
        Ok(u32::from_le_bytes(raw))
    }
}
