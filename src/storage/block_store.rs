//! # Block Store
//!
//! Allocates and locates blocks on a byte device. Blocks are identified by
//! their zero-based page index; ids are dense, assigned monotonically by
//! file extension, and never reassigned (reuse of freed blocks happens one
//! layer up, through the free-block record, without changing the id's
//! position in the file).
//!
//! ## Cache Discipline
//!
//! The store keeps an instance-private map of live block handles keyed by
//! id, holding weak references. While any owner keeps a handle alive,
//! `find` returns that same instance, so concurrent walkers of one chain
//! observe each other's header mutations immediately. When the last owner
//! releases a block it writes its first sector back and evicts its own
//! cache entry (see `Block::drop`), so the map never grows beyond the set
//! of live handles.
//!
//! ## Invariants
//!
//! - The device length is always a multiple of the block size; `create`
//!   refuses to extend a misaligned file (corruption signal).
//! - `find` returns `None` for ids past the end of the device.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use eyre::{ensure, Result};
use hashbrown::HashMap;

use super::block::{Block, BlockCache};
use super::device::{Device, SharedDevice};
use super::BlockConfig;

/// Allocates, locates, and caches fixed-size blocks on a device.
pub struct BlockStore {
    device: SharedDevice,
    config: BlockConfig,
    cache: Rc<BlockCache>,
}

impl BlockStore {
    pub fn new(device: Box<dyn Device>, config: BlockConfig) -> Result<Self> {
        let len = device.len()?;
        ensure!(
            len % config.block_size() as u64 == 0,
            "device length {} is not a multiple of block size {}",
            len,
            config.block_size()
        );

        Ok(Self {
            device: Rc::new(RefCell::new(device)),
            config,
            cache: Rc::new(RefCell::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &BlockConfig {
        &self.config
    }

    /// Number of blocks currently in the device.
    pub fn block_count(&self) -> Result<u32> {
        let len = self.device.borrow().len()?;
        Ok((len / self.config.block_size() as u64) as u32)
    }

    /// Extends the device by exactly one zero-filled block and returns a
    /// handle to it. The new block's id is the previous page count.
    pub fn create(&self) -> Result<Rc<Block>> {
        let block_size = self.config.block_size() as u64;
        let id = {
            let mut device = self.device.borrow_mut();
            let len = device.len()?;
            ensure!(
                len % block_size == 0,
                "device length {} is not a multiple of block size {}",
                len,
                block_size
            );
            let id = (len / block_size) as u32;
            device.set_len(len + block_size)?;
            id
        };

        let sector = vec![0u8; self.config.sector_size()].into_boxed_slice();
        Ok(self.cache_block(id, sector))
    }

    /// Returns a handle to block `id`, or `None` when the id lies past the
    /// end of the device. While a previous handle to the same id is alive,
    /// that instance is returned instead of re-reading the sector.
    pub fn find(&self, id: u32) -> Result<Option<Rc<Block>>> {
        if let Some(block) = self.cache.borrow().get(&id).and_then(Weak::upgrade) {
            return Ok(Some(block));
        }

        let block_size = self.config.block_size() as u64;
        let mut sector = vec![0u8; self.config.sector_size()];
        {
            let mut device = self.device.borrow_mut();
            let len = device.len()?;
            if (id as u64 + 1) * block_size > len {
                return Ok(None);
            }
            device.read_at(id as u64 * block_size, &mut sector)?;
        }

        Ok(Some(self.cache_block(id, sector.into_boxed_slice())))
    }

    /// Pushes buffered device writes down to the backing handle.
    pub fn sync(&self) -> Result<()> {
        self.device.borrow_mut().flush()
    }

    fn cache_block(&self, id: u32, sector: Box<[u8]>) -> Rc<Block> {
        let block = Rc::new(Block::new(
            id,
            self.config,
            Rc::clone(&self.device),
            Rc::downgrade(&self.cache),
            sector,
        ));
        self.cache.borrow_mut().insert(id, Rc::downgrade(&block));
        block
    }
}

impl std::fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore")
            .field("config", &self.config)
            .field("live_blocks", &self.cache.borrow().len())
            .finish()
    }
}
