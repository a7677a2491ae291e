//! # Block Handle
//!
//! A [`Block`] is a handle to one fixed-size page of the device. While the
//! handle is alive, the block's first sector (header plus possibly some
//! leading content) lives in an in-memory buffer:
//!
//! - Header reads and writes only touch the buffer; the five reserved
//!   fields are memoized on first read.
//! - Content I/O is split at the sector boundary. The prefix that falls
//!   inside the sector goes through the buffer; the remainder goes straight
//!   to the device at `id * block_size + max(sector_size, header_size + off)`.
//!   Direct writes are chunked at 4096 bytes, each chunk flushed.
//! - Releasing the handle (dropping the last `Rc`) writes the sector back
//!   at `id * block_size` if it was modified, then evicts the block from
//!   the store's cache. [`Block::flush`] performs the same write-through
//!   explicitly when the caller wants the error.
//!
//! A released block cannot be touched again: release is the drop of the
//! last owner, so use-after-release is unrepresentable.

use std::cell::{Cell, RefCell};
use std::cmp::min;
use std::rc::Weak;

use eyre::{ensure, Result};
use hashbrown::HashMap;

use super::device::SharedDevice;
use super::{BlockConfig, RESERVED_HEADER_SLOTS};
use crate::encoding::{read_i64_le, write_i64_le};

pub(super) type BlockCache = RefCell<HashMap<u32, Weak<Block>>>;

/// Largest single write issued past the first sector.
const DIRECT_WRITE_CHUNK: usize = 4096;

/// Handle to one block of the device, with a buffered first sector.
pub struct Block {
    id: u32,
    config: BlockConfig,
    device: SharedDevice,
    cache: Weak<BlockCache>,
    sector: RefCell<Box<[u8]>>,
    sector_dirty: Cell<bool>,
    headers: RefCell<[Option<i64>; RESERVED_HEADER_SLOTS]>,
}

impl Block {
    pub(super) fn new(
        id: u32,
        config: BlockConfig,
        device: SharedDevice,
        cache: Weak<BlockCache>,
        sector: Box<[u8]>,
    ) -> Self {
        debug_assert_eq!(sector.len(), config.sector_size());
        Self {
            id,
            config,
            device,
            cache,
            sector: RefCell::new(sector),
            sector_dirty: Cell::new(false),
            headers: RefCell::new([None; RESERVED_HEADER_SLOTS]),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn config(&self) -> &BlockConfig {
        &self.config
    }

    /// Reads header field `index` as a signed 64-bit integer.
    ///
    /// The reserved fields (0..5) are memoized on first read.
    pub fn header(&self, index: usize) -> Result<i64> {
        ensure!(
            index < self.config.header_slots(),
            "header index {} out of range (block has {} slots)",
            index,
            self.config.header_slots()
        );

        if index < RESERVED_HEADER_SLOTS {
            if let Some(value) = self.headers.borrow()[index] {
                return Ok(value);
            }
        }

        let value = read_i64_le(&self.sector.borrow(), index * 8)?;
        if index < RESERVED_HEADER_SLOTS {
            self.headers.borrow_mut()[index] = Some(value);
        }
        Ok(value)
    }

    /// Writes header field `index` into the first sector and marks it dirty.
    ///
    /// No disk I/O happens until the block is flushed or released.
    pub fn set_header(&self, index: usize, value: i64) -> Result<()> {
        ensure!(
            index < self.config.header_slots(),
            "header index {} out of range (block has {} slots)",
            index,
            self.config.header_slots()
        );

        write_i64_le(&mut self.sector.borrow_mut(), index * 8, value)?;
        if index < RESERVED_HEADER_SLOTS {
            self.headers.borrow_mut()[index] = Some(value);
        }
        self.sector_dirty.set(true);
        Ok(())
    }

    /// Copies `len` content bytes starting at content offset `src_off` into
    /// `dst[dst_off..]`.
    pub fn read(&self, dst: &mut [u8], dst_off: usize, src_off: usize, len: usize) -> Result<()> {
        self.check_content_range(src_off, len, "read")?;
        ensure!(
            dst_off + len <= dst.len(),
            "read of {} bytes at destination offset {} overruns buffer of {}",
            len,
            dst_off,
            dst.len()
        );

        let sector_size = self.config.sector_size();
        let block_start = self.id as u64 * self.config.block_size() as u64;
        // Absolute offset within the block of the first requested byte.
        let abs = self.config.header_size() + src_off;

        let buffered = if abs < sector_size {
            min(len, sector_size - abs)
        } else {
            0
        };
        if buffered > 0 {
            let sector = self.sector.borrow();
            dst[dst_off..dst_off + buffered].copy_from_slice(&sector[abs..abs + buffered]);
        }

        let remaining = len - buffered;
        if remaining > 0 {
            let device_off = block_start + sector_size.max(abs) as u64;
            self.device
                .borrow_mut()
                .read_at(device_off, &mut dst[dst_off + buffered..dst_off + len])?;
        }

        Ok(())
    }

    /// Copies `len` bytes from `src[src_off..]` to content offset `dst_off`.
    ///
    /// The portion inside the first sector updates the buffer; the remainder
    /// is written directly to the device in flushed 4096-byte chunks.
    pub fn write(&self, src: &[u8], src_off: usize, dst_off: usize, len: usize) -> Result<()> {
        self.check_content_range(dst_off, len, "write")?;
        ensure!(
            src_off + len <= src.len(),
            "write of {} bytes at source offset {} overruns buffer of {}",
            len,
            src_off,
            src.len()
        );

        let sector_size = self.config.sector_size();
        let block_start = self.id as u64 * self.config.block_size() as u64;
        let abs = self.config.header_size() + dst_off;

        let buffered = if abs < sector_size {
            min(len, sector_size - abs)
        } else {
            0
        };
        if buffered > 0 {
            let mut sector = self.sector.borrow_mut();
            sector[abs..abs + buffered].copy_from_slice(&src[src_off..src_off + buffered]);
            self.sector_dirty.set(true);
        }

        let mut written = buffered;
        while written < len {
            let chunk = min(DIRECT_WRITE_CHUNK, len - written);
            let device_off = block_start + sector_size.max(abs) as u64 + (written - buffered) as u64;
            let mut device = self.device.borrow_mut();
            device.write_at(device_off, &src[src_off + written..src_off + written + chunk])?;
            device.flush()?;
            written += chunk;
        }

        Ok(())
    }

    /// Writes the first sector back to the device if it was modified.
    pub fn flush(&self) -> Result<()> {
        if !self.sector_dirty.get() {
            return Ok(());
        }

        let block_start = self.id as u64 * self.config.block_size() as u64;
        let mut device = self.device.borrow_mut();
        device.write_at(block_start, &self.sector.borrow())?;
        device.flush()?;
        self.sector_dirty.set(false);
        Ok(())
    }

    fn check_content_range(&self, offset: usize, len: usize, what: &str) -> Result<()> {
        ensure!(
            offset + len <= self.config.content_size(),
            "{} of {} bytes at content offset {} overruns {}-byte content area",
            what,
            len,
            offset,
            self.config.content_size()
        );
        Ok(())
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        // Write-through on release. The error path has no caller here;
        // callers that need the error use `flush` before dropping.
        let _ = self.flush();

        if let Some(cache) = self.cache.upgrade() {
            cache.borrow_mut().remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("dirty", &self.sector_dirty.get())
            .finish()
    }
}
