//! # Byte Device Abstraction
//!
//! The block layer reads and writes a byte-addressed device through the
//! [`Device`] trait: positioned reads and writes, length queries, zero-fill
//! extension, and flushing. Two backends are provided:
//!
//! - [`FileDevice`]: a read/write file handle. The database file is owned
//!   exclusively by one handle; two instances on the same path must not
//!   coexist (single-writer contract, not enforced by the OS).
//! - [`MemDevice`]: an in-memory byte vector, used by tests so block and
//!   record behavior can be exercised without touching the filesystem.
//!
//! Devices are copy-based: callers hand in buffers and the device fills or
//! drains them. There is no mmap and no zero-copy path; the block layer's
//! buffered first sector is the only cache between callers and the device.
//!
//! Flushing pushes buffered writes to the underlying handle. It is not an
//! fsync barrier; crash consistency is out of scope.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use eyre::{ensure, Result, WrapErr};

/// A byte-addressed storage device with positioned I/O.
pub trait Device {
    /// Fills `buf` from `offset`. Short reads are errors.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes all of `buf` at `offset`. Writing past the end is an error;
    /// use `set_len` to extend first.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Current device length in bytes.
    fn len(&self) -> Result<u64>;

    /// Resizes the device. Extension zero-fills the new range.
    fn set_len(&mut self, len: u64) -> Result<()>;

    /// Pushes buffered writes down to the underlying handle.
    fn flush(&mut self) -> Result<()>;
}

/// Shared ownership of a device between a block store and its live blocks.
pub type SharedDevice = Rc<RefCell<Box<dyn Device>>>;

/// File-backed device.
#[derive(Debug)]
pub struct FileDevice {
    file: File,
    path: PathBuf,
}

impl FileDevice {
    /// Opens (or creates) the file at `path` for exclusive read/write use.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        ensure!(
            !path.as_os_str().is_empty(),
            "database path must not be empty"
        );

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open database file '{}'", path.display()))?;

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Device for FileDevice {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .wrap_err("seek failed")?;
        self.file
            .read_exact(buf)
            .wrap_err_with(|| format!("short read of {} bytes at offset {}", buf.len(), offset))?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let len = self.len()?;
        ensure!(
            offset + buf.len() as u64 <= len,
            "write of {} bytes at offset {} past device end {}",
            buf.len(),
            offset,
            len
        );
        self.file
            .seek(SeekFrom::Start(offset))
            .wrap_err("seek failed")?;
        self.file
            .write_all(buf)
            .wrap_err_with(|| format!("short write of {} bytes at offset {}", buf.len(), offset))?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata().wrap_err("stat failed")?.len())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.file
            .set_len(len)
            .wrap_err_with(|| format!("failed to resize '{}' to {}", self.path.display(), len))
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush().wrap_err("flush failed")
    }
}

/// In-memory device for tests.
#[derive(Debug, Default)]
pub struct MemDevice {
    data: Vec<u8>,
}

impl MemDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl Device for MemDevice {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let offset = offset as usize;
        ensure!(
            offset + buf.len() <= self.data.len(),
            "read of {} bytes at offset {} past device end {}",
            buf.len(),
            offset,
            self.data.len()
        );
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let offset = offset as usize;
        ensure!(
            offset + buf.len() <= self.data.len(),
            "write of {} bytes at offset {} past device end {}",
            buf.len(),
            offset,
            self.data.len()
        );
        self.data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.data.resize(len as usize, 0);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mem_device_round_trips_positioned_writes() {
        let mut dev = MemDevice::new();
        dev.set_len(16).unwrap();

        dev.write_at(4, &[1, 2, 3, 4]).unwrap();

        let mut buf = [0u8; 4];
        dev.read_at(4, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn mem_device_extension_zero_fills() {
        let mut dev = MemDevice::with_data(vec![0xFF; 4]);

        dev.set_len(8).unwrap();

        let mut buf = [0xAAu8; 8];
        dev.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0]);
    }

    #[test]
    fn mem_device_rejects_out_of_range_access() {
        let mut dev = MemDevice::with_data(vec![0; 8]);

        let mut buf = [0u8; 4];
        assert!(dev.read_at(6, &mut buf).is_err());
        assert!(dev.write_at(6, &buf).is_err());
    }

    #[test]
    fn file_device_round_trips_through_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dev.bin");

        {
            let mut dev = FileDevice::open(&path).unwrap();
            dev.set_len(32).unwrap();
            dev.write_at(8, b"hello").unwrap();
            dev.flush().unwrap();
        }

        let mut dev = FileDevice::open(&path).unwrap();
        assert_eq!(dev.len().unwrap(), 32);
        let mut buf = [0u8; 5];
        dev.read_at(8, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn file_device_set_len_zero_fills() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dev.bin");

        let mut dev = FileDevice::open(&path).unwrap();
        dev.set_len(16).unwrap();

        let mut buf = [0xAAu8; 16];
        dev.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn file_device_rejects_empty_path() {
        assert!(FileDevice::open("").is_err());
    }

    #[test]
    fn file_device_rejects_write_past_end() {
        let dir = tempdir().unwrap();
        let mut dev = FileDevice::open(dir.path().join("dev.bin")).unwrap();
        dev.set_len(8).unwrap();

        assert!(dev.write_at(6, &[0u8; 4]).is_err());
    }
}
