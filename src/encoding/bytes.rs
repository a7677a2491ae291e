//! # Little-Endian Byte Helpers
//!
//! Bounds-checked reads and writes of little-endian integers at arbitrary
//! offsets in byte slices. The block layer uses these for header fields
//! (i64 slots) and the free-block stack for its u32 entries; the node
//! serializer uses them for variable-length key prefixes.
//!
//! Out-of-range offsets fail deterministically instead of panicking so that
//! corrupted length fields surface as format errors, not aborts.

use eyre::{ensure, Result};

/// Reads a little-endian `u32` at `offset`.
#[inline]
pub fn read_u32_le(buf: &[u8], offset: usize) -> Result<u32> {
    ensure!(
        offset + 4 <= buf.len(),
        "u32 read at {} overruns buffer of {} bytes",
        offset,
        buf.len()
    );
    let raw: [u8; 4] = buf[offset..offset + 4].try_into().unwrap();
    Ok(u32::from_le_bytes(raw))
}

/// Writes `value` as little-endian at `offset`.
#[inline]
pub fn write_u32_le(buf: &mut [u8], offset: usize, value: u32) -> Result<()> {
    ensure!(
        offset + 4 <= buf.len(),
        "u32 write at {} overruns buffer of {} bytes",
        offset,
        buf.len()
    );
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Reads a little-endian `i64` at `offset`.
#[inline]
pub fn read_i64_le(buf: &[u8], offset: usize) -> Result<i64> {
    ensure!(
        offset + 8 <= buf.len(),
        "i64 read at {} overruns buffer of {} bytes",
        offset,
        buf.len()
    );
    let raw: [u8; 8] = buf[offset..offset + 8].try_into().unwrap();
    Ok(i64::from_le_bytes(raw))
}

/// Writes `value` as little-endian at `offset`.
#[inline]
pub fn write_i64_le(buf: &mut [u8], offset: usize, value: i64) -> Result<()> {
    ensure!(
        offset + 8 <= buf.len(),
        "i64 write at {} overruns buffer of {} bytes",
        offset,
        buf.len()
    );
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_round_trips_at_offset() {
        let mut buf = [0u8; 12];

        write_u32_le(&mut buf, 5, 0xDEAD_BEEF).unwrap();

        assert_eq!(read_u32_le(&buf, 5).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn u32_is_little_endian_on_disk() {
        let mut buf = [0u8; 4];

        write_u32_le(&mut buf, 0, 0x0102_0304).unwrap();

        assert_eq!(buf, [0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn i64_round_trips_negative_values() {
        let mut buf = [0u8; 8];

        write_i64_le(&mut buf, 0, -42).unwrap();

        assert_eq!(read_i64_le(&buf, 0).unwrap(), -42);
    }

    #[test]
    fn read_past_end_is_an_error() {
        let buf = [0u8; 6];

        assert!(read_u32_le(&buf, 3).is_err());
        assert!(read_i64_le(&buf, 0).is_err());
    }

    #[test]
    fn write_past_end_is_an_error() {
        let mut buf = [0u8; 10];

        assert!(write_u32_le(&mut buf, 7, 1).is_err());
        assert!(write_i64_le(&mut buf, 3, 1).is_err());
    }

    #[test]
    fn write_past_end_leaves_buffer_untouched() {
        let mut buf = [0xAAu8; 10];

        let _ = write_i64_le(&mut buf, 3, 0x0101_0101_0101_0101);

        assert_eq!(buf, [0xAAu8; 10]);
    }
}
