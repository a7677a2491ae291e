//! # Encoding Utilities
//!
//! Cross-cutting byte-level helpers shared by the storage and tree layers:
//!
//! - `bytes`: bounds-checked little-endian integer reads and writes over
//!   byte slices. All multi-byte integers on disk are little-endian.
//! - `search`: binary search over sorted slices, including a variant that
//!   resolves a run of duplicates to its first or last index. Non-unique
//!   trees use the occurrence-aware variant to pick scan boundaries.

mod bytes;
mod search;

pub use bytes::{read_i64_le, read_u32_le, write_i64_le, write_u32_le};
pub use search::{binary_search_by, binary_search_occurrence, Occurrence};
