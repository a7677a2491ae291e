//! # Configuration
//!
//! Central home for ShaleDB's tuning constants. Import constants from this
//! module rather than redefining them locally.

mod constants;

pub use constants::*;
