//! Scalar types shared across the crate.
//!
//! Word ids and n-gram indices are kept at 32 bits so that the parallel
//! arrays of a large model stay compact; `INVALID` doubles as the
//! not-found sentinel for both.

pub type WordId = u32;
pub type NgramIdx = u32;
pub type Count = u32;
pub type Prob = f64;
pub type Param = f64;

/// Not-found sentinel shared by word ids and n-gram indices.
pub const INVALID: u32 = u32::MAX;
