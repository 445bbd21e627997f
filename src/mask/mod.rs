//! Compressed mask storage

pub mod rle;

pub use rle::RleMask;
