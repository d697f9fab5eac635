//! Async helpers shared across the media archiver crates.

pub mod fan_in;

pub use fan_in::{merge, merge_receivers};
