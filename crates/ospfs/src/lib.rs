#![forbid(unsafe_code)]
//! OSPFS public API facade.
//!
//! Re-exports the data engine from `ospfs-core` through a stable external
//! interface. This is the crate host adapters and the harness depend on.

pub use ospfs_core::*;
