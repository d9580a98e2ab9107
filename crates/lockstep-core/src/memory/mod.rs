//! Physical memory primitives: access widths, RAM and the MMIO region table.

/// Access-width validation and little-endian lane helpers.
pub mod access;
/// Bounded registry of memory-mapped device regions.
pub mod map;
/// Host-backed physical RAM.
pub mod ram;

pub use access::{lane_mask, read_le, write_le, AccessWidth};
pub use map::{IoCallback, MmioMap, MmioRegion, NoCallback, MMIO_MAP_CAPACITY};
pub use ram::PhysicalMemory;
