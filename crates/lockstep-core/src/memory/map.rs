//! Bounded registry of memory-mapped device regions.
//!
//! Regions are registered once during device setup and never removed.
//! Registration checks the new interval against RAM and every existing region
//! before touching the table, so a rejected registration leaves no trace.

use std::fmt;
use std::sync::Arc;

use crate::memory::access::{lane_mask, read_le, write_le};
use crate::{AccessFault, AccessWidth, ConfigError};

/// Maximum number of regions the table holds.
pub const MMIO_MAP_CAPACITY: usize = 16;

/// Device-side hook invoked on every access to a region.
///
/// `space` is the region's whole backing store, `offset` the byte offset of
/// the access within it. For reads the hook runs before the bytes are
/// sampled, so a device can refresh its registers; for writes it runs after
/// the bytes land, so a device can react to them.
pub trait IoCallback {
    /// Handles one access.
    fn on_access(&mut self, space: &mut [u8], offset: usize, len: usize, is_write: bool);
}

impl<F> IoCallback for F
where
    F: FnMut(&mut [u8], usize, usize, bool),
{
    fn on_access(&mut self, space: &mut [u8], offset: usize, len: usize, is_write: bool) {
        self(space, offset, len, is_write);
    }
}

/// Callback for passive regions whose backing store is plain storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCallback;

impl IoCallback for NoCallback {
    fn on_access(&mut self, _space: &mut [u8], _offset: usize, _len: usize, _is_write: bool) {}
}

/// One named MMIO interval with its backing store and callback.
pub struct MmioRegion {
    name: Arc<str>,
    low: u64,
    high: u64,
    space: Box<[u8]>,
    callback: Box<dyn IoCallback>,
}

impl fmt::Debug for MmioRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmioRegion")
            .field("name", &self.name)
            .field("low", &format_args!("{:#010x}", self.low))
            .field("high", &format_args!("{:#010x}", self.high))
            .finish_non_exhaustive()
    }
}

impl MmioRegion {
    /// Region name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle to the region name, as stored in device trace records.
    #[must_use]
    pub fn name_handle(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Inclusive low bound.
    #[must_use]
    pub const fn low(&self) -> u64 {
        self.low
    }

    /// Inclusive high bound.
    #[must_use]
    pub const fn high(&self) -> u64 {
        self.high
    }

    /// Returns `true` when `addr` lies inside the region.
    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.low && addr <= self.high
    }

    /// Returns `true` when the closed interval `[low, high]` intersects the region.
    #[must_use]
    pub const fn overlaps(&self, low: u64, high: u64) -> bool {
        low <= self.high && high >= self.low
    }

    /// Backing store.
    #[must_use]
    pub fn space(&self) -> &[u8] {
        &self.space
    }

    /// Backing store, mutable. Does not invoke the callback.
    pub fn space_mut(&mut self) -> &mut [u8] {
        &mut self.space
    }

    fn offset_of(&self, addr: u64, len: usize) -> Result<usize, AccessFault> {
        let span_fault = || AccessFault::DeviceSpan {
            region: self.name.to_string(),
            addr,
            len,
        };
        if !self.contains(addr) {
            return Err(span_fault());
        }
        let offset = usize::try_from(addr - self.low).map_err(|_| span_fault())?;
        let last = u64::try_from(len - 1).map_err(|_| span_fault())?;
        if addr.checked_add(last).is_none_or(|end| end > self.high) {
            return Err(span_fault());
        }
        Ok(offset)
    }

    /// Reads `width` bytes at `addr`, running the callback first.
    ///
    /// # Errors
    ///
    /// Returns [`AccessFault::DeviceSpan`] when the access does not fit
    /// inside the region.
    pub fn read(&mut self, addr: u64, width: AccessWidth) -> Result<u64, AccessFault> {
        let offset = self.offset_of(addr, width.bytes())?;
        self.callback
            .on_access(&mut self.space, offset, width.bytes(), false);
        Ok(read_le(&self.space[offset..offset + width.bytes()]))
    }

    /// Writes the low `width` bytes of `value` at `addr`, then runs the callback.
    ///
    /// # Errors
    ///
    /// Returns [`AccessFault::DeviceSpan`] when the access does not fit
    /// inside the region.
    pub fn write(&mut self, addr: u64, width: AccessWidth, value: u64) -> Result<(), AccessFault> {
        let offset = self.offset_of(addr, width.bytes())?;
        write_le(&mut self.space[offset..offset + width.bytes()], value);
        self.callback
            .on_access(&mut self.space, offset, width.bytes(), true);
        Ok(())
    }

    /// Writes the enabled byte lanes of `value`, where lane `i` targets
    /// `addr + i`, then runs the callback over the enabled span.
    ///
    /// # Errors
    ///
    /// Returns [`AccessFault::DeviceSpan`] when an enabled lane falls
    /// outside the region.
    pub fn write_lanes(&mut self, addr: u64, byte_enable: u8, value: u64) -> Result<(), AccessFault> {
        if byte_enable == 0 {
            return Ok(());
        }
        let first = byte_enable.trailing_zeros() as usize;
        let last = 7 - byte_enable.leading_zeros() as usize;
        let len = last - first + 1;
        let lead = addr
            .checked_add(first as u64)
            .ok_or(AccessFault::Unmapped { addr })?;
        let offset = self.offset_of(lead, len)?;
        let lanes = lane_mask(byte_enable) >> (first * 8);
        let slot = &mut self.space[offset..offset + len];
        let merged = (read_le(slot) & !lanes) | ((value >> (first * 8)) & lanes);
        write_le(slot, merged);
        self.callback.on_access(&mut self.space, offset, len, true);
        Ok(())
    }
}

/// Bounded, insertion-ordered table of MMIO regions.
pub struct MmioMap {
    regions: Vec<MmioRegion>,
    ram_low: u64,
    ram_high: u64,
}

impl fmt::Debug for MmioMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.regions).finish()
    }
}

impl MmioMap {
    /// Creates an empty table that keeps regions clear of RAM `[ram_low, ram_high]`.
    #[must_use]
    pub fn new(ram_low: u64, ram_high: u64) -> Self {
        Self {
            regions: Vec::with_capacity(MMIO_MAP_CAPACITY),
            ram_low,
            ram_high,
        }
    }

    /// Registers `name` at `[base, base + len - 1]`.
    ///
    /// Returns the region's index in registration order.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the table is full, `len` is zero, the
    /// interval wraps the address space, `backing` is shorter than `len`, or
    /// the interval intersects RAM or an existing region. The table is left
    /// unchanged on error.
    pub fn register<C: IoCallback + 'static>(
        &mut self,
        name: &str,
        base: u64,
        len: u64,
        backing: impl Into<Box<[u8]>>,
        callback: C,
    ) -> Result<usize, ConfigError> {
        if self.regions.len() >= MMIO_MAP_CAPACITY {
            return Err(ConfigError::RegionTableFull {
                name: name.to_owned(),
                capacity: MMIO_MAP_CAPACITY,
            });
        }
        if len == 0 {
            return Err(ConfigError::EmptyRegion {
                name: name.to_owned(),
            });
        }
        let high = base
            .checked_add(len - 1)
            .ok_or_else(|| ConfigError::RegionOverflow {
                name: name.to_owned(),
                base,
                len,
            })?;
        let space = backing.into();
        if usize::try_from(len).ok().is_none_or(|required| space.len() < required) {
            return Err(ConfigError::RegionBackingTooSmall {
                name: name.to_owned(),
                required: len,
                actual: space.len(),
            });
        }

        let overlap = |other: &str, other_low: u64, other_high: u64| ConfigError::RegionOverlap {
            name: name.to_owned(),
            low: base,
            high,
            other: other.to_owned(),
            other_low,
            other_high,
        };
        if base <= self.ram_high && high >= self.ram_low {
            return Err(overlap("pmem", self.ram_low, self.ram_high));
        }
        if let Some(existing) = self.regions.iter().find(|r| r.overlaps(base, high)) {
            return Err(overlap(existing.name(), existing.low, existing.high));
        }

        self.regions.push(MmioRegion {
            name: Arc::from(name),
            low: base,
            high,
            space,
            callback: Box::new(callback),
        });
        log::info!("Add mmio map '{name}' at [{base:#010x}, {high:#010x}]");
        Ok(self.regions.len() - 1)
    }

    /// First region, in registration order, whose interval contains `addr`.
    #[must_use]
    pub fn find(&self, addr: u64) -> Option<&MmioRegion> {
        self.regions.iter().find(|region| region.contains(addr))
    }

    /// Index of the region containing `addr`.
    #[must_use]
    pub fn find_index(&self, addr: u64) -> Option<usize> {
        self.regions.iter().position(|region| region.contains(addr))
    }

    /// Region by registration index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&MmioRegion> {
        self.regions.get(index)
    }

    /// Region by registration index, mutable.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut MmioRegion> {
        self.regions.get_mut(index)
    }

    /// Region by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&MmioRegion> {
        self.regions.iter().find(|region| region.name() == name)
    }

    /// Number of registered regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Returns `true` when no region is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Regions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &MmioRegion> + '_ {
        self.regions.iter()
    }
}
