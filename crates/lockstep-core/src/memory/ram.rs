//! Host-backed physical RAM occupying one contiguous guest interval.

use std::ops::Range;

use crate::memory::access::{lane_mask, read_le, write_le};
use crate::{AccessFault, AccessWidth};

/// Contiguous guest RAM at `[base, base + size - 1]`.
#[derive(Clone, PartialEq, Eq)]
pub struct PhysicalMemory {
    base: u64,
    data: Box<[u8]>,
}

impl std::fmt::Debug for PhysicalMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalMemory")
            .field("low", &format_args!("{:#010x}", self.low()))
            .field("high", &format_args!("{:#010x}", self.high()))
            .finish_non_exhaustive()
    }
}

impl PhysicalMemory {
    /// Allocates zeroed RAM of `size` bytes at `base`.
    ///
    /// `size` must be non-zero; [`crate::MachineConfig::validate`] enforces it.
    #[must_use]
    pub fn new(base: u64, size: usize) -> Self {
        Self {
            base,
            data: vec![0; size].into_boxed_slice(),
        }
    }

    /// Inclusive low bound.
    #[must_use]
    pub const fn low(&self) -> u64 {
        self.base
    }

    /// Inclusive high bound.
    #[must_use]
    pub const fn high(&self) -> u64 {
        self.base + self.data.len() as u64 - 1
    }

    /// Size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` when `addr` lies inside RAM.
    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.low() && addr <= self.high()
    }

    /// Returns `true` when the closed interval `[low, high]` intersects RAM.
    #[must_use]
    pub const fn overlaps(&self, low: u64, high: u64) -> bool {
        low <= self.high() && high >= self.low()
    }

    /// Whole backing image.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Whole backing image, mutable.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn span(&self, addr: u64, len: usize) -> Result<Range<usize>, AccessFault> {
        let out_of_bounds = || AccessFault::RamOutOfBounds {
            addr,
            len,
            low: self.low(),
            high: self.high(),
        };
        let offset = addr
            .checked_sub(self.base)
            .and_then(|offset| usize::try_from(offset).ok())
            .ok_or_else(out_of_bounds)?;
        let end = offset.checked_add(len).ok_or_else(out_of_bounds)?;
        if end > self.data.len() {
            return Err(out_of_bounds());
        }
        Ok(offset..end)
    }

    /// Reads `width` bytes at `addr`, zero-extended.
    ///
    /// # Errors
    ///
    /// Returns [`AccessFault::RamOutOfBounds`] when any byte falls outside RAM.
    pub fn read(&self, addr: u64, width: AccessWidth) -> Result<u64, AccessFault> {
        let span = self.span(addr, width.bytes())?;
        Ok(read_le(&self.data[span]))
    }

    /// Writes the low `width` bytes of `value` at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessFault::RamOutOfBounds`] when any byte falls outside RAM.
    pub fn write(&mut self, addr: u64, width: AccessWidth, value: u64) -> Result<(), AccessFault> {
        let span = self.span(addr, width.bytes())?;
        write_le(&mut self.data[span], value);
        Ok(())
    }

    /// Writes only the byte lanes of `value` enabled in `byte_enable`.
    ///
    /// Lane `i` targets `addr + i`. Bounds are checked over the enabled lanes
    /// only; disabled lanes are neither checked nor touched.
    ///
    /// # Errors
    ///
    /// Returns [`AccessFault::RamOutOfBounds`] when an enabled lane falls
    /// outside RAM.
    pub fn write_lanes(&mut self, addr: u64, byte_enable: u8, value: u64) -> Result<(), AccessFault> {
        if byte_enable == 0 {
            return Ok(());
        }
        let first = byte_enable.trailing_zeros() as usize;
        let last = 7 - byte_enable.leading_zeros() as usize;
        let lead = addr
            .checked_add(first as u64)
            .ok_or(AccessFault::Unmapped { addr })?;
        let span = self.span(lead, last - first + 1)?;
        let merged = (read_le(&self.data[span.clone()]) & !(lane_mask(byte_enable) >> (first * 8)))
            | ((value & lane_mask(byte_enable)) >> (first * 8));
        write_le(&mut self.data[span], merged);
        Ok(())
    }

    /// Copies `bytes` into RAM starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessFault::RamOutOfBounds`] when the image does not fit.
    pub fn load_image(&mut self, addr: u64, bytes: &[u8]) -> Result<(), AccessFault> {
        if bytes.is_empty() {
            return Ok(());
        }
        let span = self.span(addr, bytes.len())?;
        self.data[span].copy_from_slice(bytes);
        Ok(())
    }
}
