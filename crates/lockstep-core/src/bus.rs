//! Address space router.
//!
//! Physical RAM is checked first, then the MMIO region table. Anything else is
//! an [`AccessFault::Unmapped`]. Every successful access can be recorded into
//! the memory trace, and accesses served by a device additionally into the
//! device trace. Tracing only observes: values are computed before records are
//! built.

use crate::config::TraceConfig;
use crate::memory::{lane_mask, IoCallback, MmioMap, PhysicalMemory};
use crate::trace::{
    DeviceAccessKind, DeviceEvent, MemoryAccessKind, MemoryEvent, TraceLog,
};
use crate::{AccessFault, AccessWidth, ConfigError};

/// Which backing store served an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Ram,
    Device(usize),
}

/// RAM plus MMIO table plus their traces.
#[derive(Debug)]
pub struct Bus {
    ram: PhysicalMemory,
    mmio: MmioMap,
    mtrace: TraceLog<MemoryEvent>,
    dtrace: TraceLog<DeviceEvent>,
    device_touched: bool,
}

impl Bus {
    /// Builds a router over `ram` with an empty region table.
    #[must_use]
    pub fn new(ram: PhysicalMemory, trace: &TraceConfig) -> Self {
        let mmio = MmioMap::new(ram.low(), ram.high());
        Self {
            ram,
            mmio,
            mtrace: TraceLog::new(trace.enable_mem_trace, trace.ring_capacity),
            dtrace: TraceLog::new(trace.enable_device_trace, trace.ring_capacity),
            device_touched: false,
        }
    }

    /// Maps a device region at `[base, base + len - 1]`.
    ///
    /// # Errors
    ///
    /// See [`MmioMap::register`].
    pub fn register_region<C: IoCallback + 'static>(
        &mut self,
        name: &str,
        base: u64,
        len: u64,
        backing: impl Into<Box<[u8]>>,
        callback: C,
    ) -> Result<usize, ConfigError> {
        self.mmio.register(name, base, len, backing, callback)
    }

    fn route(&self, addr: u64) -> Result<Target, AccessFault> {
        if self.ram.contains(addr) {
            return Ok(Target::Ram);
        }
        self.mmio
            .find_index(addr)
            .map(Target::Device)
            .ok_or(AccessFault::Unmapped { addr })
    }

    fn load(
        &mut self,
        kind: MemoryAccessKind,
        addr: u64,
        len: usize,
        pc: u64,
    ) -> Result<u64, AccessFault> {
        let width = AccessWidth::from_len(len)?;
        let data = match self.route(addr)? {
            Target::Ram => self.ram.read(addr, width)?,
            Target::Device(index) => {
                let region = self
                    .mmio
                    .get_mut(index)
                    .ok_or(AccessFault::Unmapped { addr })?;
                let data = region.read(addr, width)?;
                let name = region.name_handle();
                self.device_touched = true;
                self.dtrace.record(|| DeviceEvent {
                    kind: DeviceAccessKind::Read,
                    region: name,
                    data,
                    len,
                    pc,
                });
                data
            }
        };
        log::trace!("{} {addr:#010x}/{len} -> {data:#x}", kind.tag());
        self.mtrace.record(|| MemoryEvent {
            kind,
            addr,
            len,
            data,
            pc,
        });
        Ok(data)
    }

    /// Loads `len` bytes at `addr`, zero-extended.
    ///
    /// # Errors
    ///
    /// Returns an [`AccessFault`] for illegal widths, unmapped addresses and
    /// accesses that run off the end of RAM or a region.
    pub fn read(&mut self, addr: u64, len: usize, pc: u64) -> Result<u64, AccessFault> {
        self.load(MemoryAccessKind::Read, addr, len, pc)
    }

    /// Instruction fetch. Same routing as [`Self::read`], traced as a fetch.
    ///
    /// # Errors
    ///
    /// As [`Self::read`].
    pub fn fetch(&mut self, addr: u64, len: usize, pc: u64) -> Result<u64, AccessFault> {
        self.load(MemoryAccessKind::Fetch, addr, len, pc)
    }

    /// Stores the low `len` bytes of `data` at `addr`.
    ///
    /// # Errors
    ///
    /// As [`Self::read`].
    pub fn write(&mut self, addr: u64, len: usize, data: u64, pc: u64) -> Result<(), AccessFault> {
        let width = AccessWidth::from_len(len)?;
        let data = width.truncate(data);
        match self.route(addr)? {
            Target::Ram => self.ram.write(addr, width, data)?,
            Target::Device(index) => {
                let region = self
                    .mmio
                    .get_mut(index)
                    .ok_or(AccessFault::Unmapped { addr })?;
                region.write(addr, width, data)?;
                let name = region.name_handle();
                self.device_touched = true;
                self.dtrace.record(|| DeviceEvent {
                    kind: DeviceAccessKind::Write,
                    region: name,
                    data,
                    len,
                    pc,
                });
            }
        }
        log::trace!("W {addr:#010x}/{len} <- {data:#x}");
        self.mtrace.record(|| MemoryEvent {
            kind: MemoryAccessKind::Write,
            addr,
            len,
            data,
            pc,
        });
        Ok(())
    }

    /// Byte-strobed store: lane `i` of `data` goes to `addr + i` when bit `i`
    /// of `byte_enable` is set. Disabled lanes are left untouched. A zero mask
    /// is a no-op and is not traced.
    ///
    /// Routing is decided by the first enabled lane.
    ///
    /// # Errors
    ///
    /// As [`Self::read`], evaluated over the enabled lanes.
    pub fn write_masked(
        &mut self,
        addr: u64,
        byte_enable: u8,
        data: u64,
        pc: u64,
    ) -> Result<(), AccessFault> {
        if byte_enable == 0 {
            return Ok(());
        }
        let first = u64::from(byte_enable.trailing_zeros());
        let data = data & lane_mask(byte_enable);
        let len = (8 - byte_enable.leading_zeros() - byte_enable.trailing_zeros()) as usize;
        let lead = addr
            .checked_add(first)
            .ok_or(AccessFault::Unmapped { addr })?;
        match self.route(lead)? {
            Target::Ram => self.ram.write_lanes(addr, byte_enable, data)?,
            Target::Device(index) => {
                let region = self
                    .mmio
                    .get_mut(index)
                    .ok_or(AccessFault::Unmapped { addr })?;
                region.write_lanes(addr, byte_enable, data)?;
                let name = region.name_handle();
                self.device_touched = true;
                self.dtrace.record(|| DeviceEvent {
                    kind: DeviceAccessKind::Write,
                    region: name,
                    data,
                    len,
                    pc,
                });
            }
        }
        log::trace!("W {addr:#010x} mask={byte_enable:#04x} <- {data:#x}");
        self.mtrace.record(|| MemoryEvent {
            kind: MemoryAccessKind::Write,
            addr,
            len,
            data,
            pc,
        });
        Ok(())
    }

    /// Returns whether a device was accessed since the last call, and clears the flag.
    pub fn take_device_access(&mut self) -> bool {
        std::mem::take(&mut self.device_touched)
    }

    /// Physical RAM.
    #[must_use]
    pub const fn ram(&self) -> &PhysicalMemory {
        &self.ram
    }

    /// Physical RAM, mutable. Bypasses tracing.
    pub const fn ram_mut(&mut self) -> &mut PhysicalMemory {
        &mut self.ram
    }

    /// Region table.
    #[must_use]
    pub const fn mmio(&self) -> &MmioMap {
        &self.mmio
    }

    /// Memory access trace.
    #[must_use]
    pub const fn memory_trace(&self) -> &TraceLog<MemoryEvent> {
        &self.mtrace
    }

    /// Memory access trace, mutable.
    pub const fn memory_trace_mut(&mut self) -> &mut TraceLog<MemoryEvent> {
        &mut self.mtrace
    }

    /// Device access trace.
    #[must_use]
    pub const fn device_trace(&self) -> &TraceLog<DeviceEvent> {
        &self.dtrace
    }

    /// Device access trace, mutable.
    pub const fn device_trace_mut(&mut self) -> &mut TraceLog<DeviceEvent> {
        &mut self.dtrace
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use proptest::prelude::*;
    use rstest::rstest;

    use super::Bus;
    use crate::config::TraceConfig;
    use crate::memory::{NoCallback, PhysicalMemory};
    use crate::trace::{DeviceAccessKind, MemoryAccessKind};
    use crate::AccessFault;

    const RAM_BASE: u64 = 0x8000_0000;
    const UART: u64 = 0x1000_0000;

    fn bus(trace: &TraceConfig) -> Bus {
        Bus::new(PhysicalMemory::new(RAM_BASE, 0x1000), trace)
    }

    #[test]
    fn unmapped_address_is_rejected() {
        let mut bus = bus(&TraceConfig::default());
        assert_eq!(
            bus.read(0x4000_0000, 4, 0),
            Err(AccessFault::Unmapped { addr: 0x4000_0000 })
        );
        assert!(bus.write(0x4000_0000, 1, 0, 0).is_err());
        assert!(!bus.take_device_access());
    }

    #[rstest]
    #[case(3)]
    #[case(0)]
    #[case(16)]
    fn illegal_width_is_rejected(#[case] len: usize) {
        let mut bus = bus(&TraceConfig::default());
        assert_eq!(
            bus.read(RAM_BASE, len, 0),
            Err(AccessFault::InvalidWidth { len })
        );
    }

    #[rstest]
    #[case(u64::MAX, 0b0000_0010)]
    #[case(u64::MAX - 3, 0b1000_0000)]
    fn masked_write_past_the_top_of_memory_faults(#[case] addr: u64, #[case] mask: u8) {
        let mut bus = bus(&TraceConfig::all_enabled());
        assert_eq!(
            bus.write_masked(addr, mask, 0xFFFF, 0),
            Err(AccessFault::Unmapped { addr })
        );
        assert!(bus.memory_trace().history().is_empty());
    }

    #[test]
    fn device_read_runs_callback_and_is_traced() {
        let hits = Rc::new(Cell::new(0_u32));
        let seen = Rc::clone(&hits);
        let mut bus = bus(&TraceConfig::all_enabled());
        bus.register_region("uart", UART, 8, vec![0x5A; 8], move |_: &mut [u8], _: usize, _: usize, _: bool| {
            seen.set(seen.get() + 1);
        })
        .expect("disjoint");

        assert_eq!(bus.read(UART, 1, 0x8000_0004), Ok(0x5A));
        assert_eq!(hits.get(), 1);
        assert!(bus.take_device_access());
        assert!(!bus.take_device_access());

        let device = bus.device_trace().history().newest().cloned().expect("traced");
        assert_eq!(device.kind, DeviceAccessKind::Read);
        assert_eq!(&*device.region, "uart");
        assert_eq!(device.pc, 0x8000_0004);
    }

    #[test]
    fn device_write_is_traced_as_write() {
        let mut bus = bus(&TraceConfig::all_enabled());
        bus.register_region("uart", UART, 8, vec![0; 8], NoCallback)
            .expect("disjoint");
        bus.write(UART, 1, 0x141, 0).expect("mapped");

        let device = bus.device_trace().history().newest().cloned().expect("traced");
        assert_eq!(device.kind, DeviceAccessKind::Write);
        assert_eq!(device.data, 0x41);
        assert_eq!(bus.mmio().by_name("uart").map(|r| r.space()[0]), Some(0x41));
    }

    #[test]
    fn fetch_is_traced_separately_and_never_writes() {
        let mut bus = bus(&TraceConfig::all_enabled());
        bus.ram_mut()
            .load_image(RAM_BASE, &0x0000_0073_u32.to_le_bytes())
            .expect("fits");
        assert_eq!(bus.fetch(RAM_BASE, 4, RAM_BASE), Ok(0x73));
        let event = bus.memory_trace().history().newest().copied().expect("traced");
        assert_eq!(event.kind, MemoryAccessKind::Fetch);
        assert_eq!(bus.ram().as_slice()[..4], [0x73, 0, 0, 0]);
    }

    #[test]
    fn masked_write_to_device_only_touches_enabled_lanes() {
        let mut bus = bus(&TraceConfig::default());
        bus.register_region("gpio", UART, 8, vec![0xFF; 8], NoCallback)
            .expect("disjoint");
        bus.write_masked(UART, 0b0000_0010, 0x0000_AB00, 0).expect("mapped");
        assert_eq!(bus.read(UART, 4, 0), Ok(0xFFFF_ABFF));
    }

    #[test]
    fn zero_mask_is_a_no_op() {
        let mut bus = bus(&TraceConfig::all_enabled());
        bus.write_masked(0x4000_0000, 0, 0xFF, 0).expect("no lanes, no access");
        assert!(bus.memory_trace().history().is_empty());
    }

    #[test]
    fn disabled_tracing_records_nothing() {
        let mut bus = bus(&TraceConfig::default());
        bus.write(RAM_BASE, 4, 1, 0).expect("in ram");
        bus.read(RAM_BASE, 4, 0).expect("in ram");
        assert!(bus.memory_trace().history().is_empty());
        assert!(bus.device_trace().history().is_empty());
    }

    proptest! {
        #[test]
        fn ram_read_returns_truncated_write(
            offset in 0_u64..0xFF8,
            width in prop::sample::select(vec![1_usize, 2, 4, 8]),
            value in any::<u64>(),
            traced in any::<bool>(),
        ) {
            let trace = if traced { TraceConfig::all_enabled() } else { TraceConfig::default() };
            let mut bus = bus(&trace);
            let addr = RAM_BASE + offset;
            bus.write(addr, width, value, 0).expect("in ram");
            let mask = if width == 8 { u64::MAX } else { (1_u64 << (width * 8)) - 1 };
            prop_assert_eq!(bus.read(addr, width, 0), Ok(value & mask));
        }
    }
}
