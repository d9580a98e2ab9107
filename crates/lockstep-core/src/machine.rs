//! Executor-facing machine context.
//!
//! A [`Machine`] owns one hart's committed state, the address space router and
//! the trap controller. Independent machines share nothing.

use crate::bus::Bus;
use crate::config::MachineConfig;
use crate::diag::{DiagCounters, DiagnosticsDump};
use crate::intr::{TrapCause, TrapController};
use crate::memory::{IoCallback, PhysicalMemory};
use crate::state::ArchitecturalState;
use crate::{AccessFault, ConfigError};

/// One emulated hart with its memory system.
#[derive(Debug)]
pub struct Machine {
    config: MachineConfig,
    cpu: ArchitecturalState,
    bus: Bus,
    intr: TrapController,
    counters: DiagCounters,
}

impl Machine {
    /// Builds a machine with zeroed RAM, PC at the RAM base and `mtvec` at the
    /// configured trap vector.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidConfig`] when `config` fails validation.
    pub fn new(config: MachineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let ram = PhysicalMemory::new(config.ram_base, config.ram_size);
        let bus = Bus::new(ram, &config.trace);
        let intr = TrapController::new(
            config.xlen,
            config.trace.enable_exception_trace,
            config.trace.ring_capacity,
        );
        let mut cpu = ArchitecturalState::with_pc(config.ram_base);
        intr.set_trap_vector(cpu.csrs_mut(), config.trap_vector);
        log::info!(
            "machine: {} bits, pmem [{:#010x}, {:#010x}], trap vector {:#010x}",
            config.xlen.bits(),
            bus.ram().low(),
            bus.ram().high(),
            config.trap_vector
        );
        Ok(Self {
            config,
            cpu,
            bus,
            intr,
            counters: DiagCounters::default(),
        })
    }

    /// Configuration the machine was built from.
    #[must_use]
    pub const fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Committed hart state.
    #[must_use]
    pub const fn cpu(&self) -> &ArchitecturalState {
        &self.cpu
    }

    /// Committed hart state, mutable.
    pub const fn cpu_mut(&mut self) -> &mut ArchitecturalState {
        &mut self.cpu
    }

    /// Address space router.
    #[must_use]
    pub const fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Address space router, mutable.
    pub const fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    /// Trap controller.
    #[must_use]
    pub const fn intr(&self) -> &TrapController {
        &self.intr
    }

    /// Activity and fault counters.
    #[must_use]
    pub const fn counters(&self) -> &DiagCounters {
        &self.counters
    }

    /// Counters, mutable. Used by the stepping loop.
    pub const fn counters_mut(&mut self) -> &mut DiagCounters {
        &mut self.counters
    }

    /// Virtual to physical translation. No MMU is modelled: identity.
    #[must_use]
    pub const fn translate(&self, vaddr: u64) -> u64 {
        vaddr & self.config.xlen.mask()
    }

    fn count_device(&mut self, paddr: u64) {
        if !self.bus.ram().contains(paddr) {
            self.counters.record_device_access();
        }
    }

    /// Data load at virtual address `vaddr`, attributed to the current PC.
    ///
    /// # Errors
    ///
    /// See [`Bus::read`].
    pub fn read(&mut self, vaddr: u64, len: usize) -> Result<u64, AccessFault> {
        let paddr = self.translate(vaddr);
        let data = self.bus.read(paddr, len, self.cpu.pc())?;
        self.counters.record_read();
        self.count_device(paddr);
        Ok(data)
    }

    /// Instruction fetch at virtual address `vaddr`.
    ///
    /// # Errors
    ///
    /// See [`Bus::fetch`].
    pub fn fetch(&mut self, vaddr: u64, len: usize) -> Result<u64, AccessFault> {
        let paddr = self.translate(vaddr);
        let data = self.bus.fetch(paddr, len, self.cpu.pc())?;
        self.counters.record_fetch();
        self.count_device(paddr);
        Ok(data)
    }

    /// Data store at virtual address `vaddr`.
    ///
    /// # Errors
    ///
    /// See [`Bus::write`].
    pub fn write(&mut self, vaddr: u64, len: usize, data: u64) -> Result<(), AccessFault> {
        let paddr = self.translate(vaddr);
        self.bus.write(paddr, len, data, self.cpu.pc())?;
        self.counters.record_write();
        self.count_device(paddr);
        Ok(())
    }

    /// Byte-strobed store at virtual address `vaddr`.
    ///
    /// # Errors
    ///
    /// See [`Bus::write_masked`].
    pub fn write_masked(&mut self, vaddr: u64, byte_enable: u8, data: u64) -> Result<(), AccessFault> {
        if byte_enable == 0 {
            return Ok(());
        }
        let paddr = self.translate(vaddr);
        self.bus
            .write_masked(paddr, byte_enable, data, self.cpu.pc())?;
        self.counters.record_masked_write();
        self.count_device(paddr.saturating_add(u64::from(byte_enable.trailing_zeros())));
        Ok(())
    }

    /// Enters a trap for `cause` at `pc`. Returns the handler address; the
    /// caller decides whether to jump there.
    pub fn raise(&mut self, cause: TrapCause, pc: u64) -> u64 {
        self.counters.record_trap();
        self.intr.raise(self.cpu.csrs_mut(), cause, pc)
    }

    /// Leaves the current trap. Returns the PC to resume at.
    pub fn return_from_trap(&mut self) -> u64 {
        self.counters.record_trap_return();
        self.intr.return_from_trap(self.cpu.csrs())
    }

    /// Pending interrupt, if any.
    #[must_use]
    pub const fn query_pending_interrupt(&self) -> Option<TrapCause> {
        self.intr.query_pending_interrupt()
    }

    /// Updates `mtvec`.
    pub const fn set_trap_vector(&mut self, vector: u64) {
        self.intr.set_trap_vector(self.cpu.csrs_mut(), vector);
    }

    /// Maps a device region. See [`Bus::register_region`].
    ///
    /// # Errors
    ///
    /// See [`crate::memory::MmioMap::register`].
    pub fn register_region<C: IoCallback + 'static>(
        &mut self,
        name: &str,
        base: u64,
        len: u64,
        backing: impl Into<Box<[u8]>>,
        callback: C,
    ) -> Result<usize, ConfigError> {
        self.bus.register_region(name, base, len, backing, callback)
    }

    /// Copies a program image into RAM at `addr`, bypassing tracing.
    ///
    /// # Errors
    ///
    /// Returns [`AccessFault::RamOutOfBounds`] when the image does not fit.
    pub fn load_image(&mut self, addr: u64, image: &[u8]) -> Result<(), AccessFault> {
        self.bus.ram_mut().load_image(addr, image)
    }

    /// Counters and rendered trace history.
    #[must_use]
    pub fn diagnostics(&self) -> DiagnosticsDump {
        DiagnosticsDump::capture(
            self.counters,
            self.bus.memory_trace(),
            self.intr.exception_trace(),
            self.bus.device_trace(),
        )
    }
}
