//! Machine configuration: address-space layout, tracing switches and lockstep options.

use crate::ConfigError;

/// Default number of records kept by every trace ring.
pub const DEFAULT_RING_CAPACITY: usize = 16;

/// Default physical RAM base address (RISC-V reset vector).
pub const DEFAULT_RAM_BASE: u64 = 0x8000_0000;

/// Default physical RAM size (128 MiB, `[0x8000_0000, 0x87FF_FFFF]`).
pub const DEFAULT_RAM_SIZE: usize = 0x0800_0000;

/// Default cycle cap for co-simulated cores to commit one instruction.
pub const DEFAULT_MAX_COMMIT_CYCLES: u64 = 10_000;

/// Guest register width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Xlen {
    /// 32-bit guest.
    #[default]
    Rv32,
    /// 64-bit guest.
    Rv64,
}

impl Xlen {
    /// Register width in bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Rv32 => 32,
            Self::Rv64 => 64,
        }
    }

    /// Register width in bytes.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Rv32 => 4,
            Self::Rv64 => 8,
        }
    }

    /// Mask selecting the architecturally visible bits of a word.
    #[must_use]
    pub const fn mask(self) -> u64 {
        match self {
            Self::Rv32 => 0xFFFF_FFFF,
            Self::Rv64 => u64::MAX,
        }
    }

    /// The `mcause` bit distinguishing interrupts from exceptions.
    #[must_use]
    pub const fn interrupt_bit(self) -> u64 {
        1 << (self.bits() - 1)
    }
}

/// Runtime switches for the three trace rings.
///
/// Disabled rings are still allocated but every push is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(clippy::struct_excessive_bools)]
pub struct TraceConfig {
    /// Record every RAM/MMIO load, store and fetch.
    pub enable_mem_trace: bool,
    /// Record trap entry and return.
    pub enable_exception_trace: bool,
    /// Record every device (MMIO) access.
    pub enable_device_trace: bool,
    /// Records kept per ring before the oldest is overwritten.
    pub ring_capacity: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enable_mem_trace: false,
            enable_exception_trace: false,
            enable_device_trace: false,
            ring_capacity: DEFAULT_RING_CAPACITY,
        }
    }
}

impl TraceConfig {
    /// Configuration with every ring enabled at the default capacity.
    #[must_use]
    pub fn all_enabled() -> Self {
        Self {
            enable_mem_trace: true,
            enable_exception_trace: true,
            enable_device_trace: true,
            ..Self::default()
        }
    }
}

/// Lockstep comparison options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DiffConfig {
    /// Include the trap CSRs in every comparison.
    pub compare_csrs: bool,
    /// Cycle cap for a co-simulated core to commit one instruction, applied by
    /// `DiffTest::await_commit`.
    pub max_commit_cycles: u64,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            compare_csrs: false,
            max_commit_cycles: DEFAULT_MAX_COMMIT_CYCLES,
        }
    }
}

/// Top-level immutable configuration for a machine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MachineConfig {
    /// Guest register width.
    pub xlen: Xlen,
    /// Physical RAM base address.
    pub ram_base: u64,
    /// Physical RAM size in bytes.
    pub ram_size: usize,
    /// Initial trap vector (`mtvec`).
    pub trap_vector: u64,
    /// Number of architectural GPRs (16 for RV32E, 32 otherwise).
    pub gpr_count: usize,
    /// Trace ring switches.
    pub trace: TraceConfig,
    /// Lockstep options.
    pub diff: DiffConfig,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            xlen: Xlen::Rv32,
            ram_base: DEFAULT_RAM_BASE,
            ram_size: DEFAULT_RAM_SIZE,
            trap_vector: DEFAULT_RAM_BASE,
            gpr_count: 32,
            trace: TraceConfig::default(),
            diff: DiffConfig::default(),
        }
    }
}

impl MachineConfig {
    /// Inclusive high bound of physical RAM, if the interval is representable.
    #[must_use]
    pub fn ram_high(&self) -> Option<u64> {
        let size = u64::try_from(self.ram_size).ok()?.checked_sub(1)?;
        let high = self.ram_base.checked_add(size)?;
        (high <= self.xlen.mask()).then_some(high)
    }

    /// Checks the configuration before any machine state is allocated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidConfig`] when RAM is empty or does not
    /// fit the address width, the GPR count is not 16 or 32, or the trace
    /// ring capacity is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ram_size == 0 {
            return Err(ConfigError::InvalidConfig("ram size must be non-zero"));
        }
        if self.ram_high().is_none() {
            return Err(ConfigError::InvalidConfig(
                "ram interval exceeds the guest address width",
            ));
        }
        if !matches!(self.gpr_count, 16 | 32) {
            return Err(ConfigError::InvalidConfig("gpr count must be 16 or 32"));
        }
        if self.trace.ring_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "trace ring capacity must be non-zero",
            ));
        }
        if self.trap_vector > self.xlen.mask() {
            return Err(ConfigError::InvalidConfig(
                "trap vector exceeds the guest address width",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{MachineConfig, TraceConfig, Xlen, DEFAULT_RAM_BASE, DEFAULT_RING_CAPACITY};
    use crate::ConfigError;

    #[test]
    fn default_config_maps_128_mib_at_reset_vector() {
        let config = MachineConfig::default();
        assert_eq!(config.ram_base, DEFAULT_RAM_BASE);
        assert_eq!(config.ram_high(), Some(0x87FF_FFFF));
        assert_eq!(config.trace.ring_capacity, DEFAULT_RING_CAPACITY);
        assert!(!config.trace.enable_mem_trace);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn all_enabled_trace_keeps_default_capacity() {
        let trace = TraceConfig::all_enabled();
        assert!(trace.enable_mem_trace && trace.enable_exception_trace && trace.enable_device_trace);
        assert_eq!(trace.ring_capacity, DEFAULT_RING_CAPACITY);
    }

    #[rstest]
    #[case(Xlen::Rv32, 0x8000_0000)]
    #[case(Xlen::Rv64, 0x8000_0000_0000_0000)]
    fn interrupt_bit_is_the_top_bit(#[case] xlen: Xlen, #[case] bit: u64) {
        assert_eq!(xlen.interrupt_bit(), bit);
    }

    #[test]
    fn ram_past_the_32_bit_space_is_rejected() {
        let config = MachineConfig {
            ram_base: 0xFFFF_0000,
            ram_size: 0x2_0000,
            ..MachineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConfig(_))));

        let wide = MachineConfig {
            xlen: Xlen::Rv64,
            ..config
        };
        assert_eq!(wide.validate(), Ok(()));
    }

    #[rstest]
    #[case::empty_ram(MachineConfig { ram_size: 0, ..MachineConfig::default() })]
    #[case::odd_gprs(MachineConfig { gpr_count: 8, ..MachineConfig::default() })]
    #[case::zero_ring(MachineConfig {
        trace: TraceConfig { ring_capacity: 0, ..TraceConfig::default() },
        ..MachineConfig::default()
    })]
    fn invalid_configs_are_rejected(#[case] config: MachineConfig) {
        assert!(config.validate().is_err());
    }
}
