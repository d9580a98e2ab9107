//! Diagnostic counters and the trace dump surface.

use std::fmt;

use crate::trace::{DeviceEvent, ExceptionEvent, MemoryEvent, TraceLog};
use crate::FaultClass;

/// Saturating activity and fault counters for one machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DiagCounters {
    /// Instruction fetches.
    pub fetches: u64,
    /// Data loads.
    pub reads: u64,
    /// Full-width data stores.
    pub writes: u64,
    /// Byte-strobed stores.
    pub masked_writes: u64,
    /// Accesses served by an MMIO region.
    pub device_accesses: u64,
    /// Trap entries.
    pub traps_raised: u64,
    /// Trap returns.
    pub trap_returns: u64,
    /// Lockstep comparisons performed.
    pub diff_checks: u64,
    /// Lockstep steps resynchronized instead of compared.
    pub diff_skips: u64,
    /// Class of the last error that stopped a step, if any.
    pub last_fault_class: Option<FaultClass>,
    /// PC at the last error.
    pub last_fault_pc: u64,
}

macro_rules! bump {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            #[doc = concat!("Increments `", stringify!($field), "`.")]
            pub const fn $name(&mut self) {
                self.$field = self.$field.saturating_add(1);
            }
        )*
    };
}

impl DiagCounters {
    bump! {
        record_fetch => fetches,
        record_read => reads,
        record_write => writes,
        record_masked_write => masked_writes,
        record_device_access => device_accesses,
        record_trap => traps_raised,
        record_trap_return => trap_returns,
        record_diff_check => diff_checks,
        record_diff_skip => diff_skips,
    }

    /// Latches the class and PC of an error that stopped a step.
    pub const fn record_fault(&mut self, class: FaultClass, pc: u64) {
        self.last_fault_class = Some(class);
        self.last_fault_pc = pc;
    }

    /// Resets every counter.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Rendered view of the three trace logs plus counters.
///
/// Sections for disabled or empty traces are omitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsDump {
    /// Counters at the time of the dump.
    pub counters: DiagCounters,
    /// Memory trace, oldest first.
    pub memory: Option<String>,
    /// Exception trace, oldest first.
    pub exceptions: Option<String>,
    /// Device trace, oldest first.
    pub devices: Option<String>,
}

impl DiagnosticsDump {
    /// Renders the given logs.
    #[must_use]
    pub fn capture(
        counters: DiagCounters,
        memory: &TraceLog<MemoryEvent>,
        exceptions: &TraceLog<ExceptionEvent>,
        devices: &TraceLog<DeviceEvent>,
    ) -> Self {
        Self {
            counters,
            memory: memory.dump("memory accesses"),
            exceptions: exceptions.dump("exception/interrupt events"),
            devices: devices.dump("device accesses"),
        }
    }

    /// Emits every non-empty section through `log::info!`.
    pub fn log(&self) {
        for section in [&self.memory, &self.exceptions, &self.devices]
            .into_iter()
            .flatten()
        {
            log::info!("{section}");
        }
    }
}

impl fmt::Display for DiagnosticsDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        write!(
            f,
            "fetches={} reads={} writes={} masked_writes={} device_accesses={} \
             traps={} trap_returns={} diff_checks={} diff_skips={}",
            c.fetches,
            c.reads,
            c.writes,
            c.masked_writes,
            c.device_accesses,
            c.traps_raised,
            c.trap_returns,
            c.diff_checks,
            c.diff_skips
        )?;
        if let Some(class) = c.last_fault_class {
            write!(f, "\nlast fault: {} at pc {:#010x}", class.label(), c.last_fault_pc)?;
        }
        for section in [&self.memory, &self.exceptions, &self.devices]
            .into_iter()
            .flatten()
        {
            write!(f, "\n{section}")?;
        }
        Ok(())
    }
}
