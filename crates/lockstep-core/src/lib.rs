//! Emulator core for a RISC-V teaching machine: physical address space with
//! memory-mapped devices, trap controller, observational trace rings and a
//! lockstep differential-testing oracle.
//!
//! Instruction decode and execute are supplied by the embedder through
//! [`run::Executor`].

/// Machine, trace and lockstep configuration.
pub mod config;
pub use config::{
    DiffConfig, MachineConfig, TraceConfig, Xlen, DEFAULT_MAX_COMMIT_CYCLES, DEFAULT_RAM_BASE,
    DEFAULT_RAM_SIZE, DEFAULT_RING_CAPACITY,
};

/// Fault taxonomy and the centralized fatal path.
pub mod fault;
pub use fault::{fatal, AccessFault, ConfigError, CoreError, DiffError, FaultClass, OrFatal};

/// Fixed-capacity trace rings and trace record types.
pub mod trace;
pub use trace::{
    DeviceAccessKind, DeviceEvent, ExceptionEvent, MemoryAccessKind, MemoryEvent, RingBuffer,
    TraceLog, TrapEventKind,
};

/// Physical RAM, access widths and the MMIO region table.
pub mod memory;
pub use memory::{
    AccessWidth, IoCallback, MmioMap, MmioRegion, NoCallback, PhysicalMemory, MMIO_MAP_CAPACITY,
};

/// Address space router.
pub mod bus;
pub use bus::Bus;

/// Architectural hart state.
pub mod state;
pub use state::{reg_name, ArchitecturalState, RunState, TrapCsrs, GPR_COUNT, GPR_NAMES};

/// Interrupt/exception controller.
pub mod intr;
pub use intr::{ExceptionCause, TrapCause, TrapController};

/// Lockstep oracle and reference-model interface.
pub mod difftest;
pub use difftest::{
    step_to_commit, Commit, CycleModel, DiffReport, DiffTest, DylibReference, ReferenceCpu,
    RegisterRow, StepCheck,
};

/// Machine context.
pub mod machine;
pub use machine::Machine;

/// Stepping loop.
pub mod run;
pub use run::{ExecOutcome, Executor, RunBoundary, RunOutcome, Session, StepOutcome};

/// Counters and trace dumps.
pub mod diag;
pub use diag::{DiagCounters, DiagnosticsDump};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
