//! Fault taxonomy for configuration, guest-access, divergence and timeout failures.
//!
//! Every operation in this crate reports failure through these types. The only
//! place that turns an error into process-level termination is [`fatal`].

use thiserror::Error;

use crate::difftest::DiffReport;

/// Fault classes used for diagnostics aggregation and escalation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FaultClass {
    /// Region registration or reference-model setup was invalid.
    Configuration,
    /// The guest touched an unmapped or out-of-bounds address.
    GuestAccess,
    /// Emulator and reference model disagree on architectural state.
    Divergence,
    /// A co-simulated core failed to commit within its cycle cap.
    Timeout,
}

impl FaultClass {
    /// Short lowercase label used in log and panic messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::GuestAccess => "guest access",
            Self::Divergence => "divergence",
            Self::Timeout => "timeout",
        }
    }
}

/// Setup-time errors: region registration and reference-model loading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The bounded MMIO table has no free slot.
    #[error("mmio region table is full ({capacity} entries), cannot add '{name}'")]
    RegionTableFull {
        /// Region that could not be registered.
        name: String,
        /// Fixed table capacity.
        capacity: usize,
    },
    /// A region was registered with zero length.
    #[error("mmio region '{name}' has zero length")]
    EmptyRegion {
        /// Offending region name.
        name: String,
    },
    /// `base + len - 1` does not fit in the address space.
    #[error("mmio region '{name}' at {base:#010x} with length {len:#x} wraps the address space")]
    RegionOverflow {
        /// Offending region name.
        name: String,
        /// Requested base address.
        base: u64,
        /// Requested length in bytes.
        len: u64,
    },
    /// Region interval intersects RAM or a previously registered region.
    #[error(
        "MMIO region {name}@[{low:#010x}, {high:#010x}] is overlapped with \
         {other}@[{other_low:#010x}, {other_high:#010x}]"
    )]
    RegionOverlap {
        /// Region being registered.
        name: String,
        /// Inclusive low bound of the new region.
        low: u64,
        /// Inclusive high bound of the new region.
        high: u64,
        /// Existing region (or `pmem`) it collides with.
        other: String,
        /// Inclusive low bound of the existing interval.
        other_low: u64,
        /// Inclusive high bound of the existing interval.
        other_high: u64,
    },
    /// Backing storage is shorter than the mapped interval.
    #[error("backing store for '{name}' holds {actual} bytes but the region spans {required}")]
    RegionBackingTooSmall {
        /// Offending region name.
        name: String,
        /// Bytes the interval requires.
        required: u64,
        /// Bytes actually supplied.
        actual: usize,
    },
    /// Machine configuration failed validation.
    #[error("invalid machine configuration: {0}")]
    InvalidConfig(&'static str),
    /// The reference model shared object could not be opened.
    #[error("failed to load reference model '{path}': {reason}")]
    LibraryLoad {
        /// Path passed to `attach`.
        path: String,
        /// Loader diagnostic.
        reason: String,
    },
    /// The reference model lacks a required entry point.
    #[error("reference model '{path}' does not export required symbol '{symbol}'")]
    MissingSymbol {
        /// Path passed to `attach`.
        path: String,
        /// Unresolved symbol name.
        symbol: &'static str,
    },
}

/// Guest access errors raised by the address space router.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessFault {
    /// Address is neither in RAM nor in any registered region.
    #[error("address {addr:#010x} is outside of pmem and every mmio region")]
    Unmapped {
        /// Faulting physical address.
        addr: u64,
    },
    /// Access starts in RAM but runs past its end.
    #[error("{len}-byte access at {addr:#010x} is out of bound of pmem [{low:#010x}, {high:#010x}]")]
    RamOutOfBounds {
        /// Faulting physical address.
        addr: u64,
        /// Access width in bytes.
        len: usize,
        /// Inclusive RAM low bound.
        low: u64,
        /// Inclusive RAM high bound.
        high: u64,
    },
    /// Access width is not one of 1, 2, 4 or 8 bytes.
    #[error("unsupported access width of {len} bytes")]
    InvalidWidth {
        /// Rejected width.
        len: usize,
    },
    /// Access starts inside a region but crosses its high bound.
    #[error("{len}-byte access at {addr:#010x} crosses the end of mmio region '{region}'")]
    DeviceSpan {
        /// Region the access started in.
        region: String,
        /// Faulting physical address.
        addr: u64,
        /// Access width in bytes.
        len: usize,
    },
}

/// Lockstep comparison and co-simulation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    /// Reference and emulator state differ after a step.
    #[error("difftest failed at pc {:#010x}: {}", .0.pc, .0.summary())]
    Mismatch(Box<DiffReport>),
    /// The device under test did not commit an instruction in time.
    #[error("device under test did not commit within {cycles} cycles")]
    CommitTimeout {
        /// Cycles spent before giving up.
        cycles: u64,
    },
    /// A comparison was requested before `sync_initial_state`.
    #[error("reference model has not been synchronized with the emulator")]
    NotSynchronized,
    /// The reference rejected a committed store.
    #[error("reference model rejected store of {data:#010x} to {addr:#010x}")]
    StoreMismatch {
        /// Store address.
        addr: u64,
        /// Stored data.
        data: u64,
    },
    /// The two sides disagree on whether the run has ended.
    #[error(
        "termination disagreement: reference ended = {reference_ended}, \
         emulator ended = {emulator_ended}"
    )]
    EndDisagreement {
        /// Reference model's own end-of-run verdict.
        reference_ended: bool,
        /// Emulator's end-of-run verdict.
        emulator_ended: bool,
    },
}

/// Umbrella error for every failure this crate reports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Setup-time failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Guest access failure.
    #[error(transparent)]
    Access(#[from] AccessFault),
    /// Lockstep failure.
    #[error(transparent)]
    Diff(#[from] DiffError),
}

impl CoreError {
    /// Returns the diagnostics class for this error.
    #[must_use]
    pub const fn class(&self) -> FaultClass {
        match self {
            Self::Config(_) => FaultClass::Configuration,
            Self::Access(_) => FaultClass::GuestAccess,
            Self::Diff(DiffError::CommitTimeout { .. }) => FaultClass::Timeout,
            Self::Diff(_) => FaultClass::Divergence,
        }
    }

    /// Errors that end the run. Commit timeouts are ordinary step failures.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self.class(), FaultClass::Timeout)
    }

    /// Returns the register comparison table when this is a divergence.
    #[must_use]
    pub fn diff_report(&self) -> Option<&DiffReport> {
        match self {
            Self::Diff(DiffError::Mismatch(report)) => Some(report),
            _ => None,
        }
    }
}

/// Reports an unrecoverable error and unwinds.
///
/// This is the single escalation path for fatal errors. The error (and, for a
/// divergence, the full register table) goes to the log before the panic so
/// that a harness wrapping the run in `catch_unwind` still sees it.
///
/// # Panics
///
/// Always.
#[track_caller]
pub fn fatal(err: &CoreError) -> ! {
    log::error!("{} fault: {err}", err.class().label());
    if let Some(report) = err.diff_report() {
        log::error!("\n{report}");
    }
    panic!("{} fault: {err}", err.class().label());
}

/// Escalates an error result through [`fatal`].
pub trait OrFatal<T> {
    /// Unwraps the value or reports the error through [`fatal`].
    fn or_fatal(self) -> T;
}

impl<T, E: Into<CoreError>> OrFatal<T> for Result<T, E> {
    #[track_caller]
    fn or_fatal(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => fatal(&err.into()),
        }
    }
}
