//! Observational trace rings for memory, exception and device activity.
//!
//! Tracing never changes the outcome of the operation being traced. A
//! disabled [`TraceLog`] skips every push.

use std::fmt;
use std::sync::Arc;

use crate::TrapCause;

/// Fixed-capacity circular history buffer.
pub mod ring;

pub use ring::RingBuffer;

/// Kind of a traced memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MemoryAccessKind {
    /// Instruction fetch.
    Fetch,
    /// Data load.
    Read,
    /// Data store.
    Write,
}

impl MemoryAccessKind {
    /// Single-letter tag used in dumps.
    #[must_use]
    pub const fn tag(self) -> char {
        match self {
            Self::Fetch => 'I',
            Self::Read => 'R',
            Self::Write => 'W',
        }
    }
}

/// One access through the address space router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MemoryEvent {
    /// Access kind.
    pub kind: MemoryAccessKind,
    /// Physical address.
    pub addr: u64,
    /// Access width in bytes.
    pub len: usize,
    /// Value read or written.
    pub data: u64,
    /// PC of the instruction performing the access.
    pub pc: u64,
}

impl fmt::Display for MemoryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pc={:#010x} addr={:#010x} len={} data={:#010x}",
            self.kind.tag(),
            self.pc,
            self.addr,
            self.len,
            self.data
        )
    }
}

/// Trap controller transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum TrapEventKind {
    /// Trap entry.
    Raise,
    /// Return from trap.
    Return,
}

/// One trap entry or return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ExceptionEvent {
    /// Entry or return.
    pub kind: TrapEventKind,
    /// Decoded `mcause`.
    pub cause: TrapCause,
    /// Saved (or restored) exception PC.
    pub epc: u64,
    /// Handler address for entries, zero for returns.
    pub handler: u64,
}

impl ExceptionEvent {
    /// Single-letter tag: `E` exception, `I` interrupt, `R` return.
    #[must_use]
    pub const fn tag(&self) -> char {
        match (self.kind, self.cause) {
            (TrapEventKind::Return, _) => 'R',
            (TrapEventKind::Raise, TrapCause::Interrupt(_)) => 'I',
            (TrapEventKind::Raise, TrapCause::Exception(_)) => 'E',
        }
    }
}

impl fmt::Display for ExceptionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TrapEventKind::Return => write!(
                f,
                "R epc={:#010x} (return from exception/interrupt)",
                self.epc
            ),
            TrapEventKind::Raise => write!(
                f,
                "{} cause={} ({}) epc={:#010x} handler={:#010x}",
                self.tag(),
                self.cause.code(),
                self.cause.name(),
                self.epc,
                self.handler
            ),
        }
    }
}

/// Direction of a device access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum DeviceAccessKind {
    /// Load from a device register.
    Read,
    /// Store to a device register.
    Write,
}

impl DeviceAccessKind {
    /// Single-letter tag used in dumps.
    #[must_use]
    pub const fn tag(self) -> char {
        match self {
            Self::Read => 'R',
            Self::Write => 'W',
        }
    }
}

/// One access that resolved to an MMIO region.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DeviceEvent {
    /// Access direction.
    pub kind: DeviceAccessKind,
    /// Name of the region that served the access.
    pub region: Arc<str>,
    /// Value read or written.
    pub data: u64,
    /// Access width in bytes.
    pub len: usize,
    /// PC of the instruction performing the access.
    pub pc: u64,
}

impl fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pc={:#010x} device={} data=",
            self.kind.tag(),
            self.pc,
            self.region
        )?;
        match self.len {
            1 => write!(f, "{:#04x}", self.data),
            2 => write!(f, "{:#06x}", self.data),
            4 => write!(f, "{:#010x}", self.data),
            _ => write!(f, "{:#018x}", self.data),
        }
    }
}

/// A [`RingBuffer`] behind an on/off switch.
#[derive(Debug, Clone)]
pub struct TraceLog<T> {
    enabled: bool,
    ring: RingBuffer<T>,
}

impl<T> TraceLog<T> {
    /// Creates a log with the given switch and ring capacity.
    #[must_use]
    pub fn new(enabled: bool, capacity: usize) -> Self {
        Self {
            enabled,
            ring: RingBuffer::new(capacity),
        }
    }

    /// Returns `true` when pushes are recorded.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turns recording on or off. History is kept either way.
    pub const fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Records the event built by `make` when enabled.
    ///
    /// The closure is not called on a disabled log.
    pub fn record(&mut self, make: impl FnOnce() -> T) {
        if self.enabled {
            self.ring.push(make());
        }
    }

    /// Recorded history.
    #[must_use]
    pub const fn history(&self) -> &RingBuffer<T> {
        &self.ring
    }
}

impl<T: fmt::Display> TraceLog<T> {
    /// Renders the history oldest-first under `title`, or `None` when empty.
    ///
    /// `title` completes the sentence "Last N ...", e.g. `"memory accesses"`.
    #[must_use]
    pub fn dump(&self, title: &str) -> Option<String> {
        if self.ring.is_empty() {
            return None;
        }
        let mut out = format!("Last {} {title}:", self.ring.count());
        self.ring.for_each_in_order(|item| {
            out.push_str("\n    ");
            out.push_str(&item.to_string());
        });
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{
        DeviceAccessKind, DeviceEvent, ExceptionEvent, MemoryAccessKind, MemoryEvent, TraceLog,
        TrapEventKind,
    };
    use crate::TrapCause;

    #[cfg(feature = "serde")]
    #[test]
    fn events_are_serializable() {
        fn round_trippable<T: serde::Serialize + serde::de::DeserializeOwned>() {}
        round_trippable::<MemoryEvent>();
        round_trippable::<ExceptionEvent>();
        round_trippable::<DeviceEvent>();
    }

    fn mem(addr: u64) -> MemoryEvent {
        MemoryEvent {
            kind: MemoryAccessKind::Read,
            addr,
            len: 4,
            data: 0xDEAD_BEEF,
            pc: 0x8000_0000,
        }
    }

    #[test]
    fn disabled_log_never_builds_records() {
        let mut log = TraceLog::<MemoryEvent>::new(false, 4);
        log.record(|| unreachable!("disabled trace must not build events"));
        assert!(log.history().is_empty());
        assert_eq!(log.dump("memory accesses"), None);
    }

    #[test]
    fn dump_lists_records_oldest_first() {
        let mut log = TraceLog::new(true, 2);
        log.record(|| mem(0x8000_0000));
        log.record(|| mem(0x8000_0004));
        log.record(|| mem(0x8000_0008));

        let dump = log.dump("memory accesses").expect("non-empty log");
        assert_eq!(
            dump,
            "Last 2 memory accesses:\n    \
             R pc=0x80000000 addr=0x80000004 len=4 data=0xdeadbeef\n    \
             R pc=0x80000000 addr=0x80000008 len=4 data=0xdeadbeef"
        );
    }

    #[test]
    fn exception_events_render_cause_names() {
        let raise = ExceptionEvent {
            kind: TrapEventKind::Raise,
            cause: TrapCause::Exception(11),
            epc: 0x8000_0100,
            handler: 0x8000_0200,
        };
        assert_eq!(
            raise.to_string(),
            "E cause=11 (machine_ecall) epc=0x80000100 handler=0x80000200"
        );

        let ret = ExceptionEvent {
            kind: TrapEventKind::Return,
            handler: 0,
            ..raise
        };
        assert_eq!(ret.tag(), 'R');
        assert_eq!(
            ret.to_string(),
            "R epc=0x80000100 (return from exception/interrupt)"
        );

        let irq = ExceptionEvent {
            cause: TrapCause::Interrupt(7),
            ..raise
        };
        assert_eq!(irq.tag(), 'I');
        assert!(irq.to_string().contains("machine_timer_interrupt"));
    }

    #[test]
    fn device_events_format_data_by_width() {
        let event = DeviceEvent {
            kind: DeviceAccessKind::Write,
            region: Arc::from("uart"),
            data: 0x41,
            len: 1,
            pc: 0x8000_0010,
        };
        assert_eq!(event.to_string(), "W pc=0x80000010 device=uart data=0x41");

        let wide = DeviceEvent {
            kind: DeviceAccessKind::Read,
            len: 2,
            data: 0x1234,
            ..event
        };
        assert_eq!(wide.to_string(), "R pc=0x80000010 device=uart data=0x1234");
    }
}
