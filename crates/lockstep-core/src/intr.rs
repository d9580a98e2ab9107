//! Interrupt/exception controller.
//!
//! Trap entry saves the cause and PC into `mcause`/`mepc` and hands back the
//! trap vector; trap return hands back `mepc`. Privilege-stack handling in
//! `mstatus` is left to the executor.

use crate::config::Xlen;
use crate::state::TrapCsrs;
use crate::trace::{ExceptionEvent, TraceLog, TrapEventKind};

/// Synchronous exception causes of the privileged architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum ExceptionCause {
    InstructionAddressMisaligned = 0,
    InstructionAccessFault = 1,
    IllegalInstruction = 2,
    Breakpoint = 3,
    LoadAddressMisaligned = 4,
    LoadAccessFault = 5,
    StoreAddressMisaligned = 6,
    StoreAccessFault = 7,
    UserEcall = 8,
    SupervisorEcall = 9,
    HypervisorEcall = 10,
    MachineEcall = 11,
    InstructionPageFault = 12,
    LoadPageFault = 13,
    StorePageFault = 15,
}

impl ExceptionCause {
    /// Decodes an exception code. Reserved codes yield `None`.
    #[must_use]
    pub const fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            0 => Self::InstructionAddressMisaligned,
            1 => Self::InstructionAccessFault,
            2 => Self::IllegalInstruction,
            3 => Self::Breakpoint,
            4 => Self::LoadAddressMisaligned,
            5 => Self::LoadAccessFault,
            6 => Self::StoreAddressMisaligned,
            7 => Self::StoreAccessFault,
            8 => Self::UserEcall,
            9 => Self::SupervisorEcall,
            10 => Self::HypervisorEcall,
            11 => Self::MachineEcall,
            12 => Self::InstructionPageFault,
            13 => Self::LoadPageFault,
            15 => Self::StorePageFault,
            _ => return None,
        })
    }

    /// Numeric exception code.
    #[must_use]
    pub const fn code(self) -> u64 {
        self as u64
    }

    /// Diagnostic name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::InstructionAddressMisaligned => "instruction_address_misaligned",
            Self::InstructionAccessFault => "instruction_access_fault",
            Self::IllegalInstruction => "illegal_instruction",
            Self::Breakpoint => "breakpoint",
            Self::LoadAddressMisaligned => "load_address_misaligned",
            Self::LoadAccessFault => "load_access_fault",
            Self::StoreAddressMisaligned => "store_address_misaligned",
            Self::StoreAccessFault => "store_access_fault",
            Self::UserEcall => "user_ecall",
            Self::SupervisorEcall => "supervisor_ecall",
            Self::HypervisorEcall => "hypervisor_ecall",
            Self::MachineEcall => "machine_ecall",
            Self::InstructionPageFault => "instruction_page_fault",
            Self::LoadPageFault => "load_page_fault",
            Self::StorePageFault => "store_page_fault",
        }
    }
}

impl From<ExceptionCause> for TrapCause {
    fn from(cause: ExceptionCause) -> Self {
        Self::Exception(cause.code())
    }
}

/// Decoded `mcause` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum TrapCause {
    /// Synchronous exception with its code.
    Exception(u64),
    /// Asynchronous interrupt with its code.
    Interrupt(u64),
}

impl TrapCause {
    /// Splits a raw `mcause` on the interrupt bit of `xlen`.
    #[must_use]
    pub const fn decode(raw: u64, xlen: Xlen) -> Self {
        let raw = raw & xlen.mask();
        if raw & xlen.interrupt_bit() == 0 {
            Self::Exception(raw)
        } else {
            Self::Interrupt(raw & !xlen.interrupt_bit())
        }
    }

    /// Packs the cause into a raw `mcause` for `xlen`.
    #[must_use]
    pub const fn encode(self, xlen: Xlen) -> u64 {
        match self {
            Self::Exception(code) => code & xlen.mask() & !xlen.interrupt_bit(),
            Self::Interrupt(code) => (code | xlen.interrupt_bit()) & xlen.mask(),
        }
    }

    /// Cause code without the interrupt bit.
    #[must_use]
    pub const fn code(self) -> u64 {
        match self {
            Self::Exception(code) | Self::Interrupt(code) => code,
        }
    }

    /// Returns `true` for interrupts.
    #[must_use]
    pub const fn is_interrupt(self) -> bool {
        matches!(self, Self::Interrupt(_))
    }

    /// Diagnostic name, `"unknown"` for reserved or platform codes.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Exception(code) => match ExceptionCause::from_code(code) {
                Some(cause) => cause.name(),
                None => "unknown",
            },
            Self::Interrupt(code) => match code {
                1 => "supervisor_software_interrupt",
                3 => "machine_software_interrupt",
                5 => "supervisor_timer_interrupt",
                7 => "machine_timer_interrupt",
                9 => "supervisor_external_interrupt",
                11 => "machine_external_interrupt",
                _ => "unknown",
            },
        }
    }
}

/// Trap entry/return state machine with its exception trace.
#[derive(Debug, Clone)]
pub struct TrapController {
    xlen: Xlen,
    etrace: TraceLog<ExceptionEvent>,
}

impl TrapController {
    /// Creates a controller that records into an exception trace of `capacity`.
    #[must_use]
    pub fn new(xlen: Xlen, trace_enabled: bool, capacity: usize) -> Self {
        Self {
            xlen,
            etrace: TraceLog::new(trace_enabled, capacity),
        }
    }

    /// Enters a trap: saves `cause` and `pc`, returns the handler address.
    pub fn raise(&mut self, csrs: &mut TrapCsrs, cause: TrapCause, pc: u64) -> u64 {
        let epc = pc & self.xlen.mask();
        csrs.mcause = cause.encode(self.xlen);
        csrs.mepc = epc;
        let handler = csrs.mtvec;
        log::debug!(
            "trap {} ({}) at {epc:#010x} -> {handler:#010x}",
            cause.code(),
            cause.name()
        );
        self.etrace.record(|| ExceptionEvent {
            kind: TrapEventKind::Raise,
            cause,
            epc,
            handler,
        });
        handler
    }

    /// Leaves a trap: returns the saved `mepc`.
    pub fn return_from_trap(&mut self, csrs: &TrapCsrs) -> u64 {
        let epc = csrs.mepc;
        let cause = TrapCause::decode(csrs.mcause, self.xlen);
        log::debug!("trap return to {epc:#010x}");
        self.etrace.record(|| ExceptionEvent {
            kind: TrapEventKind::Return,
            cause,
            epc,
            handler: 0,
        });
        epc
    }

    /// Pending interrupt, if any. No interrupt source is wired to this core.
    #[must_use]
    pub const fn query_pending_interrupt(&self) -> Option<TrapCause> {
        None
    }

    /// Updates the trap vector, as a guest `csrw mtvec` would.
    pub const fn set_trap_vector(&self, csrs: &mut TrapCsrs, vector: u64) {
        csrs.mtvec = vector & self.xlen.mask();
    }

    /// Recorded trap entries and returns.
    #[must_use]
    pub const fn exception_trace(&self) -> &TraceLog<ExceptionEvent> {
        &self.etrace
    }

    /// Recorded trap entries and returns, mutable.
    pub const fn exception_trace_mut(&mut self) -> &mut TraceLog<ExceptionEvent> {
        &mut self.etrace
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{ExceptionCause, TrapCause, TrapController};
    use crate::config::Xlen;
    use crate::state::TrapCsrs;
    use crate::trace::TrapEventKind;

    fn csrs() -> TrapCsrs {
        TrapCsrs {
            mtvec: 0x8000_0400,
            ..TrapCsrs::default()
        }
    }

    #[test]
    fn raise_then_return_resumes_at_saved_pc() {
        let mut intr = TrapController::new(Xlen::Rv32, true, 16);
        let mut csrs = csrs();

        let handler = intr.raise(&mut csrs, ExceptionCause::MachineEcall.into(), 0x8000_0100);
        assert_eq!(handler, 0x8000_0400);
        assert_eq!(csrs.mcause, 11);
        assert_eq!(csrs.mepc, 0x8000_0100);
        assert_eq!(intr.return_from_trap(&csrs), 0x8000_0100);

        let kinds: Vec<_> = intr.exception_trace().history().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![TrapEventKind::Raise, TrapEventKind::Return]);
    }

    #[test]
    fn interrupts_set_the_top_bit_of_mcause() {
        let mut intr = TrapController::new(Xlen::Rv32, true, 16);
        let mut csrs = csrs();
        intr.raise(&mut csrs, TrapCause::Interrupt(7), 0x8000_0010);
        assert_eq!(csrs.mcause, 0x8000_0007);

        let event = intr.exception_trace().history().newest().copied();
        assert_eq!(event.map(|e| e.tag()), Some('I'));
    }

    #[test]
    fn disabled_trace_leaves_history_empty() {
        let mut intr = TrapController::new(Xlen::Rv64, false, 4);
        let mut csrs = csrs();
        intr.raise(&mut csrs, TrapCause::Exception(2), 0x10);
        intr.return_from_trap(&csrs);
        assert!(intr.exception_trace().history().is_empty());
    }

    #[test]
    fn no_interrupt_is_ever_pending() {
        let intr = TrapController::new(Xlen::Rv32, false, 1);
        assert_eq!(intr.query_pending_interrupt(), None);
    }

    #[test]
    fn trap_vector_is_truncated_to_xlen() {
        let intr = TrapController::new(Xlen::Rv32, false, 1);
        let mut csrs = TrapCsrs::default();
        intr.set_trap_vector(&mut csrs, 0x1_8000_0200);
        assert_eq!(csrs.mtvec, 0x8000_0200);
    }

    #[rstest]
    #[case(0x8000_000B, Xlen::Rv32, TrapCause::Interrupt(11))]
    #[case(0x0000_000B, Xlen::Rv32, TrapCause::Exception(11))]
    #[case(0x8000_0000_0000_0005, Xlen::Rv64, TrapCause::Interrupt(5))]
    #[case(0x8000_0005, Xlen::Rv64, TrapCause::Exception(0x8000_0005))]
    fn decode_splits_on_interrupt_bit(#[case] raw: u64, #[case] xlen: Xlen, #[case] cause: TrapCause) {
        assert_eq!(TrapCause::decode(raw, xlen), cause);
        assert_eq!(cause.encode(xlen), raw);
    }

    #[rstest]
    #[case(TrapCause::Exception(0), "instruction_address_misaligned")]
    #[case(TrapCause::Exception(11), "machine_ecall")]
    #[case(TrapCause::Exception(15), "store_page_fault")]
    #[case(TrapCause::Exception(14), "unknown")]
    #[case(TrapCause::Exception(99), "unknown")]
    #[case(TrapCause::Interrupt(7), "machine_timer_interrupt")]
    #[case(TrapCause::Interrupt(2), "unknown")]
    fn cause_names(#[case] cause: TrapCause, #[case] name: &str) {
        assert_eq!(cause.name(), name);
    }
}
