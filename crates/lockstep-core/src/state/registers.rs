/// Number of integer registers in the full base ISA.
pub const GPR_COUNT: usize = 32;

/// ABI names of the integer registers, indexed by register number.
pub const GPR_NAMES: [&str; GPR_COUNT] = [
    "$0", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

/// Returns the ABI name of register `index`, or `"?"` when out of range.
#[must_use]
pub fn reg_name(index: usize) -> &'static str {
    GPR_NAMES.get(index).copied().unwrap_or("?")
}

/// Machine-mode trap CSRs touched by the trap controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TrapCsrs {
    /// Machine status.
    pub mstatus: u64,
    /// Trap vector base.
    pub mtvec: u64,
    /// Exception program counter.
    pub mepc: u64,
    /// Trap cause, top bit set for interrupts.
    pub mcause: u64,
}

impl TrapCsrs {
    /// CSR names in the order they appear in diff tables.
    pub const NAMES: [&'static str; 4] = ["mstatus", "mtvec", "mepc", "mcause"];

    /// Values in [`Self::NAMES`] order.
    #[must_use]
    pub const fn to_array(self) -> [u64; 4] {
        [self.mstatus, self.mtvec, self.mepc, self.mcause]
    }

    /// Builds the set from values in [`Self::NAMES`] order.
    #[must_use]
    pub const fn from_array(values: [u64; 4]) -> Self {
        Self {
            mstatus: values[0],
            mtvec: values[1],
            mepc: values[2],
            mcause: values[3],
        }
    }
}

/// Committed architectural state of one hart.
///
/// `x0` is hardwired to zero: writes to it are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ArchitecturalState {
    gpr: [u64; GPR_COUNT],
    pc: u64,
    csrs: TrapCsrs,
}

impl ArchitecturalState {
    /// Creates a zeroed state with the given PC.
    #[must_use]
    pub const fn with_pc(pc: u64) -> Self {
        Self {
            gpr: [0; GPR_COUNT],
            pc,
            csrs: TrapCsrs {
                mstatus: 0,
                mtvec: 0,
                mepc: 0,
                mcause: 0,
            },
        }
    }

    /// Builds a state from raw register values, as read back from a reference model.
    ///
    /// `gpr[0]` is forced to zero.
    #[must_use]
    pub const fn from_raw(mut gpr: [u64; GPR_COUNT], pc: u64, csrs: TrapCsrs) -> Self {
        gpr[0] = 0;
        Self { gpr, pc, csrs }
    }

    /// Reads integer register `index`. Out-of-range indices read as zero.
    #[must_use]
    pub fn gpr(&self, index: usize) -> u64 {
        self.gpr.get(index).copied().unwrap_or(0)
    }

    /// Writes integer register `index`. Writes to `x0` or out of range are dropped.
    pub fn set_gpr(&mut self, index: usize, value: u64) {
        if index != 0 {
            if let Some(slot) = self.gpr.get_mut(index) {
                *slot = value;
            }
        }
    }

    /// The whole register file.
    #[must_use]
    pub const fn gprs(&self) -> &[u64; GPR_COUNT] {
        &self.gpr
    }

    /// Program counter.
    #[must_use]
    pub const fn pc(&self) -> u64 {
        self.pc
    }

    /// Sets the program counter.
    pub const fn set_pc(&mut self, value: u64) {
        self.pc = value;
    }

    /// Trap CSRs.
    #[must_use]
    pub const fn csrs(&self) -> &TrapCsrs {
        &self.csrs
    }

    /// Trap CSRs, mutable.
    pub const fn csrs_mut(&mut self) -> &mut TrapCsrs {
        &mut self.csrs
    }
}
