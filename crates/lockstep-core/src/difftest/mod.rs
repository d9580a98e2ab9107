//! Lockstep differential testing against an independent reference model.
//!
//! The emulator commits an instruction, the reference executes the same
//! instruction, and the two register files are compared field by field. The
//! first mismatch is terminal and is reported with a full register table.

use crate::config::{MachineConfig, Xlen};
use crate::memory::PhysicalMemory;
use crate::state::{reg_name, ArchitecturalState, TrapCsrs};
use crate::DiffError;

/// Bounded commit wait for cycle-level devices under test.
pub mod cosim;
/// Reference model loaded from a shared object.
pub mod dylib;
mod report;

pub use cosim::{step_to_commit, Commit, CycleModel};
pub use dylib::DylibReference;
pub use report::{DiffReport, RegisterRow};

/// Operations a reference model exposes to the oracle.
///
/// Addresses are guest physical addresses. Register values are zero-extended
/// to 64 bits regardless of the guest width.
pub trait ReferenceCpu {
    /// Copies `bytes` into reference memory at `addr`.
    fn memcpy_to_ref(&mut self, addr: u64, bytes: &[u8]);
    /// Copies reference memory at `addr` into `buf`.
    fn memcpy_from_ref(&mut self, addr: u64, buf: &mut [u8]);
    /// Overwrites the reference GPRs and PC.
    fn regcpy_to_ref(&mut self, state: &ArchitecturalState);
    /// Reads the reference GPRs and PC. CSRs in the result are unspecified.
    fn regcpy_from_ref(&mut self) -> ArchitecturalState;
    /// Overwrites the reference trap CSRs.
    fn csrcpy_to_ref(&mut self, csrs: &TrapCsrs);
    /// Reads the reference trap CSRs.
    fn csrcpy_from_ref(&mut self) -> TrapCsrs;
    /// Executes `n` instructions.
    fn exec(&mut self, n: u64);
    /// Executes until the PC reaches `target_pc`, returning the PC reached.
    fn guided_exec(&mut self, target_pc: u64) -> u64;
    /// Checks a store committed by the device under test. `false` on disagreement.
    fn store_commit(&mut self, addr: u64, data: u64) -> bool;
    /// Raises interrupt `cause` in the reference.
    fn raise_intr(&mut self, cause: u64);
    /// Returns `true` when the reference believes the run has ended.
    fn cosim_end(&mut self) -> bool;
}

/// Outcome of one lockstep step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepCheck {
    /// States were compared and agree.
    Matched,
    /// The step touched a device; the reference was overwritten with the
    /// emulator's state instead of being compared.
    Resynced,
}

/// Lockstep oracle owning one reference model.
#[derive(Debug)]
pub struct DiffTest<R> {
    reference: R,
    xlen: Xlen,
    gpr_count: usize,
    compare_csrs: bool,
    max_commit_cycles: u64,
    synchronized: bool,
    skip_pending: bool,
    checks: u64,
    resyncs: u64,
}

impl<R: ReferenceCpu> DiffTest<R> {
    /// Wraps `reference` for a machine built from `config`.
    #[must_use]
    pub const fn new(reference: R, config: &MachineConfig) -> Self {
        Self {
            reference,
            xlen: config.xlen,
            gpr_count: config.gpr_count,
            compare_csrs: config.diff.compare_csrs,
            max_commit_cycles: config.diff.max_commit_cycles,
            synchronized: false,
            skip_pending: false,
            checks: 0,
            resyncs: 0,
        }
    }

    /// Copies RAM and architectural state into the reference.
    ///
    /// Must be called once before the first comparison.
    pub fn sync_initial_state(&mut self, dut: &ArchitecturalState, ram: &PhysicalMemory) {
        self.reference.memcpy_to_ref(ram.low(), ram.as_slice());
        self.push_state(dut);
        self.synchronized = true;
        log::info!(
            "difftest: reference synchronized at pc {:#010x} ({} bytes of pmem)",
            dut.pc(),
            ram.size()
        );
    }

    fn push_state(&mut self, dut: &ArchitecturalState) {
        self.reference.regcpy_to_ref(dut);
        if self.compare_csrs {
            self.reference.csrcpy_to_ref(dut.csrs());
        }
    }

    /// Ticks a co-simulated core until it commits, capped at the configured
    /// `max_commit_cycles`.
    ///
    /// # Errors
    ///
    /// [`DiffError::CommitTimeout`] when the core stalls past the cap.
    pub fn await_commit<M: CycleModel + ?Sized>(
        &self,
        model: &mut M,
    ) -> Result<(Commit, u64), DiffError> {
        step_to_commit(model, self.max_commit_cycles)
    }

    /// Arms a resync for the next step instead of a comparison.
    pub const fn skip_next(&mut self) {
        self.skip_pending = true;
    }

    /// Steps the reference by one instruction and compares it with `dut`.
    ///
    /// `pc` is the address of the instruction the emulator just committed.
    ///
    /// # Errors
    ///
    /// [`DiffError::NotSynchronized`] before [`Self::sync_initial_state`],
    /// [`DiffError::Mismatch`] when any compared register differs.
    pub fn step_and_compare(
        &mut self,
        pc: u64,
        dut: &ArchitecturalState,
    ) -> Result<StepCheck, DiffError> {
        if let Some(resynced) = self.take_skip(dut)? {
            return Ok(resynced);
        }
        self.reference.exec(1);
        self.compare(pc, dut)
    }

    /// Like [`Self::step_and_compare`], but runs the reference until it
    /// reaches `target_pc`.
    ///
    /// # Errors
    ///
    /// As [`Self::step_and_compare`].
    pub fn step_and_compare_guided(
        &mut self,
        target_pc: u64,
        pc: u64,
        dut: &ArchitecturalState,
    ) -> Result<StepCheck, DiffError> {
        if let Some(resynced) = self.take_skip(dut)? {
            return Ok(resynced);
        }
        let reached = self.reference.guided_exec(target_pc & self.xlen.mask());
        log::trace!("difftest: guided to {target_pc:#010x}, reference at {reached:#010x}");
        self.compare(pc, dut)
    }

    fn take_skip(&mut self, dut: &ArchitecturalState) -> Result<Option<StepCheck>, DiffError> {
        if !self.synchronized {
            return Err(DiffError::NotSynchronized);
        }
        if !self.skip_pending {
            return Ok(None);
        }
        self.skip_pending = false;
        self.push_state(dut);
        self.resyncs = self.resyncs.saturating_add(1);
        log::trace!("difftest: resynced reference at pc {:#010x}", dut.pc());
        Ok(Some(StepCheck::Resynced))
    }

    fn compare(&mut self, pc: u64, dut: &ArchitecturalState) -> Result<StepCheck, DiffError> {
        self.checks = self.checks.saturating_add(1);
        let report = self.report(pc, dut);
        if report.is_match() {
            return Ok(StepCheck::Matched);
        }
        log::error!("difftest: divergence at pc {pc:#010x}: {}", report.summary());
        log::error!("\n{report}");
        Err(DiffError::Mismatch(Box::new(report)))
    }

    /// Builds the full comparison table without stepping the reference.
    pub fn report(&mut self, pc: u64, dut: &ArchitecturalState) -> DiffReport {
        let mask = self.xlen.mask();
        let reference = self.reference.regcpy_from_ref();
        let mut rows: Vec<RegisterRow> = (0..self.gpr_count)
            .map(|index| RegisterRow {
                name: reg_name(index),
                reference: reference.gpr(index) & mask,
                emulator: dut.gpr(index) & mask,
            })
            .collect();
        rows.push(RegisterRow {
            name: "pc",
            reference: reference.pc() & mask,
            emulator: dut.pc() & mask,
        });
        if self.compare_csrs {
            let ref_csrs = self.reference.csrcpy_from_ref().to_array();
            let dut_csrs = dut.csrs().to_array();
            rows.extend(TrapCsrs::NAMES.iter().enumerate().map(|(i, &name)| RegisterRow {
                name,
                reference: ref_csrs[i] & mask,
                emulator: dut_csrs[i] & mask,
            }));
        }
        DiffReport { pc, rows }
    }

    /// Forwards a committed store to the reference.
    ///
    /// # Errors
    ///
    /// [`DiffError::StoreMismatch`] when the reference disagrees with the store.
    pub fn notify_store_commit(&mut self, addr: u64, data: u64) -> Result<(), DiffError> {
        if self.reference.store_commit(addr, data) {
            Ok(())
        } else {
            log::error!("difftest: store of {data:#x} to {addr:#010x} rejected by reference");
            Err(DiffError::StoreMismatch { addr, data })
        }
    }

    /// Forwards an interrupt taken by the emulator to the reference.
    pub fn notify_interrupt(&mut self, cause: u64) {
        log::debug!("difftest: forwarding interrupt {cause:#x}");
        self.reference.raise_intr(cause);
    }

    /// Asks the reference whether it considers the run finished.
    pub fn check_session_end(&mut self) -> bool {
        self.reference.cosim_end()
    }

    /// Number of comparisons performed.
    #[must_use]
    pub const fn checks(&self) -> u64 {
        self.checks
    }

    /// Number of steps resynced instead of compared.
    #[must_use]
    pub const fn resyncs(&self) -> u64 {
        self.resyncs
    }

    /// Returns `true` once [`Self::sync_initial_state`] has run.
    #[must_use]
    pub const fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// Reference model.
    #[must_use]
    pub const fn reference(&self) -> &R {
        &self.reference
    }

    /// Reference model, mutable.
    pub const fn reference_mut(&mut self) -> &mut R {
        &mut self.reference
    }

    /// Ends the session and hands back the reference model.
    pub fn detach(self) -> R {
        log::info!(
            "difftest: detached after {} checks, {} resyncs",
            self.checks,
            self.resyncs
        );
        self.reference
    }
}

impl DiffTest<DylibReference> {
    /// Loads the reference model at `path` and wraps it.
    ///
    /// # Errors
    ///
    /// [`crate::ConfigError::LibraryLoad`] when the object cannot be opened,
    /// [`crate::ConfigError::MissingSymbol`] when an entry point is missing.
    pub fn attach(
        path: impl AsRef<std::path::Path>,
        config: &MachineConfig,
    ) -> Result<Self, crate::ConfigError> {
        let reference = DylibReference::load(path.as_ref(), config.xlen, config.gpr_count)?;
        Ok(Self::new(reference, config))
    }
}
