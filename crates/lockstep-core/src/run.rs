//! Sequential stepping loop: execute, commit, compare, next.
//!
//! Instruction semantics live outside this crate behind [`Executor`]. A
//! [`Session`] drives one executor over one [`Machine`], optionally checking
//! every committed instruction against a reference model.

use crate::difftest::{DiffTest, ReferenceCpu, StepCheck};
use crate::machine::Machine;
use crate::state::RunState;
use crate::{CoreError, DiffError};

/// What one executed instruction did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecOutcome {
    /// The instruction committed; the machine's PC now names the next one.
    Retired,
    /// The guest asked to stop with `code`.
    Halted {
        /// Guest exit code.
        code: u64,
    },
}

/// Instruction decoder and executor driven by a [`Session`].
pub trait Executor {
    /// Executes the instruction at the machine's PC and commits its effects.
    ///
    /// # Errors
    ///
    /// Any [`CoreError`] raised while executing, typically an access fault.
    fn exec_once(&mut self, machine: &mut Machine) -> Result<ExecOutcome, CoreError>;
}

impl<F> Executor for F
where
    F: FnMut(&mut Machine) -> Result<ExecOutcome, CoreError>,
{
    fn exec_once(&mut self, machine: &mut Machine) -> Result<ExecOutcome, CoreError> {
        self(machine)
    }
}

/// Result of one [`Session::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepOutcome {
    /// An instruction committed.
    Retired {
        /// Address of the committed instruction.
        pc: u64,
        /// Lockstep verdict, `None` without an oracle.
        check: Option<StepCheck>,
    },
    /// The guest halted on this step.
    Halted {
        /// Guest exit code.
        code: u64,
    },
    /// The session had already stopped; nothing was executed.
    Stopped(RunState),
}

/// Condition that ends a [`Session::run`] early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunBoundary {
    /// Run until the guest halts.
    Halted,
    /// Also stop after any step that entered a trap.
    Trap,
}

/// Aggregated result of a [`Session::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunOutcome {
    /// Steps executed during this call.
    pub steps: u64,
    /// Last step-level result.
    pub final_step: StepOutcome,
    /// Session state on return.
    pub state: RunState,
}

/// A machine, its optional oracle and the run lifecycle.
#[derive(Debug)]
pub struct Session<R> {
    machine: Machine,
    oracle: Option<DiffTest<R>>,
    state: RunState,
}

impl<R: ReferenceCpu> Session<R> {
    /// Starts a session. An unsynchronized oracle is synchronized with the
    /// machine's current state and RAM.
    #[must_use]
    pub fn new(machine: Machine, oracle: Option<DiffTest<R>>) -> Self {
        let mut oracle = oracle;
        if let Some(oracle) = oracle.as_mut() {
            if !oracle.is_synchronized() {
                oracle.sync_initial_state(machine.cpu(), machine.bus().ram());
            }
        }
        Self {
            machine,
            oracle,
            state: RunState::Running,
        }
    }

    /// Executes and, with an oracle, checks one instruction.
    ///
    /// A step that touched a device resynchronizes the reference instead of
    /// comparing. Fatal errors move the session to [`RunState::Aborted`];
    /// a commit timeout leaves it running.
    ///
    /// # Errors
    ///
    /// The executor's error, or a [`DiffError`] from the oracle.
    pub fn step<E: Executor + ?Sized>(&mut self, executor: &mut E) -> Result<StepOutcome, CoreError> {
        if !self.state.is_running() {
            return Ok(StepOutcome::Stopped(self.state));
        }
        let pc = self.machine.cpu().pc();
        self.machine.bus_mut().take_device_access();

        let result = executor
            .exec_once(&mut self.machine)
            .and_then(|outcome| self.commit(pc, outcome));
        if let Err(err) = &result {
            self.machine.counters_mut().record_fault(err.class(), pc);
            if err.is_fatal() {
                log::error!("run aborted at pc {pc:#010x}: {err}");
                self.machine.diagnostics().log();
                self.state = RunState::Aborted(err.class());
            }
        }
        result
    }

    fn commit(&mut self, pc: u64, outcome: ExecOutcome) -> Result<StepOutcome, CoreError> {
        let check = self.compare(pc)?;
        match outcome {
            ExecOutcome::Retired => Ok(StepOutcome::Retired { pc, check }),
            ExecOutcome::Halted { code } => {
                self.state = RunState::Ended { code };
                log::info!("guest halted with code {code} at pc {pc:#010x}");
                self.check_end(true)?;
                Ok(StepOutcome::Halted { code })
            }
        }
    }

    fn compare(&mut self, pc: u64) -> Result<Option<StepCheck>, DiffError> {
        let Some(oracle) = self.oracle.as_mut() else {
            return Ok(None);
        };
        if self.machine.bus_mut().take_device_access() {
            oracle.skip_next();
        }
        let check = oracle.step_and_compare(pc, self.machine.cpu())?;
        let counters = self.machine.counters_mut();
        match check {
            StepCheck::Matched => counters.record_diff_check(),
            StepCheck::Resynced => counters.record_diff_skip(),
        }
        Ok(Some(check))
    }

    /// Steps until the guest halts, `boundary` is reached, an error occurs or
    /// `max_steps` instructions have executed.
    ///
    /// # Errors
    ///
    /// The first error returned by [`Self::step`].
    pub fn run<E: Executor + ?Sized>(
        &mut self,
        executor: &mut E,
        boundary: RunBoundary,
        max_steps: u64,
    ) -> Result<RunOutcome, CoreError> {
        let mut steps = 0;
        let mut final_step = StepOutcome::Stopped(self.state);
        while steps < max_steps && self.state.is_running() {
            let traps_before = self.machine.counters().traps_raised;
            final_step = self.step(executor)?;
            steps += 1;
            let trapped = self.machine.counters().traps_raised != traps_before;
            if boundary == RunBoundary::Trap && trapped {
                break;
            }
        }
        Ok(RunOutcome {
            steps,
            final_step,
            state: self.state,
        })
    }

    /// Cross-checks the emulator's end-of-run verdict with the reference's.
    ///
    /// Always succeeds without an oracle.
    ///
    /// # Errors
    ///
    /// [`DiffError::EndDisagreement`] when the two sides disagree.
    pub fn check_end(&mut self, emulator_ended: bool) -> Result<(), DiffError> {
        let Some(oracle) = self.oracle.as_mut() else {
            return Ok(());
        };
        let reference_ended = oracle.check_session_end();
        if reference_ended == emulator_ended {
            if reference_ended {
                log::info!("END by syscall, confirmed by reference");
            }
            Ok(())
        } else {
            log::error!(
                "termination disagreement: reference ended = {reference_ended}, emulator ended = {emulator_ended}"
            );
            Err(DiffError::EndDisagreement {
                reference_ended,
                emulator_ended,
            })
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// The machine.
    #[must_use]
    pub const fn machine(&self) -> &Machine {
        &self.machine
    }

    /// The machine, mutable.
    pub const fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    /// The oracle, if any.
    #[must_use]
    pub const fn oracle(&self) -> Option<&DiffTest<R>> {
        self.oracle.as_ref()
    }

    /// The oracle, mutable.
    pub const fn oracle_mut(&mut self) -> Option<&mut DiffTest<R>> {
        self.oracle.as_mut()
    }

    /// Ends the session, detaching the reference model.
    pub fn finish(self) -> (Machine, Option<R>) {
        (self.machine, self.oracle.map(DiffTest::detach))
    }
}
