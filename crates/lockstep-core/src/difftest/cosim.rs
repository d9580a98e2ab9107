//! A cycle-level device under test may need many clock edges to commit one
//! instruction. [`step_to_commit`] ticks it until it does, up to a hard cap.

use crate::DiffError;

/// One committed instruction reported by a cycle model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commit {
    /// Address of the committed instruction.
    pub pc: u64,
    /// Address of the next instruction.
    pub next_pc: u64,
}

/// Clocked model that occasionally commits an instruction.
pub trait CycleModel {
    /// Advances one clock edge. Returns the commit observed on this edge, if any.
    fn tick(&mut self) -> Option<Commit>;
}

/// Ticks `model` until it commits, at most `max_cycles` times.
///
/// Returns the commit and the number of cycles it took.
///
/// # Errors
///
/// [`DiffError::CommitTimeout`] when no commit is seen within `max_cycles`.
pub fn step_to_commit<M: CycleModel + ?Sized>(
    model: &mut M,
    max_cycles: u64,
) -> Result<(Commit, u64), DiffError> {
    for cycle in 1..=max_cycles {
        if let Some(commit) = model.tick() {
            return Ok((commit, cycle));
        }
    }
    log::warn!("device under test did not commit within {max_cycles} cycles");
    Err(DiffError::CommitTimeout { cycles: max_cycles })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{step_to_commit, Commit, CycleModel};
    use crate::DiffError;

    /// Commits once every `period` ticks.
    struct Divider {
        period: u64,
        ticks: u64,
        pc: u64,
    }

    impl CycleModel for Divider {
        fn tick(&mut self) -> Option<Commit> {
            self.ticks += 1;
            (self.period != 0 && self.ticks % self.period == 0).then(|| {
                let commit = Commit {
                    pc: self.pc,
                    next_pc: self.pc + 4,
                };
                self.pc += 4;
                commit
            })
        }
    }

    #[rstest]
    #[case(1, 1)]
    #[case(5, 5)]
    #[case(10, 10)]
    fn commit_within_cap_reports_cycles(#[case] period: u64, #[case] cycles: u64) {
        let mut model = Divider {
            period,
            ticks: 0,
            pc: 0x8000_0000,
        };
        let (commit, spent) = step_to_commit(&mut model, 10).expect("commits in time");
        assert_eq!(spent, cycles);
        assert_eq!(commit.next_pc, 0x8000_0004);
    }

    #[test]
    fn stalled_model_times_out_at_the_cap() {
        let mut model = Divider {
            period: 0,
            ticks: 0,
            pc: 0,
        };
        assert_eq!(
            step_to_commit(&mut model, 64),
            Err(DiffError::CommitTimeout { cycles: 64 })
        );
        assert_eq!(model.ticks, 64);
    }
}
