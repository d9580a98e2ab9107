use crate::FaultClass;

/// Lifecycle of a stepping session as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RunState {
    /// Ready to execute the next instruction.
    #[default]
    Running,
    /// The guest signalled termination with an exit code.
    Ended {
        /// Guest exit code.
        code: u64,
    },
    /// The run stopped on an error of the given class.
    Aborted(FaultClass),
}

impl RunState {
    /// Returns `true` while further steps are allowed.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns the fault class that aborted the run, if any.
    #[must_use]
    pub const fn aborted_by(self) -> Option<FaultClass> {
        match self {
            Self::Aborted(class) => Some(class),
            Self::Running | Self::Ended { .. } => None,
        }
    }
}
