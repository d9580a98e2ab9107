//! Architectural hart state and run lifecycle.

/// Integer register file, PC and trap CSRs.
pub mod registers;
mod run_state;

pub use registers::{reg_name, ArchitecturalState, TrapCsrs, GPR_COUNT, GPR_NAMES};
pub use run_state::RunState;
