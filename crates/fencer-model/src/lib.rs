//! Program model for relaxed-memory verification: processes as finite control
//! automata over shared and process-local memory locations.

pub mod builder;
pub mod error;
pub mod memory_model;
pub mod program;
pub mod sets;
pub mod types;

pub use builder::ProgramBuilder;
pub use error::{ModelError, ModelResult};
pub use memory_model::MemoryModel;
pub use program::{
    Location, LocId, Named, Pid, Process, Program, StateId, Stmt, Transition, Value,
};
pub use sets::{LocSet, ValueSet};
pub use types::ProgramSpec;

/// Upper bound on locations, processes and domain sizes (bitset width).
pub const MAX_WIDTH: usize = 64;
