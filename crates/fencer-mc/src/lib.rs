//! Backward reachability for finite-state programs under TSO, PSO and a
//! non-multi-copy-atomic memory model.
//!
//! Sets of configurations are represented by [`Constraint`]s: a control
//! vector, a set of possible values per memory slot, and a symbolic
//! description of every store buffer and propagation queue. The [`Engine`]
//! starts from the forbidden states and computes predecessors until it
//! reaches a constraint containing an initial configuration or runs out of
//! new constraints.

pub mod channel;
pub mod common;
pub mod concrete;
pub mod constraint;
pub mod container;
pub mod diagnostics;
pub mod engine;
mod explain;
pub mod witness;

pub use channel::{Channel, Label, LabelSet, Tracked, View};
pub use common::Common;
pub use concrete::{initial_configurations, replay, step, successors, Configuration, ReplayError};
pub use constraint::Constraint;
pub use container::Container;
pub use diagnostics::{CollectingSink, DiagnosticLevel, DiagnosticSink, NoopSink, TracingSink};
pub use engine::{
    CheckError, CheckResult, Engine, EngineConfig, Limit, SearchOrder, Stats, Verdict,
};
pub use witness::{Witness, WitnessStep};
