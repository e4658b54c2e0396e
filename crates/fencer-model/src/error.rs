//! Malformed-model errors.

use thiserror::Error;

/// Error raised while constructing or validating a program.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid program JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown location '{name}'")]
    UnknownLocation { name: String },

    #[error("unknown process '{name}'")]
    UnknownProcess { name: String },

    #[error("process '{process}' has no state named '{state}'")]
    UnknownState { process: String, state: String },

    #[error("process '{process}': state id {state} out of range ({count} states)")]
    StateOutOfRange {
        process: String,
        state: u32,
        count: usize,
    },

    #[error("location id {loc} out of range ({count} locations)")]
    LocationOutOfRange { loc: usize, count: usize },

    #[error("process id {pid} out of range ({count} processes)")]
    ProcessOutOfRange { pid: usize, count: usize },

    #[error("value {value} is outside the domain of '{location}' (0..{domain})")]
    ValueOutOfDomain {
        location: String,
        value: u32,
        domain: u32,
    },

    #[error("duplicate {what} '{name}'")]
    Duplicate { what: &'static str, name: String },

    #[error("location '{location}' has domain size {domain}, expected 1..=64")]
    BadDomain { location: String, domain: u32 },

    #[error("location '{location}' has an empty initial value set")]
    EmptyInit { location: String },

    #[error("invalid initial value '{text}' for '{location}' (expected a value, a list or \"*\")")]
    BadInit { location: String, text: String },

    #[error("too many {what}: {count} (limit {limit})")]
    TooMany {
        what: &'static str,
        count: usize,
        limit: usize,
    },

    #[error("program has no processes")]
    NoProcesses,

    #[error("process '{process}' has no states")]
    NoStates { process: String },

    #[error("forbidden vector has {found} entries, program has {expected} processes")]
    ForbiddenArity { expected: usize, found: usize },

    #[error("program has no forbidden control vectors")]
    NoForbidden,

    #[error("process '{process}' accesses '{location}', a local location of another process")]
    ForeignLocal { process: String, location: String },

    #[error("{stmt} on local location '{location}' is not supported")]
    SyncOnLocal {
        stmt: &'static str,
        location: String,
    },

    #[error("process '{process}' uses the internal statement '{stmt}'")]
    InternalStatement {
        process: String,
        stmt: &'static str,
    },
}

pub type ModelResult<T> = Result<T, ModelError>;
