//! Synchronization candidates for programs under relaxed memory models, and
//! a search for the smallest set of them that makes a program safe.

pub mod candidate;
pub mod error;
pub mod repair;

pub use candidate::{apply_all, get_all_possible, Correspondence, SyncCandidate, SyncKind};
pub use error::{RepairError, RepairResult, SyncError, SyncResult};
pub use repair::{confirm, search, Repair, RepairConfig, RepairOutcome};
