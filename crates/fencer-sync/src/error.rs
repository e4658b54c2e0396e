use fencer_mc::CheckError;
use fencer_model::{ModelError, StateId};
use thiserror::Error;

/// Error applying a synchronization candidate.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{transition} is not a transition of the original program")]
    UnknownTarget { transition: String },

    #[error("{transition} is not in the program the candidate is applied to")]
    StaleImage { transition: String },

    #[error("cannot lock {transition}: not a plain write to a shared location")]
    NotAPlainWrite { transition: String },

    #[error("process '{process}': fresh state {state} is already in use")]
    StateTaken { process: String, state: StateId },

    #[error(transparent)]
    Model(#[from] ModelError),
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Error during the repair search.
#[derive(Debug, Error)]
pub enum RepairError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Check(#[from] CheckError),

    #[error("repaired program is {verdict} on re-check")]
    NotConfirmed { verdict: &'static str },
}

pub type RepairResult<T> = Result<T, RepairError>;
