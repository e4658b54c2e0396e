//! Supported memory models.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Memory model a program is analysed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryModel {
    /// Total store order: one FIFO store buffer per process.
    Tso,
    /// Partial store order: one FIFO store buffer per process and location.
    Pso,
    /// Non-multi-copy-atomic: per-location store buffers plus per-process
    /// propagation queues; writes become visible to each process separately.
    Nmca,
}

impl MemoryModel {
    pub const ALL: [MemoryModel; 3] = [MemoryModel::Tso, MemoryModel::Pso, MemoryModel::Nmca];

    /// Whether buffers are kept per (process, location) rather than per process.
    pub fn per_location_buffers(self) -> bool {
        !matches!(self, MemoryModel::Tso)
    }

    /// Whether every process holds its own copy of memory.
    pub fn has_propagation(self) -> bool {
        matches!(self, MemoryModel::Nmca)
    }
}

impl fmt::Display for MemoryModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryModel::Tso => write!(f, "tso"),
            MemoryModel::Pso => write!(f, "pso"),
            MemoryModel::Nmca => write!(f, "nmca"),
        }
    }
}

impl FromStr for MemoryModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tso" => Ok(MemoryModel::Tso),
            "pso" => Ok(MemoryModel::Pso),
            "nmca" => Ok(MemoryModel::Nmca),
            other => Err(format!(
                "unknown memory model '{}' (expected tso, pso or nmca)",
                other
            )),
        }
    }
}
