//! Search for a smallest set of synchronization candidates that makes a
//! program safe.

use crate::candidate::{apply_all, get_all_possible, Correspondence, SyncCandidate, SyncKind};
use crate::error::{RepairError, RepairResult};
use fencer_mc::{Common, Engine, EngineConfig, Verdict};
use fencer_model::{MemoryModel, Program};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Configuration for the repair search.
#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Largest number of candidates combined (0 = every candidate).
    pub max_size: usize,
    /// Kinds of candidates to consider.
    pub kinds: Vec<SyncKind>,
    /// Settings for each engine run.
    pub engine: EngineConfig,
    /// Collect every minimal repair instead of stopping at the first.
    pub all_minimal: bool,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_size: 3,
            kinds: SyncKind::ALL.to_vec(),
            engine: EngineConfig::default(),
            all_minimal: false,
        }
    }
}

/// A set of candidates that makes the program safe.
#[derive(Debug, Clone)]
pub struct Repair {
    pub candidates: Vec<SyncCandidate>,
    pub program: Program,
    pub correspondence: Correspondence,
}

#[derive(Debug, Clone)]
pub enum RepairOutcome {
    /// The program is safe as it is.
    AlreadySafe,
    /// Safe repairs, smallest first.
    Repaired { solutions: Vec<Repair> },
    /// No combination within the size bound was proved safe. `inconclusive`
    /// counts engine runs that hit a budget.
    NoRepair { inconclusive: usize },
}

/// Combinations of `0..n` of size `k` in lexicographic order.
struct Combinations {
    n: usize,
    indices: Vec<usize>,
    done: bool,
}

impl Combinations {
    fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            indices: (0..k).collect(),
            done: k > n,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.done {
            return None;
        }
        let current = self.indices.clone();
        let k = self.indices.len();
        let mut i = k;
        loop {
            if i == 0 {
                self.done = true;
                break;
            }
            i -= 1;
            if self.indices[i] < self.n - k + i {
                self.indices[i] += 1;
                for j in i + 1..k {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
                break;
            }
        }
        Some(current)
    }
}

fn run(program: &Program, model: MemoryModel, config: &EngineConfig) -> RepairResult<Verdict> {
    let common = Arc::new(Common::new(Arc::new(program.clone()), model));
    Ok(Engine::new(common, config.clone()).run()?)
}

/// Repair `program` under `model`.
pub fn search(
    program: &Program,
    model: MemoryModel,
    config: &RepairConfig,
) -> RepairResult<RepairOutcome> {
    let mut inconclusive = 0;
    match run(program, model, &config.engine)? {
        Verdict::Safe { .. } => return Ok(RepairOutcome::AlreadySafe),
        Verdict::Inconclusive { reason, .. } => {
            warn!(%reason, "original program inconclusive, searching anyway");
            inconclusive += 1;
        }
        Verdict::Reachable { .. } => {}
    }

    let candidates = get_all_possible(program, &config.kinds);
    let max_size = match config.max_size {
        0 => candidates.len(),
        n => n.min(candidates.len()),
    };
    info!(candidates = candidates.len(), max_size, "searching for a repair");

    let mut solutions: Vec<Vec<usize>> = Vec::new();
    let mut repairs = Vec::new();
    for size in 1..=max_size {
        let mut tried = 0usize;
        for combo in Combinations::new(candidates.len(), size) {
            if targets_repeat(&candidates, &combo) {
                continue;
            }
            if solutions
                .iter()
                .any(|s| s.iter().all(|i| combo.contains(i)))
            {
                continue;
            }
            let chosen: Vec<SyncCandidate> = combo.iter().map(|i| candidates[*i]).collect();
            let (repaired, correspondence) = apply_all(program, &chosen)?;
            tried += 1;
            match run(&repaired, model, &config.engine)? {
                Verdict::Safe { stats } => {
                    info!(size, steps = stats.steps, "found repair");
                    for c in &chosen {
                        debug!("  {}", c.describe(program));
                    }
                    repairs.push(Repair {
                        candidates: chosen,
                        program: repaired,
                        correspondence,
                    });
                    if !config.all_minimal {
                        return Ok(RepairOutcome::Repaired { solutions: repairs });
                    }
                    solutions.push(combo);
                }
                Verdict::Inconclusive { reason, .. } => {
                    debug!(%reason, size, "candidate set inconclusive");
                    inconclusive += 1;
                }
                Verdict::Reachable { .. } => {}
            }
        }
        debug!(size, tried, found = solutions.len(), "finished size");
    }

    if repairs.is_empty() {
        if inconclusive > 0 {
            warn!(inconclusive, "no repair found, some runs were inconclusive");
        }
        Ok(RepairOutcome::NoRepair { inconclusive })
    } else {
        Ok(RepairOutcome::Repaired { solutions: repairs })
    }
}

fn targets_repeat(candidates: &[SyncCandidate], combo: &[usize]) -> bool {
    combo.iter().enumerate().any(|(k, i)| {
        combo[..k]
            .iter()
            .any(|j| candidates[*j].target == candidates[*i].target)
    })
}

/// Check a repaired program once more; errors if it is not safe.
pub fn confirm(repair: &Repair, model: MemoryModel, config: &EngineConfig) -> RepairResult<()> {
    match run(&repair.program, model, config)? {
        Verdict::Safe { .. } => Ok(()),
        other => Err(RepairError::NotConfirmed {
            verdict: other.name(),
        }),
    }
}
