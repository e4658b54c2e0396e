//! Backward reachability over constraints.

use crate::common::Common;
use crate::constraint::Constraint;
use crate::container::Container;
use crate::diagnostics::{DiagnosticLevel, DiagnosticSink, NoopSink};
use crate::witness::{Witness, WitnessStep};
use fencer_model::Transition;
use rayon::prelude::*;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Errors that abort an analysis.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("inconsistent constraint after {transition}: {problem}\n{constraint}")]
    InconsistentConstraint {
        transition: String,
        problem: String,
        constraint: String,
    },

    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type CheckResult<T> = Result<T, CheckError>;

/// Worklist discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchOrder {
    #[default]
    Bfs,
    Dfs,
}

/// Configuration for the reachability engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Breadth-first (queue) or depth-first (stack) worklist.
    pub order: SearchOrder,
    /// Maximum number of constraints taken off the worklist (0 = unlimited).
    pub max_steps: usize,
    /// Maximum number of constraints held by the container (0 = unlimited).
    pub max_stored: usize,
    /// Maximum time in seconds (0 = unlimited).
    pub max_time_secs: u64,
    /// Whether to process the worklist in parallel batches.
    pub parallel: bool,
    /// Number of threads for parallel batches (0 = use all available).
    pub num_threads: usize,
    /// Discard predecessors that no concrete configuration satisfies.
    pub prune_unexplainable: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            order: SearchOrder::Bfs,
            max_steps: 0,
            max_stored: 0,
            max_time_secs: 0,
            parallel: false,
            num_threads: 0,
            prune_unexplainable: true,
        }
    }
}

/// Counters reported with every verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    /// Constraints taken off the worklist.
    pub steps: usize,
    /// Constraints held by the container at the end.
    pub stored: usize,
    pub elapsed: Duration,
}

/// The budget that ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Steps(usize),
    Stored(usize),
    Time(u64),
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Steps(n) => write!(f, "step limit of {} reached", n),
            Limit::Stored(n) => write!(f, "container limit of {} constraints reached", n),
            Limit::Time(s) => write!(f, "time limit of {}s reached", s),
        }
    }
}

/// Result of a reachability analysis.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// No forbidden control vector is reachable.
    Safe { stats: Stats },
    /// A forbidden control vector is reachable.
    Reachable { witness: Witness, stats: Stats },
    /// A budget ran out first.
    Inconclusive { reason: Limit, stats: Stats },
}

impl Verdict {
    pub fn stats(&self) -> &Stats {
        match self {
            Verdict::Safe { stats }
            | Verdict::Reachable { stats, .. }
            | Verdict::Inconclusive { stats, .. } => stats,
        }
    }

    pub fn is_safe(&self) -> bool {
        matches!(self, Verdict::Safe { .. })
    }

    pub fn is_reachable(&self) -> bool {
        matches!(self, Verdict::Reachable { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Verdict::Safe { .. } => "SAFE",
            Verdict::Reachable { .. } => "REACHABLE",
            Verdict::Inconclusive { .. } => "INCONCLUSIVE",
        }
    }
}

/// A stored constraint and the step it was derived by: `parent` was reached
/// from this node by `transition`.
struct Node {
    constraint: Arc<Constraint>,
    parent: Option<(usize, Transition)>,
}

struct Pending {
    constraint: Arc<Constraint>,
    parent: Option<(usize, Transition)>,
}

struct Expanded {
    pending: Pending,
    initial: bool,
    predecessors: Vec<(Transition, Arc<Constraint>)>,
}

/// Backward reachability engine.
pub struct Engine {
    common: Arc<Common>,
    config: EngineConfig,
    sink: Arc<dyn DiagnosticSink>,
}

impl Engine {
    pub fn new(common: Arc<Common>, config: EngineConfig) -> Self {
        Self {
            common,
            config,
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn common(&self) -> &Arc<Common> {
        &self.common
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run backwards from the bad states to a verdict.
    pub fn run(&self) -> CheckResult<Verdict> {
        self.run_from(self.common.get_bad_states())
    }

    /// Run backwards from `targets`; a witness then ends in one of them.
    pub fn run_from(&self, targets: Vec<Constraint>) -> CheckResult<Verdict> {
        info!(
            model = %self.common.model(),
            order = ?self.config.order,
            parallel = self.config.parallel,
            processes = self.common.program().num_processes(),
            locations = self.common.program().num_locations(),
            "starting backward reachability"
        );

        let work = seeds(targets);
        let verdict = if !self.config.parallel {
            self.run_sequential(work)?
        } else if self.config.num_threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.num_threads)
                .build()?;
            pool.install(|| self.run_parallel(work))?
        } else {
            self.run_parallel(work)?
        };

        let stats = verdict.stats();
        match &verdict {
            Verdict::Safe { .. } => info!(
                steps = stats.steps,
                stored = stats.stored,
                elapsed_ms = stats.elapsed.as_millis() as u64,
                "reachability complete: safe"
            ),
            Verdict::Reachable { witness, .. } => info!(
                steps = stats.steps,
                stored = stats.stored,
                witness_len = witness.len(),
                "forbidden state reachable"
            ),
            Verdict::Inconclusive { reason, .. } => info!(
                steps = stats.steps,
                stored = stats.stored,
                reason = %reason,
                "reachability inconclusive"
            ),
        }
        Ok(verdict)
    }

    fn pop(&self, work: &mut VecDeque<Pending>) -> Option<Pending> {
        match self.config.order {
            SearchOrder::Bfs => work.pop_front(),
            SearchOrder::Dfs => work.pop_back(),
        }
    }

    fn limit_reached(&self, steps: usize, stored: usize, start: Instant) -> Option<Limit> {
        let c = &self.config;
        if c.max_steps > 0 && steps >= c.max_steps {
            return Some(Limit::Steps(c.max_steps));
        }
        if c.max_stored > 0 && stored >= c.max_stored {
            return Some(Limit::Stored(c.max_stored));
        }
        if c.max_time_secs > 0 && start.elapsed().as_secs() >= c.max_time_secs {
            return Some(Limit::Time(c.max_time_secs));
        }
        None
    }

    fn predecessors(&self, c: &Constraint, t: &Transition) -> CheckResult<Vec<Constraint>> {
        if self.config.prune_unexplainable {
            c.pre(&self.common, t)
        } else {
            c.pre_unpruned(&self.common, t)
        }
    }

    /// Insert, test for an initial configuration, and compute predecessors.
    fn expand(&self, pending: Pending, container: &Container) -> CheckResult<Option<Expanded>> {
        if !container.insert(&pending.constraint) {
            return Ok(None);
        }
        self.report(&pending.constraint, container);
        if pending.constraint.is_init_state(&self.common) {
            return Ok(Some(Expanded {
                pending,
                initial: true,
                predecessors: Vec::new(),
            }));
        }
        let mut predecessors = Vec::new();
        for t in pending.constraint.partred(&self.common) {
            for pre in self.predecessors(&pending.constraint, &t)? {
                predecessors.push((t, Arc::new(pre)));
            }
        }
        Ok(Some(Expanded {
            pending,
            initial: false,
            predecessors,
        }))
    }

    fn report(&self, c: &Constraint, container: &Container) {
        let level = self.sink.level();
        if level >= DiagnosticLevel::Steps {
            let program = self.common.program();
            let control: Vec<&str> = c
                .control()
                .iter()
                .enumerate()
                .map(|(p, s)| program.state_name(p, *s))
                .collect();
            self.sink.record(
                DiagnosticLevel::Steps,
                &format!(
                    "stored constraint at ({}), {} stored",
                    control.join(", "),
                    container.len()
                ),
            );
        }
        if level >= DiagnosticLevel::Constraints {
            self.sink
                .record(DiagnosticLevel::Constraints, &c.describe(&self.common));
        }
        trace!(control = ?c.control(), "new constraint");
    }

    fn run_sequential(&self, mut work: VecDeque<Pending>) -> CheckResult<Verdict> {
        let start = Instant::now();
        let container = Container::new();
        let mut arena: Vec<Node> = Vec::new();
        let mut steps = 0;

        while let Some(pending) = self.pop(&mut work) {
            if let Some(reason) = self.limit_reached(steps, container.len(), start) {
                return Ok(Verdict::Inconclusive {
                    reason,
                    stats: stats(steps, &container, start),
                });
            }
            steps += 1;
            let Some(expanded) = self.expand(pending, &container)? else {
                continue;
            };
            let index = arena.len();
            arena.push(Node {
                constraint: expanded.pending.constraint,
                parent: expanded.pending.parent,
            });
            if expanded.initial {
                return Ok(Verdict::Reachable {
                    witness: witness(&arena, index),
                    stats: stats(steps, &container, start),
                });
            }
            for (t, c) in expanded.predecessors {
                work.push_back(Pending {
                    constraint: c,
                    parent: Some((index, t)),
                });
            }
            if steps % 10_000 == 0 {
                debug!(steps, stored = container.len(), worklist = work.len(), "progress");
            }
        }

        Ok(Verdict::Safe {
            stats: stats(steps, &container, start),
        })
    }

    /// Batches of the worklist are expanded by the rayon pool; results are
    /// merged back in batch order.
    fn run_parallel(&self, mut work: VecDeque<Pending>) -> CheckResult<Verdict> {
        let start = Instant::now();
        let container = Container::new();
        let mut arena: Vec<Node> = Vec::new();
        let mut steps = 0;
        let batch_size = rayon::current_num_threads() * 256;

        while !work.is_empty() {
            if let Some(reason) = self.limit_reached(steps, container.len(), start) {
                return Ok(Verdict::Inconclusive {
                    reason,
                    stats: stats(steps, &container, start),
                });
            }
            let mut take = batch_size.min(work.len());
            if self.config.max_steps > 0 {
                take = take.min(self.config.max_steps - steps);
            }
            let batch: Vec<Pending> = match self.config.order {
                SearchOrder::Bfs => work.drain(..take).collect(),
                SearchOrder::Dfs => {
                    let at = work.len() - take;
                    work.drain(at..).rev().collect()
                }
            };
            steps += batch.len();

            let found = AtomicBool::new(false);
            let results: Vec<CheckResult<Option<Expanded>>> = batch
                .into_par_iter()
                .map(|pending| {
                    if found.load(Ordering::Relaxed) {
                        return Ok(None);
                    }
                    let expanded = self.expand(pending, &container)?;
                    if expanded.as_ref().is_some_and(|e| e.initial) {
                        found.store(true, Ordering::Relaxed);
                    }
                    Ok(expanded)
                })
                .collect();

            for result in results {
                let Some(expanded) = result? else {
                    continue;
                };
                let index = arena.len();
                arena.push(Node {
                    constraint: expanded.pending.constraint,
                    parent: expanded.pending.parent,
                });
                if expanded.initial {
                    return Ok(Verdict::Reachable {
                        witness: witness(&arena, index),
                        stats: stats(steps, &container, start),
                    });
                }
                for (t, c) in expanded.predecessors {
                    work.push_back(Pending {
                        constraint: c,
                        parent: Some((index, t)),
                    });
                }
            }
            debug!(steps, stored = container.len(), worklist = work.len(), "batch done");
        }

        Ok(Verdict::Safe {
            stats: stats(steps, &container, start),
        })
    }
}

fn seeds(targets: Vec<Constraint>) -> VecDeque<Pending> {
    targets
        .into_iter()
        .map(|c| Pending {
            constraint: Arc::new(c),
            parent: None,
        })
        .collect()
}

fn stats(steps: usize, container: &Container, start: Instant) -> Stats {
    Stats {
        steps,
        stored: container.len(),
        elapsed: start.elapsed(),
    }
}

/// Follow parent links from the initial node up to a bad state.
fn witness(arena: &[Node], from: usize) -> Witness {
    let mut steps = Vec::new();
    let mut current = from;
    while let Some((parent, transition)) = arena[current].parent {
        steps.push(WitnessStep {
            transition,
            constraint: Arc::clone(&arena[parent].constraint),
        });
        current = parent;
    }
    Witness {
        initial: Arc::clone(&arena[from].constraint),
        steps,
    }
}
