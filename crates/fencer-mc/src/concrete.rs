//! Concrete operational semantics of the memory models.
//!
//! Used to replay witnesses and as the reference for differential testing.

use crate::witness::Witness;
use fencer_model::{LocId, LocSet, MemoryModel, Pid, Program, StateId, Stmt, Transition, Value};
use std::collections::{BTreeSet, VecDeque};
use thiserror::Error;

/// A concrete configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Configuration {
    pub control: Vec<StateId>,
    /// One memory copy per process under NMCA, a single copy otherwise.
    pub memory: Vec<Vec<Value>>,
    /// Store buffers `(location, value)`, oldest first: one per process under
    /// TSO, one per (process, location) otherwise.
    pub buffers: Vec<VecDeque<(LocId, Value)>>,
    /// NMCA propagation queues `(writer, value)` per (process, location).
    pub queues: Vec<VecDeque<(Pid, Value)>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("witness step {step} ({transition}) is not executable")]
    Stuck { step: usize, transition: String },

    #[error("witness ends outside the forbidden states")]
    NotForbidden,
}

struct Layout {
    model: MemoryModel,
    np: usize,
    nl: usize,
}

impl Layout {
    fn new(program: &Program, model: MemoryModel) -> Self {
        Self {
            model,
            np: program.num_processes(),
            nl: program.num_locations(),
        }
    }

    fn buffer(&self, p: Pid, x: LocId) -> usize {
        match self.model {
            MemoryModel::Tso => p,
            _ => p * self.nl + x,
        }
    }

    fn copy(&self, p: Pid) -> usize {
        if self.model.has_propagation() {
            p
        } else {
            0
        }
    }

    fn queue(&self, q: Pid, x: LocId) -> usize {
        q * self.nl + x
    }
}

/// Every initial configuration: initial control, empty buffers, and each
/// location holding one of its initial values (the same in every copy).
pub fn initial_configurations(program: &Program, model: MemoryModel) -> Vec<Configuration> {
    let layout = Layout::new(program, model);
    let mut valuations: Vec<Vec<Value>> = vec![Vec::new()];
    for location in program.locations() {
        valuations = valuations
            .into_iter()
            .flat_map(|prefix| {
                location.init.iter().map(move |v| {
                    let mut next = prefix.clone();
                    next.push(v);
                    next
                })
            })
            .collect();
    }
    let copies = if model.has_propagation() { layout.np } else { 1 };
    let buffers = match model {
        MemoryModel::Tso => layout.np,
        _ => layout.np * layout.nl,
    };
    let queues = if model.has_propagation() {
        layout.np * layout.nl
    } else {
        0
    };
    valuations
        .into_iter()
        .map(|values| Configuration {
            control: program.initial_control(),
            memory: vec![values; copies],
            buffers: vec![VecDeque::new(); buffers],
            queues: vec![VecDeque::new(); queues],
        })
        .collect()
}

/// The value `p` sees at `x`.
fn view(program: &Program, layout: &Layout, c: &Configuration, p: Pid, x: LocId) -> Value {
    let memory = c.memory[layout.copy(p)][x];
    if program.is_local(x) {
        return memory;
    }
    let buffered = c.buffers[layout.buffer(p, x)]
        .iter()
        .rev()
        .find(|(l, _)| *l == x)
        .map(|(_, v)| *v);
    if let Some(v) = buffered {
        return v;
    }
    if layout.model.has_propagation() {
        let own = c.queues[layout.queue(p, x)]
            .iter()
            .rev()
            .find(|(w, _)| *w == p)
            .map(|(_, v)| *v);
        if let Some(v) = own {
            return v;
        }
    }
    memory
}

/// Whether `p` may run a locked write or CAS on `x`.
fn sync_ready(layout: &Layout, c: &Configuration, p: Pid, x: LocId) -> bool {
    match layout.model {
        MemoryModel::Tso => c.buffers[p].is_empty(),
        MemoryModel::Pso => c.buffers[layout.buffer(p, x)].is_empty(),
        MemoryModel::Nmca => {
            c.buffers[layout.buffer(p, x)].is_empty() && c.queues[layout.queue(p, x)].is_empty()
        }
    }
}

fn fence_ready(layout: &Layout, c: &Configuration, p: Pid) -> bool {
    match layout.model {
        MemoryModel::Tso => c.buffers[p].is_empty(),
        MemoryModel::Pso => (0..layout.nl).all(|x| c.buffers[layout.buffer(p, x)].is_empty()),
        MemoryModel::Nmca => (0..layout.nl).all(|x| {
            c.buffers[layout.buffer(p, x)].is_empty() && c.queues[layout.queue(p, x)].is_empty()
        }),
    }
}

/// Atomic write by `p` to memory; under NMCA also sent to every other process.
fn write_through(layout: &Layout, c: &mut Configuration, p: Pid, x: LocId, v: Value) {
    c.memory[layout.copy(p)][x] = v;
    if layout.model.has_propagation() {
        for q in (0..layout.np).filter(|q| *q != p) {
            c.queues[layout.queue(q, x)].push_back((p, v));
        }
    }
}

/// Commit the oldest buffered write of `p` to `x`.
fn serialise(layout: &Layout, c: &Configuration, p: Pid, x: LocId) -> Option<Configuration> {
    let b = layout.buffer(p, x);
    match c.buffers[b].front() {
        Some(&(l, v)) if l == x => {
            let mut next = c.clone();
            next.buffers[b].pop_front();
            if layout.model.has_propagation() {
                for q in 0..layout.np {
                    next.queues[layout.queue(q, x)].push_back((p, v));
                }
            } else {
                next.memory[0][x] = v;
            }
            Some(next)
        }
        _ => None,
    }
}

/// Every configuration `t` can lead to from `c` (empty if disabled).
pub fn step(
    program: &Program,
    model: MemoryModel,
    c: &Configuration,
    t: &Transition,
) -> Vec<Configuration> {
    let layout = Layout::new(program, model);
    let p = t.pid;
    if c.control[p] != t.source {
        return Vec::new();
    }
    let mut next = c.clone();
    next.control[p] = t.target;

    match t.stmt {
        Stmt::Nop => vec![next],
        Stmt::Write { loc, value } => {
            if program.is_local(loc) {
                next.memory[layout.copy(p)][loc] = value;
            } else {
                next.buffers[layout.buffer(p, loc)].push_back((loc, value));
            }
            vec![next]
        }
        Stmt::Read { loc, value } => {
            if view(program, &layout, c, p, loc) == value {
                vec![next]
            } else {
                Vec::new()
            }
        }
        Stmt::Fence => {
            if fence_ready(&layout, c, p) {
                vec![next]
            } else {
                Vec::new()
            }
        }
        Stmt::LockedWrite { loc, value } => {
            if !sync_ready(&layout, c, p, loc) {
                return Vec::new();
            }
            write_through(&layout, &mut next, p, loc, value);
            vec![next]
        }
        Stmt::Cas { loc, expected, new } => {
            if !sync_ready(&layout, c, p, loc) {
                return Vec::new();
            }
            if c.memory[layout.copy(p)][loc] == expected {
                write_through(&layout, &mut next, p, loc, new);
            }
            vec![next]
        }
        Stmt::Serialise { locs } => locs
            .iter()
            .filter_map(|x| serialise(&layout, c, p, x))
            .collect(),
        Stmt::Update { writer, locs } => {
            let mut out = Vec::new();
            for x in locs.iter() {
                let q = layout.queue(p, x);
                if let Some(&(w, v)) = c.queues.get(q).and_then(|queue| queue.front()) {
                    if w == writer {
                        let mut next = c.clone();
                        next.queues[q].pop_front();
                        next.memory[p][x] = v;
                        out.push(next);
                    }
                }
            }
            out
        }
    }
}

/// Every enabled step from `c`, with writes refused once a buffer holds
/// `bound` entries.
pub fn successors(
    program: &Program,
    model: MemoryModel,
    c: &Configuration,
    bound: usize,
) -> Vec<(Transition, Configuration)> {
    let layout = Layout::new(program, model);
    let mut out = Vec::new();
    for p in 0..layout.np {
        let state = c.control[p];
        for t in program.transitions_from(p, state) {
            if let Stmt::Write { loc, .. } = t.stmt {
                if !program.is_local(loc) && c.buffers[layout.buffer(p, loc)].len() >= bound {
                    continue;
                }
            }
            for next in step(program, model, c, t) {
                out.push((*t, next));
            }
        }
        for x in 0..layout.nl {
            let locs = match model {
                MemoryModel::Tso => program.writes_of(p),
                _ => LocSet::singleton(x),
            };
            if let Some(next) = serialise(&layout, c, p, x) {
                out.push((Transition::new(p, state, Stmt::Serialise { locs }, state), next));
            }
            if model.has_propagation() {
                if let Some(&(writer, _)) = c.queues[layout.queue(p, x)].front() {
                    let t = Transition::new(
                        p,
                        state,
                        Stmt::Update {
                            writer,
                            locs: LocSet::singleton(x),
                        },
                        state,
                    );
                    out.extend(step(program, model, c, &t).into_iter().map(|n| (t, n)));
                }
            }
        }
    }
    out
}

/// Apply every pending update a process can never observe: queues for
/// locations it neither reads nor compares. Witnesses leave those out.
fn settle(program: &Program, model: MemoryModel, mut c: Configuration) -> Configuration {
    if !model.has_propagation() {
        return c;
    }
    let layout = Layout::new(program, model);
    for q in 0..layout.np {
        let observed = program.reads_of(q);
        for x in (0..layout.nl).filter(|x| !observed.contains(*x)) {
            while let Some((_, v)) = c.queues[layout.queue(q, x)].pop_front() {
                c.memory[q][x] = v;
            }
        }
    }
    c
}

/// Configurations reachable from `start` by zero or more serialise and
/// update steps of `pid`.
fn commits_of(
    program: &Program,
    model: MemoryModel,
    start: &BTreeSet<Configuration>,
    pid: Pid,
) -> BTreeSet<Configuration> {
    let mut seen = start.clone();
    let mut work: Vec<Configuration> = start.iter().cloned().collect();
    while let Some(c) = work.pop() {
        for (t, next) in successors(program, model, &c, 0) {
            if t.pid != pid || !t.stmt.is_internal() {
                continue;
            }
            let next = settle(program, model, next);
            if seen.insert(next.clone()) {
                work.push(next);
            }
        }
    }
    seen
}

/// Re-execute a witness from every initial configuration at once and return
/// a forbidden configuration it reaches.
///
/// Program steps replay exactly. An internal step of process `p` stands for
/// any number of `p`'s commits, none included: the analysis folds runs of
/// commits into unconstrained memory into a single step.
pub fn replay(
    program: &Program,
    model: MemoryModel,
    witness: &Witness,
) -> Result<Configuration, ReplayError> {
    let mut current: BTreeSet<Configuration> =
        initial_configurations(program, model).into_iter().collect();
    for (i, t) in witness.transitions().enumerate() {
        let next: BTreeSet<Configuration> = if t.stmt.is_internal() {
            commits_of(program, model, &current, t.pid)
        } else {
            current
                .iter()
                .flat_map(|c| step(program, model, c, t))
                .map(|c| settle(program, model, c))
                .collect()
        };
        if next.is_empty() {
            return Err(ReplayError::Stuck {
                step: i + 1,
                transition: program.named(*t).to_string(),
            });
        }
        current = next;
    }
    current
        .into_iter()
        .find(|c| program.is_forbidden(&c.control))
        .ok_or(ReplayError::NotForbidden)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fencer_model::ProgramBuilder;

    fn store_load() -> Program {
        // P0: x := 1; read y = 0   P1: y := 1; read x = 0
        let mut b = ProgramBuilder::new();
        let x = b.location("x", 2, 0);
        let y = b.location("y", 2, 0);
        let (_, e0) = b.chain(
            "P0",
            &[Stmt::Write { loc: x, value: 1 }, Stmt::Read { loc: y, value: 0 }],
        );
        let (_, e1) = b.chain(
            "P1",
            &[Stmt::Write { loc: y, value: 1 }, Stmt::Read { loc: x, value: 0 }],
        );
        b.forbid(&[e0, e1]);
        b.build().unwrap()
    }

    #[test]
    fn test_buffered_write_is_invisible_to_others() {
        let program = store_load();
        for model in MemoryModel::ALL {
            let init = initial_configurations(&program, model).remove(0);
            let write_x = program.transitions_of(0)[0];
            let after = step(&program, model, &init, &write_x).remove(0);
            assert_eq!(view(&program, &Layout::new(&program, model), &after, 0, 0), 1);
            assert_eq!(view(&program, &Layout::new(&program, model), &after, 1, 0), 0);
        }
    }

    #[test]
    fn test_nmca_own_write_visible_before_update() {
        let program = store_load();
        let model = MemoryModel::Nmca;
        let layout = Layout::new(&program, model);
        let init = initial_configurations(&program, model).remove(0);
        let write_x = program.transitions_of(0)[0];
        let buffered = step(&program, model, &init, &write_x).remove(0);
        let committed = serialise(&layout, &buffered, 0, 0).unwrap();
        assert!(committed.buffers[layout.buffer(0, 0)].is_empty());
        // in flight to both processes
        assert_eq!(view(&program, &layout, &committed, 0, 0), 1);
        assert_eq!(view(&program, &layout, &committed, 1, 0), 0);
        let update = Transition::new(
            1,
            0,
            Stmt::Update {
                writer: 0,
                locs: LocSet::singleton(0),
            },
            0,
        );
        let seen = step(&program, model, &committed, &update).remove(0);
        assert_eq!(view(&program, &layout, &seen, 1, 0), 1);
    }

    #[test]
    fn test_fence_waits_for_buffer() {
        let mut b = ProgramBuilder::new();
        let x = b.location("x", 2, 0);
        let (_, end) = b.chain("P0", &[Stmt::Write { loc: x, value: 1 }, Stmt::Fence]);
        b.forbid(&[end]);
        let program = b.build().unwrap();
        for model in MemoryModel::ALL {
            let init = initial_configurations(&program, model).remove(0);
            let after = step(&program, model, &init, &program.transitions_of(0)[0]).remove(0);
            assert!(step(&program, model, &after, &program.transitions_of(0)[1]).is_empty());
        }
    }

    #[test]
    fn test_failed_cas_moves_on() {
        let mut b = ProgramBuilder::new();
        let x = b.location("x", 2, 1);
        let (_, end) = b.chain(
            "P0",
            &[Stmt::Cas {
                loc: x,
                expected: 0,
                new: 1,
            }],
        );
        b.forbid(&[end]);
        let program = b.build().unwrap();
        let init = initial_configurations(&program, MemoryModel::Tso).remove(0);
        let after = step(&program, MemoryModel::Tso, &init, &program.transitions_of(0)[0]);
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].control, vec![end]);
        assert_eq!(after[0].memory[0][x], 1);
    }
}
