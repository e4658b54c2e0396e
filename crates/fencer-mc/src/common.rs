//! Per-analysis context shared by every constraint.

use crate::channel::{Channel, Label, LabelSet};
use crate::constraint::Constraint;
use fencer_model::{LocId, LocSet, MemoryModel, Pid, Program, StateId, Stmt, Transition, ValueSet};
use smallvec::SmallVec;
use std::sync::Arc;

/// Program, memory model and the tables derived from them.
///
/// Channel layout:
/// - TSO: store buffer `p`;
/// - PSO: store buffer `p * nl + x`;
/// - NMCA: store buffer `p * nl + x`, then propagation queue
///   `np * nl + q * nl + x`.
///
/// Memory slots are one per location, except under NMCA where every process
/// holds a copy (`q * nl + x`).
#[derive(Debug)]
pub struct Common {
    program: Arc<Program>,
    model: MemoryModel,
    scopes: Vec<LabelSet>,
    /// `[q][w][x]`: values `w` can put in `q`'s queue for `x` (NMCA).
    queue_values: Vec<ValueSet>,
    /// `[w][x]`: most writes to `x` along any path of `w`, `None` if unbounded.
    max_writes: Vec<Option<usize>>,
    /// Internal statements each process can issue at any control state.
    internal: Vec<Vec<Stmt>>,
}

impl Common {
    pub fn new(program: Arc<Program>, model: MemoryModel) -> Self {
        let np = program.num_processes();
        let nl = program.num_locations();

        let mut queue_values = vec![ValueSet::EMPTY; np * np * nl];
        if model.has_propagation() {
            for q in 0..np {
                for w in 0..np {
                    for x in 0..nl {
                        queue_values[(q * np + w) * nl + x] = if q == w {
                            program.plain_values(q, x)
                        } else if program.is_local(x) {
                            ValueSet::EMPTY
                        } else {
                            program.writable_values(w, x)
                        };
                    }
                }
            }
        }

        let mut common = Self {
            max_writes: (0..np)
                .flat_map(|w| (0..nl).map(move |x| (w, x)))
                .map(|(w, x)| longest_write_path(&program, w, x))
                .collect(),
            internal: Vec::with_capacity(np),
            scopes: Vec::new(),
            queue_values,
            program,
            model,
        };
        common.scopes = (0..common.num_channels())
            .map(|i| common.compute_scope(i))
            .collect();
        common.internal = (0..np).map(|p| common.internal_stmts(p)).collect();
        common
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn model(&self) -> MemoryModel {
        self.model
    }

    fn np(&self) -> usize {
        self.program.num_processes()
    }

    fn nl(&self) -> usize {
        self.program.num_locations()
    }

    pub fn num_channels(&self) -> usize {
        match self.model {
            MemoryModel::Tso => self.np(),
            MemoryModel::Pso => self.np() * self.nl(),
            MemoryModel::Nmca => 2 * self.np() * self.nl(),
        }
    }

    pub fn num_memory_slots(&self) -> usize {
        if self.model.has_propagation() {
            self.np() * self.nl()
        } else {
            self.nl()
        }
    }

    /// Store buffer holding `p`'s pending writes to `x`.
    pub fn sb(&self, p: Pid, x: LocId) -> usize {
        match self.model {
            MemoryModel::Tso => p,
            MemoryModel::Pso | MemoryModel::Nmca => p * self.nl() + x,
        }
    }

    /// Propagation queue of serialised writes to `x` not yet seen by `q`.
    pub fn queue(&self, q: Pid, x: LocId) -> usize {
        debug_assert!(self.model.has_propagation());
        self.np() * self.nl() + q * self.nl() + x
    }

    fn is_queue(&self, channel: usize) -> bool {
        self.model.has_propagation() && channel >= self.np() * self.nl()
    }

    /// Memory slot `p` reads and writes for `x`.
    pub fn mem_slot(&self, p: Pid, x: LocId) -> usize {
        if self.model.has_propagation() {
            p * self.nl() + x
        } else {
            x
        }
    }

    /// Memory slots holding `x`: one per process under NMCA.
    pub fn slots_of(&self, x: LocId) -> impl Iterator<Item = usize> + '_ {
        let copies = if self.model.has_propagation() {
            self.np()
        } else {
            1
        };
        (0..copies).map(move |q| q * self.nl() + x)
    }

    /// Values a memory slot ranges over.
    pub fn slot_domain(&self, slot: usize) -> ValueSet {
        self.program.domain(slot % self.nl())
    }

    /// Memory slot that committing a `label` entry of `channel` overwrites.
    /// `None` for NMCA store buffers, which commit into queues.
    pub fn commit_slot(&self, channel: usize, label: Label) -> Option<usize> {
        match self.model {
            MemoryModel::Tso => Some(label),
            MemoryModel::Pso => Some(channel % self.nl()),
            MemoryModel::Nmca if self.is_queue(channel) => Some(channel - self.np() * self.nl()),
            MemoryModel::Nmca => None,
        }
    }

    /// Labels the process owning `channel` can ever put into it.
    pub fn scope(&self, channel: usize) -> LabelSet {
        self.scopes[channel]
    }

    fn compute_scope(&self, channel: usize) -> LabelSet {
        let (np, nl) = (self.np(), self.nl());
        match self.model {
            MemoryModel::Tso => self.program.writes_of(channel),
            MemoryModel::Pso | MemoryModel::Nmca if channel < np * nl => {
                let (p, x) = (channel / nl, channel % nl);
                if self.program.writes_of(p).contains(x) {
                    LabelSet::singleton(x)
                } else {
                    LabelSet::EMPTY
                }
            }
            _ => {
                let rest = channel - np * nl;
                let (q, x) = (rest / nl, rest % nl);
                if !self.program.reads_of(q).contains(x) {
                    // q never looks at x, so its queue can always be drained
                    return LabelSet::EMPTY;
                }
                (0..np)
                    .filter(|w| !self.queue_values(q, *w, x).is_empty())
                    .collect()
            }
        }
    }

    /// Values `w`'s writes can carry through `q`'s queue for `x`.
    pub fn queue_values(&self, q: Pid, w: Pid, x: LocId) -> ValueSet {
        self.queue_values[(q * self.np() + w) * self.nl() + x]
    }

    /// Values a tracked entry of `channel` with `label` can carry.
    pub fn label_values(&self, channel: usize, label: Label) -> ValueSet {
        let nl = self.nl();
        if self.is_queue(channel) {
            let rest = channel - self.np() * nl;
            self.queue_values(rest / nl, label, rest % nl)
        } else {
            let p = match self.model {
                MemoryModel::Tso => channel,
                _ => channel / nl,
            };
            self.program.plain_values(p, label)
        }
    }

    pub fn max_writes(&self, w: Pid, x: LocId) -> Option<usize> {
        self.max_writes[w * self.nl() + x]
    }

    /// Channels a process must have drained before a fence.
    pub fn own_channels(&self, p: Pid) -> SmallVec<[usize; 8]> {
        let nl = self.nl();
        match self.model {
            MemoryModel::Tso => SmallVec::from_elem(p, 1),
            MemoryModel::Pso => (0..nl).map(|x| self.sb(p, x)).collect(),
            MemoryModel::Nmca => (0..nl)
                .map(|x| self.sb(p, x))
                .chain((0..nl).map(|x| self.queue(p, x)))
                .collect(),
        }
    }

    /// Channels that must be drained before a locked write or CAS on `x`.
    pub fn sync_channels(&self, p: Pid, x: LocId) -> SmallVec<[usize; 2]> {
        match self.model {
            MemoryModel::Tso | MemoryModel::Pso => SmallVec::from_elem(self.sb(p, x), 1),
            MemoryModel::Nmca => SmallVec::from_slice(&[self.sb(p, x), self.queue(p, x)]),
        }
    }

    /// The store buffer's location under per-location buffering.
    pub fn buffer_location(&self, channel: usize) -> Option<LocId> {
        match self.model {
            MemoryModel::Tso => None,
            _ => Some(channel % self.nl()),
        }
    }

    /// Pid owning a store buffer or queue.
    pub fn channel_owner(&self, channel: usize) -> Pid {
        let nl = self.nl();
        match self.model {
            MemoryModel::Tso => channel,
            MemoryModel::Pso => channel / nl,
            MemoryModel::Nmca => (channel % (self.np() * nl)) / nl,
        }
    }

    fn internal_stmts(&self, p: Pid) -> Vec<Stmt> {
        let written = self.program.writes_of(p);
        let mut out = Vec::new();
        match self.model {
            MemoryModel::Tso => {
                if !written.is_empty() {
                    out.push(Stmt::Serialise { locs: written });
                }
            }
            MemoryModel::Pso | MemoryModel::Nmca => {
                out.extend(written.iter().map(|x| Stmt::Serialise {
                    locs: LocSet::singleton(x),
                }));
            }
        }
        if self.model.has_propagation() {
            for x in self.program.reads_of(p).iter() {
                for w in self.scope(self.queue(p, x)).iter() {
                    out.push(Stmt::Update {
                        writer: w,
                        locs: LocSet::singleton(x),
                    });
                }
            }
        }
        out
    }

    /// Internal transitions of `p` at `state`: they leave control unchanged.
    pub fn internal_at(&self, p: Pid, state: StateId) -> impl Iterator<Item = Transition> + '_ {
        self.internal[p]
            .iter()
            .map(move |stmt| Transition::new(p, state, *stmt, state))
    }

    /// Every transition the analysis can apply: program transitions plus the
    /// internal transitions at every control state.
    pub fn universe(&self) -> Vec<Transition> {
        let mut out: Vec<Transition> = self.program.transitions().copied().collect();
        for (p, process) in self.program.processes().iter().enumerate() {
            for s in 0..process.state_count() as StateId {
                out.extend(self.internal_at(p, s));
            }
        }
        out
    }

    /// One constraint per forbidden control vector, with unconstrained memory
    /// and channels that admit any pending sequence within scope.
    pub fn get_bad_states(&self) -> Vec<Constraint> {
        let memory: SmallVec<[ValueSet; 8]> = (0..self.num_memory_slots())
            .map(|slot| self.slot_domain(slot))
            .collect();
        let channels: Vec<Channel> = self.scopes.iter().map(|s| Channel::any(*s)).collect();
        self.program
            .forbidden_vectors()
            .into_iter()
            .map(|control| {
                Constraint::from_parts(control.into_iter().collect(), memory.clone(), channels.clone())
            })
            .collect()
    }

    /// Human-readable name of a channel.
    pub fn channel_name(&self, channel: usize) -> String {
        let nl = self.nl();
        let pname = |p: Pid| self.program.process(p).name.as_str();
        let lname = |x: LocId| self.program.location(x).name.as_str();
        match self.model {
            MemoryModel::Tso => format!("sb({})", pname(channel)),
            _ if self.is_queue(channel) => {
                let rest = channel - self.np() * nl;
                format!("in({},{})", pname(rest / nl), lname(rest % nl))
            }
            _ => format!("sb({},{})", pname(channel / nl), lname(channel % nl)),
        }
    }

    /// Human-readable name of a label of `channel`.
    pub fn label_name(&self, channel: usize, label: Label) -> String {
        if self.is_queue(channel) {
            self.program.process(label).name.clone()
        } else {
            self.program.location(label).name.clone()
        }
    }

    /// Human-readable name of a memory slot.
    pub fn slot_name(&self, slot: usize) -> String {
        let nl = self.nl();
        let x = &self.program.location(slot % nl).name;
        if self.model.has_propagation() {
            format!("{}.{}", self.program.process(slot / nl).name, x)
        } else {
            x.clone()
        }
    }
}

/// Longest path in `w`'s automaton counting transitions that write `x`.
/// `None` when a cycle contains such a write.
fn longest_write_path(program: &Program, w: Pid, x: LocId) -> Option<usize> {
    let process = program.process(w);
    let n = process.state_count();
    let weight = |stmt: &Stmt| -> usize {
        match stmt {
            Stmt::Write { loc, .. } | Stmt::LockedWrite { loc, .. } | Stmt::Cas { loc, .. }
                if *loc == x =>
            {
                1
            }
            _ => 0,
        }
    };
    let mut dist = vec![0usize; n];
    for _ in 0..=n {
        let mut changed = false;
        for t in &process.transitions {
            let candidate = dist[t.source as usize] + weight(&t.stmt);
            if candidate > dist[t.target as usize] {
                dist[t.target as usize] = candidate;
                changed = true;
            }
        }
        if !changed {
            return Some(dist.into_iter().max().unwrap_or(0));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use fencer_model::ProgramBuilder;

    fn message_passing() -> Program {
        let mut b = ProgramBuilder::new();
        let a = b.location("a", 2, 0);
        let f = b.location("b", 2, 0);
        let (_, e0) = b.chain(
            "P0",
            &[Stmt::Write { loc: a, value: 1 }, Stmt::Write { loc: f, value: 1 }],
        );
        let (_, e1) = b.chain(
            "P1",
            &[Stmt::Read { loc: f, value: 1 }, Stmt::Read { loc: a, value: 0 }],
        );
        b.forbid(&[e0, e1]);
        b.build().unwrap()
    }

    #[test]
    fn test_layout_per_model() {
        let program = Arc::new(message_passing());
        let tso = Common::new(program.clone(), MemoryModel::Tso);
        assert_eq!(tso.num_channels(), 2);
        assert_eq!(tso.scope(0), LabelSet::from_iter([0, 1]));
        assert!(tso.scope(1).is_empty());

        let pso = Common::new(program.clone(), MemoryModel::Pso);
        assert_eq!(pso.num_channels(), 4);
        assert_eq!(pso.scope(pso.sb(0, 1)), LabelSet::singleton(1));
        assert!(pso.scope(pso.sb(1, 0)).is_empty());

        let nmca = Common::new(program, MemoryModel::Nmca);
        assert_eq!(nmca.num_channels(), 8);
        assert_eq!(nmca.num_memory_slots(), 4);
        // P0 never reads, so its queues are dropped
        assert!(nmca.scope(nmca.queue(0, 0)).is_empty());
        assert_eq!(nmca.scope(nmca.queue(1, 0)), LabelSet::singleton(0));
        assert_eq!(nmca.channel_name(nmca.queue(1, 0)), "in(P1,a)");
    }

    #[test]
    fn test_internal_transitions() {
        let program = Arc::new(message_passing());
        let tso = Common::new(program.clone(), MemoryModel::Tso);
        assert_eq!(tso.internal_at(0, 1).count(), 1);
        assert_eq!(tso.internal_at(1, 1).count(), 0);

        let nmca = Common::new(program, MemoryModel::Nmca);
        let stmts: Vec<Stmt> = nmca.internal_at(1, 0).map(|t| t.stmt).collect();
        assert_eq!(
            stmts,
            vec![
                Stmt::Update {
                    writer: 0,
                    locs: LocSet::singleton(0)
                },
                Stmt::Update {
                    writer: 0,
                    locs: LocSet::singleton(1)
                },
            ]
        );
        assert_eq!(nmca.internal_at(0, 2).count(), 2);
    }

    #[test]
    fn test_write_bounds() {
        let mut b = ProgramBuilder::new();
        let x = b.location("x", 2, 0);
        let p = b.process("P0");
        let l0 = b.state(p, "L0");
        let l1 = b.state(p, "L1");
        let l2 = b.state(p, "L2");
        b.transition(p, l0, Stmt::Write { loc: x, value: 1 }, l1);
        b.transition(p, l1, Stmt::Write { loc: x, value: 0 }, l2);
        b.transition(p, l2, Stmt::Nop, l2);
        let q = b.process("P1");
        let m0 = b.state(q, "M0");
        let m1 = b.state(q, "M1");
        b.transition(q, m0, Stmt::Write { loc: x, value: 1 }, m1);
        b.transition(q, m1, Stmt::Read { loc: x, value: 0 }, m0);
        b.forbid(&[l2, m1]);
        let common = Common::new(Arc::new(b.build().unwrap()), MemoryModel::Nmca);
        assert_eq!(common.max_writes(0, x), Some(2));
        assert_eq!(common.max_writes(1, x), None);
    }

    #[test]
    fn test_bad_states() {
        let common = Common::new(Arc::new(message_passing()), MemoryModel::Pso);
        let bad = common.get_bad_states();
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].control(), &[2, 2]);
        assert!(bad[0].memory().iter().all(|m| *m == ValueSet::below(2)));
    }
}
