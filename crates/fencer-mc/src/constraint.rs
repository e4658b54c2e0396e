//! Constraints: symbolic sets of relaxed-memory configurations.

use crate::channel::{Channel, Label, View};
use crate::common::Common;
use crate::engine::{CheckError, CheckResult};
use crate::explain;
use fencer_model::{LocId, Pid, StateId, Stmt, Transition, Value, ValueSet};
use smallvec::SmallVec;
use std::fmt::Write as _;

/// A control vector, a value set per memory slot and a channel per store
/// buffer or propagation queue (layout given by [`Common`]).
///
/// Denotes every configuration whose control matches, whose memory values
/// lie in the slots' sets and whose pending sequences match the channels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constraint {
    control: SmallVec<[StateId; 4]>,
    memory: SmallVec<[ValueSet; 8]>,
    channels: Vec<Channel>,
}

impl Constraint {
    pub(crate) fn from_parts(
        control: SmallVec<[StateId; 4]>,
        memory: SmallVec<[ValueSet; 8]>,
        channels: Vec<Channel>,
    ) -> Self {
        Self {
            control,
            memory,
            channels,
        }
    }

    pub fn control(&self) -> &[StateId] {
        &self.control
    }

    pub fn memory(&self) -> &[ValueSet] {
        &self.memory
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// A copy with channel `i` replaced.
    pub fn with_channel(&self, i: usize, channel: Channel) -> Self {
        let mut c = self.clone();
        c.channels[i] = channel;
        c
    }

    /// Whether some channel still holds a tracked write.
    pub fn has_pending(&self) -> bool {
        self.channels.iter().any(|ch| !ch.admits_empty())
    }

    /// Whether the constraint contains an initial configuration.
    pub fn is_init_state(&self, common: &Common) -> bool {
        let program = common.program();
        if self.has_pending()
            || self
                .control
                .iter()
                .zip(program.processes())
                .any(|(s, p)| *s != p.initial)
        {
            return false;
        }
        (0..program.num_locations()).all(|x| {
            let common_values = common
                .slots_of(x)
                .fold(program.location(x).init, |acc, slot| {
                    acc.intersect(self.memory[slot])
                });
            !common_values.is_empty()
        })
    }

    /// Transitions that may have led into this constraint: for each process,
    /// the program transitions entering its current state and the internal
    /// transitions available there, minus those whose predecessor set is
    /// empty on a cheap inspection of memory and channels.
    pub fn partred(&self, common: &Common) -> Vec<Transition> {
        let program = common.program();
        let mut out = Vec::new();
        for (p, &state) in self.control.iter().enumerate() {
            out.extend(
                program
                    .transitions_into(p, state)
                    .iter()
                    .copied()
                    .chain(common.internal_at(p, state))
                    .filter(|t| self.may_precede(common, t)),
            );
        }
        out
    }

    /// False only when `raw_pre` of `t` is certainly empty.
    fn may_precede(&self, common: &Common, t: &Transition) -> bool {
        let p = t.pid;
        let program = common.program();
        let drained =
            |channels: &[usize]| channels.iter().all(|i| self.channels[*i].admits_empty());
        match t.stmt {
            Stmt::Write { loc, value } | Stmt::Read { loc, value } if program.is_local(loc) => {
                self.memory[common.mem_slot(p, loc)].contains(value)
            }
            Stmt::Write { loc, value } => self.channels[common.sb(p, loc)].may_end_with(loc, value),
            Stmt::Fence => drained(&common.own_channels(p)),
            Stmt::LockedWrite { loc, value } => {
                self.memory[common.mem_slot(p, loc)].contains(value)
                    && drained(&common.sync_channels(p, loc))
            }
            Stmt::Cas { loc, .. } => drained(&common.sync_channels(p, loc)),
            Stmt::Serialise { locs } if !common.model().has_propagation() => locs
                .intersect(program.writes_of(p))
                .iter()
                .any(|x| !self.memory[x].intersect(program.plain_values(p, x)).is_empty()),
            Stmt::Update { writer, locs } => {
                common.model().has_propagation()
                    && locs.intersect(program.reads_of(p)).iter().any(|x| {
                        !self.memory[common.mem_slot(p, x)]
                            .intersect(common.queue_values(p, writer, x))
                            .is_empty()
                    })
            }
            _ => true,
        }
    }

    /// Whether every configuration of `self` is a configuration of `other`.
    pub fn entails(&self, other: &Constraint) -> bool {
        self.control == other.control
            && self
                .memory
                .iter()
                .zip(&other.memory)
                .all(|(a, b)| a.is_subset(*b))
            && self
                .channels
                .iter()
                .zip(&other.channels)
                .all(|(a, b)| a.entails(b))
    }

    /// Non-vacuous predecessors of `self` under `t`.
    pub fn pre(&self, common: &Common, t: &Transition) -> CheckResult<Vec<Constraint>> {
        let mut out = self.pre_unpruned(common, t)?;
        out.retain(|c| explain::is_feasible(common, c));
        Ok(out)
    }

    /// Predecessors of `self` under `t`, without discarding vacuous ones.
    pub fn pre_unpruned(&self, common: &Common, t: &Transition) -> CheckResult<Vec<Constraint>> {
        let out = self.raw_pre(common, t);
        for c in &out {
            if let Err(problem) = c.check_consistent(common) {
                return Err(CheckError::InconsistentConstraint {
                    transition: common.program().named(*t).to_string(),
                    problem,
                    constraint: c.describe(common),
                });
            }
        }
        Ok(out)
    }

    fn raw_pre(&self, common: &Common, t: &Transition) -> Vec<Constraint> {
        let p = t.pid;
        if self.control[p] != t.target {
            return Vec::new();
        }
        let mut base = self.clone();
        base.control[p] = t.source;
        let program = common.program();

        match t.stmt {
            Stmt::Nop => vec![base],
            Stmt::Write { loc, value } if program.is_local(loc) => {
                let slot = common.mem_slot(p, loc);
                if !self.memory[slot].contains(value) {
                    return Vec::new();
                }
                base.memory[slot] = program.domain(loc);
                vec![base]
            }
            Stmt::Write { loc, value } => {
                let sb = common.sb(p, loc);
                self.channels[sb]
                    .append_pre(loc, value)
                    .into_iter()
                    .map(|ch| base.with_channel(sb, ch))
                    .collect()
            }
            Stmt::Read { loc, value } if program.is_local(loc) => {
                let slot = common.mem_slot(p, loc);
                read_memory(base, slot, value).into_iter().collect()
            }
            Stmt::Read { loc, value } => self.read_pre(common, base, p, loc, value),
            Stmt::Fence => {
                let own = common.own_channels(p);
                if !own.iter().all(|i| self.channels[*i].admits_empty()) {
                    return Vec::new();
                }
                for i in own {
                    base.channels[i] = Channel::empty();
                }
                vec![base]
            }
            Stmt::LockedWrite { loc, value } => {
                let slot = common.mem_slot(p, loc);
                if !self.memory[slot].contains(value) {
                    return Vec::new();
                }
                let Some(mut base) = self.drain_sync(common, base, p, loc) else {
                    return Vec::new();
                };
                base.memory[slot] = program.domain(loc);
                propagate_pre(common, base, p, loc, value)
            }
            Stmt::Cas { loc, expected, new } => {
                let slot = common.mem_slot(p, loc);
                let Some(base) = self.drain_sync(common, base, p, loc) else {
                    return Vec::new();
                };
                let seen = self.memory[slot];
                let mut out = Vec::new();
                if seen.contains(new) {
                    let mut success = base.clone();
                    success.memory[slot] = ValueSet::singleton(expected);
                    out.extend(propagate_pre(common, success, p, loc, new));
                }
                let other = seen.without(expected);
                if !other.is_empty() {
                    let mut failure = base;
                    failure.memory[slot] = other;
                    out.push(failure);
                }
                out
            }
            Stmt::Serialise { locs } => {
                let mut out = Vec::new();
                for x in locs.intersect(program.writes_of(p)).iter() {
                    if common.model().has_propagation() {
                        out.extend(self.propagation_unserialise(common, &base, p, x));
                    } else {
                        let values = self.memory[x].intersect(program.plain_values(p, x));
                        if values.is_empty() {
                            continue;
                        }
                        let sb = common.sb(p, x);
                        let mut c = base.with_channel(sb, self.uncommit(common, sb, x, values));
                        c.memory[x] = program.domain(x);
                        out.push(c);
                    }
                }
                out
            }
            Stmt::Update { writer, locs } => {
                if !common.model().has_propagation() {
                    return Vec::new();
                }
                let mut out = Vec::new();
                for x in locs.intersect(program.reads_of(p)).iter() {
                    let slot = common.mem_slot(p, x);
                    let values = self.memory[slot].intersect(common.queue_values(p, writer, x));
                    if values.is_empty() {
                        continue;
                    }
                    let q = common.queue(p, x);
                    let mut c = base.with_channel(q, self.uncommit(common, q, writer, values));
                    c.memory[slot] = program.domain(x);
                    out.push(c);
                }
                out
            }
        }
    }

    /// Case split for `p` reading `value` from global `x`: its own pending
    /// write, (NMCA) its own write still travelling through its queue, or
    /// its view of memory.
    fn read_pre(
        &self,
        common: &Common,
        base: Constraint,
        p: Pid,
        x: LocId,
        value: Value,
    ) -> Vec<Constraint> {
        let wanted = ValueSet::singleton(value);
        let sb = common.sb(p, x);
        let slot = common.mem_slot(p, x);
        let mut out = Vec::new();
        for view in self.channels[sb].view_pre(x, wanted) {
            match view {
                View::Pending(ch) => out.push(base.with_channel(sb, ch)),
                View::Behind(ch) if common.model().has_propagation() => {
                    let q = common.queue(p, x);
                    let below = base.with_channel(sb, ch);
                    for view in below.channels[q].view_pre(p, wanted) {
                        match view {
                            View::Pending(ch) => out.push(below.with_channel(q, ch)),
                            View::Behind(ch) => {
                                out.extend(read_memory(below.with_channel(q, ch), slot, value))
                            }
                        }
                    }
                }
                View::Behind(ch) => out.extend(read_memory(base.with_channel(sb, ch), slot, value)),
            }
        }
        out
    }

    /// Undo committing the oldest entry of channel `i`. When every memory
    /// slot that `label` and the head gap commit into is unconstrained, any
    /// run of such entries commits back into `self`, so the entry joins the
    /// head gap instead of being tracked.
    fn uncommit(&self, common: &Common, i: usize, label: Label, values: ValueSet) -> Channel {
        let channel = &self.channels[i];
        let free = |l: Label| {
            common
                .commit_slot(i, l)
                .map_or(false, |slot| self.memory[slot] == common.slot_domain(slot))
        };
        if free(label) && channel.gaps()[0].iter().all(free) {
            channel.absorb_head(label)
        } else {
            channel.uncommit_head(label, values)
        }
    }

    /// Require the channels a locked write or CAS waits for to be empty.
    fn drain_sync(
        &self,
        common: &Common,
        mut base: Constraint,
        p: Pid,
        x: LocId,
    ) -> Option<Constraint> {
        let sync = common.sync_channels(p, x);
        if !sync.iter().all(|i| self.channels[*i].admits_empty()) {
            return None;
        }
        for i in sync {
            base.channels[i] = Channel::empty();
        }
        Some(base)
    }

    /// NMCA: undo `p` serialising its oldest write to `x`, which appended the
    /// write to the queue of every process that reads `x`.
    fn propagation_unserialise(
        &self,
        common: &Common,
        base: &Constraint,
        p: Pid,
        x: LocId,
    ) -> Vec<Constraint> {
        let program = common.program();
        // (constraint, values the write may carry, whether a queue tracked it)
        let mut partial = vec![(base.clone(), program.plain_values(p, x), false)];
        for q in 0..program.num_processes() {
            if !program.reads_of(q).contains(x) {
                continue;
            }
            let qi = common.queue(q, x);
            let mut next = Vec::new();
            for (c, values, tracked) in partial {
                for (ch, required) in c.channels[qi].pop_tail(p) {
                    let values = required.map_or(values, |r| values.intersect(r));
                    if !values.is_empty() {
                        next.push((c.with_channel(qi, ch), values, tracked || required.is_some()));
                    }
                }
            }
            partial = next;
        }
        let sb = common.sb(p, x);
        partial
            .into_iter()
            .map(|(c, values, tracked)| {
                // untracked everywhere: every queue's last gap takes any number
                // of further serialised writes
                let ch = if tracked {
                    c.channels[sb].uncommit_head(x, values)
                } else {
                    c.channels[sb].absorb_head(x)
                };
                c.with_channel(sb, ch)
            })
            .collect()
    }

    /// Validate shape and scope; a failure means the analysis is broken.
    pub fn check_consistent(&self, common: &Common) -> Result<(), String> {
        let program = common.program();
        if self.control.len() != program.num_processes() {
            return Err(format!(
                "control vector has {} entries, expected {}",
                self.control.len(),
                program.num_processes()
            ));
        }
        for (p, s) in self.control.iter().enumerate() {
            if *s as usize >= program.process(p).state_count() {
                return Err(format!("state {} out of range for process {}", s, p));
            }
        }
        if self.memory.len() != common.num_memory_slots() {
            return Err("memory slot count mismatch".to_string());
        }
        if let Some(slot) = self.memory.iter().position(|m| m.is_empty()) {
            return Err(format!("memory slot {} is empty", common.slot_name(slot)));
        }
        if self.channels.len() != common.num_channels() {
            return Err("channel count mismatch".to_string());
        }
        for (i, ch) in self.channels.iter().enumerate() {
            if !ch.is_consistent(common.scope(i)) {
                return Err(format!("channel {} violates its scope", common.channel_name(i)));
            }
        }
        Ok(())
    }

    /// Multi-line rendering with the program's names.
    pub fn describe(&self, common: &Common) -> String {
        let program = common.program();
        let mut out = String::new();
        let control: Vec<String> = self
            .control
            .iter()
            .enumerate()
            .map(|(p, s)| {
                format!(
                    "{}@{}",
                    program.process(p).name,
                    program.state_name(p, *s)
                )
            })
            .collect();
        let _ = writeln!(out, "control: {}", control.join(" "));
        let memory: Vec<String> = self
            .memory
            .iter()
            .enumerate()
            .map(|(slot, vs)| format!("{}={}", common.slot_name(slot), vs))
            .collect();
        let _ = write!(out, "memory: {}", memory.join(" "));
        for (i, ch) in self.channels.iter().enumerate() {
            if common.scope(i).is_empty() {
                continue;
            }
            let rendered = ch.render(&|l| common.label_name(i, l));
            let _ = write!(out, "\n{}: {}", common.channel_name(i), rendered);
        }
        out
    }
}

/// Memory must hold `value`; before the read it held exactly that.
fn read_memory(mut c: Constraint, slot: usize, value: Value) -> Option<Constraint> {
    if !c.memory[slot].contains(value) {
        return None;
    }
    c.memory[slot] = ValueSet::singleton(value);
    Some(c)
}

/// NMCA: a locked write or successful CAS by `p` appended `value` to the
/// queue of every other process that reads `x`. Identity otherwise.
fn propagate_pre(
    common: &Common,
    base: Constraint,
    p: Pid,
    x: LocId,
    value: Value,
) -> Vec<Constraint> {
    if !common.model().has_propagation() {
        return vec![base];
    }
    let program = common.program();
    let mut partial = vec![base];
    for q in 0..program.num_processes() {
        if q == p || !program.reads_of(q).contains(x) {
            continue;
        }
        let qi = common.queue(q, x);
        let mut next = Vec::new();
        for c in &partial {
            for ch in c.channels[qi].append_pre(p, value) {
                next.push(c.with_channel(qi, ch));
            }
        }
        partial = next;
    }
    partial
}

#[cfg(test)]
mod tests {
    use super::*;
    use fencer_model::{MemoryModel, Program, ProgramBuilder};
    use std::sync::Arc;

    fn single_cas() -> Program {
        let mut b = ProgramBuilder::new();
        let x = b.location("x", 3, 0);
        let (_, end) = b.chain(
            "P0",
            &[Stmt::Cas {
                loc: x,
                expected: 0,
                new: 1,
            }],
        );
        b.forbid(&[end]);
        b.build().unwrap()
    }

    #[test]
    fn test_cas_branches_are_exclusive() {
        let common = Common::new(Arc::new(single_cas()), MemoryModel::Tso);
        let bad = common.get_bad_states().remove(0);
        let t = common.program().transitions_of(0)[0];
        for bits in 1u64..8 {
            let seen = ValueSet::from_bits(bits);
            let mut c = bad.clone();
            c.memory[0] = seen;
            let pres = c.pre_unpruned(&common, &t).unwrap();
            let success = pres.iter().any(|d| d.memory[0] == ValueSet::singleton(0));
            let failure = pres.iter().find(|d| d.memory[0] != ValueSet::singleton(0));
            assert_eq!(success, seen.contains(1), "success branch for {}", seen);
            match failure {
                Some(d) => assert_eq!(d.memory[0], seen.without(0)),
                None => assert!(seen.without(0).is_empty()),
            }
            // the two branches never overlap
            for d in &pres {
                assert!(d.memory[0] == ValueSet::singleton(0) || !d.memory[0].contains(0));
            }
        }
    }

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
    fn test_read_splits_on_pending_write() {
        let common = Common::new(Arc::new(message_passing()), MemoryModel::Tso);
        let bad = common.get_bad_states().remove(0);
        let read_a = common.program().transitions_of(1)[1];
        let pres = bad.pre(&common, &read_a).unwrap();
        // P1 has no pending writes to a, so it read memory
        assert_eq!(pres.len(), 1);
        assert_eq!(pres[0].memory()[0], ValueSet::singleton(0));
        assert_eq!(pres[0].control(), &[2, 1]);
    }

    #[test]
    fn test_write_pre_removes_tracked_write() {
        let common = Common::new(Arc::new(message_passing()), MemoryModel::Pso);
        let mut bad = common.get_bad_states().remove(0);
        // P1 has read b = 1
        bad.memory[1] = ValueSet::singleton(1);
        let serialise_b = Transition::new(
            0,
            2,
            Stmt::Serialise {
                locs: fencer_model::LocSet::singleton(1),
            },
            2,
        );
        let pres = bad.pre(&common, &serialise_b).unwrap();
        assert_eq!(pres.len(), 1);
        let pending = &pres[0];
        assert!(!pending.channels()[common.sb(0, 1)].admits_empty());

        let write_b = common.program().transitions_of(0)[1];
        let before = pending.pre(&common, &write_b).unwrap();
        assert_eq!(before.len(), 1);
        assert!(before[0].channels()[common.sb(0, 1)].admits_empty());
        assert_eq!(before[0].control(), &[1, 2]);
    }

    #[test]
    fn test_unconstrained_serialise_joins_head_gap() {
        let common = Common::new(Arc::new(message_passing()), MemoryModel::Tso);
        let bad = common.get_bad_states().remove(0);
        let empty = bad.with_channel(0, Channel::empty());
        let serialise = common.internal_at(0, 2).next().unwrap();
        let head_gap = |c: &Constraint| c.channels()[0].gaps()[0];

        // memory of a and b unconstrained: any number of commits folds away
        let pres = empty.pre_unpruned(&common, &serialise).unwrap();
        assert_eq!(pres.len(), 2);
        assert!(pres.iter().all(|c| c.channels()[0].admits_empty()));
        assert_eq!(head_gap(&pres[0]), fencer_model::LocSet::singleton(0));
        assert_eq!(head_gap(&pres[1]), fencer_model::LocSet::singleton(1));
        // folding again is a fixpoint
        let again = pres[0].pre_unpruned(&common, &serialise).unwrap();
        assert!(again.iter().any(|c| c.entails(&pres[0])));

        // a read pins b: that commit stays tracked
        let mut pinned = empty.clone();
        pinned.memory[1] = ValueSet::singleton(1);
        let pres = pinned.pre_unpruned(&common, &serialise).unwrap();
        let tracked: Vec<_> = pres
            .iter()
            .filter(|c| !c.channels()[0].admits_empty())
            .collect();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].channels()[0].tracked()[0].label, 1);
    }

    #[test]
    fn test_inconsistent_predecessor_aborts() {
        let common = Common::new(Arc::new(message_passing()), MemoryModel::Pso);
        let bad = common.get_bad_states().remove(0);
        // P1 never writes b, so its buffer for b cannot hold anything
        let broken = bad.with_channel(
            common.sb(1, 1),
            Channel::any(fencer_model::LocSet::singleton(1)),
        );
        let read_a = common.program().transitions_of(1)[1];
        match broken.pre(&common, &read_a) {
            Err(CheckError::InconsistentConstraint { problem, transition, .. }) => {
                assert!(problem.contains("sb(P1,b)"), "{}", problem);
                assert!(transition.contains("read a = 0"), "{}", transition);
            }
            other => panic!("expected InconsistentConstraint, got {:?}", other),
        }
    }

    #[test]
    fn test_fence_requires_empty_buffers() {
        let mut b = ProgramBuilder::new();
        let a = b.location("a", 2, 0);
        let (_, end) = b.chain("P0", &[Stmt::Write { loc: a, value: 1 }, Stmt::Fence]);
        b.forbid(&[end]);
        let common = Common::new(Arc::new(b.build().unwrap()), MemoryModel::Tso);
        let bad = common.get_bad_states().remove(0);
        let fence = common.program().transitions_of(0)[1];
        let pres = bad.pre(&common, &fence).unwrap();
        assert_eq!(pres.len(), 1);
        assert_eq!(pres[0].channels()[0], Channel::empty());

        let pending = pres[0].with_channel(
            0,
            Channel::empty().uncommit_head(a, ValueSet::singleton(1)),
        );
        let mut at_end = pending.clone();
        at_end.control[0] = end;
        assert!(at_end.pre_unpruned(&common, &fence).unwrap().is_empty());
    }

    #[test]
    fn test_entailment_is_reflexive_and_respects_memory() {
        let common = Common::new(Arc::new(message_passing()), MemoryModel::Nmca);
        let bad = common.get_bad_states().remove(0);
        assert!(bad.entails(&bad));
        let mut narrow = bad.clone();
        narrow.memory[0] = ValueSet::singleton(1);
        assert!(narrow.entails(&bad));
        assert!(!bad.entails(&narrow));
        assert!(bad.describe(&common).contains("in(P1,a)"));
    }
}
