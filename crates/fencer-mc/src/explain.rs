//! Vacuity checks applied to predecessor constraints.
//!
//! A constraint is vacuous when no concrete configuration satisfies it:
//! a tracked write carries a value its writer can never produce, a store
//! buffer holds a pattern the owning automaton cannot have produced since its
//! last flush, or (NMCA) more writes are pending than the writer can issue.

use crate::channel::Channel;
use crate::common::Common;
use crate::constraint::Constraint;
use fencer_model::{LocId, MemoryModel, Pid, StateId, Stmt};
use std::collections::VecDeque;

/// Whether `constraint` may denote some concrete configuration.
pub fn is_feasible(common: &Common, constraint: &Constraint) -> bool {
    values_feasible(common, constraint)
        && within_write_bounds(common, constraint)
        && buffers_explainable(common, constraint)
}

fn values_feasible(common: &Common, constraint: &Constraint) -> bool {
    constraint.channels().iter().enumerate().all(|(i, ch)| {
        ch.tracked()
            .iter()
            .all(|w| !w.values.intersect(common.label_values(i, w.label)).is_empty())
    })
}

/// Writes of `w` to `x` still pending for somebody never exceed what one
/// run of `w` can issue.
fn within_write_bounds(common: &Common, constraint: &Constraint) -> bool {
    if common.model() != MemoryModel::Nmca {
        return true;
    }
    let program = common.program();
    let channels = constraint.channels();
    for w in 0..program.num_processes() {
        for x in 0..program.num_locations() {
            let Some(bound) = common.max_writes(w, x) else {
                continue;
            };
            let buffered = channels[common.sb(w, x)].count(x);
            let queued = (0..program.num_processes())
                .map(|q| channels[common.queue(q, x)].count(w))
                .max()
                .unwrap_or(0);
            if buffered + queued > bound {
                return false;
            }
        }
    }
    true
}

fn buffers_explainable(common: &Common, constraint: &Constraint) -> bool {
    let program = common.program();
    let buffers = match common.model() {
        MemoryModel::Tso => program.num_processes(),
        MemoryModel::Pso | MemoryModel::Nmca => {
            program.num_processes() * program.num_locations()
        }
    };
    (0..buffers).all(|i| {
        let ch = &constraint.channels()[i];
        if ch.admits_empty() {
            return true;
        }
        let p = common.channel_owner(i);
        explainable(common, p, ch, common.buffer_location(i), constraint.control()[p])
    })
}

/// Statements after which a buffer is known to be empty.
fn flushes(model: MemoryModel, stmt: &Stmt, buffer: Option<LocId>) -> bool {
    match *stmt {
        Stmt::Fence => true,
        Stmt::LockedWrite { loc, .. } | Stmt::Cas { loc, .. } => {
            model == MemoryModel::Tso || Some(loc) == buffer
        }
        _ => false,
    }
}

/// Search the automaton of `p`, from any state, for a flush-free path ending
/// at `current` whose writes spell the channel: writes absorbed by gap `i`
/// keep the position, a write matching tracked write `i` advances past it.
fn explainable(
    common: &Common,
    p: Pid,
    channel: &Channel,
    buffer: Option<LocId>,
    current: StateId,
) -> bool {
    let program = common.program();
    let model = common.model();
    let gaps = channel.gaps();
    let tracked = channel.tracked();
    let k = tracked.len();
    let n = program.process(p).state_count();
    let index = |s: StateId, i: usize| s as usize * (k + 1) + i;

    let mut seen = vec![false; n * (k + 1)];
    let mut queue = VecDeque::with_capacity(n);
    for s in 0..n as StateId {
        seen[index(s, 0)] = true;
        queue.push_back((s, 0usize));
    }

    while let Some((s, i)) = queue.pop_front() {
        if s == current && i == k {
            return true;
        }
        for t in program.transitions_from(p, s) {
            if flushes(model, &t.stmt, buffer) {
                continue;
            }
            let mut next: [Option<usize>; 2] = [None, None];
            match t.stmt {
                Stmt::Write { loc, value }
                    if !program.is_local(loc) && buffer.map_or(true, |b| b == loc) =>
                {
                    if gaps[i].contains(loc) {
                        next[0] = Some(i);
                    }
                    if i < k && tracked[i].label == loc && tracked[i].values.contains(value) {
                        next[1] = Some(i + 1);
                    }
                }
                _ => next[0] = Some(i),
            }
            for j in next.into_iter().flatten() {
                let key = index(t.target, j);
                if !seen[key] {
                    seen[key] = true;
                    queue.push_back((t.target, j));
                }
            }
        }
    }
    false
}
