use fencer_mc::{
    initial_configurations, successors, Common, Constraint, Engine, EngineConfig, Verdict,
};
use fencer_model::{LocId, MemoryModel, Program, ProgramBuilder, Stmt, Transition, Value};
use proptest::prelude::*;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// One statement of a random straight-line process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Write(LocId, Value),
    Locked(LocId, Value),
    Read(LocId, Value),
    Fence,
    Cas(LocId, Value, Value),
}

impl Op {
    fn stmt(self) -> Stmt {
        match self {
            Op::Write(loc, value) => Stmt::Write { loc, value },
            Op::Locked(loc, value) => Stmt::LockedWrite { loc, value },
            Op::Read(loc, value) => Stmt::Read { loc, value },
            Op::Fence => Stmt::Fence,
            Op::Cas(loc, expected, new) => Stmt::Cas { loc, expected, new },
        }
    }
}

/// A small program: shared binary locations initialised to 0 and
/// straight-line processes; forbidden when every process has finished.
#[derive(Debug, Clone)]
pub struct RandomProgram {
    pub locations: usize,
    pub processes: Vec<Vec<Op>>,
}

impl RandomProgram {
    pub fn build(&self) -> Result<Program, String> {
        let mut b = ProgramBuilder::new();
        for l in 0..self.locations {
            b.location(&format!("x{}", l), 2, 0);
        }
        let mut ends = Vec::new();
        for (i, ops) in self.processes.iter().enumerate() {
            let stmts: Vec<Stmt> = ops.iter().map(|op| op.stmt()).collect();
            let (_, end) = b.chain(&format!("P{}", i), &stmts);
            ends.push(end);
        }
        b.forbid(&ends);
        b.build().map_err(|e| e.to_string())
    }
}

pub fn op_strategy(locations: usize) -> impl Strategy<Value = Op> {
    let loc = 0..locations;
    prop_oneof![
        3 => (loc.clone(), 0u32..2).prop_map(|(l, v)| Op::Write(l, v)),
        3 => (loc.clone(), 0u32..2).prop_map(|(l, v)| Op::Read(l, v)),
        1 => Just(Op::Fence),
        1 => (loc.clone(), 0u32..2).prop_map(|(l, v)| Op::Locked(l, v)),
        1 => (loc, 0u32..2, 0u32..2).prop_map(|(l, e, n)| Op::Cas(l, e, n)),
    ]
}

/// Two processes of one to three statements over one or two locations.
pub fn program_strategy() -> impl Strategy<Value = RandomProgram> {
    (1usize..=2)
        .prop_flat_map(|locations| {
            (
                Just(locations),
                prop::collection::vec(prop::collection::vec(op_strategy(locations), 1..=3), 2),
            )
        })
        .prop_map(|(locations, processes)| RandomProgram {
            locations,
            processes,
        })
}

pub fn common(program: &Program, model: MemoryModel) -> Common {
    Common::new(Arc::new(program.clone()), model)
}

pub fn check(program: &Program, model: MemoryModel, config: EngineConfig) -> Result<Verdict, String> {
    Engine::new(Arc::new(common(program, model)), config)
        .run()
        .map_err(|e| e.to_string())
}

/// Exhaustive forward search with at most `bound` entries per buffer.
/// Errors once more than `max_configs` configurations have been seen.
pub fn forward_reachable(
    program: &Program,
    model: MemoryModel,
    bound: usize,
    max_configs: usize,
) -> Result<bool, String> {
    let mut seen = HashSet::new();
    let mut work = VecDeque::new();
    for c in initial_configurations(program, model) {
        if seen.insert(c.clone()) {
            work.push_back(c);
        }
    }
    while let Some(c) = work.pop_front() {
        if program.is_forbidden(&c.control) {
            return Ok(true);
        }
        for (_, next) in successors(program, model, &c, bound) {
            if seen.insert(next.clone()) {
                if seen.len() > max_configs {
                    return Err(format!("more than {} configurations", max_configs));
                }
                work.push_back(next);
            }
        }
    }
    Ok(false)
}

/// Constraints reachable backwards from the bad states, breadth first, at
/// most `limit` of them.
pub fn backward_constraints(common: &Common, limit: usize) -> Result<Vec<Constraint>, String> {
    let mut out: Vec<Constraint> = Vec::new();
    let mut work: VecDeque<Constraint> = common.get_bad_states().into();
    while let Some(c) = work.pop_front() {
        if out.len() >= limit {
            break;
        }
        if out.iter().any(|o| c.entails(o)) {
            continue;
        }
        for t in c.partred(common) {
            work.extend(c.pre(common, &t).map_err(|e| e.to_string())?);
        }
        out.push(c);
    }
    Ok(out)
}

/// Every transition with a non-empty predecessor set is in `partred`.
pub fn check_partred(common: &Common, constraint: &Constraint) -> Result<(), String> {
    let suggested = constraint.partred(common);
    for t in common.universe() {
        let pres = constraint.pre_unpruned(common, &t).map_err(|e| e.to_string())?;
        if !pres.is_empty() && !suggested.contains(&t) {
            return Err(format!(
                "{} has predecessors but is not suggested for\n{}",
                common.program().named(t),
                constraint.describe(common)
            ));
        }
    }
    Ok(())
}

/// Walk a concrete run backwards from the bad states. At every step some
/// current constraint must suggest the transition and yield predecessors;
/// the walk must end in an initial constraint.
pub fn walk_backwards(common: &Common, run: &[Transition]) -> Result<(), String> {
    let program = common.program();
    let mut current = common.get_bad_states();
    for (i, t) in run.iter().enumerate().rev() {
        let mut next = Vec::new();
        let mut suggested = false;
        for c in &current {
            if !c.partred(common).contains(t) {
                continue;
            }
            suggested = true;
            next.extend(c.pre(common, t).map_err(|e| e.to_string())?);
        }
        if !suggested {
            return Err(format!("step {} ({}) not suggested", i + 1, program.named(*t)));
        }
        if next.is_empty() {
            return Err(format!("step {} ({}) has no predecessors", i + 1, program.named(*t)));
        }
        current = next;
    }
    if current.iter().any(|c| c.is_init_state(common)) {
        Ok(())
    } else {
        Err("walk does not end in an initial constraint".to_string())
    }
}
