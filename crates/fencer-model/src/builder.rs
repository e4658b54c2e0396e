//! Programmatic construction of programs.

use crate::error::ModelResult;
use crate::program::{Location, LocId, Pid, Process, Program, StateId, Stmt, Transition, Value};
use crate::sets::ValueSet;

/// Builds a [`Program`] from ids rather than names. The first state added to a
/// process is its initial state unless [`ProgramBuilder::initial`] says otherwise.
#[derive(Debug, Default, Clone)]
pub struct ProgramBuilder {
    locations: Vec<Location>,
    processes: Vec<Process>,
    forbidden: Vec<Vec<Option<StateId>>>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A shared location with a single initial value.
    pub fn location(&mut self, name: &str, domain: u32, init: Value) -> LocId {
        self.push_location(name, domain, ValueSet::singleton(init), None)
    }

    /// A shared location whose initial value is any value of its domain.
    pub fn location_any(&mut self, name: &str, domain: u32) -> LocId {
        self.push_location(name, domain, ValueSet::below(domain as usize), None)
    }

    /// A location private to `owner`.
    pub fn local_location(&mut self, name: &str, domain: u32, init: Value, owner: Pid) -> LocId {
        self.push_location(name, domain, ValueSet::singleton(init), Some(owner))
    }

    fn push_location(
        &mut self,
        name: &str,
        domain: u32,
        init: ValueSet,
        owner: Option<Pid>,
    ) -> LocId {
        self.locations.push(Location {
            name: name.to_string(),
            domain,
            init,
            owner,
        });
        self.locations.len() - 1
    }

    pub fn process(&mut self, name: &str) -> Pid {
        self.processes.push(Process {
            name: name.to_string(),
            states: Vec::new(),
            initial: 0,
            transitions: Vec::new(),
        });
        self.processes.len() - 1
    }

    pub fn state(&mut self, pid: Pid, name: &str) -> StateId {
        let states = &mut self.processes[pid].states;
        states.push(name.to_string());
        (states.len() - 1) as StateId
    }

    pub fn initial(&mut self, pid: Pid, state: StateId) -> &mut Self {
        self.processes[pid].initial = state;
        self
    }

    pub fn transition(&mut self, pid: Pid, from: StateId, stmt: Stmt, to: StateId) -> &mut Self {
        self.processes[pid]
            .transitions
            .push(Transition::new(pid, from, stmt, to));
        self
    }

    /// A straight-line process `L0 -s0-> L1 -s1-> ... Ln`; returns its id and
    /// final state.
    pub fn chain(&mut self, name: &str, stmts: &[Stmt]) -> (Pid, StateId) {
        let pid = self.process(name);
        let mut current = self.state(pid, "L0");
        for (i, stmt) in stmts.iter().enumerate() {
            let next = self.state(pid, &format!("L{}", i + 1));
            self.transition(pid, current, *stmt, next);
            current = next;
        }
        (pid, current)
    }

    /// Forbid one concrete control vector.
    pub fn forbid(&mut self, vector: &[StateId]) -> &mut Self {
        self.forbidden.push(vector.iter().map(|s| Some(*s)).collect());
        self
    }

    /// Forbid a control pattern; `None` matches any state.
    pub fn forbid_pattern(&mut self, pattern: Vec<Option<StateId>>) -> &mut Self {
        self.forbidden.push(pattern);
        self
    }

    pub fn build(self) -> ModelResult<Program> {
        Program::new(self.locations, self.processes, self.forbidden)
    }
}
