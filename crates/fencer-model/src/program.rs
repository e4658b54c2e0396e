//! Validated, immutable programs.

use crate::error::{ModelError, ModelResult};
use crate::sets::{LocSet, ValueSet};
use crate::types::{InitSpec, LocationSpec, ProcessSpec, ProgramSpec, StmtSpec, TransitionSpec};
use crate::MAX_WIDTH;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Process identifier.
pub type Pid = usize;
/// Control state of one process's automaton.
pub type StateId = u32;
/// Memory location identifier.
pub type LocId = usize;
/// A value of a location's domain.
pub type Value = u32;

/// A statement labelling a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stmt {
    Nop,
    /// Plain write; buffered when the location is global.
    Write { loc: LocId, value: Value },
    /// Synchronized write: waits for the relevant buffers to drain.
    LockedWrite { loc: LocId, value: Value },
    /// Guard read: enabled when the process sees `value` at `loc`.
    Read { loc: LocId, value: Value },
    Fence,
    Cas {
        loc: LocId,
        expected: Value,
        new: Value,
    },
    /// Commit one pending write of the issuing process to one of `locs`.
    Serialise { locs: LocSet },
    /// The issuing process observes a serialised write of `writer`.
    Update { writer: Pid, locs: LocSet },
}

impl Stmt {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Stmt::Nop => "nop",
            Stmt::Write { .. } => "write",
            Stmt::LockedWrite { .. } => "locked write",
            Stmt::Read { .. } => "read",
            Stmt::Fence => "fence",
            Stmt::Cas { .. } => "cas",
            Stmt::Serialise { .. } => "serialise",
            Stmt::Update { .. } => "update",
        }
    }

    /// The single location a statement accesses, if any.
    pub fn loc(&self) -> Option<LocId> {
        match *self {
            Stmt::Write { loc, .. }
            | Stmt::LockedWrite { loc, .. }
            | Stmt::Read { loc, .. }
            | Stmt::Cas { loc, .. } => Some(loc),
            _ => None,
        }
    }

    /// Statements generated by the analysis rather than written by users.
    pub fn is_internal(&self) -> bool {
        matches!(self, Stmt::Serialise { .. } | Stmt::Update { .. })
    }

    fn values(&self) -> impl Iterator<Item = Value> {
        let (a, b) = match *self {
            Stmt::Write { value, .. }
            | Stmt::LockedWrite { value, .. }
            | Stmt::Read { value, .. } => (Some(value), None),
            Stmt::Cas { expected, new, .. } => (Some(expected), Some(new)),
            _ => (None, None),
        };
        a.into_iter().chain(b)
    }
}

/// A transition `(pid, stmt, source, target)`. Ordered by
/// `(pid, source, target, stmt)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Transition {
    pub pid: Pid,
    pub source: StateId,
    pub target: StateId,
    pub stmt: Stmt,
}

impl Transition {
    pub fn new(pid: Pid, source: StateId, stmt: Stmt, target: StateId) -> Self {
        Self {
            pid,
            source,
            target,
            stmt,
        }
    }
}

/// A memory location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub name: String,
    /// Domain size: values are `0..domain`.
    pub domain: u32,
    pub init: ValueSet,
    /// Owning process of a local location.
    pub owner: Option<Pid>,
}

impl Location {
    pub fn values(&self) -> ValueSet {
        ValueSet::below(self.domain as usize)
    }

    pub fn is_local(&self) -> bool {
        self.owner.is_some()
    }
}

/// A process: named control states and transitions between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub name: String,
    pub states: Vec<String>,
    pub initial: StateId,
    /// Sorted and deduplicated once part of a [`Program`].
    pub transitions: Vec<Transition>,
}

impl Process {
    pub fn state_count(&self) -> usize {
        self.states.len()
    }
}

/// A validated program. Immutable; transformations build new programs.
#[derive(Debug, Clone)]
pub struct Program {
    locations: Vec<Location>,
    processes: Vec<Process>,
    forbidden: Vec<Vec<Option<StateId>>>,
    by_target: Vec<Vec<Vec<Transition>>>,
    writes: Vec<LocSet>,
    reads: Vec<LocSet>,
    writable: Vec<Vec<ValueSet>>,
    plain: Vec<Vec<ValueSet>>,
}

impl PartialEq for Program {
    fn eq(&self, other: &Self) -> bool {
        self.locations == other.locations
            && self.processes == other.processes
            && self.forbidden == other.forbidden
    }
}

impl Eq for Program {}

impl Program {
    /// Validate the parts of a program and build its lookup tables.
    pub fn new(
        locations: Vec<Location>,
        mut processes: Vec<Process>,
        forbidden: Vec<Vec<Option<StateId>>>,
    ) -> ModelResult<Self> {
        if processes.is_empty() {
            return Err(ModelError::NoProcesses);
        }
        if locations.len() > MAX_WIDTH {
            return Err(ModelError::TooMany {
                what: "locations",
                count: locations.len(),
                limit: MAX_WIDTH,
            });
        }
        if processes.len() > MAX_WIDTH {
            return Err(ModelError::TooMany {
                what: "processes",
                count: processes.len(),
                limit: MAX_WIDTH,
            });
        }

        let mut names = BTreeSet::new();
        for loc in &locations {
            if !names.insert(loc.name.as_str()) {
                return Err(ModelError::Duplicate {
                    what: "location",
                    name: loc.name.clone(),
                });
            }
            if loc.domain == 0 || loc.domain as usize > MAX_WIDTH {
                return Err(ModelError::BadDomain {
                    location: loc.name.clone(),
                    domain: loc.domain,
                });
            }
            if loc.init.is_empty() {
                return Err(ModelError::EmptyInit {
                    location: loc.name.clone(),
                });
            }
            if let Some(value) = loc.init.difference(loc.values()).first() {
                return Err(ModelError::ValueOutOfDomain {
                    location: loc.name.clone(),
                    value,
                    domain: loc.domain,
                });
            }
            if let Some(owner) = loc.owner {
                if owner >= processes.len() {
                    return Err(ModelError::ProcessOutOfRange {
                        pid: owner,
                        count: processes.len(),
                    });
                }
            }
        }

        let mut names = BTreeSet::new();
        for (pid, process) in processes.iter_mut().enumerate() {
            if !names.insert(process.name.clone()) {
                return Err(ModelError::Duplicate {
                    what: "process",
                    name: process.name.clone(),
                });
            }
            validate_process(pid, process, &locations)?;
            process.transitions.sort();
            process.transitions.dedup();
        }

        if forbidden.is_empty() {
            return Err(ModelError::NoForbidden);
        }
        for vector in &forbidden {
            if vector.len() != processes.len() {
                return Err(ModelError::ForbiddenArity {
                    expected: processes.len(),
                    found: vector.len(),
                });
            }
            for (process, state) in processes.iter().zip(vector) {
                if let Some(s) = *state {
                    if s as usize >= process.states.len() {
                        return Err(ModelError::StateOutOfRange {
                            process: process.name.clone(),
                            state: s,
                            count: process.states.len(),
                        });
                    }
                }
            }
        }

        let nl = locations.len();
        let mut by_target = Vec::with_capacity(processes.len());
        let mut writes = Vec::with_capacity(processes.len());
        let mut reads = Vec::with_capacity(processes.len());
        let mut writable = Vec::with_capacity(processes.len());
        let mut plain = Vec::with_capacity(processes.len());
        for process in &processes {
            let mut into = vec![Vec::new(); process.states.len()];
            let mut w = LocSet::EMPTY;
            let mut r = LocSet::EMPTY;
            let mut all_values = vec![ValueSet::EMPTY; nl];
            let mut plain_values = vec![ValueSet::EMPTY; nl];
            for t in &process.transitions {
                into[t.target as usize].push(*t);
                let global = |loc: LocId| locations[loc].owner.is_none();
                match t.stmt {
                    Stmt::Write { loc, value } => {
                        all_values[loc].insert(value);
                        if global(loc) {
                            w.insert(loc);
                            plain_values[loc].insert(value);
                        }
                    }
                    Stmt::LockedWrite { loc, value } => all_values[loc].insert(value),
                    Stmt::Read { loc, .. } => {
                        if global(loc) {
                            r.insert(loc);
                        }
                    }
                    Stmt::Cas { loc, new, .. } => {
                        all_values[loc].insert(new);
                        r.insert(loc);
                    }
                    _ => {}
                }
            }
            by_target.push(into);
            writes.push(w);
            reads.push(r);
            writable.push(all_values);
            plain.push(plain_values);
        }

        Ok(Self {
            locations,
            processes,
            forbidden,
            by_target,
            writes,
            reads,
            writable,
            plain,
        })
    }

    /// Parse and validate a program from its JSON form.
    pub fn from_json(source: &str) -> ModelResult<Self> {
        let spec: ProgramSpec = serde_json::from_str(source)?;
        Self::from_spec(&spec)
    }

    /// Resolve names in a [`ProgramSpec`] and validate the result.
    pub fn from_spec(spec: &ProgramSpec) -> ModelResult<Self> {
        let process_ids: HashMap<&str, Pid> = spec
            .processes
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.as_str(), i))
            .collect();

        let mut locations = Vec::with_capacity(spec.locations.len());
        let mut loc_ids = HashMap::new();
        for (id, l) in spec.locations.iter().enumerate() {
            if loc_ids.insert(l.name.as_str(), id).is_some() {
                return Err(ModelError::Duplicate {
                    what: "location",
                    name: l.name.clone(),
                });
            }
            locations.push(resolve_location(l, &process_ids)?);
        }

        let mut processes = Vec::with_capacity(spec.processes.len());
        for (pid, p) in spec.processes.iter().enumerate() {
            processes.push(resolve_process(pid, p, &loc_ids, &process_ids)?);
        }

        let mut forbidden = Vec::with_capacity(spec.forbidden.len());
        for vector in &spec.forbidden {
            if vector.len() != processes.len() {
                return Err(ModelError::ForbiddenArity {
                    expected: processes.len(),
                    found: vector.len(),
                });
            }
            let mut resolved = Vec::with_capacity(vector.len());
            for (process, name) in processes.iter().zip(vector) {
                if name == "*" {
                    resolved.push(None);
                } else {
                    resolved.push(Some(state_index(process, name)?));
                }
            }
            forbidden.push(resolved);
        }

        Self::new(locations, processes, forbidden)
    }

    /// The JSON input form of this program.
    pub fn to_spec(&self) -> ProgramSpec {
        let locations = self
            .locations
            .iter()
            .map(|l| LocationSpec {
                name: l.name.clone(),
                domain: l.domain,
                init: if l.init.len() == 1 {
                    InitSpec::Value(l.init.first().unwrap_or(0))
                } else if l.init == l.values() {
                    InitSpec::Wildcard("*".to_string())
                } else {
                    InitSpec::Values(l.init.iter().collect())
                },
                owner: l.owner.map(|p| self.processes[p].name.clone()),
            })
            .collect();
        let processes = self
            .processes
            .iter()
            .map(|p| ProcessSpec {
                name: p.name.clone(),
                init: p.states[p.initial as usize].clone(),
                states: Some(p.states.clone()),
                transitions: p
                    .transitions
                    .iter()
                    .map(|t| TransitionSpec {
                        from: p.states[t.source as usize].clone(),
                        to: p.states[t.target as usize].clone(),
                        stmt: self.stmt_spec(&t.stmt),
                    })
                    .collect(),
            })
            .collect();
        let forbidden = self
            .forbidden
            .iter()
            .map(|v| {
                v.iter()
                    .zip(&self.processes)
                    .map(|(s, p)| match s {
                        Some(s) => p.states[*s as usize].clone(),
                        None => "*".to_string(),
                    })
                    .collect()
            })
            .collect();
        ProgramSpec {
            locations,
            processes,
            forbidden,
        }
    }

    pub fn to_json(&self) -> ModelResult<String> {
        Ok(serde_json::to_string_pretty(&self.to_spec())?)
    }

    fn stmt_spec(&self, stmt: &Stmt) -> StmtSpec {
        let name = |loc: LocId| self.locations[loc].name.clone();
        let names = |locs: LocSet| -> Vec<String> {
            locs.iter()
                .map(|l| self.locations[l].name.clone())
                .collect()
        };
        match *stmt {
            Stmt::Nop => StmtSpec::Nop,
            Stmt::Write { loc, value } => StmtSpec::Write {
                loc: name(loc),
                value,
            },
            Stmt::LockedWrite { loc, value } => StmtSpec::LockedWrite {
                loc: name(loc),
                value,
            },
            Stmt::Read { loc, value } => StmtSpec::Read {
                loc: name(loc),
                value,
            },
            Stmt::Fence => StmtSpec::Fence,
            Stmt::Cas { loc, expected, new } => StmtSpec::Cas {
                loc: name(loc),
                expected,
                new,
            },
            Stmt::Serialise { locs } => StmtSpec::Serialise { locs: names(locs) },
            Stmt::Update { writer, locs } => StmtSpec::Update {
                writer: self.processes[writer].name.clone(),
                locs: names(locs),
            },
        }
    }

    /// A program with the same locations and forbidden vectors but new processes.
    pub fn with_processes(&self, processes: Vec<Process>) -> ModelResult<Self> {
        Self::new(self.locations.clone(), processes, self.forbidden.clone())
    }

    pub fn num_processes(&self) -> usize {
        self.processes.len()
    }

    pub fn num_locations(&self) -> usize {
        self.locations.len()
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn location(&self, loc: LocId) -> &Location {
        &self.locations[loc]
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn process(&self, pid: Pid) -> &Process {
        &self.processes[pid]
    }

    pub fn is_local(&self, loc: LocId) -> bool {
        self.locations[loc].is_local()
    }

    /// All values of a location's domain.
    pub fn domain(&self, loc: LocId) -> ValueSet {
        self.locations[loc].values()
    }

    /// Every transition of every process, sorted.
    pub fn transitions(&self) -> impl Iterator<Item = &Transition> + '_ {
        self.processes.iter().flat_map(|p| p.transitions.iter())
    }

    pub fn transitions_of(&self, pid: Pid) -> &[Transition] {
        &self.processes[pid].transitions
    }

    /// Transitions of `pid` that end in `state`.
    pub fn transitions_into(&self, pid: Pid, state: StateId) -> &[Transition] {
        &self.by_target[pid][state as usize]
    }

    /// Transitions of `pid` that start in `state`.
    pub fn transitions_from(
        &self,
        pid: Pid,
        state: StateId,
    ) -> impl Iterator<Item = &Transition> + '_ {
        self.processes[pid]
            .transitions
            .iter()
            .filter(move |t| t.source == state)
    }

    pub fn initial_control(&self) -> Vec<StateId> {
        self.processes.iter().map(|p| p.initial).collect()
    }

    /// Forbidden vectors as written, `None` standing for any state.
    pub fn forbidden(&self) -> &[Vec<Option<StateId>>] {
        &self.forbidden
    }

    /// Every concrete control vector the forbidden patterns denote,
    /// sorted and deduplicated.
    pub fn forbidden_vectors(&self) -> Vec<Vec<StateId>> {
        let mut out = BTreeSet::new();
        for pattern in &self.forbidden {
            let mut partial: Vec<Vec<StateId>> = vec![Vec::new()];
            for (process, slot) in self.processes.iter().zip(pattern) {
                let choices: Vec<StateId> = match slot {
                    Some(s) => vec![*s],
                    None => (0..process.states.len() as StateId).collect(),
                };
                partial = partial
                    .into_iter()
                    .flat_map(|prefix| {
                        choices.iter().map(move |c| {
                            let mut v = prefix.clone();
                            v.push(*c);
                            v
                        })
                    })
                    .collect();
            }
            out.extend(partial);
        }
        out.into_iter().collect()
    }

    pub fn is_forbidden(&self, control: &[StateId]) -> bool {
        self.forbidden.iter().any(|pattern| {
            pattern
                .iter()
                .zip(control)
                .all(|(slot, s)| slot.map_or(true, |f| f == *s))
        })
    }

    /// Global locations `pid` writes with plain (buffered) writes.
    pub fn writes_of(&self, pid: Pid) -> LocSet {
        self.writes[pid]
    }

    /// Global locations `pid` reads or compares.
    pub fn reads_of(&self, pid: Pid) -> LocSet {
        self.reads[pid]
    }

    /// Values `pid` can write to `loc` by any kind of write.
    pub fn writable_values(&self, pid: Pid, loc: LocId) -> ValueSet {
        self.writable[pid][loc]
    }

    /// Values `pid` writes to global `loc` with plain writes.
    pub fn plain_values(&self, pid: Pid, loc: LocId) -> ValueSet {
        self.plain[pid][loc]
    }

    pub fn state_name(&self, pid: Pid, state: StateId) -> &str {
        &self.processes[pid].states[state as usize]
    }

    /// Render an id-based item with this program's names.
    pub fn named<T>(&self, item: T) -> Named<'_, T> {
        Named {
            program: self,
            item,
        }
    }

    fn fmt_locs(&self, f: &mut fmt::Formatter<'_>, locs: LocSet) -> fmt::Result {
        write!(f, "{{")?;
        for (i, l) in locs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", self.locations[l].name)?;
        }
        write!(f, "}}")
    }
}

fn validate_process(pid: Pid, process: &Process, locations: &[Location]) -> ModelResult<()> {
    if process.states.is_empty() {
        return Err(ModelError::NoStates {
            process: process.name.clone(),
        });
    }
    let mut names = BTreeSet::new();
    for s in &process.states {
        if !names.insert(s.as_str()) {
            return Err(ModelError::Duplicate {
                what: "state",
                name: format!("{}.{}", process.name, s),
            });
        }
    }
    let count = process.states.len();
    let in_range = |s: StateId| -> ModelResult<()> {
        if (s as usize) < count {
            Ok(())
        } else {
            Err(ModelError::StateOutOfRange {
                process: process.name.clone(),
                state: s,
                count,
            })
        }
    };
    in_range(process.initial)?;

    for t in &process.transitions {
        if t.pid != pid {
            return Err(ModelError::ProcessOutOfRange {
                pid: t.pid,
                count: pid + 1,
            });
        }
        in_range(t.source)?;
        in_range(t.target)?;
        if t.stmt.is_internal() {
            return Err(ModelError::InternalStatement {
                process: process.name.clone(),
                stmt: t.stmt.kind_name(),
            });
        }
        let Some(loc) = t.stmt.loc() else {
            continue;
        };
        let location = locations
            .get(loc)
            .ok_or(ModelError::LocationOutOfRange {
                loc,
                count: locations.len(),
            })?;
        for value in t.stmt.values() {
            if value >= location.domain {
                return Err(ModelError::ValueOutOfDomain {
                    location: location.name.clone(),
                    value,
                    domain: location.domain,
                });
            }
        }
        if let Some(owner) = location.owner {
            if owner != pid {
                return Err(ModelError::ForeignLocal {
                    process: process.name.clone(),
                    location: location.name.clone(),
                });
            }
            if matches!(t.stmt, Stmt::LockedWrite { .. } | Stmt::Cas { .. }) {
                return Err(ModelError::SyncOnLocal {
                    stmt: t.stmt.kind_name(),
                    location: location.name.clone(),
                });
            }
        }
    }
    Ok(())
}

fn resolve_location(l: &LocationSpec, process_ids: &HashMap<&str, Pid>) -> ModelResult<Location> {
    if l.domain == 0 || l.domain as usize > MAX_WIDTH {
        return Err(ModelError::BadDomain {
            location: l.name.clone(),
            domain: l.domain,
        });
    }
    let in_domain = |v: u32| -> ModelResult<u32> {
        if v < l.domain {
            Ok(v)
        } else {
            Err(ModelError::ValueOutOfDomain {
                location: l.name.clone(),
                value: v,
                domain: l.domain,
            })
        }
    };
    let init = match &l.init {
        InitSpec::Value(v) => ValueSet::singleton(in_domain(*v)?),
        InitSpec::Values(vs) => {
            let mut set = ValueSet::EMPTY;
            for v in vs {
                set.insert(in_domain(*v)?);
            }
            set
        }
        InitSpec::Wildcard(text) if text == "*" => ValueSet::below(l.domain as usize),
        InitSpec::Wildcard(text) => {
            return Err(ModelError::BadInit {
                location: l.name.clone(),
                text: text.clone(),
            })
        }
    };
    let owner = match &l.owner {
        Some(name) => Some(*process_ids.get(name.as_str()).ok_or_else(|| {
            ModelError::UnknownProcess { name: name.clone() }
        })?),
        None => None,
    };
    Ok(Location {
        name: l.name.clone(),
        domain: l.domain,
        init,
        owner,
    })
}

fn resolve_process(
    pid: Pid,
    p: &ProcessSpec,
    loc_ids: &HashMap<&str, LocId>,
    process_ids: &HashMap<&str, Pid>,
) -> ModelResult<Process> {
    let states = match &p.states {
        Some(states) => states.clone(),
        None => {
            let mut states = vec![p.init.clone()];
            for t in &p.transitions {
                for s in [&t.from, &t.to] {
                    if !states.contains(s) {
                        states.push(s.clone());
                    }
                }
            }
            states
        }
    };
    let mut process = Process {
        name: p.name.clone(),
        states,
        initial: 0,
        transitions: Vec::with_capacity(p.transitions.len()),
    };
    process.initial = state_index(&process, &p.init)?;

    let loc = |name: &str| -> ModelResult<LocId> {
        loc_ids
            .get(name)
            .copied()
            .ok_or_else(|| ModelError::UnknownLocation {
                name: name.to_string(),
            })
    };
    let locs = |names: &[String]| -> ModelResult<LocSet> {
        let mut set = LocSet::EMPTY;
        for n in names {
            set.insert(loc(n)?);
        }
        Ok(set)
    };

    for t in &p.transitions {
        let stmt = match &t.stmt {
            StmtSpec::Nop => Stmt::Nop,
            StmtSpec::Write { loc: l, value } => Stmt::Write {
                loc: loc(l)?,
                value: *value,
            },
            StmtSpec::LockedWrite { loc: l, value } => Stmt::LockedWrite {
                loc: loc(l)?,
                value: *value,
            },
            StmtSpec::Read { loc: l, value } => Stmt::Read {
                loc: loc(l)?,
                value: *value,
            },
            StmtSpec::Fence => Stmt::Fence,
            StmtSpec::Cas {
                loc: l,
                expected,
                new,
            } => Stmt::Cas {
                loc: loc(l)?,
                expected: *expected,
                new: *new,
            },
            StmtSpec::Serialise { locs: ls } => Stmt::Serialise { locs: locs(ls)? },
            StmtSpec::Update { writer, locs: ls } => Stmt::Update {
                writer: *process_ids
                    .get(writer.as_str())
                    .ok_or_else(|| ModelError::UnknownProcess {
                        name: writer.clone(),
                    })?,
                locs: locs(ls)?,
            },
        };
        let source = state_index(&process, &t.from)?;
        let target = state_index(&process, &t.to)?;
        process
            .transitions
            .push(Transition::new(pid, source, stmt, target));
    }
    Ok(process)
}

fn state_index(process: &Process, name: &str) -> ModelResult<StateId> {
    process
        .states
        .iter()
        .position(|s| s == name)
        .map(|i| i as StateId)
        .ok_or_else(|| ModelError::UnknownState {
            process: process.name.clone(),
            state: name.to_string(),
        })
}

/// An id-based item paired with the program that names it.
pub struct Named<'a, T> {
    program: &'a Program,
    item: T,
}

impl fmt::Display for Named<'_, Stmt> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.program;
        let name = |loc: LocId| p.locations[loc].name.as_str();
        match self.item {
            Stmt::Nop => write!(f, "nop"),
            Stmt::Write { loc, value } => write!(f, "write {} := {}", name(loc), value),
            Stmt::LockedWrite { loc, value } => {
                write!(f, "locked write {} := {}", name(loc), value)
            }
            Stmt::Read { loc, value } => write!(f, "read {} = {}", name(loc), value),
            Stmt::Fence => write!(f, "fence"),
            Stmt::Cas { loc, expected, new } => {
                write!(f, "cas({}, {}, {})", name(loc), expected, new)
            }
            Stmt::Serialise { locs } => {
                write!(f, "serialise ")?;
                p.fmt_locs(f, locs)
            }
            Stmt::Update { writer, locs } => {
                write!(f, "update({}, ", p.processes[writer].name)?;
                p.fmt_locs(f, locs)?;
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Named<'_, Transition> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.item;
        let p = self.program;
        write!(
            f,
            "{}: {} --{}--> {}",
            p.processes[t.pid].name,
            p.state_name(t.pid, t.source),
            p.named(t.stmt),
            p.state_name(t.pid, t.target)
        )
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "locations:")?;
        for l in &self.locations {
            write!(f, "  {} : 0..{} init {}", l.name, l.domain, l.init)?;
            match l.owner {
                Some(o) => writeln!(f, " (local to {})", self.processes[o].name)?,
                None => writeln!(f)?,
            }
        }
        for (pid, p) in self.processes.iter().enumerate() {
            writeln!(f, "process {} (init {}):", p.name, p.states[p.initial as usize])?;
            for t in &p.transitions {
                writeln!(
                    f,
                    "  {} --{}--> {}",
                    self.state_name(pid, t.source),
                    self.named(t.stmt),
                    self.state_name(pid, t.target)
                )?;
            }
        }
        writeln!(f, "forbidden:")?;
        for v in &self.forbidden {
            let names: Vec<&str> = v
                .iter()
                .enumerate()
                .map(|(pid, s)| match s {
                    Some(s) => self.state_name(pid, *s),
                    None => "*",
                })
                .collect();
            writeln!(f, "  {}", names.join(" "))?;
        }
        Ok(())
    }
}
