//! Synchronization candidates: single strengthening rewrites of a program.
//!
//! A candidate targets one transition of the original program. Applying it
//! to a program derived from the original goes through a [`Correspondence`]
//! that maps every original transition to its current image, so candidates
//! compose in any order.

use crate::error::{SyncError, SyncResult};
use fencer_model::{Process, Program, StateId, Stmt, Transition};
use std::collections::BTreeMap;
use std::fmt;

/// Prefix of padding states created when a fresh state id is taken out of
/// order. They have no transitions.
const PADDING: &str = "~";

/// Kind of strengthening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SyncKind {
    /// Insert a fence right after the target, through a fresh control state.
    Fence,
    /// Replace a plain write with a locked write.
    LockedWrite,
}

impl SyncKind {
    pub const ALL: [SyncKind; 2] = [SyncKind::Fence, SyncKind::LockedWrite];
}

impl fmt::Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncKind::Fence => write!(f, "fence"),
            SyncKind::LockedWrite => write!(f, "locked"),
        }
    }
}

/// Map from each transition of the original program to its image in a
/// derived program. Merged eagerly: lookups never chain.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Correspondence {
    images: BTreeMap<Transition, Transition>,
}

impl Correspondence {
    pub fn identity(program: &Program) -> Self {
        Self {
            images: program.transitions().map(|t| (*t, *t)).collect(),
        }
    }

    pub fn image(&self, original: &Transition) -> Option<&Transition> {
        self.images.get(original)
    }

    /// Original transitions whose image differs from themselves.
    pub fn changed(&self) -> impl Iterator<Item = (&Transition, &Transition)> + '_ {
        self.images.iter().filter(|(from, to)| from != to)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Transition, &Transition)> + '_ {
        self.images.iter()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// One strengthening of one transition of the original program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncCandidate {
    pub kind: SyncKind,
    pub target: Transition,
    /// Control state a fence goes through. Fixed at enumeration time.
    pub fresh: Option<StateId>,
}

fn shared_plain_write(program: &Program, t: &Transition) -> bool {
    matches!(t.stmt, Stmt::Write { loc, .. } if !program.is_local(loc))
}

fn shared_plain_access(program: &Program, t: &Transition) -> bool {
    match t.stmt {
        Stmt::Write { loc, .. } | Stmt::Read { loc, .. } => !program.is_local(loc),
        _ => false,
    }
}

/// Whether a fence after `t` can change anything: something follows `t`
/// and not everything that follows is already a fence.
fn fence_useful(program: &Program, t: &Transition) -> bool {
    let mut next = program.transitions_from(t.pid, t.target).peekable();
    next.peek().is_some() && !next.all(|n| matches!(n.stmt, Stmt::Fence))
}

/// Every candidate of the given kinds for `program`, in a stable order.
///
/// Fence candidates after the `k`-th eligible transition of a process get the
/// fresh state `state_count + k`.
pub fn get_all_possible(program: &Program, kinds: &[SyncKind]) -> Vec<SyncCandidate> {
    let fences = kinds.contains(&SyncKind::Fence);
    let locks = kinds.contains(&SyncKind::LockedWrite);
    let mut out = Vec::new();
    for (pid, process) in program.processes().iter().enumerate() {
        let base = process.state_count() as StateId;
        let mut ordinal: StateId = 0;
        for t in program.transitions_of(pid) {
            if shared_plain_access(program, t) && fence_useful(program, t) {
                if fences {
                    out.push(SyncCandidate {
                        kind: SyncKind::Fence,
                        target: *t,
                        fresh: Some(base + ordinal),
                    });
                }
                ordinal += 1;
            }
            if locks && shared_plain_write(program, t) {
                out.push(SyncCandidate {
                    kind: SyncKind::LockedWrite,
                    target: *t,
                    fresh: None,
                });
            }
        }
    }
    out
}

impl SyncCandidate {
    /// Apply this candidate to `program`, which was derived from the original
    /// through `prior`. Returns the new program and the merged map.
    pub fn insert(
        &self,
        program: &Program,
        prior: &Correspondence,
    ) -> SyncResult<(Program, Correspondence)> {
        let image = *prior
            .image(&self.target)
            .ok_or_else(|| SyncError::UnknownTarget {
                transition: format!("{:?}", self.target),
            })?;
        let pid = image.pid;
        if program.transitions_of(pid).binary_search(&image).is_err() {
            return Err(SyncError::StaleImage {
                transition: program.named(image).to_string(),
            });
        }

        let mut processes: Vec<Process> = program.processes().to_vec();
        let process = &mut processes[pid];
        process.transitions.retain(|t| *t != image);

        let rewritten = match (self.kind, self.fresh) {
            (SyncKind::LockedWrite, _) => {
                let Stmt::Write { loc, value } = image.stmt else {
                    return Err(SyncError::NotAPlainWrite {
                        transition: program.named(image).to_string(),
                    });
                };
                if program.is_local(loc) {
                    return Err(SyncError::NotAPlainWrite {
                        transition: program.named(image).to_string(),
                    });
                }
                let locked = Transition::new(
                    pid,
                    image.source,
                    Stmt::LockedWrite { loc, value },
                    image.target,
                );
                process.transitions.push(locked);
                locked
            }
            (SyncKind::Fence, fresh) => {
                let fresh = fresh.unwrap_or(process.state_count() as StateId);
                claim_state(process, fresh, program.state_name(pid, image.source))?;
                let through = Transition::new(pid, image.source, image.stmt, fresh);
                process.transitions.push(through);
                process
                    .transitions
                    .push(Transition::new(pid, fresh, Stmt::Fence, image.target));
                through
            }
        };

        let program = program.with_processes(processes)?;
        let mut images = prior.images.clone();
        images.insert(self.target, rewritten);
        Ok((program, Correspondence { images }))
    }

    /// Human-readable description with the program's names.
    pub fn describe<'a>(&'a self, program: &'a Program) -> impl fmt::Display + 'a {
        Described {
            candidate: self,
            program,
        }
    }
}

/// Name state `id` of `process`, padding any gap below it.
fn claim_state(process: &mut Process, id: StateId, source_name: &str) -> SyncResult<()> {
    let idx = id as usize;
    while process.states.len() <= idx {
        let pad = process.states.len();
        process.states.push(format!("{}{}", PADDING, pad));
    }
    let in_use = !process.states[idx].starts_with(PADDING)
        || process
            .transitions
            .iter()
            .any(|t| t.source == id || t.target == id);
    if in_use {
        return Err(SyncError::StateTaken {
            process: process.name.clone(),
            state: id,
        });
    }
    process.states[idx] = format!("{}{}{}", source_name, PADDING, id);
    Ok(())
}

struct Described<'a> {
    candidate: &'a SyncCandidate,
    program: &'a Program,
}

impl fmt::Display for Described<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = self.program.named(self.candidate.target);
        match self.candidate.kind {
            SyncKind::Fence => write!(f, "fence after {}", target),
            SyncKind::LockedWrite => write!(f, "locked write for {}", target),
        }
    }
}

/// Apply several candidates in order, starting from the original program.
pub fn apply_all(
    original: &Program,
    candidates: &[SyncCandidate],
) -> SyncResult<(Program, Correspondence)> {
    let mut program = original.clone();
    let mut map = Correspondence::identity(original);
    for candidate in candidates {
        let (next, merged) = candidate.insert(&program, &map)?;
        program = next;
        map = merged;
    }
    Ok((program, map))
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
    fn test_enumeration() {
        let p = message_passing();
        let all = get_all_possible(&p, &SyncKind::ALL);
        let fences: Vec<_> = all.iter().filter(|c| c.kind == SyncKind::Fence).collect();
        let locks: Vec<_> = all
            .iter()
            .filter(|c| c.kind == SyncKind::LockedWrite)
            .collect();
        // Nothing follows the last statement of either process.
        assert_eq!(fences.len(), 2);
        assert_eq!(locks.len(), 2);
        assert!(fences.iter().all(|c| c.fresh == Some(3)));
        assert!(locks.iter().all(|c| c.fresh.is_none()));
    }

    #[test]
    fn test_describe() {
        let p = message_passing();
        let all = get_all_possible(&p, &[SyncKind::Fence]);
        assert_eq!(
            all[0].describe(&p).to_string(),
            "fence after P0: L0 --write a := 1--> L1"
        );
        let locks = get_all_possible(&p, &[SyncKind::LockedWrite]);
        assert!(locks[0]
            .describe(&p)
            .to_string()
            .starts_with("locked write for P0:"));
    }

    #[test]
    fn test_fence_insertion() {
        let p = message_passing();
        let c = get_all_possible(&p, &[SyncKind::Fence])[0];
        let (q, map) = c.insert(&p, &Correspondence::identity(&p)).unwrap();
        assert_eq!(q.process(0).state_count(), 4);
        assert_eq!(q.transitions_of(0).len(), 3);
        let image = map.image(&c.target).unwrap();
        assert_eq!(image.target, 3);
        assert_eq!(map.changed().count(), 1);
        let after: Vec<_> = q.transitions_from(0, 3).collect();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].stmt, Stmt::Fence);
        assert_eq!(after[0].target, c.target.target);
    }

    #[test]
    fn test_locked_write_insertion() {
        let p = message_passing();
        let c = get_all_possible(&p, &[SyncKind::LockedWrite])[0];
        let (q, map) = c.insert(&p, &Correspondence::identity(&p)).unwrap();
        let image = map.image(&c.target).unwrap();
        assert!(matches!(image.stmt, Stmt::LockedWrite { .. }));
        assert_eq!(q.process(0).state_count(), 3);
        assert!(q.transitions_of(0).contains(image));
    }

    #[test]
    fn test_stale_application_rejected() {
        let p = message_passing();
        let c = get_all_possible(&p, &[SyncKind::LockedWrite])[0];
        let (q, map) = c.insert(&p, &Correspondence::identity(&p)).unwrap();
        // The identity map still points at the replaced plain write.
        match c.insert(&q, &Correspondence::identity(&p)) {
            Err(SyncError::StaleImage { .. }) => {}
            other => panic!("expected StaleImage, got {:?}", other.map(|_| ())),
        }
        match c.insert(&q, &map) {
            Err(SyncError::NotAPlainWrite { .. }) => {}
            other => panic!("expected NotAPlainWrite, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_fence_and_lock_on_same_write_commute() {
        let p = message_passing();
        let fence = get_all_possible(&p, &[SyncKind::Fence])[0];
        let lock = get_all_possible(&p, &[SyncKind::LockedWrite])[0];
        assert_eq!(fence.target, lock.target);
        let one = apply_all(&p, &[fence, lock]).unwrap();
        let two = apply_all(&p, &[lock, fence]).unwrap();
        assert_eq!(one.0, two.0);
        assert_eq!(one.1, two.1);
    }
}
