//! Witnesses of reachable forbidden states.

use crate::common::Common;
use crate::constraint::Constraint;
use fencer_model::Transition;
use std::fmt::Write as _;
use std::sync::Arc;

/// One step of a witness: `transition` leads into `constraint`.
#[derive(Debug, Clone)]
pub struct WitnessStep {
    pub transition: Transition,
    pub constraint: Arc<Constraint>,
}

/// A run in forward order: from a constraint holding an initial
/// configuration, through each step, to a bad-state constraint.
#[derive(Debug, Clone)]
pub struct Witness {
    pub initial: Arc<Constraint>,
    pub steps: Vec<WitnessStep>,
}

impl Witness {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn transitions(&self) -> impl Iterator<Item = &Transition> + '_ {
        self.steps.iter().map(|s| &s.transition)
    }

    /// Transitions of the program itself, without serialise/update steps.
    pub fn program_transitions(&self) -> impl Iterator<Item = &Transition> + '_ {
        self.transitions().filter(|t| !t.stmt.is_internal())
    }

    /// The bad-state constraint the run ends in.
    pub fn last(&self) -> &Arc<Constraint> {
        self.steps
            .last()
            .map(|s| &s.constraint)
            .unwrap_or(&self.initial)
    }

    /// One line per transition, numbered.
    pub fn render(&self, common: &Common) -> String {
        let program = common.program();
        let mut out = String::new();
        for (i, step) in self.steps.iter().enumerate() {
            let _ = writeln!(out, "{:>3}. {}", i + 1, program.named(step.transition));
        }
        out
    }

    /// Every step with the constraint it leads into.
    pub fn render_verbose(&self, common: &Common) -> String {
        let program = common.program();
        let mut out = String::new();
        let _ = writeln!(out, "initial:\n{}", indent(&self.initial.describe(common)));
        for (i, step) in self.steps.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:>3}. {}\n{}",
                i + 1,
                program.named(step.transition),
                indent(&step.constraint.describe(common))
            );
        }
        out
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|l| format!("     {}", l))
        .collect::<Vec<_>>()
        .join("\n")
}
