//! Pluggable progress reporting for the engine.

use std::sync::Mutex;
use tracing::{debug, trace};

/// How much the engine reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DiagnosticLevel {
    #[default]
    Off,
    /// One line per processed constraint.
    Steps,
    /// Also the full rendering of every stored constraint.
    Constraints,
}

/// Receives engine reports. The engine only formats a line when
/// [`DiagnosticSink::level`] asks for it.
pub trait DiagnosticSink: Send + Sync {
    fn level(&self) -> DiagnosticLevel;

    /// `level` is the detail `line` belongs to.
    fn record(&self, level: DiagnosticLevel, line: &str);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl DiagnosticSink for NoopSink {
    fn level(&self) -> DiagnosticLevel {
        DiagnosticLevel::Off
    }

    fn record(&self, _level: DiagnosticLevel, _line: &str) {}
}

/// Forwards step lines to `debug!` and constraint renderings to `trace!`.
#[derive(Debug, Clone, Copy)]
pub struct TracingSink {
    pub level: DiagnosticLevel,
}

impl DiagnosticSink for TracingSink {
    fn level(&self) -> DiagnosticLevel {
        self.level
    }

    fn record(&self, level: DiagnosticLevel, line: &str) {
        match level {
            DiagnosticLevel::Off => {}
            DiagnosticLevel::Steps => debug!("{}", line),
            DiagnosticLevel::Constraints => trace!("{}", line),
        }
    }
}

/// Buffers every line; used by tests.
#[derive(Debug, Default)]
pub struct CollectingSink {
    level: DiagnosticLevel,
    lines: Mutex<Vec<(DiagnosticLevel, String)>>,
}

impl CollectingSink {
    pub fn new(level: DiagnosticLevel) -> Self {
        Self {
            level,
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines_at(self.level)
    }

    /// Lines recorded at `level` or coarser.
    pub fn lines_at(&self, level: DiagnosticLevel) -> Vec<String> {
        let lines = match self.lines.lock() {
            Ok(lines) => lines,
            Err(poisoned) => poisoned.into_inner(),
        };
        lines
            .iter()
            .filter(|(l, _)| *l <= level)
            .map(|(_, line)| line.clone())
            .collect()
    }
}

impl DiagnosticSink for CollectingSink {
    fn level(&self) -> DiagnosticLevel {
        self.level
    }

    fn record(&self, level: DiagnosticLevel, line: &str) {
        let mut lines = match self.lines.lock() {
            Ok(lines) => lines,
            Err(poisoned) => poisoned.into_inner(),
        };
        lines.push((level, line.to_string()));
    }
}
