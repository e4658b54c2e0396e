//! JSON input format for programs.
//!
//! Names are resolved and checked by [`crate::Program::from_spec`].

use serde::{Deserialize, Serialize};

/// A program as written by the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgramSpec {
    /// Memory locations, shared or process-local.
    pub locations: Vec<LocationSpec>,
    /// Processes in order; process ids follow this order.
    pub processes: Vec<ProcessSpec>,
    /// Forbidden control vectors: one state name (or `"*"`) per process.
    pub forbidden: Vec<Vec<String>>,
}

/// A memory location declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationSpec {
    pub name: String,
    /// Domain size: values are `0..domain`.
    #[serde(default = "default_domain")]
    pub domain: u32,
    /// Initial value(s).
    #[serde(default)]
    pub init: InitSpec,
    /// Owning process for a local location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

fn default_domain() -> u32 {
    2
}

/// Initial value of a location: a value, a list of values, or `"*"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum InitSpec {
    Value(u32),
    Values(Vec<u32>),
    Wildcard(String),
}

impl Default for InitSpec {
    fn default() -> Self {
        InitSpec::Value(0)
    }
}

/// A process: a finite control automaton.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessSpec {
    pub name: String,
    /// Initial control state.
    pub init: String,
    /// State names; inferred from `init` and the transitions when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<Vec<String>>,
    pub transitions: Vec<TransitionSpec>,
}

/// A labelled transition between two control states.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionSpec {
    pub from: String,
    pub to: String,
    #[serde(flatten)]
    pub stmt: StmtSpec,
}

/// Statements. `serialise` and `update` are produced by the analysis and
/// rejected in user programs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StmtSpec {
    Nop,
    Write {
        loc: String,
        value: u32,
    },
    LockedWrite {
        loc: String,
        value: u32,
    },
    Read {
        loc: String,
        value: u32,
    },
    Fence,
    Cas {
        loc: String,
        expected: u32,
        new: u32,
    },
    Serialise {
        locs: Vec<String>,
    },
    Update {
        writer: String,
        locs: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transition_flattened() {
        let t: TransitionSpec = serde_json::from_str(
            r#"{"from": "L0", "to": "L1", "kind": "cas", "loc": "x", "expected": 0, "new": 1}"#,
        )
        .unwrap();
        assert_eq!(
            t.stmt,
            StmtSpec::Cas {
                loc: "x".into(),
                expected: 0,
                new: 1
            }
        );
    }

    #[test]
    fn test_init_forms() {
        let l: LocationSpec = serde_json::from_str(r#"{"name": "a"}"#).unwrap();
        assert_eq!(l.domain, 2);
        assert_eq!(l.init, InitSpec::Value(0));
        let l: LocationSpec =
            serde_json::from_str(r#"{"name": "t", "domain": 3, "init": "*"}"#).unwrap();
        assert_eq!(l.init, InitSpec::Wildcard("*".into()));
        let l: LocationSpec = serde_json::from_str(r#"{"name": "t", "init": [0, 1]}"#).unwrap();
        assert_eq!(l.init, InitSpec::Values(vec![0, 1]));
    }
}
