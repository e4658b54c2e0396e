//! Litmus programs checked under every memory model, with witness replay.

use fencer_mc::{replay, Common, Engine, EngineConfig, SearchOrder, Verdict};
use fencer_model::{MemoryModel, Program, ProgramBuilder, Stmt};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use MemoryModel::{Nmca, Pso, Tso};

fn models_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("models")
}

fn load(name: &str) -> Program {
    let source = fs::read_to_string(models_dir().join(name)).unwrap();
    Program::from_json(&source).unwrap()
}

/// Message passing. `fence_writer` / `fence_reader` insert a fence between
/// the two statements of each side; `locked` turns one write into a locked
/// write.
fn message_passing(fence_writer: bool, fence_reader: bool, locked: Option<&str>) -> Program {
    let mut b = ProgramBuilder::new();
    let a = b.location("a", 2, 0);
    let f = b.location("b", 2, 0);
    let write = |loc, name| {
        if locked == Some(name) {
            Stmt::LockedWrite { loc, value: 1 }
        } else {
            Stmt::Write { loc, value: 1 }
        }
    };
    let mut writer = vec![write(a, "a")];
    if fence_writer {
        writer.push(Stmt::Fence);
    }
    writer.push(write(f, "b"));
    let mut reader = vec![Stmt::Read { loc: f, value: 1 }];
    if fence_reader {
        reader.push(Stmt::Fence);
    }
    reader.push(Stmt::Read { loc: a, value: 0 });
    let (_, e0) = b.chain("P0", &writer);
    let (_, e1) = b.chain("P1", &reader);
    b.forbid(&[e0, e1]);
    b.build().unwrap()
}

fn store_buffering(fenced: bool) -> Program {
    let mut b = ProgramBuilder::new();
    let x = b.location("x", 2, 0);
    let y = b.location("y", 2, 0);
    let side = |mine, other| {
        let mut stmts = vec![Stmt::Write { loc: mine, value: 1 }];
        if fenced {
            stmts.push(Stmt::Fence);
        }
        stmts.push(Stmt::Read {
            loc: other,
            value: 0,
        });
        stmts
    };
    let (_, e0) = b.chain("P0", &side(x, y));
    let (_, e1) = b.chain("P1", &side(y, x));
    b.forbid(&[e0, e1]);
    b.build().unwrap()
}

/// Two processes take a lock with a single CAS. A failed CAS still moves on,
/// so both can end up past it.
fn spin_cas() -> Program {
    let mut b = ProgramBuilder::new();
    let l = b.location("lock", 2, 0);
    let cas = Stmt::Cas {
        loc: l,
        expected: 0,
        new: 1,
    };
    let (_, e0) = b.chain("P0", &[cas]);
    let (_, e1) = b.chain("P1", &[cas]);
    b.forbid(&[e0, e1]);
    b.build().unwrap()
}

/// A writer that toggles `x` between 1 and 0 any number of times before
/// setting `y`. The reader sees `y = 1` and then `x = 1`.
fn looping_writer(fenced: bool) -> Program {
    let mut b = ProgramBuilder::new();
    let x = b.location("x", 2, 0);
    let y = b.location("y", 2, 0);
    let p0 = b.process("P0");
    let home = b.state(p0, "A");
    let toggled = b.state(p0, "B");
    let done = b.state(p0, "C");
    b.transition(p0, home, Stmt::Write { loc: x, value: 1 }, toggled);
    b.transition(p0, toggled, Stmt::Write { loc: x, value: 0 }, home);
    if fenced {
        let flushed = b.state(p0, "F");
        b.transition(p0, home, Stmt::Fence, flushed);
        b.transition(p0, flushed, Stmt::Write { loc: y, value: 1 }, done);
    } else {
        b.transition(p0, home, Stmt::Write { loc: y, value: 1 }, done);
    }
    let (_, e1) = b.chain(
        "P1",
        &[
            Stmt::Read { loc: y, value: 1 },
            Stmt::Read { loc: x, value: 1 },
        ],
    );
    b.forbid(&[done, e1]);
    b.build().unwrap()
}

fn check(program: &Program, model: MemoryModel) -> Verdict {
    check_with(program, model, EngineConfig::default())
}

fn check_with(program: &Program, model: MemoryModel, config: EngineConfig) -> Verdict {
    let common = Arc::new(Common::new(Arc::new(program.clone()), model));
    Engine::new(common, config).run().unwrap()
}

/// Check, and when reachable make sure the witness runs concretely.
fn expect(program: &Program, model: MemoryModel, reachable: bool) {
    match check(program, model) {
        Verdict::Reachable { witness, .. } => {
            assert!(reachable, "{}: expected SAFE, got REACHABLE", model);
            let end = replay(program, model, &witness)
                .unwrap_or_else(|e| panic!("{}: witness does not replay: {}", model, e));
            assert!(program.is_forbidden(&end.control));
        }
        Verdict::Safe { .. } => assert!(!reachable, "{}: expected REACHABLE, got SAFE", model),
        other => panic!("{}: expected a verdict, got {}", model, other.name()),
    }
}

#[test]
fn test_message_passing() {
    let p = message_passing(false, false, None);
    expect(&p, Tso, false);
    expect(&p, Pso, true);
    expect(&p, Nmca, true);
}

#[test]
fn test_message_passing_writer_fence() {
    let p = message_passing(true, false, None);
    expect(&p, Tso, false);
    expect(&p, Pso, false);
    expect(&p, Nmca, true);
}

#[test]
fn test_message_passing_both_fences() {
    let p = message_passing(true, true, None);
    for model in MemoryModel::ALL {
        expect(&p, model, false);
    }
}

#[test]
fn test_message_passing_locked_flag() {
    let p = message_passing(false, false, Some("b"));
    expect(&p, Tso, false);
    expect(&p, Pso, true);
    expect(&p, Nmca, true);
}

#[test]
fn test_message_passing_locked_data() {
    let p = message_passing(false, false, Some("a"));
    expect(&p, Tso, false);
    expect(&p, Pso, false);
    expect(&p, Nmca, true);
}

#[test]
fn test_store_buffering() {
    let plain = store_buffering(false);
    let fenced = store_buffering(true);
    for model in MemoryModel::ALL {
        expect(&plain, model, true);
        expect(&fenced, model, false);
    }
}

#[test]
fn test_spin_cas() {
    let p = spin_cas();
    for model in MemoryModel::ALL {
        expect(&p, model, true);
    }
}

#[test]
fn test_peterson_models() {
    let plain = load("peterson.json");
    expect(&plain, Tso, true);
    expect(&plain, Pso, true);

    let locked = load("peterson_locked.json");
    expect(&locked, Tso, false);
    expect(&locked, Pso, true);
}

#[test]
fn test_looping_writer() {
    let plain = looping_writer(false);
    expect(&plain, Tso, false);
    expect(&plain, Pso, true);
    expect(&plain, Nmca, true);

    let fenced = looping_writer(true);
    expect(&fenced, Tso, false);
    expect(&fenced, Pso, false);
    expect(&fenced, Nmca, true);
}

#[test]
fn test_looping_models() {
    let toggle = load("toggle.json");
    expect(&toggle, Tso, false);
    expect(&toggle, Pso, true);

    let peterson = load("peterson_loop.json");
    expect(&peterson, Tso, false);
    expect(&peterson, Pso, false);
}

#[test]
fn test_sample_models_parse() {
    let mp = load("mp.json");
    expect(&mp, Tso, false);
    expect(&mp, Pso, true);
    let sb = load("sb.json");
    expect(&sb, Tso, true);
}

#[test]
fn test_dfs_witness_replays() {
    let config = EngineConfig {
        order: SearchOrder::Dfs,
        ..EngineConfig::default()
    };
    let p = message_passing(true, false, None);
    match check_with(&p, Nmca, config) {
        Verdict::Reachable { witness, .. } => {
            assert!(replay(&p, Nmca, &witness).is_ok());
        }
        other => panic!("expected Reachable, got {:?}", other.name()),
    }
}

#[test]
fn test_unpruned_agrees() {
    let config = EngineConfig {
        prune_unexplainable: false,
        ..EngineConfig::default()
    };
    for model in [Tso, Pso] {
        let p = message_passing(false, false, None);
        let pruned = check(&p, model);
        let unpruned = check_with(&p, model, config.clone());
        assert_eq!(pruned.name(), unpruned.name(), "{}", model);
    }
}
