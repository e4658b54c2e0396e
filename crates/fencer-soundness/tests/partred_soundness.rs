//! Property: a transition outside `partred` never has predecessors.

use fencer_mc::{Common, Constraint, EngineConfig};
use fencer_model::MemoryModel;
use fencer_soundness::{
    backward_constraints, check, check_partred, common, forward_reachable, program_strategy, Op,
    RandomProgram,
};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn partred_keeps_every_productive_transition(random in program_strategy()) {
        let program = random.build().unwrap();
        for model in MemoryModel::ALL {
            let common = common(&program, model);
            for c in backward_constraints(&common, 40).unwrap() {
                let result = check_partred(&common, &c);
                prop_assert!(result.is_ok(), "{}: {}", model, result.unwrap_err());
            }
        }
    }
}

/// Program transitions into the current states plus every internal
/// transition there.
fn unreduced(common: &Common, c: &Constraint) -> usize {
    c.control()
        .iter()
        .enumerate()
        .map(|(p, &s)| {
            common.program().transitions_into(p, s).len() + common.internal_at(p, s).count()
        })
        .sum()
}

fn store_buffering() -> RandomProgram {
    RandomProgram {
        locations: 2,
        processes: vec![
            vec![Op::Write(0, 1), Op::Read(1, 0)],
            vec![Op::Write(1, 1), Op::Read(0, 0)],
        ],
    }
}

fn message_passing() -> RandomProgram {
    RandomProgram {
        locations: 2,
        processes: vec![
            vec![Op::Write(0, 1), Op::Write(1, 1)],
            vec![Op::Read(1, 1), Op::Read(0, 0)],
        ],
    }
}

#[test]
fn test_partred_prunes_litmus_constraints() {
    for (name, random) in [("sb", store_buffering()), ("mp", message_passing())] {
        let program = random.build().unwrap();
        for model in MemoryModel::ALL {
            let common = common(&program, model);
            let constraints = backward_constraints(&common, 200).unwrap();
            let mut pruned = 0;
            for c in &constraints {
                check_partred(&common, c).unwrap_or_else(|e| panic!("{} {}: {}", name, model, e));
                let kept = c.partred(&common).len();
                let all = unreduced(&common, c);
                assert!(kept <= all);
                if kept < all {
                    pruned += 1;
                }
            }
            assert!(pruned > 0, "{} {}: nothing pruned", name, model);

            let verdict = check(&program, model, EngineConfig::default()).unwrap();
            let forward = forward_reachable(&program, model, 4, 100_000).unwrap();
            assert_eq!(verdict.is_reachable(), forward, "{} {}", name, model);
        }
    }
}
