//! Property: the backward engine agrees with exhaustive forward exploration
//! on small acyclic programs, in every memory model and search order.

use fencer_mc::{EngineConfig, SearchOrder, Verdict};
use fencer_model::MemoryModel;
use fencer_soundness::{check, forward_reachable, program_strategy};
use proptest::prelude::*;

fn budget() -> EngineConfig {
    EngineConfig {
        max_steps: 20_000,
        ..EngineConfig::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        // Override in CI with PROPTEST_CASES env var.
        cases: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn backward_matches_forward(random in program_strategy()) {
        let program = random.build().unwrap();
        for model in MemoryModel::ALL {
            let verdict = check(&program, model, budget()).unwrap();
            if let Verdict::Inconclusive { .. } = verdict {
                continue;
            }
            let forward = forward_reachable(&program, model, 6, 200_000).unwrap();
            prop_assert_eq!(
                verdict.is_reachable(),
                forward,
                "{} disagrees on\n{}",
                model,
                program
            );
        }
    }

    #[test]
    fn search_orders_agree(random in program_strategy()) {
        let program = random.build().unwrap();
        for model in MemoryModel::ALL {
            let bfs = check(&program, model, budget()).unwrap();
            let dfs = check(&program, model, EngineConfig { order: SearchOrder::Dfs, ..budget() }).unwrap();
            let par = check(&program, model, EngineConfig { parallel: true, ..budget() }).unwrap();
            if [&bfs, &dfs, &par].iter().any(|v| matches!(v, Verdict::Inconclusive { .. })) {
                continue;
            }
            prop_assert_eq!(bfs.name(), dfs.name(), "{}", model);
            prop_assert_eq!(bfs.name(), par.name(), "{}", model);
        }
    }
}
