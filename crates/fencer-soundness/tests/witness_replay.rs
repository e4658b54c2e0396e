//! Property: every REACHABLE witness runs in the concrete semantics and ends
//! in a forbidden control vector.

use fencer_mc::{replay, EngineConfig, Verdict};
use fencer_model::MemoryModel;
use fencer_soundness::{check, program_strategy};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn witnesses_replay(random in program_strategy()) {
        let program = random.build().unwrap();
        for model in MemoryModel::ALL {
            let config = EngineConfig { max_steps: 20_000, ..EngineConfig::default() };
            if let Verdict::Reachable { witness, .. } = check(&program, model, config).unwrap() {
                let end = replay(&program, model, &witness);
                prop_assert!(end.is_ok(), "{}: {:?}\n{}", model, end, program);
                if let Ok(end) = end {
                    prop_assert!(program.is_forbidden(&end.control));
                }
            }
        }
    }
}
