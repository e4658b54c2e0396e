//! Property: independent synchronization candidates commute.

use fencer_soundness::program_strategy;
use fencer_sync::{apply_all, get_all_possible, SyncKind};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn candidates_commute(random in program_strategy()) {
        let program = random.build().unwrap();
        let all = get_all_possible(&program, &SyncKind::ALL);
        for (i, x) in all.iter().enumerate() {
            for y in &all[i + 1..] {
                if x.target == y.target {
                    continue;
                }
                let xy = apply_all(&program, &[*x, *y]).unwrap();
                let yx = apply_all(&program, &[*y, *x]).unwrap();
                prop_assert_eq!(&xy.0, &yx.0);
                prop_assert_eq!(&xy.1, &yx.1);
            }
        }
    }

    #[test]
    fn three_candidates_any_order(random in program_strategy()) {
        let program = random.build().unwrap();
        let all = get_all_possible(&program, &[SyncKind::Fence]);
        if all.len() >= 3 {
            let (a, b, c) = (all[0], all[1], all[2]);
            let abc = apply_all(&program, &[a, b, c]).unwrap();
            let cab = apply_all(&program, &[c, a, b]).unwrap();
            let bca = apply_all(&program, &[b, c, a]).unwrap();
            prop_assert_eq!(&abc.1, &cab.1);
            prop_assert_eq!(&abc.1, &bca.1);
            prop_assert_eq!(&abc.0, &bca.0);
        }
    }
}
