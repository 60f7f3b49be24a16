//! 评分属性测试

use gcsim_analyzer::{determine_verdict, suspicion_score};
use gcsim_core::Verdict;
use proptest::prelude::*;

/// 属性测试: 任意有限输入的评分都在 [0, 100] 内
proptest! {
    #[test]
    fn prop_score_is_clamped(
        hgr in -1.0e12f64..1.0e12,
        ogr in -1.0e12f64..1.0e12,
        eff in -10.0f64..10.0,
        stag in -10.0f64..10.0,
    ) {
        let score = suspicion_score(hgr, ogr, eff, stag);
        prop_assert!(score.is_finite());
        prop_assert!((0.0..=100.0).contains(&score));
    }
}

/// 属性测试: 判定随评分单调不减
proptest! {
    #[test]
    fn prop_verdict_monotone(a in 0.0f64..=100.0, b in 0.0f64..=100.0) {
        let rank = |v: Verdict| match v {
            Verdict::NoLeak => 0,
            Verdict::PossibleLeak => 1,
            Verdict::HighProbabilityLeak => 2,
        };
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(rank(determine_verdict(low)) <= rank(determine_verdict(high)));
    }
}
