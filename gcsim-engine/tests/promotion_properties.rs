//! 晋升属性测试

use std::sync::Arc;

use gcsim_core::{Generation, MemoryStore, SimulatorConfig};
use gcsim_engine::HeapSimulator;
use proptest::prelude::*;

/// 属性测试: 晋升单调，只在年龄达到阈值时发生
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn prop_promotion_monotone(threshold in 1u32..8, passes in 0u32..12, count in 1u32..6) {
        let config = SimulatorConfig::default().with_young_gen_threshold(threshold);
        let sim = HeapSimulator::new(Arc::new(MemoryStore::new()), config);
        sim.allocate(count, 1, "Node", true).unwrap();

        let mut total_promoted = 0;
        let mut seen_old = false;
        for pass in 1..=passes {
            total_promoted += sim.promote().unwrap();
            let objects = sim.all_objects().unwrap();
            let old = objects.iter().filter(|o| o.generation == Generation::Old).count();

            // 一旦进入老年代就不会回到年轻代
            if seen_old {
                prop_assert_eq!(old, count as usize);
            }
            seen_old |= old > 0;

            for object in &objects {
                prop_assert_eq!(object.age, pass.min(threshold));
                prop_assert_eq!(object.generation == Generation::Old, pass >= threshold);
            }
        }
        let expected = if passes >= threshold { count as usize } else { 0 };
        prop_assert_eq!(total_promoted, expected);
    }
}
