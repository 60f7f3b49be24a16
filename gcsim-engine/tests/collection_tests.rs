//! 回收周期集成测试

use std::sync::Arc;

use gcsim_core::{GcType, Generation, MemoryStore, SharedStore, SimulatorConfig, SqliteStore};
use gcsim_engine::{GarbageCollector, HeapSimulator};

fn engine(store: SharedStore, threshold: u32) -> (Arc<HeapSimulator>, GarbageCollector) {
    let config = SimulatorConfig::default().with_young_gen_threshold(threshold);
    let simulator = Arc::new(HeapSimulator::new(store, config));
    let collector = GarbageCollector::new(simulator.clone());
    (simulator, collector)
}

fn backends() -> Vec<SharedStore> {
    vec![
        Arc::new(MemoryStore::new()),
        Arc::new(SqliteStore::open_in_memory().expect("sqlite store")),
    ]
}

#[test]
fn test_allocate_then_dereference_accounting() {
    for store in backends() {
        let (sim, _) = engine(store, 10);
        let objects = sim.allocate(10, 100, "Session", true).unwrap();
        let ids: Vec<u64> = objects.iter().take(4).filter_map(|o| o.id).collect();

        assert_eq!(sim.dereference(&ids).unwrap(), 4);
        assert_eq!(sim.current_heap_size().unwrap(), 600);
        assert_eq!(sim.live_object_count().unwrap(), 6);
        assert_eq!(sim.unreachable_object_count().unwrap(), 4);
        assert_eq!(sim.young_gen_size().unwrap(), 1000);
        assert_eq!(sim.old_gen_size().unwrap(), 0);
    }
}

#[test]
fn test_minor_gc_reclaims_unreachable_young() {
    for store in backends() {
        let (sim, gc) = engine(store, 10);
        sim.allocate(5, 100, "Temp", false).unwrap();
        sim.allocate(2, 100, "Session", true).unwrap();

        let event = gc.minor().unwrap();
        assert_eq!(event.gc_type, GcType::Minor);
        assert_eq!(event.before_heap, 200);
        assert_eq!(event.after_heap, 200);
        assert_eq!(event.reclaimed_memory, 500);
        assert_eq!(event.objects_collected, 5);
        assert!(event.id.is_some());

        assert_eq!(sim.young_gen_size().unwrap(), 200);
        assert_eq!(sim.unreachable_object_count().unwrap(), 0);
        assert!(sim.all_objects().unwrap().iter().all(|o| o.age == 1));
    }
}

#[test]
fn test_survivors_promote_after_threshold_cycles() {
    let (sim, gc) = engine(Arc::new(MemoryStore::new()), 3);
    sim.allocate(4, 25, "Cache", true).unwrap();

    for _ in 0..2 {
        gc.minor().unwrap();
    }
    assert_eq!(sim.old_gen_size().unwrap(), 0);

    gc.minor().unwrap();
    assert_eq!(sim.old_gen_size().unwrap(), 100);
    assert!(
        sim.all_objects()
            .unwrap()
            .iter()
            .all(|o| o.generation == Generation::Old)
    );
    assert_eq!(gc.stats().total_promoted, 4);
    assert_eq!(gc.history().unwrap().len(), 3);
}

#[test]
fn test_average_efficiency_over_history() {
    let (sim, gc) = engine(Arc::new(MemoryStore::new()), 10);
    assert_eq!(gc.average_efficiency().unwrap(), None);

    // before = 0: excluded from the average
    gc.minor().unwrap();
    assert_eq!(gc.average_efficiency().unwrap(), None);

    let objects = sim.allocate(4, 50, "Node", true).unwrap();
    let half: Vec<u64> = objects.iter().take(2).filter_map(|o| o.id).collect();
    sim.dereference(&half).unwrap();
    gc.minor().unwrap();

    // dereferenced objects already left the live heap, so before = 100, reclaimed = 100
    assert_eq!(gc.average_efficiency().unwrap(), Some(1.0));
}
