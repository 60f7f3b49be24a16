//! 服务层集成测试

use std::sync::Arc;

use chrono::{Duration, Utc};
use gcsim_core::{GcSimError, GcType, MemoryStore, SimulatorConfig, Verdict};
use gcsim_engine::CollectionKind;
use gcsim_service::{AllocateRequest, CYCLIC_OBJECT_TYPE, DereferenceRequest, GcSimulation};

fn simulation() -> GcSimulation {
    let config = SimulatorConfig {
        max_heap_size_kb: 2_000,
        ..SimulatorConfig::default()
    };
    GcSimulation::with_seed(Arc::new(MemoryStore::new()), config, 11)
}

fn ids(objects: &[gcsim_core::HeapObject]) -> Vec<u64> {
    objects.iter().filter_map(|o| o.id).collect()
}

#[test]
fn test_allocate_and_dereference_updates_heap_state() {
    let sim = simulation();
    let objects = sim
        .simulation
        .allocate(&AllocateRequest::new(10, 100, "Session"))
        .unwrap();
    let mut requested = ids(&objects[..4]);
    requested.push(424_242);

    // 返回请求中的标识数量，包括不存在的标识
    let count = sim
        .simulation
        .dereference(&DereferenceRequest::new(requested))
        .unwrap();
    assert_eq!(count, 5);

    let state = sim.simulation.heap_state().unwrap();
    assert_eq!(state.total_heap_used, 600);
    assert_eq!(state.live_objects_count, 6);
    assert_eq!(state.unreachable_objects_count, 4);
    assert_eq!(state.heap_utilization, 30.0);
}

#[test]
fn test_validation_errors() {
    let sim = simulation();
    assert!(matches!(
        sim.simulation.allocate(&AllocateRequest::new(0, 10, "Node")),
        Err(GcSimError::Validation { .. })
    ));
    assert!(matches!(
        sim.simulation.dereference(&DereferenceRequest::new(vec![])),
        Err(GcSimError::Validation { .. })
    ));
    assert!(matches!(
        sim.simulation.dereference_random(101),
        Err(GcSimError::Validation { .. })
    ));
    assert!(matches!(
        sim.simulation.allocate_random(1, 10, 5, "Blob"),
        Err(GcSimError::InvalidArgument(_))
    ));

    let now = Utc::now();
    assert!(matches!(
        sim.simulation.heap_history(Some((now, now - Duration::seconds(1)))),
        Err(GcSimError::Validation { .. })
    ));
}

#[test]
fn test_dereference_random_rounds_up() {
    let sim = simulation();
    sim.simulation
        .allocate(&AllocateRequest::new(7, 10, "Node"))
        .unwrap();

    // ceil(7 * 10 / 100) = 1
    assert_eq!(sim.simulation.dereference_random(10).unwrap(), 1);
    let objects = sim.simulation.objects().unwrap();
    assert!(!objects[0].referenced);
    assert!(objects[1..].iter().all(|o| o.referenced));

    // ceil(7 * 50 / 100) = 4, taken from the 6 still referenced
    assert_eq!(sim.simulation.dereference_random(50).unwrap(), 4);
    assert_eq!(sim.simulation.heap_state().unwrap().live_objects_count, 2);

    assert_eq!(sim.simulation.dereference_random(0).unwrap(), 0);
}

#[test]
fn test_cyclic_chain() {
    let sim = simulation();
    let chain = sim.simulation.allocate_cyclic(5, 50).unwrap();
    assert_eq!(chain.len(), 5);
    assert!(
        chain
            .iter()
            .all(|o| o.object_type == CYCLIC_OBJECT_TYPE && o.referenced && o.size_kb == 50)
    );
    assert!(sim.simulation.allocate_cyclic(0, 50).is_err());
}

#[test]
fn test_gc_views_and_history() {
    let sim = simulation();
    sim.simulation
        .allocate(&AllocateRequest::new(4, 25, "Temp").with_references(false))
        .unwrap();
    sim.simulation
        .allocate(&AllocateRequest::new(1, 100, "Session"))
        .unwrap();

    let minor = sim.collection.run(CollectionKind::Minor).unwrap();
    assert_eq!(minor.event.reclaimed_memory, 100);
    assert_eq!(minor.efficiency, 1.0);

    let full = sim.collection.run(CollectionKind::Full).unwrap();
    assert_eq!(full.event.gc_type, GcType::Major);

    let history = sim.collection.history().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].event.id, full.event.id);
    assert_eq!(sim.analysis.gc_events().unwrap().len(), 2);
    assert_eq!(sim.collection.stats().full_collections, 1);
    assert_eq!(sim.collection.average_efficiency().unwrap(), Some(0.5));
}

#[test]
fn test_report_views() {
    let sim = simulation();
    assert!(sim.analysis.latest_report().unwrap().is_none());

    let view = sim.analysis.generate_report().unwrap();
    assert_eq!(view.report.verdict, Verdict::NoLeak);
    assert_eq!(view.summary, Verdict::NoLeak.summary());

    let latest = sim.analysis.latest_report().unwrap().unwrap();
    assert_eq!(latest, view);
    assert_eq!(sim.analysis.reports().unwrap().len(), 1);
    assert_eq!(sim.analysis.heap_history(None).unwrap().len(), 1);
}

#[test]
fn test_clear_empties_heap() {
    let sim = simulation();
    sim.simulation
        .allocate(&AllocateRequest::new(3, 10, "Node"))
        .unwrap();
    sim.simulation.create_snapshot().unwrap();
    assert_eq!(sim.simulation.clear().unwrap(), 3);
    assert!(sim.simulation.objects().unwrap().is_empty());
    // 快照不受清空影响
    assert_eq!(sim.simulation.heap_history(None).unwrap().len(), 1);
}
