//! Service boundary for the heap simulator
//!
//! Validates requests and shapes responses for the command-line front end.
//! [`GcSimulation`] wires one simulator, collector and analyzer around a
//! shared store.

use std::sync::Arc;

use gcsim_analyzer::LeakAnalyzer;
use gcsim_core::{SharedStore, SimulatorConfig};
use gcsim_engine::{GarbageCollector, HeapSimulator};

pub mod analysis;
pub mod collection;
pub mod dto;
pub mod simulation;

pub use analysis::AnalysisService;
pub use collection::CollectionService;
pub use dto::{AllocateRequest, DereferenceRequest, GcEventView, HeapState, LeakReportView};
pub use simulation::{CYCLIC_OBJECT_TYPE, SimulationService};

pub use gcsim_engine::CollectionKind;

/// One simulator, collector and analyzer sharing a store
#[derive(Clone)]
pub struct GcSimulation {
    pub simulation: SimulationService,
    pub collection: CollectionService,
    pub analysis: AnalysisService,
}

impl GcSimulation {
    /// Wire all services around `store`
    pub fn new(store: SharedStore, config: SimulatorConfig) -> Self {
        Self::from_simulator(Arc::new(HeapSimulator::new(store, config)))
    }

    /// Same as [`GcSimulation::new`] with deterministic random allocation
    pub fn with_seed(store: SharedStore, config: SimulatorConfig, seed: u64) -> Self {
        Self::from_simulator(Arc::new(HeapSimulator::with_seed(store, config, seed)))
    }

    fn from_simulator(simulator: Arc<HeapSimulator>) -> Self {
        let collector = Arc::new(GarbageCollector::new(simulator.clone()));
        let analyzer = Arc::new(LeakAnalyzer::new(simulator.clone(), collector.clone()));
        Self {
            simulation: SimulationService::new(simulator.clone()),
            collection: CollectionService::new(collector),
            analysis: AnalysisService::new(analyzer, simulator),
        }
    }
}
