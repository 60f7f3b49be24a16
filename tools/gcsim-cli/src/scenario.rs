//! Scripted leak demonstration

use std::thread;
use std::time::Duration;

use gcsim_core::GcSimResult;
use gcsim_service::{
    AllocateRequest, CollectionKind, DereferenceRequest, GcEventView, GcSimulation,
    LeakReportView,
};
use log::info;
use serde::Serialize;

/// Scenario parameters
#[derive(Debug, Clone)]
pub struct ScenarioPlan {
    pub rounds: u32,
    pub batch: u32,
    pub size_kb: u32,
    /// Share of each batch released before collecting, in percent
    pub release_percent: u32,
    pub object_type: String,
    pub pause: Duration,
}

#[derive(Debug, Serialize)]
pub struct ScenarioOutcome {
    pub rounds: Vec<GcEventView>,
    pub report: LeakReportView,
}

/// Allocate a batch, release part of it and run a minor GC, `rounds` times,
/// then analyze the accumulated history.
pub fn run(simulation: &GcSimulation, plan: &ScenarioPlan) -> GcSimResult<ScenarioOutcome> {
    let request = AllocateRequest::new(plan.batch, plan.size_kb, plan.object_type.clone());
    let release = (u64::from(plan.batch) * u64::from(plan.release_percent)).div_ceil(100) as usize;

    let mut rounds = Vec::with_capacity(plan.rounds as usize);
    for round in 1..=plan.rounds {
        let batch = simulation.simulation.allocate(&request)?;
        let released: Vec<u64> = batch.iter().filter_map(|o| o.id).take(release).collect();
        if !released.is_empty() {
            simulation
                .simulation
                .dereference(&DereferenceRequest::new(released))?;
        }

        let event = simulation.collection.run(CollectionKind::Minor)?;
        info!(
            "Scenario round {}/{}: reclaimed {} KB, heap {} KB",
            round, plan.rounds, event.event.reclaimed_memory, event.event.after_heap
        );
        rounds.push(event);

        if round < plan.rounds && !plan.pause.is_zero() {
            thread::sleep(plan.pause);
        }
    }

    let report = simulation.analysis.generate_report()?;
    Ok(ScenarioOutcome { rounds, report })
}
