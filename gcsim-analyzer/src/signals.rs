//! Leak signals
//!
//! Pure functions over snapshots, events and objects. Missing or insufficient
//! history yields a neutral value instead of an error.

use std::collections::HashMap;

use gcsim_core::{GcEvent, Generation, HeapObject, HeapSnapshot, Verdict};
use serde::{Deserialize, Serialize};

/// Number of most recent snapshots considered for stagnation
pub const STAGNATION_WINDOW: usize = 5;
/// Minimum snapshots required before stagnation is measured
pub const STAGNATION_MIN_SAMPLES: usize = 3;
/// Number of object types listed in a report
pub const TOP_LEAKING_TYPES: usize = 5;
/// Placeholder used when no referenced old-generation object exists
pub const NONE_IDENTIFIED: &str = "None identified";

/// Growth rates at or above this value (KB/s) saturate their score component
const GROWTH_SATURATION: f64 = 100.0;

const HEAP_GROWTH_WEIGHT: f64 = 0.3;
const OLD_GEN_GROWTH_WEIGHT: f64 = 0.3;
const GC_INEFFICIENCY_WEIGHT: f64 = 0.2;
const STAGNATION_WEIGHT: f64 = 0.2;

const NO_LEAK_MAX_SCORE: f64 = 30.0;
const POSSIBLE_LEAK_MAX_SCORE: f64 = 60.0;

/// All signals feeding one analysis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeakSignals {
    /// Referenced heap growth between oldest and newest snapshot (KB/s)
    pub heap_growth_rate: f64,
    /// Average collection efficiency in `[0, 1]`
    pub gc_efficiency: f64,
    /// Old generation growth between oldest and newest snapshot (KB/s)
    pub old_gen_growth_rate: f64,
    /// How flat the live object count has been recently, in `[0, 1]`
    pub live_object_stagnation: f64,
    /// Live share of all objects; diagnostic only, not part of the score
    pub live_object_ratio: f64,
}

impl LeakSignals {
    /// Weighted suspicion score in `[0, 100]`
    pub fn suspicion_score(&self) -> f64 {
        suspicion_score(
            self.heap_growth_rate,
            self.old_gen_growth_rate,
            self.gc_efficiency,
            self.live_object_stagnation,
        )
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// Whole seconds between two snapshots, truncated
fn elapsed_seconds(first: &HeapSnapshot, latest: &HeapSnapshot) -> i64 {
    (latest.timestamp - first.timestamp).num_seconds()
}

fn growth_rate(
    first: &HeapSnapshot,
    latest: &HeapSnapshot,
    measure: impl Fn(&HeapSnapshot) -> u64,
) -> f64 {
    if first.id.is_some() && first.id == latest.id {
        return 0.0;
    }
    let seconds = elapsed_seconds(first, latest);
    if seconds <= 0 {
        return 0.0;
    }
    (measure(latest) as f64 - measure(first) as f64) / seconds as f64
}

/// Referenced heap growth (KB/s) between the oldest and newest snapshot
pub fn heap_growth_rate(first: Option<&HeapSnapshot>, latest: Option<&HeapSnapshot>) -> f64 {
    match (first, latest) {
        (Some(first), Some(latest)) => growth_rate(first, latest, |s| s.total_heap_used),
        _ => 0.0,
    }
}

/// Old generation growth (KB/s) across snapshots ordered newest first
///
/// A missing old generation size counts as 0.
pub fn old_gen_growth_rate(snapshots_desc: &[HeapSnapshot]) -> f64 {
    if snapshots_desc.len() < 2 {
        return 0.0;
    }
    match (snapshots_desc.last(), snapshots_desc.first()) {
        (Some(oldest), Some(newest)) => {
            growth_rate(oldest, newest, |s| s.old_gen_size.unwrap_or(0))
        }
        _ => 0.0,
    }
}

/// Average collection efficiency with fallbacks
///
/// Without any event the heap is assumed healthy (1.0). When events exist but
/// none had a non-empty heap before collecting, the result is 0.0.
pub fn gc_efficiency(average: Option<f64>, events: &[GcEvent]) -> f64 {
    if let Some(average) = average {
        return average;
    }
    if events.is_empty() {
        return 1.0;
    }
    let total: f64 = events
        .iter()
        .filter(|e| e.before_heap > 0)
        .map(GcEvent::efficiency)
        .sum();
    total / events.len() as f64
}

/// `1 - min(cv, 1)` of live object counts over the most recent snapshots
///
/// `snapshots_desc` is ordered newest first.
pub fn live_object_stagnation(snapshots_desc: &[HeapSnapshot]) -> f64 {
    let window = &snapshots_desc[..snapshots_desc.len().min(STAGNATION_WINDOW)];
    if window.len() < STAGNATION_MIN_SAMPLES {
        return 0.0;
    }

    let n = window.len() as f64;
    let mean = window
        .iter()
        .map(|s| s.live_objects_count as f64)
        .sum::<f64>()
        / n;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = window
        .iter()
        .map(|s| (s.live_objects_count as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    let cv = variance.sqrt() / mean;
    1.0 - cv.min(1.0)
}

/// `live / (live + unreachable)`, 0 for an empty heap
pub fn live_object_ratio(live: u64, unreachable: u64) -> f64 {
    let total = live + unreachable;
    if total == 0 {
        return 0.0;
    }
    live as f64 / total as f64
}

fn normalize_growth(rate: f64) -> f64 {
    (finite_or_zero(rate).abs() / GROWTH_SATURATION).min(1.0)
}

/// Weighted suspicion score, always within `[0, 100]`
pub fn suspicion_score(
    heap_growth_rate: f64,
    old_gen_growth_rate: f64,
    gc_efficiency: f64,
    live_object_stagnation: f64,
) -> f64 {
    let inefficiency = (1.0 - finite_or_zero(gc_efficiency)).max(0.0);
    let weighted = HEAP_GROWTH_WEIGHT * normalize_growth(heap_growth_rate)
        + OLD_GEN_GROWTH_WEIGHT * normalize_growth(old_gen_growth_rate)
        + GC_INEFFICIENCY_WEIGHT * inefficiency
        + STAGNATION_WEIGHT * finite_or_zero(live_object_stagnation);
    finite_or_zero(weighted).clamp(0.0, 1.0) * 100.0
}

/// Map a score onto a verdict
pub fn determine_verdict(score: f64) -> Verdict {
    if score <= NO_LEAK_MAX_SCORE {
        Verdict::NoLeak
    } else if score <= POSSIBLE_LEAK_MAX_SCORE {
        Verdict::PossibleLeak
    } else {
        Verdict::HighProbabilityLeak
    }
}

/// Most frequent types among referenced old-generation objects
///
/// `objects` is expected in id order; equal counts keep first-appearance order.
pub fn leaking_object_types(objects: &[HeapObject]) -> String {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for object in objects
        .iter()
        .filter(|o| o.referenced && o.generation == Generation::Old)
    {
        let count = counts.entry(object.object_type.as_str()).or_insert(0);
        if *count == 0 {
            order.push(object.object_type.as_str());
        }
        *count += 1;
    }

    if order.is_empty() {
        return NONE_IDENTIFIED.to_string();
    }

    let mut ranked: Vec<(&str, usize)> = order
        .into_iter()
        .map(|ty| (ty, counts.get(ty).copied().unwrap_or(0)))
        .collect();
    // sort_by is stable
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
        .into_iter()
        .take(TOP_LEAKING_TYPES)
        .map(|(ty, count)| format!("{ty} ({count})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Whole seconds between the oldest and newest snapshot
pub fn suspected_leak_duration(first: Option<&HeapSnapshot>, latest: Option<&HeapSnapshot>) -> i64 {
    match (first, latest) {
        (Some(first), Some(latest)) => elapsed_seconds(first, latest).max(0),
        _ => 0,
    }
}
