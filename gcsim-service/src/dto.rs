//! Requests and views exchanged at the service boundary

use chrono::{DateTime, Utc};
use gcsim_core::{GcEvent, GcSimError, GcSimResult, HeapSnapshot, LeakReport};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Batch allocation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateRequest {
    /// Number of objects
    pub count: u32,
    /// Size of each object (KB)
    pub size_kb: u32,
    /// Type label
    pub object_type: String,
    /// Whether the new objects start out referenced
    #[serde(default = "default_true")]
    pub create_references: bool,
}

impl AllocateRequest {
    /// Referenced objects of one type and size
    pub fn new(count: u32, size_kb: u32, object_type: impl Into<String>) -> Self {
        Self {
            count,
            size_kb,
            object_type: object_type.into(),
            create_references: true,
        }
    }

    /// Builder-style override of `create_references`
    pub fn with_references(mut self, create_references: bool) -> Self {
        self.create_references = create_references;
        self
    }

    pub fn validate(&self) -> GcSimResult<()> {
        if self.count < 1 {
            return Err(GcSimError::validation("count", "Count must be at least 1"));
        }
        if self.size_kb < 1 {
            return Err(GcSimError::validation("size_kb", "Size must be at least 1 KB"));
        }
        if self.object_type.trim().is_empty() {
            return Err(GcSimError::validation("object_type", "Object type is required"));
        }
        Ok(())
    }
}

/// Dereference request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DereferenceRequest {
    /// Objects to mark unreachable
    pub object_ids: Vec<u64>,
}

impl DereferenceRequest {
    pub fn new(object_ids: Vec<u64>) -> Self {
        Self { object_ids }
    }

    pub fn validate(&self) -> GcSimResult<()> {
        if self.object_ids.is_empty() {
            return Err(GcSimError::validation(
                "object_ids",
                "Object IDs list cannot be empty",
            ));
        }
        Ok(())
    }
}

/// Current heap state with utilization against the configured capacity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeapState {
    pub timestamp: DateTime<Utc>,
    pub total_heap_used: u64,
    pub live_objects_count: u64,
    pub unreachable_objects_count: u64,
    pub young_gen_size: Option<u64>,
    pub old_gen_size: Option<u64>,
    /// Percentage of `max_heap_size_kb` in use
    pub heap_utilization: f64,
}

impl HeapState {
    pub fn from_snapshot(snapshot: &HeapSnapshot, max_heap_size_kb: u64) -> Self {
        let heap_utilization = if max_heap_size_kb == 0 {
            0.0
        } else {
            snapshot.total_heap_used as f64 / max_heap_size_kb as f64 * 100.0
        };
        Self {
            timestamp: snapshot.timestamp,
            total_heap_used: snapshot.total_heap_used,
            live_objects_count: snapshot.live_objects_count,
            unreachable_objects_count: snapshot.unreachable_objects_count,
            young_gen_size: snapshot.young_gen_size,
            old_gen_size: snapshot.old_gen_size,
            heap_utilization,
        }
    }
}

/// GC event with its efficiency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcEventView {
    #[serde(flatten)]
    pub event: GcEvent,
    pub efficiency: f64,
}

impl From<GcEvent> for GcEventView {
    fn from(event: GcEvent) -> Self {
        let efficiency = event.efficiency();
        Self { event, efficiency }
    }
}

/// Leak report with a human readable summary of its verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakReportView {
    #[serde(flatten)]
    pub report: LeakReport,
    pub summary: String,
}

impl From<LeakReport> for LeakReportView {
    fn from(report: LeakReport) -> Self {
        let summary = report.verdict.summary().to_string();
        Self { report, summary }
    }
}

/// Inclusive time range for history queries
pub fn validate_range(range: Option<(DateTime<Utc>, DateTime<Utc>)>) -> GcSimResult<()> {
    if let Some((from, to)) = range {
        if from > to {
            return Err(GcSimError::validation(
                "range",
                "Start time must not be after end time",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcsim_core::{GcType, Verdict};

    #[test]
    fn test_allocate_request_validation() {
        assert!(AllocateRequest::new(1, 1, "Node").validate().is_ok());
        for (request, field) in [
            (AllocateRequest::new(0, 1, "Node"), "count"),
            (AllocateRequest::new(1, 0, "Node"), "size_kb"),
            (AllocateRequest::new(1, 1, "   "), "object_type"),
        ] {
            match request.validate() {
                Err(GcSimError::Validation { field: f, .. }) => assert_eq!(f, field),
                other => panic!("expected validation error for {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_create_references_defaults_true() {
        let request: AllocateRequest =
            serde_json::from_str(r#"{"count": 2, "size_kb": 8, "object_type": "Node"}"#).unwrap();
        assert!(request.create_references);
    }

    #[test]
    fn test_views_serialize_flat() {
        let view = GcEventView::from(GcEvent::new(GcType::Minor, 400, 100));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["gc_type"], "MINOR");
        assert_eq!(json["efficiency"], 0.75);

        let report = LeakReport::builder().verdict(Verdict::NoLeak).build();
        let json = serde_json::to_value(LeakReportView::from(report)).unwrap();
        assert_eq!(json["verdict"], "NO_LEAK");
        assert!(json["summary"].as_str().unwrap().starts_with("No memory leak"));
    }

    #[test]
    fn test_heap_utilization() {
        let snapshot = HeapSnapshot {
            id: None,
            timestamp: Utc::now(),
            total_heap_used: 512,
            live_objects_count: 1,
            unreachable_objects_count: 0,
            young_gen_size: Some(512),
            old_gen_size: Some(0),
        };
        assert_eq!(HeapState::from_snapshot(&snapshot, 1024).heap_utilization, 50.0);
    }
}
