//! Generational heap simulator core
//!
//! Shared building blocks for the simulator, collector and leak analyzer:
//! - Data model (heap objects, snapshots, GC events, leak reports)
//! - Error types
//! - Simulator configuration
//! - Store traits with in-memory and SQLite backends

pub mod config;
pub mod error;
pub mod model;
pub mod store;

pub use config::SimulatorConfig;
pub use error::{GcSimError, GcSimResult};
pub use model::{
    GcEvent, GcType, Generation, HeapObject, HeapSnapshot, LeakReport, LeakReportBuilder,
    ObjectId, Verdict,
};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
pub use store::{
    EventStore, HeapStore, MemoryStore, ObjectFilter, ObjectStore, ReportStore, SharedStore,
    SnapshotStore, Transactional, transaction,
};
