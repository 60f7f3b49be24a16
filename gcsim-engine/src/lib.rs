//! 分代堆模拟与回收引擎
//!
//! - [`HeapSimulator`]：对象分配、解除引用、晋升扫描与堆快照
//! - [`GarbageCollector`]：Minor / Major / Full 回收周期

pub mod collector;
pub mod simulator;

pub use collector::{CollectionKind, CollectorStats, GarbageCollector};
pub use simulator::HeapSimulator;
