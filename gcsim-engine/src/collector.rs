//! 垃圾回收器
//!
//! 每个回收周期在一个存储事务中完成：删除不可达对象、（可选）晋升扫描、
//! 记录一条 GC 事件并采集一次堆快照。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use gcsim_core::store::transaction;
use gcsim_core::{GcEvent, GcSimError, GcSimResult, GcType, Generation, ObjectFilter, ObjectId};
use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::simulator::HeapSimulator;

/// 回收类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    /// 年轻代回收
    Minor,
    /// 老年代回收
    Major,
    /// 全堆回收
    Full,
}

impl CollectionKind {
    /// 持久化的事件类型，Full GC 记录为 `MAJOR`
    pub fn gc_type(&self) -> GcType {
        match self {
            CollectionKind::Minor => GcType::Minor,
            CollectionKind::Major | CollectionKind::Full => GcType::Major,
        }
    }

    fn victims(&self) -> ObjectFilter {
        match self {
            CollectionKind::Minor => ObjectFilter::unreachable_in(Generation::Young),
            CollectionKind::Major => ObjectFilter::unreachable_in(Generation::Old),
            CollectionKind::Full => ObjectFilter::referenced(false),
        }
    }

    fn promotes(&self) -> bool {
        !matches!(self, CollectionKind::Major)
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CollectionKind::Minor => "minor",
            CollectionKind::Major => "major",
            CollectionKind::Full => "full",
        };
        f.write_str(name)
    }
}

/// 回收器统计（进程内）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorStats {
    /// Minor GC 次数
    pub minor_collections: u64,
    /// Major GC 次数
    pub major_collections: u64,
    /// Full GC 次数
    pub full_collections: u64,
    /// 累计回收内存（KB）
    pub total_reclaimed_kb: u64,
    /// 累计回收对象数
    pub total_objects_collected: u64,
    /// 累计晋升对象数
    pub total_promoted: u64,
}

impl CollectorStats {
    fn record(&mut self, kind: CollectionKind, event: &GcEvent, promoted: usize) {
        match kind {
            CollectionKind::Minor => self.minor_collections += 1,
            CollectionKind::Major => self.major_collections += 1,
            CollectionKind::Full => self.full_collections += 1,
        }
        self.total_reclaimed_kb += event.reclaimed_memory;
        self.total_objects_collected += event.objects_collected;
        self.total_promoted += promoted as u64;
    }
}

/// 周期结束时（包括出错返回）复位运行标记
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 分代垃圾回收器
pub struct GarbageCollector {
    simulator: Arc<HeapSimulator>,
    gc_in_progress: AtomicBool,
    stats: Mutex<CollectorStats>,
}

impl GarbageCollector {
    /// 创建回收器
    pub fn new(simulator: Arc<HeapSimulator>) -> Self {
        Self {
            simulator,
            gc_in_progress: AtomicBool::new(false),
            stats: Mutex::new(CollectorStats::default()),
        }
    }

    /// 关联的模拟器
    pub fn simulator(&self) -> &Arc<HeapSimulator> {
        &self.simulator
    }

    /// 年轻代GC：回收不可达的年轻代对象，然后执行晋升扫描
    pub fn minor(&self) -> GcSimResult<GcEvent> {
        self.collect(CollectionKind::Minor)
    }

    /// 老年代GC：回收不可达的老年代对象，不晋升
    pub fn major(&self) -> GcSimResult<GcEvent> {
        self.collect(CollectionKind::Major)
    }

    /// Full GC（年轻代 + 老年代），记录为 `MAJOR`
    pub fn full(&self) -> GcSimResult<GcEvent> {
        self.collect(CollectionKind::Full)
    }

    /// 执行一次指定类型的回收
    pub fn collect(&self, kind: CollectionKind) -> GcSimResult<GcEvent> {
        let _guard = self.begin_cycle()?;

        let result = transaction(self.simulator.store().as_ref(), || self.run_cycle(kind));
        match result {
            Ok((event, promoted)) => {
                self.stats.lock().record(kind, &event, promoted);
                info!(
                    "{} GC: {} KB -> {} KB, reclaimed {} KB from {} objects, promoted {}",
                    kind,
                    event.before_heap,
                    event.after_heap,
                    event.reclaimed_memory,
                    event.objects_collected,
                    promoted
                );
                Ok(event)
            }
            Err(err) => {
                warn!("{} GC failed: {}", kind, err);
                if let Err(refresh_err) = self.simulator.refresh_cache() {
                    warn!("Object cache rebuild failed: {}", refresh_err);
                }
                Err(err)
            }
        }
    }

    fn begin_cycle(&self) -> GcSimResult<CycleGuard<'_>> {
        self.gc_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| GcSimError::CycleInProgress)?;
        Ok(CycleGuard(&self.gc_in_progress))
    }

    fn run_cycle(&self, kind: CollectionKind) -> GcSimResult<(GcEvent, usize)> {
        let store = self.simulator.store();
        let before = self.simulator.current_heap_size()?;

        let victims = store.find_objects(kind.victims())?;
        let reclaimed: u64 = victims.iter().map(|o| u64::from(o.size_kb)).sum();
        let ids: Vec<ObjectId> = victims.iter().filter_map(|o| o.id).collect();
        let collected = store.delete_objects(&ids)?;
        self.simulator.evict(&ids);

        let promoted = if kind.promotes() {
            self.simulator.promote()?
        } else {
            0
        };

        let after = self.simulator.current_heap_size()?;
        let event = store.append_event(
            GcEvent::new(kind.gc_type(), before, after)
                .with_reclaimed(reclaimed)
                .with_objects_collected(collected as u64),
        )?;
        self.simulator.capture_snapshot()?;
        Ok((event, promoted))
    }

    /// 是否有回收周期正在运行
    pub fn is_gc_in_progress(&self) -> bool {
        self.gc_in_progress.load(Ordering::Acquire)
    }

    /// 所有GC事件，最新的在前
    pub fn history(&self) -> GcSimResult<Vec<GcEvent>> {
        self.simulator.store().events_desc()
    }

    /// 平均回收效率；没有 `before > 0` 的事件时为 `None`
    pub fn average_efficiency(&self) -> GcSimResult<Option<f64>> {
        self.simulator.store().average_efficiency()
    }

    /// 获取统计信息
    pub fn stats(&self) -> CollectorStats {
        self.stats.lock().clone()
    }
}

impl fmt::Debug for GarbageCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GarbageCollector")
            .field("gc_in_progress", &self.is_gc_in_progress())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcsim_core::{MemoryStore, SharedStore, SimulatorConfig};

    fn collector(threshold: u32) -> GarbageCollector {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let config = SimulatorConfig::default().with_young_gen_threshold(threshold);
        GarbageCollector::new(Arc::new(HeapSimulator::new(store, config)))
    }

    #[test]
    fn test_reentrant_cycle_rejected() {
        let gc = collector(10);
        let guard = gc.begin_cycle().unwrap();
        assert!(gc.is_gc_in_progress());
        assert!(matches!(gc.minor(), Err(GcSimError::CycleInProgress)));
        assert!(matches!(gc.full(), Err(GcSimError::CycleInProgress)));
        drop(guard);

        assert!(!gc.is_gc_in_progress());
        assert!(gc.minor().is_ok());
        assert!(!gc.is_gc_in_progress());
    }

    #[test]
    fn test_full_gc_recorded_as_major() {
        let gc = collector(10);
        let sim = gc.simulator().clone();
        sim.allocate(2, 30, "Node", false).unwrap();

        let event = gc.full().unwrap();
        assert_eq!(event.gc_type, GcType::Major);
        assert_eq!(event.reclaimed_memory, 60);
        assert_eq!(event.objects_collected, 2);
        assert_eq!(gc.stats().full_collections, 1);
        assert_eq!(gc.stats().major_collections, 0);
    }

    #[test]
    fn test_major_collects_old_only_and_skips_promotion() {
        let gc = collector(1);
        let sim = gc.simulator().clone();
        let old = sim.allocate(1, 40, "Cache", true).unwrap();
        sim.promote().unwrap();
        sim.dereference(&[old[0].id.unwrap()]).unwrap();
        sim.allocate(1, 10, "Temp", false).unwrap();

        let event = gc.major().unwrap();
        assert_eq!(event.reclaimed_memory, 40);
        assert_eq!(event.objects_collected, 1);
        let remaining = sim.all_objects().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].age, 0);
        assert!(remaining[0].is_young());
    }

    #[test]
    fn test_cycle_captures_snapshot() {
        let gc = collector(10);
        let sim = gc.simulator().clone();
        sim.allocate(3, 10, "Node", true).unwrap();
        gc.minor().unwrap();

        let snapshots = sim.snapshot_history(None).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].total_heap_used, 30);
        assert_eq!(gc.history().unwrap().len(), 1);
    }
}
