//! 内存泄漏分析器

use std::sync::Arc;

use gcsim_core::store::transaction;
use gcsim_core::{GcSimResult, LeakReport};
use gcsim_engine::{GarbageCollector, HeapSimulator};
use log::{debug, info};

use crate::signals::{self, LeakSignals};

/// 基于堆快照、GC事件与对象分布的泄漏分析器
pub struct LeakAnalyzer {
    simulator: Arc<HeapSimulator>,
    collector: Arc<GarbageCollector>,
}

impl LeakAnalyzer {
    /// 创建分析器
    pub fn new(simulator: Arc<HeapSimulator>, collector: Arc<GarbageCollector>) -> Self {
        Self {
            simulator,
            collector,
        }
    }

    /// 根据当前历史计算所有信号
    pub fn signals(&self) -> GcSimResult<LeakSignals> {
        let store = self.simulator.store();
        let snapshots = store.snapshots_desc()?;
        let first = store.first_snapshot()?;
        let latest = store.latest_snapshot()?;
        let events = self.collector.history()?;
        let average = self.collector.average_efficiency()?;

        let signals = LeakSignals {
            heap_growth_rate: signals::heap_growth_rate(first.as_ref(), latest.as_ref()),
            gc_efficiency: signals::gc_efficiency(average, &events),
            old_gen_growth_rate: signals::old_gen_growth_rate(&snapshots),
            live_object_stagnation: signals::live_object_stagnation(&snapshots),
            live_object_ratio: signals::live_object_ratio(
                self.simulator.live_object_count()?,
                self.simulator.unreachable_object_count()?,
            ),
        };
        debug!("Leak signals: {:?}", signals);
        Ok(signals)
    }

    /// 采集快照、计算信号并持久化一份新报告
    pub fn analyze_and_generate_report(&self) -> GcSimResult<LeakReport> {
        let store = self.simulator.store();
        let report = transaction(store.as_ref(), || {
            self.simulator.capture_snapshot()?;
            let signals = self.signals()?;
            let score = signals.suspicion_score();

            let objects = self.simulator.all_objects()?;
            let first = store.first_snapshot()?;
            let latest = store.latest_snapshot()?;

            let report = LeakReport::builder()
                .suspicion_score(score)
                .leaking_object_types(signals::leaking_object_types(&objects))
                .suspected_leak_duration(signals::suspected_leak_duration(
                    first.as_ref(),
                    latest.as_ref(),
                ))
                .heap_growth_rate(signals.heap_growth_rate)
                .gc_efficiency(signals.gc_efficiency)
                .old_gen_growth_rate(signals.old_gen_growth_rate)
                .live_object_stagnation(signals.live_object_stagnation)
                .verdict(signals::determine_verdict(score))
                .build();
            store.append_report(report)
        })?;

        info!(
            "Leak analysis complete: score {:.2}, verdict {}, leaking types: {}",
            report.suspicion_score, report.verdict, report.leaking_object_types
        );
        Ok(report)
    }

    /// 所有报告，最新的在前
    pub fn reports(&self) -> GcSimResult<Vec<LeakReport>> {
        self.simulator.store().reports_desc()
    }

    /// 最新的报告
    pub fn latest_report(&self) -> GcSimResult<Option<LeakReport>> {
        self.simulator.store().latest_report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcsim_core::{MemoryStore, SimulatorConfig, Verdict};

    fn analyzer() -> LeakAnalyzer {
        let simulator = Arc::new(HeapSimulator::new(
            Arc::new(MemoryStore::new()),
            SimulatorConfig::default(),
        ));
        let collector = Arc::new(GarbageCollector::new(simulator.clone()));
        LeakAnalyzer::new(simulator, collector)
    }

    #[test]
    fn test_fresh_heap_report() {
        let analyzer = analyzer();
        let report = analyzer.analyze_and_generate_report().unwrap();
        assert!(report.id.is_some());
        assert_eq!(report.gc_efficiency, 1.0);
        assert_eq!(report.heap_growth_rate, 0.0);
        assert_eq!(report.suspicion_score, 0.0);
        assert_eq!(report.verdict, Verdict::NoLeak);
        assert_eq!(report.leaking_object_types, signals::NONE_IDENTIFIED);
        assert_eq!(report.suspected_leak_duration, 0);
        assert_eq!(analyzer.latest_report().unwrap(), Some(report));
    }

    #[test]
    fn test_signals_do_not_capture_snapshots() {
        let analyzer = analyzer();
        analyzer.signals().unwrap();
        assert!(analyzer.simulator.snapshot_history(None).unwrap().is_empty());

        analyzer.analyze_and_generate_report().unwrap();
        analyzer.analyze_and_generate_report().unwrap();
        assert_eq!(analyzer.simulator.snapshot_history(None).unwrap().len(), 2);
        assert_eq!(analyzer.reports().unwrap().len(), 2);
    }
}
