//! 泄漏分析服务

use std::sync::Arc;

use chrono::{DateTime, Utc};
use gcsim_analyzer::{LeakAnalyzer, LeakSignals};
use gcsim_core::{GcSimResult, HeapSnapshot};
use gcsim_engine::HeapSimulator;

use crate::dto::{GcEventView, LeakReportView, validate_range};

/// 泄漏分析服务
#[derive(Clone)]
pub struct AnalysisService {
    analyzer: Arc<LeakAnalyzer>,
    simulator: Arc<HeapSimulator>,
}

impl AnalysisService {
    pub fn new(analyzer: Arc<LeakAnalyzer>, simulator: Arc<HeapSimulator>) -> Self {
        Self {
            analyzer,
            simulator,
        }
    }

    /// 生成并保存一份新报告
    pub fn generate_report(&self) -> GcSimResult<LeakReportView> {
        self.analyzer
            .analyze_and_generate_report()
            .map(LeakReportView::from)
    }

    /// 当前信号（不采集快照，不保存报告）
    pub fn signals(&self) -> GcSimResult<LeakSignals> {
        self.analyzer.signals()
    }

    /// 快照历史
    pub fn heap_history(
        &self,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> GcSimResult<Vec<HeapSnapshot>> {
        validate_range(range)?;
        self.simulator.snapshot_history(range)
    }

    /// GC事件，最新的在前
    pub fn gc_events(&self) -> GcSimResult<Vec<GcEventView>> {
        Ok(self
            .simulator
            .store()
            .events_desc()?
            .into_iter()
            .map(GcEventView::from)
            .collect())
    }

    /// 所有报告，最新的在前
    pub fn reports(&self) -> GcSimResult<Vec<LeakReportView>> {
        Ok(self
            .analyzer
            .reports()?
            .into_iter()
            .map(LeakReportView::from)
            .collect())
    }

    /// 最新的报告
    pub fn latest_report(&self) -> GcSimResult<Option<LeakReportView>> {
        Ok(self.analyzer.latest_report()?.map(LeakReportView::from))
    }
}
