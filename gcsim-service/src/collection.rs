//! GC服务

use std::sync::Arc;

use gcsim_core::GcSimResult;
use gcsim_engine::{CollectionKind, CollectorStats, GarbageCollector};

use crate::dto::GcEventView;

/// GC服务
#[derive(Debug, Clone)]
pub struct CollectionService {
    collector: Arc<GarbageCollector>,
}

impl CollectionService {
    pub fn new(collector: Arc<GarbageCollector>) -> Self {
        Self { collector }
    }

    /// 执行一次回收
    pub fn run(&self, kind: CollectionKind) -> GcSimResult<GcEventView> {
        self.collector.collect(kind).map(GcEventView::from)
    }

    /// GC历史，最新的在前
    pub fn history(&self) -> GcSimResult<Vec<GcEventView>> {
        Ok(self
            .collector
            .history()?
            .into_iter()
            .map(GcEventView::from)
            .collect())
    }

    /// 平均回收效率
    pub fn average_efficiency(&self) -> GcSimResult<Option<f64>> {
        self.collector.average_efficiency()
    }

    /// 进程内统计
    pub fn stats(&self) -> CollectorStats {
        self.collector.stats()
    }
}
