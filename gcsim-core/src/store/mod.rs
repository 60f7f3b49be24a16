//! 存储接口
//!
//! 模拟器核心只依赖这里定义的能力：对象存储、快照存储、事件存储、报告存储，
//! 以及把多次写入组合为一个原子操作的事务能力。

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::model::{GcEvent, Generation, HeapObject, HeapSnapshot, LeakReport, ObjectId};
use crate::{GcSimError, GcSimResult};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// 对象查询条件，`None` 表示不限制
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectFilter {
    /// 按引用标记过滤
    pub referenced: Option<bool>,
    /// 按代过滤
    pub generation: Option<Generation>,
}

impl ObjectFilter {
    /// 不过滤
    pub const ALL: ObjectFilter = ObjectFilter {
        referenced: None,
        generation: None,
    };

    /// 按引用标记过滤
    pub fn referenced(referenced: bool) -> Self {
        Self {
            referenced: Some(referenced),
            generation: None,
        }
    }

    /// 按代过滤
    pub fn generation(generation: Generation) -> Self {
        Self {
            referenced: None,
            generation: Some(generation),
        }
    }

    /// 指定代中的不可达对象
    pub fn unreachable_in(generation: Generation) -> Self {
        Self {
            referenced: Some(false),
            generation: Some(generation),
        }
    }

    /// 对象是否满足条件
    pub fn matches(&self, object: &HeapObject) -> bool {
        self.referenced.is_none_or(|r| object.referenced == r)
            && self.generation.is_none_or(|g| object.generation == g)
    }
}

/// 堆对象存储
pub trait ObjectStore: Send + Sync {
    /// 批量插入，返回带有分配标识的对象
    fn insert_objects(&self, objects: Vec<HeapObject>) -> GcSimResult<Vec<HeapObject>>;

    /// 批量更新已持久化的对象
    fn update_objects(&self, objects: &[HeapObject]) -> GcSimResult<()>;

    /// 按标识查询
    fn get_object(&self, id: ObjectId) -> GcSimResult<Option<HeapObject>>;

    /// 按标识批量查询，忽略不存在的标识，结果按标识排序
    fn get_objects(&self, ids: &[ObjectId]) -> GcSimResult<Vec<HeapObject>>;

    /// 条件查询，结果按标识排序
    fn find_objects(&self, filter: ObjectFilter) -> GcSimResult<Vec<HeapObject>>;

    /// 删除指定对象，返回实际删除数量
    fn delete_objects(&self, ids: &[ObjectId]) -> GcSimResult<usize>;

    /// 删除所有对象
    fn delete_all_objects(&self) -> GcSimResult<usize>;

    /// 满足条件的对象大小总和（KB）
    fn sum_size(&self, filter: ObjectFilter) -> GcSimResult<u64>;

    /// 满足条件的对象数量
    fn count_objects(&self, filter: ObjectFilter) -> GcSimResult<u64>;
}

/// 堆快照存储
pub trait SnapshotStore: Send + Sync {
    /// 追加快照
    fn append_snapshot(&self, snapshot: HeapSnapshot) -> GcSimResult<HeapSnapshot>;

    /// 所有快照，最新的在前
    fn snapshots_desc(&self) -> GcSimResult<Vec<HeapSnapshot>>;

    /// 时间范围内（闭区间）的快照，按时间升序
    fn snapshots_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> GcSimResult<Vec<HeapSnapshot>>;

    /// 最早的快照
    fn first_snapshot(&self) -> GcSimResult<Option<HeapSnapshot>>;

    /// 最新的快照
    fn latest_snapshot(&self) -> GcSimResult<Option<HeapSnapshot>>;
}

/// GC事件存储
pub trait EventStore: Send + Sync {
    /// 追加事件
    fn append_event(&self, event: GcEvent) -> GcSimResult<GcEvent>;

    /// 所有事件，最新的在前
    fn events_desc(&self) -> GcSimResult<Vec<GcEvent>>;

    /// `reclaimed / before` 的平均值，仅统计 `before > 0` 的事件
    fn average_efficiency(&self) -> GcSimResult<Option<f64>>;
}

/// 泄漏报告存储
pub trait ReportStore: Send + Sync {
    /// 追加报告
    fn append_report(&self, report: LeakReport) -> GcSimResult<LeakReport>;

    /// 所有报告，最新的在前
    fn reports_desc(&self) -> GcSimResult<Vec<LeakReport>>;

    /// 最新的报告
    fn latest_report(&self) -> GcSimResult<Option<LeakReport>>;
}

/// 事务能力
///
/// `atomically` 内的所有写入要么全部可见，要么全部不可见。嵌套调用加入外层事务。
pub trait Transactional: Send + Sync {
    /// 在事务中执行 `body`，返回错误时回滚
    fn atomically(&self, body: &mut dyn FnMut() -> GcSimResult<()>) -> GcSimResult<()>;
}

/// 模拟器需要的全部存储能力
pub trait HeapStore: ObjectStore + SnapshotStore + EventStore + ReportStore + Transactional {}

impl<T> HeapStore for T where T: ObjectStore + SnapshotStore + EventStore + ReportStore + Transactional
{}

/// 共享的存储句柄
pub type SharedStore = Arc<dyn HeapStore>;

/// 在事务中执行带返回值的闭包
pub fn transaction<S, T, F>(store: &S, body: F) -> GcSimResult<T>
where
    S: Transactional + ?Sized,
    F: FnOnce() -> GcSimResult<T>,
{
    let mut body = Some(body);
    let mut output = None;
    store.atomically(&mut || {
        if let Some(body) = body.take() {
            output = Some(body()?);
        }
        Ok(())
    })?;
    output.ok_or_else(|| GcSimError::store("transaction body did not run"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches() {
        let mut obj = HeapObject::new(10, "Node", false, Utc::now());
        assert!(ObjectFilter::ALL.matches(&obj));
        assert!(ObjectFilter::unreachable_in(Generation::Young).matches(&obj));
        assert!(!ObjectFilter::referenced(true).matches(&obj));

        obj.generation = Generation::Old;
        assert!(!ObjectFilter::generation(Generation::Young).matches(&obj));
        assert!(ObjectFilter::unreachable_in(Generation::Old).matches(&obj));
    }
}
