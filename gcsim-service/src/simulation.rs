//! 堆模拟服务

use std::sync::Arc;

use chrono::{DateTime, Utc};
use gcsim_core::store::transaction;
use gcsim_core::{GcSimError, GcSimResult, HeapObject, HeapSnapshot, ObjectFilter};
use gcsim_engine::HeapSimulator;
use log::info;

use crate::dto::{AllocateRequest, DereferenceRequest, HeapState, validate_range};

/// 循环引用演示使用的对象类型
pub const CYCLIC_OBJECT_TYPE: &str = "CyclicReference";

/// 堆模拟服务：在模拟器之上做输入校验
#[derive(Debug, Clone)]
pub struct SimulationService {
    simulator: Arc<HeapSimulator>,
}

impl SimulationService {
    pub fn new(simulator: Arc<HeapSimulator>) -> Self {
        Self { simulator }
    }

    /// 批量分配
    pub fn allocate(&self, request: &AllocateRequest) -> GcSimResult<Vec<HeapObject>> {
        request.validate()?;
        self.simulator.allocate(
            request.count,
            request.size_kb,
            request.object_type.trim(),
            request.create_references,
        )
    }

    /// 随机大小批量分配
    pub fn allocate_random(
        &self,
        count: u32,
        min_size_kb: u32,
        max_size_kb: u32,
        object_type: &str,
    ) -> GcSimResult<Vec<HeapObject>> {
        if count < 1 {
            return Err(GcSimError::validation("count", "Count must be at least 1"));
        }
        if min_size_kb < 1 {
            return Err(GcSimError::validation("min_size", "Size must be at least 1 KB"));
        }
        if object_type.trim().is_empty() {
            return Err(GcSimError::validation("object_type", "Object type is required"));
        }
        self.simulator
            .allocate_random(count, min_size_kb, max_size_kb, object_type.trim())
    }

    /// 解除引用，返回请求中的标识数量
    pub fn dereference(&self, request: &DereferenceRequest) -> GcSimResult<usize> {
        request.validate()?;
        let updated = self.simulator.dereference(&request.object_ids)?;
        info!(
            "Dereference request: {} ids, {} objects updated",
            request.object_ids.len(),
            updated
        );
        Ok(request.object_ids.len())
    }

    /// 随机解除一定比例对象的引用
    ///
    /// 数量按全部对象计算并向上取整，从被引用对象中按存储顺序选取。
    /// 返回实际解除引用的数量。
    pub fn dereference_random(&self, percentage: u32) -> GcSimResult<usize> {
        if percentage > 100 {
            return Err(GcSimError::validation(
                "percentage",
                "Percentage must be between 0 and 100",
            ));
        }

        let store = self.simulator.store();
        let (total, updated) = transaction(store.as_ref(), || {
            let total = store.count_objects(ObjectFilter::ALL)?;
            let target = (total * u64::from(percentage)).div_ceil(100) as usize;
            let ids: Vec<u64> = store
                .find_objects(ObjectFilter::referenced(true))?
                .into_iter()
                .filter_map(|o| o.id)
                .take(target)
                .collect();
            Ok((total, self.simulator.dereference(&ids)?))
        })?;
        info!(
            "Randomly dereferenced {} objects ({}% of {})",
            updated, percentage, total
        );
        Ok(updated)
    }

    /// 分配一条循环引用链
    pub fn allocate_cyclic(&self, chain_length: u32, size_kb: u32) -> GcSimResult<Vec<HeapObject>> {
        if chain_length < 1 {
            return Err(GcSimError::validation(
                "chain_length",
                "Chain length must be at least 1",
            ));
        }
        if size_kb < 1 {
            return Err(GcSimError::validation("size_kb", "Size must be at least 1 KB"));
        }
        let chain = self
            .simulator
            .allocate(chain_length, size_kb, CYCLIC_OBJECT_TYPE, true)?;
        info!("Created cyclic reference chain of {} objects", chain.len());
        Ok(chain)
    }

    /// 当前堆状态
    pub fn heap_state(&self) -> GcSimResult<HeapState> {
        let snapshot = self.simulator.current_state()?;
        Ok(HeapState::from_snapshot(
            &snapshot,
            self.simulator.config().max_heap_size_kb,
        ))
    }

    /// 所有对象
    pub fn objects(&self) -> GcSimResult<Vec<HeapObject>> {
        self.simulator.all_objects()
    }

    /// 持久化一次堆快照
    pub fn create_snapshot(&self) -> GcSimResult<HeapSnapshot> {
        self.simulator.capture_snapshot()
    }

    /// 快照历史
    pub fn heap_history(
        &self,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> GcSimResult<Vec<HeapSnapshot>> {
        validate_range(range)?;
        self.simulator.snapshot_history(range)
    }

    /// 清空堆
    pub fn clear(&self) -> GcSimResult<usize> {
        self.simulator.clear()
    }
}
