//! 堆模拟器
//!
//! 对象的分配、解除引用与晋升都通过注入的存储完成；模拟器本身只持有一个
//! 可随时重建的对象缓存。所有聚合值（堆大小、对象数）每次都从存储重新计算。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use gcsim_core::store::transaction;
use gcsim_core::{
    GcSimError, GcSimResult, Generation, HeapObject, HeapSnapshot, ObjectFilter, ObjectId,
    SharedStore, SimulatorConfig,
};
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 分代堆模拟器
pub struct HeapSimulator {
    store: SharedStore,
    config: SimulatorConfig,
    /// 对象缓存（非权威）
    cache: RwLock<HashMap<ObjectId, HeapObject>>,
    rng: Mutex<StdRng>,
}

impl HeapSimulator {
    /// 创建模拟器，随机源取自系统熵
    pub fn new(store: SharedStore, config: SimulatorConfig) -> Self {
        Self::with_rng(store, config, StdRng::from_entropy())
    }

    /// 使用固定种子创建模拟器，随机分配结果可复现
    pub fn with_seed(store: SharedStore, config: SimulatorConfig, seed: u64) -> Self {
        Self::with_rng(store, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(store: SharedStore, config: SimulatorConfig, rng: StdRng) -> Self {
        Self {
            store,
            config,
            cache: RwLock::new(HashMap::new()),
            rng: Mutex::new(rng),
        }
    }

    /// 模拟器配置
    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// 底层存储
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// 分配 `count` 个大小相同的对象
    ///
    /// 新对象位于年轻代，年龄为0，作为一个原子批次持久化。
    pub fn allocate(
        &self,
        count: u32,
        size_kb: u32,
        object_type: &str,
        create_references: bool,
    ) -> GcSimResult<Vec<HeapObject>> {
        let sizes = vec![size_kb; count as usize];
        let saved = self.persist_new_objects(&sizes, object_type, create_references)?;
        info!(
            "Allocated {} objects of type {} ({} KB each)",
            saved.len(),
            object_type,
            size_kb
        );
        Ok(saved)
    }

    /// 分配 `count` 个大小在 `[min_size_kb, max_size_kb]` 内均匀随机的对象
    ///
    /// 随机分配的对象总是被引用。
    pub fn allocate_random(
        &self,
        count: u32,
        min_size_kb: u32,
        max_size_kb: u32,
        object_type: &str,
    ) -> GcSimResult<Vec<HeapObject>> {
        if min_size_kb > max_size_kb {
            return Err(GcSimError::invalid_argument(format!(
                "min size {min_size_kb} KB exceeds max size {max_size_kb} KB"
            )));
        }

        let sizes: Vec<u32> = {
            let mut rng = self.rng.lock();
            (0..count)
                .map(|_| rng.gen_range(min_size_kb..=max_size_kb))
                .collect()
        };
        let saved = self.persist_new_objects(&sizes, object_type, true)?;
        info!(
            "Allocated {} random objects of type {} ({}-{} KB)",
            saved.len(),
            object_type,
            min_size_kb,
            max_size_kb
        );
        Ok(saved)
    }

    fn persist_new_objects(
        &self,
        sizes: &[u32],
        object_type: &str,
        referenced: bool,
    ) -> GcSimResult<Vec<HeapObject>> {
        if sizes.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let objects = sizes
            .iter()
            .map(|&size| HeapObject::new(size, object_type, referenced, now))
            .collect();
        let saved = transaction(self.store.as_ref(), || self.store.insert_objects(objects))?;
        self.cache_objects(&saved);
        Ok(saved)
    }

    /// 解除指定对象的引用
    ///
    /// 不存在的标识被忽略。返回实际更新的对象数。
    pub fn dereference(&self, ids: &[ObjectId]) -> GcSimResult<usize> {
        let updated = transaction(self.store.as_ref(), || {
            let mut objects = self.store.get_objects(ids)?;
            for object in &mut objects {
                object.referenced = false;
            }
            self.store.update_objects(&objects)?;
            Ok(objects)
        })?;
        self.cache_objects(&updated);
        info!(
            "Dereferenced {} of {} requested objects",
            updated.len(),
            ids.len()
        );
        Ok(updated.len())
    }

    /// 晋升扫描
    ///
    /// 所有年轻代对象年龄加1，达到阈值的对象晋升到老年代。
    /// 扫描过的对象都会写回存储。返回晋升的对象数。
    pub fn promote(&self) -> GcSimResult<usize> {
        let threshold = self.config.young_gen_threshold;
        let (scanned, promoted) = transaction(self.store.as_ref(), || {
            let mut young = self
                .store
                .find_objects(ObjectFilter::generation(Generation::Young))?;
            let mut promoted = 0;
            for object in &mut young {
                if object.age_one_cycle(threshold) {
                    promoted += 1;
                    debug!(
                        "Promoted object {:?} ({}) to old generation at age {}",
                        object.id, object.object_type, object.age
                    );
                }
            }
            self.store.update_objects(&young)?;
            Ok((young, promoted))
        })?;
        self.cache_objects(&scanned);
        info!(
            "Promotion pass: scanned {} young objects, promoted {}",
            scanned.len(),
            promoted
        );
        Ok(promoted)
    }

    /// 当前堆大小：仅统计被引用对象（KB）
    pub fn current_heap_size(&self) -> GcSimResult<u64> {
        self.store.sum_size(ObjectFilter::referenced(true))
    }

    /// 年轻代大小，含不可达对象（KB）
    pub fn young_gen_size(&self) -> GcSimResult<u64> {
        self.store.sum_size(ObjectFilter::generation(Generation::Young))
    }

    /// 老年代大小，含不可达对象（KB）
    pub fn old_gen_size(&self) -> GcSimResult<u64> {
        self.store.sum_size(ObjectFilter::generation(Generation::Old))
    }

    /// 存活（被引用）对象数
    pub fn live_object_count(&self) -> GcSimResult<u64> {
        self.store.count_objects(ObjectFilter::referenced(true))
    }

    /// 不可达对象数
    pub fn unreachable_object_count(&self) -> GcSimResult<u64> {
        self.store.count_objects(ObjectFilter::referenced(false))
    }

    /// 所有对象，按标识排序
    pub fn all_objects(&self) -> GcSimResult<Vec<HeapObject>> {
        self.store.find_objects(ObjectFilter::ALL)
    }

    /// 按标识查询对象，优先读缓存
    pub fn object(&self, id: ObjectId) -> GcSimResult<Option<HeapObject>> {
        if let Some(object) = self.cache.read().get(&id) {
            return Ok(Some(object.clone()));
        }
        let object = self.store.get_object(id)?;
        if let Some(object) = &object {
            self.cache.write().insert(id, object.clone());
        }
        Ok(object)
    }

    /// 删除所有对象并清空缓存，返回删除数量
    pub fn clear(&self) -> GcSimResult<usize> {
        let removed = self.store.delete_all_objects()?;
        self.cache.write().clear();
        info!("Cleared heap: removed {} objects", removed);
        Ok(removed)
    }

    /// 从存储重建缓存
    pub fn refresh_cache(&self) -> GcSimResult<()> {
        let objects = self.all_objects()?;
        let mut cache = self.cache.write();
        cache.clear();
        cache.extend(
            objects
                .into_iter()
                .filter_map(|object| object.id.map(|id| (id, object))),
        );
        debug!("Object cache rebuilt with {} entries", cache.len());
        Ok(())
    }

    /// 移除缓存条目
    pub fn evict(&self, ids: &[ObjectId]) {
        let mut cache = self.cache.write();
        for id in ids {
            cache.remove(id);
        }
    }

    /// 缓存中的条目数
    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }

    fn cache_objects(&self, objects: &[HeapObject]) {
        let mut cache = self.cache.write();
        for object in objects {
            if let Some(id) = object.id {
                cache.insert(id, object.clone());
            }
        }
    }

    /// 根据当前存储内容构建（未持久化的）堆快照
    pub fn current_state(&self) -> GcSimResult<HeapSnapshot> {
        transaction(self.store.as_ref(), || {
            Ok(HeapSnapshot {
                id: None,
                timestamp: Utc::now(),
                total_heap_used: self.current_heap_size()?,
                live_objects_count: self.live_object_count()?,
                unreachable_objects_count: self.unreachable_object_count()?,
                young_gen_size: Some(self.young_gen_size()?),
                old_gen_size: Some(self.old_gen_size()?),
            })
        })
    }

    /// 持久化当前堆快照
    pub fn capture_snapshot(&self) -> GcSimResult<HeapSnapshot> {
        let snapshot = transaction(self.store.as_ref(), || {
            self.store.append_snapshot(self.current_state()?)
        })?;
        debug!(
            "Captured heap snapshot {:?}: {} KB used, {} live, {} unreachable",
            snapshot.id,
            snapshot.total_heap_used,
            snapshot.live_objects_count,
            snapshot.unreachable_objects_count
        );
        Ok(snapshot)
    }

    /// 快照历史
    ///
    /// 未指定范围时返回全部快照（最新的在前）；指定范围时返回闭区间内的快照，按时间升序。
    pub fn snapshot_history(
        &self,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> GcSimResult<Vec<HeapSnapshot>> {
        match range {
            Some((from, to)) => self.store.snapshots_between(from, to),
            None => self.store.snapshots_desc(),
        }
    }
}

impl std::fmt::Debug for HeapSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapSimulator")
            .field("config", &self.config)
            .field("cached_objects", &self.cached_len())
            .finish_non_exhaustive()
    }
}
