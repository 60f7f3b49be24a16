//! 模拟堆数据模型
//!
//! 堆对象、堆快照、GC事件与泄漏报告。所有记录的 `id` 在持久化前为 `None`，
//! 由存储层分配。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{GcSimError, GcSimResult};

/// 堆对象标识
pub type ObjectId = u64;

/// 代
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Generation {
    /// 年轻代
    Young,
    /// 老年代
    Old,
}

impl Generation {
    /// 持久化使用的名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Generation::Young => "YOUNG",
            Generation::Old => "OLD",
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Generation {
    type Err = GcSimError;

    fn from_str(s: &str) -> GcSimResult<Self> {
        match s {
            "YOUNG" => Ok(Generation::Young),
            "OLD" => Ok(Generation::Old),
            other => Err(GcSimError::store(format!("unknown generation `{other}`"))),
        }
    }
}

/// 模拟堆对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeapObject {
    /// 存储分配的标识
    pub id: Option<ObjectId>,
    /// 对象大小（KB）
    pub size_kb: u32,
    /// 分配时间
    pub allocation_time: DateTime<Utc>,
    /// 最近访问时间
    pub last_access_time: DateTime<Utc>,
    /// 是否仍被引用（由调用者控制，不通过遍历计算）
    pub referenced: bool,
    /// 对象类型标签
    pub object_type: String,
    /// 所在代
    pub generation: Generation,
    /// 经历过的晋升扫描次数
    pub age: u32,
}

impl HeapObject {
    /// 创建新分配的对象：年轻代，年龄为0
    pub fn new(
        size_kb: u32,
        object_type: impl Into<String>,
        referenced: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            size_kb,
            allocation_time: now,
            last_access_time: now,
            referenced,
            object_type: object_type.into(),
            generation: Generation::Young,
            age: 0,
        }
    }

    /// 是否位于年轻代
    pub fn is_young(&self) -> bool {
        self.generation == Generation::Young
    }

    /// 增加年龄，达到阈值时晋升到老年代
    ///
    /// 只对年轻代对象生效。返回本次调用是否发生了晋升。
    pub fn age_one_cycle(&mut self, threshold: u32) -> bool {
        if !self.is_young() {
            return false;
        }
        self.age = self.age.saturating_add(1);
        if self.age >= threshold {
            self.generation = Generation::Old;
            return true;
        }
        false
    }
}

/// 堆快照（不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeapSnapshot {
    /// 存储分配的标识
    pub id: Option<u64>,
    /// 采样时间
    pub timestamp: DateTime<Utc>,
    /// 被引用对象的总大小（KB）
    pub total_heap_used: u64,
    /// 存活对象数
    pub live_objects_count: u64,
    /// 不可达对象数
    pub unreachable_objects_count: u64,
    /// 年轻代大小（KB，含不可达对象）
    pub young_gen_size: Option<u64>,
    /// 老年代大小（KB，含不可达对象）
    pub old_gen_size: Option<u64>,
}

/// GC事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GcType {
    /// 年轻代回收
    Minor,
    /// 老年代回收（Full GC 也记录为该类型）
    Major,
}

impl GcType {
    /// 持久化使用的名称
    pub fn as_str(&self) -> &'static str {
        match self {
            GcType::Minor => "MINOR",
            GcType::Major => "MAJOR",
        }
    }
}

impl fmt::Display for GcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GcType {
    type Err = GcSimError;

    fn from_str(s: &str) -> GcSimResult<Self> {
        match s {
            "MINOR" => Ok(GcType::Minor),
            "MAJOR" => Ok(GcType::Major),
            other => Err(GcSimError::store(format!("unknown gc type `{other}`"))),
        }
    }
}

/// 单次回收周期的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcEvent {
    /// 存储分配的标识
    pub id: Option<u64>,
    /// 事件类型
    pub gc_type: GcType,
    /// 回收前堆大小（KB）
    pub before_heap: u64,
    /// 回收后堆大小（KB）
    pub after_heap: u64,
    /// 回收的内存（KB）
    pub reclaimed_memory: u64,
    /// 回收的对象数
    pub objects_collected: u64,
    /// 事件时间
    pub timestamp: DateTime<Utc>,
}

impl GcEvent {
    /// 创建事件，回收量默认取 `before - after`
    pub fn new(gc_type: GcType, before_heap: u64, after_heap: u64) -> Self {
        Self {
            id: None,
            gc_type,
            before_heap,
            after_heap,
            reclaimed_memory: before_heap.saturating_sub(after_heap),
            objects_collected: 0,
            timestamp: Utc::now(),
        }
    }

    /// 显式设置回收量
    pub fn with_reclaimed(mut self, reclaimed_memory: u64) -> Self {
        self.reclaimed_memory = reclaimed_memory;
        self
    }

    /// 设置回收对象数
    pub fn with_objects_collected(mut self, objects_collected: u64) -> Self {
        self.objects_collected = objects_collected;
        self
    }

    /// 设置事件时间
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// 回收效率 `reclaimed / before`，回收前堆为空时为0
    pub fn efficiency(&self) -> f64 {
        if self.before_heap == 0 {
            return 0.0;
        }
        self.reclaimed_memory as f64 / self.before_heap as f64
    }
}

/// 泄漏判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// 无泄漏
    NoLeak,
    /// 可能泄漏
    PossibleLeak,
    /// 高概率泄漏
    HighProbabilityLeak,
}

impl Verdict {
    /// 持久化使用的名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::NoLeak => "NO_LEAK",
            Verdict::PossibleLeak => "POSSIBLE_LEAK",
            Verdict::HighProbabilityLeak => "HIGH_PROBABILITY_LEAK",
        }
    }

    /// 面向用户的结论说明
    pub fn summary(&self) -> &'static str {
        match self {
            Verdict::NoLeak => "No memory leak detected. Heap behavior is normal.",
            Verdict::PossibleLeak => {
                "Possible memory leak detected. Monitor heap growth and GC efficiency."
            }
            Verdict::HighProbabilityLeak => {
                "High probability of memory leak. Immediate investigation recommended."
            }
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = GcSimError;

    fn from_str(s: &str) -> GcSimResult<Self> {
        match s {
            "NO_LEAK" => Ok(Verdict::NoLeak),
            "POSSIBLE_LEAK" => Ok(Verdict::PossibleLeak),
            "HIGH_PROBABILITY_LEAK" => Ok(Verdict::HighProbabilityLeak),
            other => Err(GcSimError::store(format!("unknown verdict `{other}`"))),
        }
    }
}

/// 泄漏分析报告（只追加）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakReport {
    /// 存储分配的标识
    pub id: Option<u64>,
    /// 可疑度评分（0-100）
    pub suspicion_score: f64,
    /// 疑似泄漏的对象类型摘要
    pub leaking_object_types: String,
    /// 疑似泄漏持续时间（秒）
    pub suspected_leak_duration: i64,
    /// 堆增长率（KB/秒）
    pub heap_growth_rate: f64,
    /// GC效率
    pub gc_efficiency: f64,
    /// 老年代增长率（KB/秒）
    pub old_gen_growth_rate: f64,
    /// 存活对象停滞度
    pub live_object_stagnation: f64,
    /// 判定结果
    pub verdict: Verdict,
    /// 生成时间
    pub created_at: DateTime<Utc>,
}

impl LeakReport {
    /// 创建报告构建器
    pub fn builder() -> LeakReportBuilder {
        LeakReportBuilder::default()
    }
}

/// [`LeakReport`] 构建器
#[derive(Debug, Clone, Default)]
pub struct LeakReportBuilder {
    suspicion_score: f64,
    leaking_object_types: Option<String>,
    suspected_leak_duration: i64,
    heap_growth_rate: f64,
    gc_efficiency: f64,
    old_gen_growth_rate: f64,
    live_object_stagnation: f64,
    verdict: Option<Verdict>,
    created_at: Option<DateTime<Utc>>,
}

impl LeakReportBuilder {
    pub fn suspicion_score(mut self, score: f64) -> Self {
        self.suspicion_score = score;
        self
    }

    pub fn leaking_object_types(mut self, types: impl Into<String>) -> Self {
        self.leaking_object_types = Some(types.into());
        self
    }

    pub fn suspected_leak_duration(mut self, seconds: i64) -> Self {
        self.suspected_leak_duration = seconds;
        self
    }

    pub fn heap_growth_rate(mut self, rate: f64) -> Self {
        self.heap_growth_rate = rate;
        self
    }

    pub fn gc_efficiency(mut self, efficiency: f64) -> Self {
        self.gc_efficiency = efficiency;
        self
    }

    pub fn old_gen_growth_rate(mut self, rate: f64) -> Self {
        self.old_gen_growth_rate = rate;
        self
    }

    pub fn live_object_stagnation(mut self, stagnation: f64) -> Self {
        self.live_object_stagnation = stagnation;
        self
    }

    pub fn verdict(mut self, verdict: Verdict) -> Self {
        self.verdict = Some(verdict);
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// 构建报告；未设置的生成时间取当前时间
    pub fn build(self) -> LeakReport {
        LeakReport {
            id: None,
            suspicion_score: self.suspicion_score,
            leaking_object_types: self.leaking_object_types.unwrap_or_default(),
            suspected_leak_duration: self.suspected_leak_duration,
            heap_growth_rate: self.heap_growth_rate,
            gc_efficiency: self.gc_efficiency,
            old_gen_growth_rate: self.old_gen_growth_rate,
            live_object_stagnation: self.live_object_stagnation,
            verdict: self.verdict.unwrap_or(Verdict::NoLeak),
            created_at: self.created_at.unwrap_or_else(Utc::now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_object_is_young() {
        let obj = HeapObject::new(64, "Session", true, Utc::now());
        assert_eq!(obj.generation, Generation::Young);
        assert_eq!(obj.age, 0);
        assert!(obj.id.is_none());
        assert_eq!(obj.allocation_time, obj.last_access_time);
    }

    #[test]
    fn test_age_one_cycle_promotes_at_threshold() {
        let mut obj = HeapObject::new(8, "Buffer", false, Utc::now());
        assert!(!obj.age_one_cycle(2));
        assert_eq!(obj.generation, Generation::Young);
        assert!(obj.age_one_cycle(2));
        assert_eq!(obj.generation, Generation::Old);
        assert_eq!(obj.age, 2);

        // 老年代对象不再增长年龄
        assert!(!obj.age_one_cycle(2));
        assert_eq!(obj.age, 2);
        assert_eq!(obj.generation, Generation::Old);
    }

    #[test]
    fn test_gc_event_defaults_reclaimed() {
        let event = GcEvent::new(GcType::Minor, 1000, 400);
        assert_eq!(event.reclaimed_memory, 600);
        assert!((event.efficiency() - 0.6).abs() < f64::EPSILON);

        let event = GcEvent::new(GcType::Major, 0, 0).with_reclaimed(10);
        assert_eq!(event.efficiency(), 0.0);
    }

    #[test]
    fn test_enum_names_round_trip() {
        for generation in [Generation::Young, Generation::Old] {
            assert_eq!(generation.as_str().parse::<Generation>().ok(), Some(generation));
        }
        for gc_type in [GcType::Minor, GcType::Major] {
            assert_eq!(gc_type.as_str().parse::<GcType>().ok(), Some(gc_type));
        }
        assert!("FULL".parse::<GcType>().is_err());
        assert_eq!(
            serde_json::to_string(&Verdict::HighProbabilityLeak).ok().as_deref(),
            Some("\"HIGH_PROBABILITY_LEAK\"")
        );
    }

    #[test]
    fn test_report_builder() {
        let created = Utc::now();
        let report = LeakReport::builder()
            .suspicion_score(42.5)
            .leaking_object_types("Cache (3)")
            .verdict(Verdict::PossibleLeak)
            .created_at(created)
            .build();
        assert_eq!(report.suspicion_score, 42.5);
        assert_eq!(report.verdict, Verdict::PossibleLeak);
        assert_eq!(report.created_at, created);
        assert!(report.verdict.summary().starts_with("Possible"));
    }
}
