//! 条件求值的记忆化缓存
//!
//! 以 (条件结构哈希, 上下文哈希, 代际计数) 为键缓存条件求值产出，
//! FIFO 淘汰。正确性关键在失效：动作执行器每次变更 data 文档后必须
//! 调用 `invalidate`，代际计数跳变让同一轮后续规则不会读到变更前的
//! 陈旧结论。缓存命中会回放完整产出（结果、explain、读取、错误），
//! 因此开不开缓存得到的追踪完全一致。

use crate::evaluator::EvalOutcome;
use crate::models::Condition;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// 有界的条件求值缓存
#[derive(Debug)]
pub struct MemoCache {
    entries: Mutex<MemoInner>,
    /// 快照标记：data 文档每次变更时 +1
    generation: AtomicU64,
    capacity: usize,
}

#[derive(Debug, Default)]
struct MemoInner {
    map: HashMap<u64, EvalOutcome>,
    /// 插入顺序，用于 FIFO 淘汰
    order: VecDeque<u64>,
}

impl MemoCache {
    /// 创建容量为 `capacity` 的缓存（至少为 1）
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(MemoInner::default()),
            generation: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// 当前快照标记
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// data 文档变更后调用：跳变代际并清空既有条目
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let mut inner = self.entries.lock();
        inner.map.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn get(&self, key: u64) -> Option<EvalOutcome> {
        self.entries.lock().map.get(&key).cloned()
    }

    pub(crate) fn insert(&self, key: u64, outcome: EvalOutcome) {
        let mut inner = self.entries.lock();

        if inner.map.insert(key, outcome).is_some() {
            return;
        }

        inner.order.push_back(key);
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.map.remove(&evicted);
            }
        }
    }
}

impl Default for MemoCache {
    fn default() -> Self {
        Self::new(256)
    }
}

/// 条件缓存键：结构哈希 + 上下文哈希 + 代际
pub(crate) fn condition_key(condition: &Condition, context_hash: u64, generation: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    hash_json(condition).hash(&mut hasher);
    context_hash.hash(&mut hasher);
    generation.hash(&mut hasher);
    hasher.finish()
}

/// 可序列化值的 64 位结构哈希（基于规范 JSON 文本）
pub(crate) fn hash_json<T: serde::Serialize>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    serde_json::to_string(value).unwrap_or_default().hash(&mut hasher);
    hasher.finish()
}
