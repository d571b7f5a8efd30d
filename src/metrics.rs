//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存系统的指标收集和监控功能。

use lazy_static::lazy_static;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{span, Level};

/// 指标收集器
///
/// 用于收集和存储缓存系统的各种运行时指标
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// 请求总数统计
    /// key: "namespace:tier:op:result"
    pub requests_total: Arc<Mutex<BTreeMap<String, u64>>>,
    /// 操作耗时（累积时间和计数，用于计算平均值）
    /// key: "namespace:tier:op" -> (total_duration_secs, count)
    pub operation_duration: Arc<Mutex<BTreeMap<String, (f64, u64)>>>,
}

lazy_static! {
    /// 全局指标实例
    pub static ref GLOBAL_METRICS: Metrics = Metrics::default();
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Metrics {
    /// 记录请求指标
    ///
    /// # 参数
    ///
    /// * `namespace` - 缓存命名空间
    /// * `tier` - 缓存层（local/remote）
    /// * `op` - 操作类型（get/set/delete）
    /// * `result` - 操作结果（hit/miss/ok/error）
    pub fn record_request(&self, namespace: &str, tier: &str, op: &str, result: &str) {
        let span = span!(Level::TRACE, "cache_request", namespace, tier, op, result);
        let _enter = span.enter();
        let key = format!("{}:{}:{}:{}", namespace, tier, op, result);
        *lock(&self.requests_total).entry(key).or_insert(0) += 1;
    }

    /// 记录操作耗时
    pub fn record_duration(&self, namespace: &str, tier: &str, op: &str, duration_secs: f64) {
        let key = format!("{}:{}:{}", namespace, tier, op);
        let mut map = lock(&self.operation_duration);
        let entry = map.entry(key).or_insert((0.0, 0));
        entry.0 += duration_secs;
        entry.1 += 1;
    }

    /// 查询单个请求计数
    pub fn request_count(&self, namespace: &str, tier: &str, op: &str, result: &str) -> u64 {
        let key = format!("{}:{}:{}:{}", namespace, tier, op, result);
        lock(&self.requests_total).get(&key).copied().unwrap_or(0)
    }
}

/// 获取指标字符串
///
/// 将所有指标格式化为 Prometheus 文本格式
pub fn get_metrics_string() -> String {
    let metrics = &GLOBAL_METRICS;
    let reqs = lock(&metrics.requests_total);
    let dur = lock(&metrics.operation_duration);

    let mut output = String::new();
    for (k, v) in reqs.iter() {
        // 命名空间本身可能含有 ':'
        let parts: Vec<&str> = k.rsplitn(4, ':').collect();
        if let [result, op, tier, namespace] = parts.as_slice() {
            output.push_str(&format!(
                "cache_requests_total{{namespace=\"{}\", tier=\"{}\", operation=\"{}\", result=\"{}\"}} {}\n",
                namespace, tier, op, result, v
            ));
        }
    }
    for (k, (total, count)) in dur.iter() {
        let parts: Vec<&str> = k.rsplitn(3, ':').collect();
        if let [op, tier, namespace] = parts.as_slice() {
            output.push_str(&format!(
                "cache_operation_duration_seconds_sum{{namespace=\"{}\", tier=\"{}\", operation=\"{}\"}} {}\n",
                namespace, tier, op, total
            ));
            output.push_str(&format!(
                "cache_operation_duration_seconds_count{{namespace=\"{}\", tier=\"{}\", operation=\"{}\"}} {}\n",
                namespace, tier, op, count
            ));
        }
    }
    output
}
