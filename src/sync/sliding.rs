//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了滑动过期登记表。

use dashmap::DashMap;
use std::time::Duration;

/// 滑动过期登记表
///
/// 记录本实例以滑动过期写入的键及其窗口。远程层读取命中时据此续期，
/// 键在远程层过期后由过期同步服务移除
#[derive(Debug, Default)]
pub struct SlidingExpirationRegistry {
    windows: DashMap<String, Duration>,
}

impl SlidingExpirationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记（或更新）键的滑动窗口
    pub fn register(&self, key: &str, window: Duration) {
        self.windows.insert(key.to_string(), window);
    }

    pub fn window(&self, key: &str) -> Option<Duration> {
        self.windows.get(key).map(|w| *w)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.windows.contains_key(key)
    }

    /// 移除登记，确实存在时返回 true
    pub fn remove(&self, key: &str) -> bool {
        self.windows.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.windows.clear();
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
