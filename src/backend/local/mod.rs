//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了本地层（进程内）存储接口及其内存、磁盘两种实现。

pub mod disk;
pub mod memory;

use crate::error::Result;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

pub use disk::DiskLocalStore;
pub use memory::MemoryLocalStore;

/// 淘汰事件通道的缓冲大小，慢速订阅者超出后会丢失旧事件
pub const EVICTION_CHANNEL_CAPACITY: usize = 1024;

/// 淘汰原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// TTL 到期
    Expired,
    /// 容量压力
    Capacity,
    /// 手动删除
    Explicit,
}

/// 淘汰事件
///
/// 本地层每移除一个条目（过期、容量、手动删除）都会发出一次，覆盖写不算淘汰
#[derive(Debug, Clone)]
pub struct EvictionEvent {
    pub key: String,
    pub value: Vec<u8>,
    pub reason: EvictionReason,
}

/// 本地层条目
#[derive(Debug, Clone)]
pub struct LocalEntry {
    pub value: Vec<u8>,
    /// 过期时刻，`None` 表示不过期
    pub expires_at: Option<Instant>,
}

impl LocalEntry {
    /// 剩余生存时间
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

/// 本地层存储接口
///
/// 实现必须自身线程安全，协调器不会为本地层额外加锁
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// 读取条目，未命中返回 `Ok(None)`
    async fn get(&self, key: &str) -> Result<Option<LocalEntry>>;

    /// 写入条目，已存在时静默覆盖
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// 删除条目，确实移除了内容时返回 true
    async fn delete(&self, key: &str) -> Result<bool>;

    /// 删除全部条目，返回移除数量
    async fn delete_all(&self) -> Result<usize>;

    /// 订阅淘汰事件
    fn subscribe_evictions(&self) -> broadcast::Receiver<EvictionEvent>;

    /// 后端名称，用于日志
    fn name(&self) -> &'static str;
}
