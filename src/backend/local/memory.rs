//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于 Moka 的内存本地层。

use super::{EvictionEvent, EvictionReason, LocalEntry, LocalStore, EVICTION_CHANNEL_CAPACITY};
use crate::config::EvictionPriority;
use crate::entry::{clamp_ttl, deadline_after};
use crate::error::Result;
use async_trait::async_trait;
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, instrument};

// 值: (数据, TTL, 过期时刻, 优先级)
#[derive(Clone)]
struct StoredEntry {
    bytes: Vec<u8>,
    ttl: Option<Duration>,
    expires_at: Option<Instant>,
    priority: EvictionPriority,
}

/// 按条目自身的TTL计算过期
struct PerEntryExpiry;

impl Expiry<String, StoredEntry> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// 内存本地层
///
/// 容量按淘汰优先级加权，淘汰事件通过广播通道发出
#[derive(Clone)]
pub struct MemoryLocalStore {
    cache: Cache<String, StoredEntry>,
    priority: EvictionPriority,
    events: broadcast::Sender<EvictionEvent>,
}

impl MemoryLocalStore {
    /// 创建新的内存本地层
    ///
    /// # 参数
    ///
    /// * `capacity` - 最大容量（按权重计）
    /// * `priority` - 写入条目时分配的淘汰优先级
    pub fn new(capacity: u64, priority: EvictionPriority) -> Self {
        let (events, _) = broadcast::channel(EVICTION_CHANNEL_CAPACITY);
        let listener_tx = events.clone();

        let cache = Cache::builder()
            .max_capacity(capacity)
            .weigher(|_key: &String, value: &StoredEntry| value.priority.weight())
            .expire_after(PerEntryExpiry)
            .eviction_listener(move |key: Arc<String>, value: StoredEntry, cause| {
                let reason = match cause {
                    RemovalCause::Expired => EvictionReason::Expired,
                    RemovalCause::Size => EvictionReason::Capacity,
                    RemovalCause::Explicit => EvictionReason::Explicit,
                    RemovalCause::Replaced => return,
                };
                // 没有订阅者时发送失败是正常的
                let _ = listener_tx.send(EvictionEvent {
                    key: key.as_ref().clone(),
                    value: value.bytes,
                    reason,
                });
            })
            .build();

        Self {
            cache,
            priority,
            events,
        }
    }

    /// 当前条目数（近似值）
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// 执行挂起的维护任务（过期清理、容量淘汰）
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<LocalEntry>> {
        match self.cache.get(key).await {
            Some(stored) => {
                debug!("local get: key={}, found=true", key);
                Ok(Some(LocalEntry {
                    value: stored.bytes,
                    expires_at: stored.expires_at,
                }))
            }
            None => {
                debug!("local get: key={}, found=false", key);
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, value), level = "debug", fields(value_len = value.len()))]
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let ttl = ttl.map(clamp_ttl);
        let stored = StoredEntry {
            bytes: value,
            ttl,
            expires_at: ttl.map(deadline_after),
            priority: self.priority,
        };
        self.cache.insert(key.to_string(), stored).await;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.cache.remove(key).await.is_some();
        debug!("local delete: key={}, removed={}", key, removed);
        Ok(removed)
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_all(&self) -> Result<usize> {
        let keys: Vec<Arc<String>> = self.cache.iter().map(|(k, _)| k).collect();
        let mut removed = 0;
        for key in keys {
            if self.cache.remove(key.as_str()).await.is_some() {
                removed += 1;
            }
        }
        self.cache.run_pending_tasks().await;
        debug!("local delete_all: removed={}", removed);
        Ok(removed)
    }

    fn subscribe_evictions(&self) -> broadcast::Receiver<EvictionEvent> {
        self.events.subscribe()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
