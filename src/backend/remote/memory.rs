//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了进程内的远程层实现，供测试和单机部署使用。
//!
//! 多个协调器共享同一个 `MemoryRemoteStore`（克隆即共享）就相当于连到了同一个Redis。

use super::{RemoteStore, Subscription};
use crate::entry::deadline_after;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, instrument};

/// 过期通知使用的内部频道
pub const EXPIRATION_CHANNEL: &str = "__memory__:expired";

const BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum BusEvent {
    Message { channel: String, payload: String },
    Disconnected,
}

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// 远程层调用计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteCallStats {
    pub gets: u64,
    pub sets: u64,
    pub deletes: u64,
    pub touches: u64,
    pub publishes: u64,
}

#[derive(Default)]
struct CallCounters {
    gets: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    touches: AtomicU64,
    publishes: AtomicU64,
}

struct Inner {
    entries: DashMap<String, StoredValue>,
    bus: broadcast::Sender<BusEvent>,
    online: AtomicBool,
    counters: CallCounters,
}

/// 进程内远程层
///
/// 过期是惰性的：读取时发现过期会删除并发出过期通知，
/// 也可以调用 [`MemoryRemoteStore::purge_expired`] 主动清理
#[derive(Clone)]
pub struct MemoryRemoteStore {
    inner: Arc<Inner>,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemoteStore")
            .field("entries", &self.inner.entries.len())
            .field("online", &self.is_online())
            .finish()
    }
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                bus,
                online: AtomicBool::new(true),
                counters: CallCounters::default(),
            }),
        }
    }

    /// 模拟连接断开或恢复
    ///
    /// 断开时所有操作返回 `RemoteUnavailable`，现有订阅收到一次错误
    pub fn set_online(&self, online: bool) {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        if was_online && !online {
            let _ = self.inner.bus.send(BusEvent::Disconnected);
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// 删除所有已过期的键并发出过期通知，返回删除数量
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .inner
            .entries
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();

        expired
            .into_iter()
            .filter(|key| self.expire_if_due(key, now))
            .count()
    }

    /// 当前未过期的键数量
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .entries
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn calls(&self) -> RemoteCallStats {
        let c = &self.inner.counters;
        RemoteCallStats {
            gets: c.gets.load(Ordering::Relaxed),
            sets: c.sets.load(Ordering::Relaxed),
            deletes: c.deletes.load(Ordering::Relaxed),
            touches: c.touches.load(Ordering::Relaxed),
            publishes: c.publishes.load(Ordering::Relaxed),
        }
    }

    pub fn reset_calls(&self) {
        let c = &self.inner.counters;
        c.gets.store(0, Ordering::Relaxed);
        c.sets.store(0, Ordering::Relaxed);
        c.deletes.store(0, Ordering::Relaxed);
        c.touches.store(0, Ordering::Relaxed);
        c.publishes.store(0, Ordering::Relaxed);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(CacheError::RemoteUnavailable(
                "memory remote store is offline".to_string(),
            ))
        }
    }

    fn expire_if_due(&self, key: &str, now: Instant) -> bool {
        let removed = self
            .inner
            .entries
            .remove_if(key, |_, v| v.is_expired(now))
            .is_some();
        if removed {
            debug!("memory remote: key {} expired", key);
            let _ = self.inner.bus.send(BusEvent::Message {
                channel: EXPIRATION_CHANNEL.to_string(),
                payload: key.to_string(),
            });
        }
        removed
    }

    fn lookup(&self, key: &str) -> Option<StoredValue> {
        let now = Instant::now();
        if self.expire_if_due(key, now) {
            return None;
        }
        self.inner.entries.get(key).map(|v| v.value().clone())
    }

    fn open_subscription(&self, channel: &str) -> Box<dyn Subscription> {
        Box::new(MemorySubscription {
            rx: self.inner.bus.subscribe(),
            channel: channel.to_string(),
            closed: false,
        })
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_online()?;
        self.inner.counters.gets.fetch_add(1, Ordering::Relaxed);
        Ok(self.lookup(key).map(|v| v.bytes))
    }

    async fn get_with_ttl(&self, key: &str) -> Result<Option<(Vec<u8>, Option<Duration>)>> {
        self.ensure_online()?;
        self.inner.counters.gets.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        Ok(self.lookup(key).map(|v| {
            let ttl = v.expires_at.map(|at| at.saturating_duration_since(now));
            (v.bytes, ttl)
        }))
    }

    #[instrument(skip(self, value), level = "debug", fields(value_len = value.len()))]
    async fn set_bytes(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<bool> {
        self.ensure_online()?;
        self.inner.counters.sets.fetch_add(1, Ordering::Relaxed);
        self.inner.entries.insert(
            key.to_string(),
            StoredValue {
                bytes: value,
                expires_at: ttl.map(deadline_after),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_online()?;
        self.inner.counters.deletes.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        Ok(self
            .inner
            .entries
            .remove(key)
            .map(|(_, v)| !v.is_expired(now))
            .unwrap_or(false))
    }

    async fn touch(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.ensure_online()?;
        self.inner.counters.touches.fetch_add(1, Ordering::Relaxed);
        if self.expire_if_due(key, Instant::now()) {
            return Ok(false);
        }
        Ok(match self.inner.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Some(deadline_after(ttl));
                true
            }
            None => false,
        })
    }

    async fn delete_all(&self) -> Result<usize> {
        self.ensure_online()?;
        let now = Instant::now();
        let keys: Vec<String> = self.inner.entries.iter().map(|e| e.key().clone()).collect();
        let mut removed = 0;
        for key in keys {
            if let Some((_, v)) = self.inner.entries.remove(&key) {
                if !v.is_expired(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    #[instrument(skip(self, message), level = "debug")]
    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        self.ensure_online()?;
        self.inner.counters.publishes.fetch_add(1, Ordering::Relaxed);
        let _ = self.inner.bus.send(BusEvent::Message {
            channel: channel.to_string(),
            payload: message.to_string(),
        });
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        self.ensure_online()?;
        Ok(self.open_subscription(channel))
    }

    async fn subscribe_expirations(&self) -> Result<Box<dyn Subscription>> {
        self.ensure_online()?;
        Ok(self.open_subscription(EXPIRATION_CHANNEL))
    }
}

struct MemorySubscription {
    rx: broadcast::Receiver<BusEvent>,
    channel: String,
    closed: bool,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_message(&mut self) -> Option<Result<String>> {
        if self.closed {
            return None;
        }
        loop {
            match self.rx.recv().await {
                Ok(BusEvent::Message { channel, payload }) if channel == self.channel => {
                    return Some(Ok(payload))
                }
                Ok(BusEvent::Message { .. }) => continue,
                Ok(BusEvent::Disconnected) => {
                    return Some(Err(CacheError::RemoteUnavailable(
                        "subscription connection lost".to_string(),
                    )))
                }
                // 至多一次投递：落后的订阅者直接跳过丢失的消息
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("subscription on {} lagged by {}", self.channel, skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.closed = true;
                    return None;
                }
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
