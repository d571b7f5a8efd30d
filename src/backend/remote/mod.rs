//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了远程层（共享键值存储 + 发布订阅）的接口。

pub mod memory;
pub mod redis_store;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use self::memory::{MemoryRemoteStore, RemoteCallStats};
pub use self::redis_store::RedisRemoteStore;

/// 频道订阅句柄
///
/// 投递语义为至多一次，调用方需要容忍重复或丢失的消息
#[async_trait]
pub trait Subscription: Send {
    /// 等待下一条消息
    ///
    /// `None` 表示订阅流已结束，`Some(Err(_))` 表示连接出错
    async fn next_message(&mut self) -> Option<Result<String>>;

    /// 取消订阅，之后不应再调用 `next_message`
    async fn unsubscribe(&mut self) -> Result<()>;
}

/// 远程层存储接口
///
/// 键由实现负责加上命名空间前缀；连接丢失时所有操作都返回
/// `CacheError::RemoteUnavailable`，由调用方决定降级为未命中还是上抛
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 读取值
    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// 一次往返读取值及其剩余TTL（`None` 表示不过期）
    ///
    /// 先读值再单独查询TTL存在竞态：键可能在两次调用之间过期
    async fn get_with_ttl(&self, key: &str) -> Result<Option<(Vec<u8>, Option<Duration>)>>;

    /// 写入值，写入成功返回 true
    async fn set_bytes(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<bool>;

    /// 删除键，确实删除了内容时返回 true
    async fn delete(&self, key: &str) -> Result<bool>;

    /// 重置键的TTL，键不存在时返回 false
    async fn touch(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// 删除本命名空间下的全部键，返回删除数量
    async fn delete_all(&self) -> Result<usize>;

    /// 向频道发布消息
    async fn publish(&self, channel: &str, message: &str) -> Result<()>;

    /// 订阅频道
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>>;

    /// 订阅存储自身的键过期通知，消息内容为（去掉前缀的）键
    async fn subscribe_expirations(&self) -> Result<Box<dyn Subscription>>;
}
