//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于Redis的远程层实现。

use super::{RemoteStore, Subscription};
use crate::backend::redis_provider::{DefaultRedisProvider, RedisProvider};
use crate::config::{validate_namespace, RemoteConfig};
use crate::entry::ttl_millis;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use futures::stream::StreamExt;
use redis::{aio::ConnectionManager, Client, RedisResult, Script};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// 原子读取值与剩余TTL
///
/// KEYS[1] = 缓存键，KEYS[2] = 审计键（可选），ARGV[1] = 调用方标识，ARGV[2] = 毫秒时间戳
const GET_WITH_TTL_SCRIPT: &str = r#"
local value = redis.call('GET', KEYS[1])
if not value then
    return nil
end
local ttl = redis.call('PTTL', KEYS[1])
if KEYS[2] then
    redis.call('HSET', KEYS[2], ARGV[1], ARGV[2])
end
return {value, ttl}
"#;

/// Redis远程层
///
/// 所有键都带有 `<namespace>:` 前缀，每条命令都受命令超时约束
#[derive(Clone)]
pub struct RedisRemoteStore {
    client: Client,
    manager: ConnectionManager,
    namespace: String,
    caller_tag: String,
    audit_key: Option<String>,
    command_timeout: Duration,
    connection_timeout: Duration,
    configure_keyspace_events: bool,
    get_with_ttl_script: Script,
}

impl std::fmt::Debug for RedisRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RedisRemoteStore({})", self.namespace)
    }
}

impl RedisRemoteStore {
    /// 创建Redis远程层
    ///
    /// # 参数
    ///
    /// * `config` - 远程层配置
    /// * `namespace` - 键前缀
    /// * `caller_tag` - 调用方标识，写入审计键
    #[instrument(skip(config), level = "info", name = "init_remote_store")]
    pub async fn new(config: &RemoteConfig, namespace: &str, caller_tag: &str) -> Result<Self> {
        Self::new_with_provider(config, namespace, caller_tag, Arc::new(DefaultRedisProvider))
            .await
    }

    /// 使用指定的Redis提供者创建
    #[instrument(skip(config, provider), level = "info", fields(mode = ?config.mode))]
    pub async fn new_with_provider(
        config: &RemoteConfig,
        namespace: &str,
        caller_tag: &str,
        provider: Arc<dyn RedisProvider>,
    ) -> Result<Self> {
        validate_namespace(namespace).map_err(CacheError::Configuration)?;
        let (client, manager) = provider.connect(config).await?;
        Ok(Self {
            client,
            manager,
            namespace: namespace.to_string(),
            caller_tag: caller_tag.to_string(),
            audit_key: config.audit_key.clone(),
            command_timeout: Duration::from_millis(config.command_timeout_ms),
            connection_timeout: Duration::from_millis(config.connection_timeout_ms),
            configure_keyspace_events: config.configure_keyspace_events,
            get_with_ttl_script: Script::new(GET_WITH_TTL_SCRIPT),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    fn key_prefix(&self) -> String {
        format!("{}:", self.namespace)
    }

    /// 给单条命令加上超时
    async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match timeout(self.command_timeout, fut).await {
            Ok(res) => res.map_err(CacheError::from),
            Err(_) => Err(CacheError::RemoteUnavailable(format!(
                "command timed out after {}ms",
                self.command_timeout.as_millis()
            ))),
        }
    }

    async fn open_pubsub(&self) -> Result<redis::aio::PubSub> {
        match timeout(self.connection_timeout, self.client.get_async_pubsub()).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(CacheError::RemoteUnavailable(
                "pub/sub connection timed out".to_string(),
            )),
        }
    }

    /// 检查连接是否正常
    #[instrument(skip(self), level = "debug")]
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: String = self
            .run(redis::cmd("PING").query_async::<String>(&mut conn))
            .await?;
        Ok(())
    }

    /// 键的剩余TTL（秒），键不存在或不过期时返回 None
    #[instrument(skip(self), level = "debug")]
    pub async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        let mut conn = self.manager.clone();
        let ttl: i64 = self
            .run(redis::cmd("TTL").arg(self.full_key(key)).query_async(&mut conn))
            .await?;
        Ok(if ttl > 0 { Some(ttl as u64) } else { None })
    }
}

#[async_trait]
impl RemoteStore for RedisRemoteStore {
    #[instrument(skip(self), level = "debug", fields(namespace = %self.namespace))]
    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        self.run(
            redis::cmd("GET")
                .arg(self.full_key(key))
                .query_async::<Option<Vec<u8>>>(&mut conn),
        )
        .await
    }

    #[instrument(skip(self), level = "debug", fields(namespace = %self.namespace))]
    async fn get_with_ttl(&self, key: &str) -> Result<Option<(Vec<u8>, Option<Duration>)>> {
        let mut conn = self.manager.clone();
        let mut invocation = self.get_with_ttl_script.key(self.full_key(key));
        if let Some(audit_key) = &self.audit_key {
            invocation
                .key(audit_key)
                .arg(&self.caller_tag)
                .arg(chrono::Utc::now().timestamp_millis());
        }
        let result: Option<(Vec<u8>, i64)> =
            self.run(invocation.invoke_async(&mut conn)).await?;

        Ok(match result {
            // -2: 键在脚本执行期间已不存在
            Some((_, -2)) | None => None,
            Some((value, pttl)) if pttl < 0 => Some((value, None)),
            Some((value, pttl)) => Some((value, Some(Duration::from_millis(pttl as u64)))),
        })
    }

    #[instrument(skip(self, value), level = "debug", fields(namespace = %self.namespace, value_len = value.len()))]
    async fn set_bytes(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<bool> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.full_key(key)).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let reply: Option<String> = self.run(cmd.query_async(&mut conn)).await?;
        debug!("remote set: key={}, ttl={:?}", key, ttl);
        Ok(reply.is_some())
    }

    #[instrument(skip(self), level = "debug", fields(namespace = %self.namespace))]
    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = self
            .run(redis::cmd("DEL").arg(self.full_key(key)).query_async(&mut conn))
            .await?;
        Ok(removed > 0)
    }

    #[instrument(skip(self), level = "debug", fields(namespace = %self.namespace))]
    async fn touch(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.manager.clone();
        let updated: i64 = self
            .run(
                redis::cmd("PEXPIRE")
                    .arg(self.full_key(key))
                    .arg(ttl_millis(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(updated == 1)
    }

    #[instrument(skip(self), level = "debug", fields(namespace = %self.namespace))]
    async fn delete_all(&self) -> Result<usize> {
        let pattern = format!("{}*", self.key_prefix());
        let mut conn = self.manager.clone();
        let mut cursor = 0u64;
        let mut removed = 0usize;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = self
                .run(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(1000)
                        .query_async(&mut conn),
                )
                .await?;

            if !keys.is_empty() {
                let count: i64 = self
                    .run(redis::cmd("DEL").arg(&keys).query_async(&mut conn))
                    .await?;
                removed += count as usize;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        debug!("remote delete_all: removed={}", removed);
        Ok(removed)
    }

    #[instrument(skip(self, message), level = "debug")]
    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let receivers: i64 = self
            .run(
                redis::cmd("PUBLISH")
                    .arg(channel)
                    .arg(message)
                    .query_async(&mut conn),
            )
            .await?;
        debug!("published to {} ({} receivers)", channel, receivers);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        let mut pubsub = self.open_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(Box::new(RedisSubscription {
            pubsub,
            channel: channel.to_string(),
            key_prefix: None,
        }))
    }

    #[instrument(skip(self), level = "debug", fields(namespace = %self.namespace))]
    async fn subscribe_expirations(&self) -> Result<Box<dyn Subscription>> {
        if self.configure_keyspace_events {
            let mut conn = self.manager.clone();
            let res: Result<()> = self
                .run(
                    redis::cmd("CONFIG")
                        .arg("SET")
                        .arg("notify-keyspace-events")
                        .arg("Ex")
                        .query_async::<()>(&mut conn),
                )
                .await;
            if let Err(e) = res {
                // 托管Redis通常禁用 CONFIG 命令
                warn!("cannot enable keyspace notifications: {}", e);
            }
        }

        let db = self.client.get_connection_info().redis.db;
        let channel = format!("__keyevent@{}__:expired", db);
        let mut pubsub = self.open_pubsub().await?;
        pubsub.subscribe(&channel).await?;
        Ok(Box::new(RedisSubscription {
            pubsub,
            channel,
            key_prefix: Some(self.key_prefix()),
        }))
    }
}

/// Redis订阅句柄
///
/// 订阅过期事件时只转发本命名空间的键，并去掉前缀
struct RedisSubscription {
    pubsub: redis::aio::PubSub,
    channel: String,
    key_prefix: Option<String>,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next_message(&mut self) -> Option<Result<String>> {
        loop {
            let msg = self.pubsub.on_message().next().await?;
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => return Some(Err(e.into())),
            };
            match &self.key_prefix {
                Some(prefix) => {
                    if let Some(key) = payload.strip_prefix(prefix.as_str()) {
                        return Some(Ok(key.to_string()));
                    }
                }
                None => return Some(Ok(payload)),
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.pubsub.unsubscribe(&self.channel).await?;
        Ok(())
    }
}
