//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了两级缓存协调器：本地层读穿到远程层，写入两层并广播失效。

use crate::backend::local::{DiskLocalStore, EvictionEvent, LocalStore, MemoryLocalStore};
use crate::backend::remote::{RedisRemoteStore, RemoteStore};
use crate::config::{Config, LocalBackendType};
use crate::entry::{CacheEntry, Expiration, Tier};
use crate::error::{CacheError, Result};
use crate::metrics::GLOBAL_METRICS;
use crate::serialization::{Serializer, SerializerEnum};
use crate::sync::{
    BackgroundTasks, ExpirySyncService, InvalidationListener, InvalidationMessage, KeyedLock,
    SlidingExpirationRegistry,
};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// 协调器选项
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub namespace: String,
    /// 实例标识，`None` 时随机生成
    pub instance_id: Option<String>,
    /// 失效频道
    pub channel: String,
    pub default_ttl: Expiration,
    pub publish_on_set: bool,
    pub local_serializer: SerializerEnum,
    pub remote_serializer: SerializerEnum,
}

impl CoordinatorOptions {
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            channel: format!("{}:{}", crate::config::DEFAULT_CHANNEL_PREFIX, namespace),
            namespace,
            instance_id: None,
            default_ttl: Expiration::Never,
            publish_on_set: true,
            local_serializer: SerializerEnum::default(),
            remote_serializer: SerializerEnum::default(),
        }
    }

    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    pub fn with_publish_on_set(mut self, enabled: bool) -> Self {
        self.publish_on_set = enabled;
        self
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            namespace: config.namespace.clone(),
            instance_id: config.instance_id.clone(),
            channel: config.channel_name(),
            default_ttl: Expiration::from_secs(config.global.default_ttl),
            publish_on_set: config.invalidation.publish_on_set,
            local_serializer: SerializerEnum::from_type(&config.local.serialization),
            remote_serializer: SerializerEnum::from_type(&config.remote.serialization),
        }
    }
}

/// 需要启动的后台服务
#[derive(Debug, Clone, Copy)]
pub struct ListenerSettings {
    pub invalidation: bool,
    pub expiry_sync: bool,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            invalidation: true,
            expiry_sync: true,
        }
    }
}

impl From<&Config> for ListenerSettings {
    fn from(config: &Config) -> Self {
        Self {
            invalidation: config.invalidation.enabled,
            expiry_sync: config.expiry_sync.enabled,
        }
    }
}

struct Inner {
    namespace: String,
    instance_id: String,
    channel: String,
    default_ttl: Expiration,
    publish_on_set: bool,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    local_serializer: SerializerEnum,
    remote_serializer: SerializerEnum,
    locks: KeyedLock,
    sliding: Arc<SlidingExpirationRegistry>,
}

/// 两级缓存协调器
///
/// 克隆开销很小，所有克隆共享同一组存储、锁表和滑动登记表
#[derive(Clone)]
pub struct CacheCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CacheCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCoordinator")
            .field("namespace", &self.inner.namespace)
            .field("instance_id", &self.inner.instance_id)
            .field("local", &self.inner.local.name())
            .finish()
    }
}

impl CacheCoordinator {
    /// 用现成的两层存储创建协调器
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        options: CoordinatorOptions,
    ) -> Self {
        let instance_id = options
            .instance_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        info!(
            "cache coordinator created: namespace={}, instance={}, local={}",
            options.namespace,
            instance_id,
            local.name()
        );
        Self {
            inner: Arc::new(Inner {
                namespace: options.namespace,
                instance_id,
                channel: options.channel,
                default_ttl: options.default_ttl,
                publish_on_set: options.publish_on_set,
                local,
                remote,
                local_serializer: options.local_serializer,
                remote_serializer: options.remote_serializer,
                locks: KeyedLock::new(),
                sliding: Arc::new(SlidingExpirationRegistry::new()),
            }),
        }
    }

    /// 按配置创建协调器，远程层连接到Redis
    #[instrument(skip(config), level = "info", fields(namespace = %config.namespace))]
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate().map_err(CacheError::Configuration)?;
        let mut config = config.clone();
        let instance_id = config
            .instance_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();
        let remote =
            RedisRemoteStore::new(&config.remote, &config.namespace, &instance_id).await?;
        Self::from_config_with_remote(&config, Arc::new(remote)).await
    }

    /// 按配置创建协调器，使用给定的远程层
    pub async fn from_config_with_remote(
        config: &Config,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Self> {
        config.validate().map_err(CacheError::Configuration)?;

        let local: Arc<dyn LocalStore> = match config.local.backend {
            LocalBackendType::Memory => Arc::new(MemoryLocalStore::new(
                config.local.max_capacity,
                config.local.eviction_priority,
            )),
            LocalBackendType::Disk => {
                Arc::new(DiskLocalStore::new(config.local.disk_root.as_deref()).await?)
            }
        };

        if config.local.clear_on_startup {
            let removed = local.delete_all().await?;
            info!("cleared {} local entries on startup", removed);
        }
        if config.remote.clear_on_startup {
            let removed = remote.delete_all().await?;
            info!("cleared {} remote entries on startup", removed);
        }

        Ok(Self::new(local, remote, CoordinatorOptions::from_config(config)))
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// 失效频道名称
    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    pub fn default_ttl(&self) -> Expiration {
        self.inner.default_ttl
    }

    pub fn local(&self) -> &Arc<dyn LocalStore> {
        &self.inner.local
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.inner.remote
    }

    pub fn sliding_registry(&self) -> &Arc<SlidingExpirationRegistry> {
        &self.inner.sliding
    }

    /// 当前持有或等待按键锁的键数量
    pub fn active_locks(&self) -> usize {
        self.inner.locks.active_keys()
    }

    /// 订阅本地层淘汰事件
    pub fn subscribe_evictions(&self) -> broadcast::Receiver<EvictionEvent> {
        self.inner.local.subscribe_evictions()
    }

    fn same_encoding(&self) -> bool {
        self.inner.local_serializer == self.inner.remote_serializer
    }

    fn record(&self, tier: Tier, op: &str, result: &str, started: Instant) {
        let ns = &self.inner.namespace;
        GLOBAL_METRICS.record_request(ns, tier.as_str(), op, result);
        GLOBAL_METRICS.record_duration(ns, tier.as_str(), op, started.elapsed().as_secs_f64());
    }

    /// 读取值
    #[instrument(skip(self), level = "debug", fields(namespace = %self.inner.namespace))]
    pub async fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send,
    {
        Ok(self.get_entry(key).await?.map(CacheEntry::into_value))
    }

    /// 读取条目（值、剩余TTL、命中层）
    ///
    /// 本地命中直接返回；本地未命中时读取远程层并以远程剩余TTL回填本地层。
    /// 远程层出错按未命中处理
    #[instrument(skip(self), level = "debug", fields(namespace = %self.inner.namespace))]
    pub async fn get_entry<T>(&self, key: &str) -> Result<Option<CacheEntry<T>>>
    where
        T: Serialize + DeserializeOwned + Send,
    {
        if let Some(entry) = self.get_local(key).await? {
            return Ok(Some(entry));
        }
        self.get_remote(key).await
    }

    async fn get_local<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CacheEntry<T>>> {
        let started = Instant::now();
        match self.inner.local.get(key).await? {
            Some(local) => {
                self.record(Tier::Local, "get", "hit", started);
                debug!("local hit: key={}", key);
                let value: T = self.inner.local_serializer.deserialize(&local.value)?;
                Ok(Some(CacheEntry::new(
                    value,
                    local.remaining(),
                    self.inner.sliding.window(key),
                    Tier::Local,
                )))
            }
            None => {
                self.record(Tier::Local, "get", "miss", started);
                Ok(None)
            }
        }
    }

    async fn get_remote<T>(&self, key: &str) -> Result<Option<CacheEntry<T>>>
    where
        T: Serialize + DeserializeOwned,
    {
        let started = Instant::now();
        let (bytes, mut ttl) = match self.inner.remote.get_with_ttl(key).await {
            Ok(Some(hit)) => {
                self.record(Tier::Remote, "get", "hit", started);
                hit
            }
            Ok(None) => {
                self.record(Tier::Remote, "get", "miss", started);
                debug!("remote miss: key={}", key);
                return Ok(None);
            }
            Err(e) => {
                self.record(Tier::Remote, "get", "error", started);
                warn!("remote get failed for {}, treating as miss: {}", key, e);
                return Ok(None);
            }
        };

        let value: T = self.inner.remote_serializer.deserialize(&bytes)?;

        let sliding = self.inner.sliding.window(key);
        if let Some(window) = sliding {
            match self.inner.remote.touch(key, window).await {
                Ok(true) => ttl = Some(window),
                Ok(false) => debug!("sliding key {} vanished before refresh", key),
                Err(e) => warn!("failed to refresh sliding ttl for {}: {}", key, e),
            }
        }

        let local_bytes = if self.same_encoding() {
            bytes
        } else {
            self.inner.local_serializer.serialize(&value)?
        };
        if let Err(e) = self.inner.local.set(key, local_bytes, ttl).await {
            warn!("failed to populate local tier for {}: {}", key, e);
        }
        debug!("remote hit: key={}, ttl={:?}", key, ttl);

        Ok(Some(CacheEntry::new(value, ttl, sliding, Tier::Remote)))
    }

    /// 读取值，两层都未命中时调用 `factory` 生成并写入
    ///
    /// 同一个键的并发调用只有一个会执行 `factory`，其余在按键锁上等待后读到它写入的值。
    /// 不设超时，`factory` 自行负责取消
    #[instrument(skip(self, ttl, factory), level = "debug", fields(namespace = %self.inner.namespace))]
    pub async fn get_or_insert_with<T, F, Fut>(
        &self,
        key: &str,
        ttl: impl Into<Expiration> + Send,
        factory: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        if let Some(entry) = self.get_entry(key).await? {
            return Ok(entry.value);
        }

        let _guard = self.inner.locks.acquire(key).await;
        if let Some(entry) = self.get_entry(key).await? {
            debug!("value for {} loaded by another caller", key);
            return Ok(entry.value);
        }

        let value = factory().await?;
        match self.set(key, &value, ttl).await {
            Ok(_) => {}
            Err(e) if e.is_remote_unavailable() => {
                warn!("loaded {} but remote write failed: {}", key, e);
            }
            Err(e) => return Err(e),
        }
        Ok(value)
    }

    /// 写入两层
    ///
    /// 先写远程层，无论远程结果如何都写本地层，远程层的错误在本地写入之后返回。
    /// 远程写入成功且启用了 `publish_on_set` 时广播失效消息
    #[instrument(skip(self, value, ttl), level = "debug", fields(namespace = %self.inner.namespace))]
    pub async fn set<T>(&self, key: &str, value: &T, ttl: impl Into<Expiration> + Send) -> Result<bool>
    where
        T: Serialize + Sync,
    {
        let expiration = ttl.into();
        let ttl = expiration.ttl();

        let remote_bytes = self.inner.remote_serializer.serialize(value)?;
        let local_bytes = if self.same_encoding() {
            remote_bytes.clone()
        } else {
            self.inner.local_serializer.serialize(value)?
        };

        let started = Instant::now();
        let remote_result = self.inner.remote.set_bytes(key, remote_bytes, ttl).await;
        self.record(
            Tier::Remote,
            "set",
            if remote_result.is_ok() { "ok" } else { "error" },
            started,
        );

        let started = Instant::now();
        self.inner.local.set(key, local_bytes, ttl).await?;
        self.record(Tier::Local, "set", "ok", started);

        match expiration.sliding_window() {
            Some(window) => self.inner.sliding.register(key, window),
            None => {
                self.inner.sliding.remove(key);
            }
        }

        let written = remote_result?;
        if self.inner.publish_on_set {
            self.publish(&InvalidationMessage::for_key(&self.inner.instance_id, key))
                .await?;
        }
        debug!("set: key={}, ttl={:?}", key, ttl);
        Ok(written)
    }

    /// 删除两层中的键并广播失效
    ///
    /// 任意一层确实删除了内容时返回 true；重复删除返回 false
    #[instrument(skip(self), level = "debug", fields(namespace = %self.inner.namespace))]
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let local_removed = self.delete_local(key, false).await?;
        self.inner.sliding.remove(key);

        let started = Instant::now();
        let remote_removed = match self.inner.remote.delete(key).await {
            Ok(removed) => {
                self.record(Tier::Remote, "delete", "ok", started);
                removed
            }
            Err(e) => {
                self.record(Tier::Remote, "delete", "error", started);
                return Err(e);
            }
        };
        // 远程删除期间并发读取可能已用旧值回填本地层
        let local_removed = self.inner.local.delete(key).await? || local_removed;

        self.publish(&InvalidationMessage::for_key(&self.inner.instance_id, key))
            .await?;
        Ok(local_removed || remote_removed)
    }

    /// 只删除本地层
    ///
    /// `via_pubsub` 标记删除是否由失效消息触发，仅用于日志和指标
    #[instrument(skip(self), level = "debug", fields(namespace = %self.inner.namespace))]
    pub async fn delete_local(&self, key: &str, via_pubsub: bool) -> Result<bool> {
        let started = Instant::now();
        let removed = self.inner.local.delete(key).await?;
        let source = if via_pubsub { "pubsub" } else { "direct" };
        self.record(Tier::Local, "delete", source, started);
        debug!(
            "local delete: key={}, removed={}, via_pubsub={}",
            key, removed, via_pubsub
        );
        Ok(removed)
    }

    /// 清空本地层
    #[instrument(skip(self), level = "debug", fields(namespace = %self.inner.namespace))]
    pub async fn clear_local(&self) -> Result<usize> {
        self.inner.local.delete_all().await
    }

    /// 清空两层、滑动登记表，并广播全量失效
    ///
    /// 返回两层删除的条目总数
    #[instrument(skip(self), level = "info", fields(namespace = %self.inner.namespace))]
    pub async fn delete_all(&self) -> Result<usize> {
        let local_removed = self.clear_local().await?;
        self.inner.sliding.clear();
        let remote_removed = self.inner.remote.delete_all().await?;
        self.publish(&InvalidationMessage::all(&self.inner.instance_id))
            .await?;
        info!(
            "delete_all: local={}, remote={}",
            local_removed, remote_removed
        );
        Ok(local_removed + remote_removed)
    }

    async fn publish(&self, message: &InvalidationMessage) -> Result<()> {
        let payload = message.to_json()?;
        self.inner.remote.publish(&self.inner.channel, &payload).await
    }

    /// 启动后台服务
    ///
    /// 每个服务完成订阅后才返回；任一服务启动失败时已启动的服务会被关闭
    #[instrument(skip(self), level = "info", fields(namespace = %self.inner.namespace))]
    pub async fn start_listeners(&self, settings: &ListenerSettings) -> Result<BackgroundTasks> {
        let token = CancellationToken::new();
        let mut listeners = Vec::new();

        if settings.invalidation {
            let listener = InvalidationListener::new(self.clone(), self.inner.channel.clone());
            match listener.start(token.clone()).await {
                Ok(handle) => listeners.push(handle),
                Err(e) => {
                    let _ = BackgroundTasks::new(token, listeners).shutdown().await;
                    return Err(e);
                }
            }
        }

        if settings.expiry_sync {
            let service =
                ExpirySyncService::new(self.inner.remote.clone(), self.inner.sliding.clone());
            match service.start(token.clone()).await {
                Ok(handle) => listeners.push(handle),
                Err(e) => {
                    let _ = BackgroundTasks::new(token, listeners).shutdown().await;
                    return Err(e);
                }
            }
        }

        info!("started {} background listener(s)", listeners.len());
        Ok(BackgroundTasks::new(token, listeners))
    }
}
