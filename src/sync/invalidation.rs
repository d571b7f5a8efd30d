//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存失效机制，用于处理跨实例的缓存失效。

use super::common::{spawn_listener, ListenerHandle, ListenerState, MessageHandler};
use crate::client::coordinator::CacheCoordinator;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// 失效范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationScope {
    /// 单个键
    #[default]
    Key,
    /// 整个本地层
    All,
}

/// 失效消息
///
/// 线上格式为 JSON：`{"origin": "...", "key": "...", "scope": "key"}`，
/// 缺省 `scope` 视为单键失效
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    /// 发布者实例标识
    pub origin: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub scope: InvalidationScope,
}

impl InvalidationMessage {
    pub fn for_key(origin: &str, key: &str) -> Self {
        Self {
            origin: origin.to_string(),
            key: key.to_string(),
            scope: InvalidationScope::Key,
        }
    }

    pub fn all(origin: &str) -> Self {
        Self {
            origin: origin.to_string(),
            key: String::new(),
            scope: InvalidationScope::All,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    pub fn parse(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| CacheError::Deserialization(e.to_string()))
    }
}

/// 缓存失效监听器
///
/// 订阅失效频道，收到其他实例的消息后只删除本地层；自己发布的消息被忽略
pub struct InvalidationListener {
    coordinator: CacheCoordinator,
    channel: String,
    state: watch::Sender<ListenerState>,
}

impl InvalidationListener {
    pub const NAME: &'static str = "invalidation";

    pub fn new(coordinator: CacheCoordinator, channel: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ListenerState::Starting);
        Self {
            coordinator,
            channel: channel.into(),
            state,
        }
    }

    /// 订阅频道并启动监听循环
    ///
    /// 订阅成功后才返回；订阅失败直接返回错误，不会启动任务
    #[instrument(skip(self, token), level = "debug", fields(channel = %self.channel))]
    pub async fn start(self, token: CancellationToken) -> Result<ListenerHandle> {
        let subscription = self.coordinator.remote().subscribe(&self.channel).await?;
        debug!("invalidation listener subscribed to {}", self.channel);
        let handler = InvalidationHandler {
            coordinator: self.coordinator,
        };
        Ok(spawn_listener(handler, subscription, token, self.state))
    }
}

struct InvalidationHandler {
    coordinator: CacheCoordinator,
}

#[async_trait]
impl MessageHandler for InvalidationHandler {
    fn name(&self) -> &'static str {
        InvalidationListener::NAME
    }

    async fn handle(&self, payload: String) {
        let message = match InvalidationMessage::parse(&payload) {
            Ok(m) => m,
            Err(e) => {
                warn!("skipping malformed invalidation message {:?}: {}", payload, e);
                return;
            }
        };

        if message.origin == self.coordinator.instance_id() {
            debug!("ignoring own invalidation for {:?}", message.key);
            return;
        }

        match message.scope {
            InvalidationScope::Key => {
                // 远端已改写或删除该键，本实例的滑动登记不再有效
                self.coordinator.sliding_registry().remove(&message.key);
                if let Err(e) = self.coordinator.delete_local(&message.key, true).await {
                    warn!("failed to invalidate local key {}: {}", message.key, e);
                }
            }
            InvalidationScope::All => {
                self.coordinator.sliding_registry().clear();
                match self.coordinator.clear_local().await {
                    Ok(removed) => debug!("cleared {} local entries on remote request", removed),
                    Err(e) => warn!("failed to clear local tier: {}", e),
                }
            }
        }
    }
}
