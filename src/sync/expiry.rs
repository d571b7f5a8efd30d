//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了过期同步服务：远程层键过期后移除对应的滑动过期登记。

use super::common::{spawn_listener, ListenerHandle, ListenerState, MessageHandler};
use super::sliding::SlidingExpirationRegistry;
use crate::backend::remote::RemoteStore;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// 过期同步服务
///
/// 只维护滑动过期登记表，不触碰本地层
pub struct ExpirySyncService {
    remote: Arc<dyn RemoteStore>,
    registry: Arc<SlidingExpirationRegistry>,
    state: watch::Sender<ListenerState>,
}

impl ExpirySyncService {
    pub const NAME: &'static str = "expiry_sync";

    pub fn new(remote: Arc<dyn RemoteStore>, registry: Arc<SlidingExpirationRegistry>) -> Self {
        let (state, _) = watch::channel(ListenerState::Starting);
        Self {
            remote,
            registry,
            state,
        }
    }

    /// 订阅远程层过期通知并启动监听循环
    #[instrument(skip(self, token), level = "debug")]
    pub async fn start(self, token: CancellationToken) -> Result<ListenerHandle> {
        let subscription = self.remote.subscribe_expirations().await?;
        let handler = ExpiryHandler {
            registry: self.registry,
        };
        Ok(spawn_listener(handler, subscription, token, self.state))
    }
}

struct ExpiryHandler {
    registry: Arc<SlidingExpirationRegistry>,
}

#[async_trait]
impl MessageHandler for ExpiryHandler {
    fn name(&self) -> &'static str {
        ExpirySyncService::NAME
    }

    async fn handle(&self, key: String) {
        if self.registry.remove(&key) {
            debug!("sliding registration dropped for expired key {}", key);
        }
    }
}
