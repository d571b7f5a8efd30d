//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了Redis连接提供者接口和默认实现。

use crate::{
    config::{RedisMode, RemoteConfig},
    error::{CacheError, Result},
};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use secrecy::ExposeSecret;
use tokio::time::{timeout, Duration};

/// Redis连接提供者
///
/// 负责按部署模式建立客户端与连接管理器，测试可替换实现
#[async_trait]
pub trait RedisProvider: Send + Sync {
    async fn get_standalone_client(&self, config: &RemoteConfig)
        -> Result<(Client, ConnectionManager)>;
    async fn get_sentinel_client(&self, config: &RemoteConfig)
        -> Result<(Client, ConnectionManager)>;

    /// 按配置的模式建立连接
    async fn connect(&self, config: &RemoteConfig) -> Result<(Client, ConnectionManager)> {
        match config.mode {
            RedisMode::Standalone => self.get_standalone_client(config).await,
            RedisMode::Sentinel => self.get_sentinel_client(config).await,
        }
    }
}

pub struct DefaultRedisProvider;

async fn connect_manager(
    client: &Client,
    timeout_ms: u64,
    target: &str,
) -> Result<ConnectionManager> {
    match timeout(
        Duration::from_millis(timeout_ms),
        client.get_connection_manager(),
    )
    .await
    {
        Ok(res) => Ok(res?),
        Err(_) => Err(CacheError::RemoteUnavailable(format!(
            "Connection timed out after {}ms. Target: {}",
            timeout_ms, target
        ))),
    }
}

#[async_trait]
impl RedisProvider for DefaultRedisProvider {
    async fn get_standalone_client(
        &self,
        config: &RemoteConfig,
    ) -> Result<(Client, ConnectionManager)> {
        let raw = config.connection_string.expose_secret();
        let connection_string = if config.enable_tls && !raw.starts_with("rediss://") {
            raw.replace("redis://", "rediss://")
        } else {
            raw.to_string()
        };

        let client = Client::open(connection_string.as_str())
            .map_err(|e| CacheError::Configuration(format!("Invalid connection string: {}", e)))?;
        let target = format!("{:?}", client.get_connection_info().addr);
        let manager = connect_manager(&client, config.connection_timeout_ms, &target).await?;
        Ok((client, manager))
    }

    async fn get_sentinel_client(
        &self,
        config: &RemoteConfig,
    ) -> Result<(Client, ConnectionManager)> {
        let sentinel_config = config.sentinel.as_ref().ok_or_else(|| {
            CacheError::Configuration("Sentinel configuration is missing".to_string())
        })?;

        tracing::info!("Initializing Sentinel client with automatic failover support");

        // redis+sentinel://[:password@]host:port[,host:port][/service_name]
        let mut url = "redis+sentinel://".to_string();

        if let Some(password) = &config.password {
            url.push_str(&format!(":{}@", password.expose_secret()));
        }

        let nodes: Vec<String> = sentinel_config
            .nodes
            .iter()
            .map(|n| {
                n.trim_start_matches("redis://")
                    .trim_start_matches("redis+sentinel://")
                    .to_string()
            })
            .collect();

        if nodes.is_empty() {
            return Err(CacheError::Configuration(
                "No sentinel nodes provided".to_string(),
            ));
        }

        url.push_str(&nodes.join(","));
        url.push('/');
        url.push_str(&sentinel_config.master_name);

        let client = Client::open(url)
            .map_err(|e| CacheError::Configuration(format!("Invalid sentinel url: {}", e)))?;
        let manager = connect_manager(
            &client,
            config.connection_timeout_ms,
            &sentinel_config.master_name,
        )
        .await?;

        Ok((client, manager))
    }
}
