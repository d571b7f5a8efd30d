//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了监听命令：运行后台服务直到 Ctrl-C 后优雅关闭。

use crate::client::{CacheCoordinator, ListenerSettings};
use crate::config::Config;
use anyhow::{bail, Result};
use std::time::Duration;
use tracing::info;

pub async fn execute(coordinator: &CacheCoordinator, config: &Config) -> Result<()> {
    let settings = ListenerSettings::from(config);
    if !settings.invalidation && !settings.expiry_sync {
        bail!("Both invalidation and expiry_sync are disabled in the configuration");
    }

    let tasks = coordinator.start_listeners(&settings).await?;
    println!(
        "Listening on '{}' as instance {} (Ctrl-C to stop)",
        coordinator.channel(),
        coordinator.instance_id()
    );

    // 任一监听器意外退出时也结束等待
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down listeners");
                break;
            }
            _ = ticker.tick() => {
                if tasks.listeners().iter().any(|l| l.is_finished()) {
                    break;
                }
            }
        }
    }

    tasks.shutdown().await?;
    println!("Listeners stopped.");
    Ok(())
}
