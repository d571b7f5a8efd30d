//! tiercache - 分布式两级缓存协调器
//!
//! 进程内本地层（内存或磁盘）叠加共享的远程层（Redis），
//! 通过发布订阅在实例之间广播失效，按键加锁防止缓存击穿。

#![doc(html_root_url = "https://docs.rs/tiercache/0.1.0")]

pub use serde;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use tokio;

pub mod backend;
pub mod cli;
pub mod client;
pub mod config;
pub mod entry;
pub mod error;
pub mod metrics;
pub mod serialization;
pub mod sync;
pub mod telemetry;

// Re-export commonly used items
pub use client::{CacheCoordinator, CoordinatorOptions, ListenerSettings};
pub use config::Config;
pub use entry::{CacheEntry, Expiration, Tier};
pub use error::{CacheError, Result};
pub use sync::{BackgroundTasks, ListenerState};

/// tiercache 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
