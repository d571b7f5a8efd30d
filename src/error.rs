//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存系统的错误类型和处理机制。

use thiserror::Error;

/// 缓存系统错误类型枚举
///
/// 调用方只会看到三种结果：返回值、返回"不存在"，或者下列类型化错误之一
#[derive(Error, Debug)]
pub enum CacheError {
    /// 序列化错误（值无法编码）
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 反序列化错误（数据损坏或类型不兼容）
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// 配置错误，启动阶段即为致命错误
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 远程层不可用（连接丢失、超时、命令失败）
    #[error("Remote tier unavailable: {0}")]
    RemoteUnavailable(String),

    /// 后台监听器在消息循环中遇到了意外错误
    #[error("Listener terminated: {0}")]
    ListenerFatal(String),

    /// IO错误（磁盘本地层）
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 缓存未命中时调用方提供的加载函数失败
    #[error("Value factory failed: {0}")]
    Factory(String),

    /// 关闭错误
    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::RemoteUnavailable(err.to_string())
    }
}

impl CacheError {
    /// 是否为远程层不可用错误
    ///
    /// Get 路径据此把错误降级为未命中
    pub fn is_remote_unavailable(&self) -> bool {
        matches!(self, CacheError::RemoteUnavailable(_))
    }
}

/// 缓存操作结果类型别名
pub type Result<T> = std::result::Result<T, CacheError>;
