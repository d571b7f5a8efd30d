//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存系统的配置结构和解析逻辑。

use crate::error::{CacheError, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_VERSION: u32 = 1;

/// 默认的失效频道前缀
pub const DEFAULT_CHANNEL_PREFIX: &str = "cache:invalidate";

/// 命名空间中不允许出现的字符
///
/// `:` 是键前缀分隔符，其余是 Redis `SCAN MATCH` 的通配符
pub const NAMESPACE_FORBIDDEN_CHARS: &[char] = &[':', '*', '?', '[', ']', '\\'];

/// 校验命名空间
///
/// 命名空间同时是远程键前缀和 `SCAN` 模式，必须非空、不超过64个字符，
/// 并且不能包含 [`NAMESPACE_FORBIDDEN_CHARS`]
pub fn validate_namespace(namespace: &str) -> std::result::Result<(), String> {
    if namespace.is_empty() {
        return Err("namespace cannot be empty".to_string());
    }
    if namespace.len() > 64 {
        return Err(format!(
            "namespace '{}' exceeds maximum length of 64 characters",
            namespace
        ));
    }
    if let Some(c) = namespace.chars().find(|c| NAMESPACE_FORBIDDEN_CHARS.contains(c)) {
        return Err(format!(
            "namespace '{}' contains forbidden character '{}'",
            namespace, c
        ));
    }
    Ok(())
}

/// 缓存协调器配置
///
/// 一个配置对应一个缓存命名空间（一个协调器实例）
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub config_version: Option<u32>,
    /// 缓存命名空间，同时作为远程键前缀
    pub namespace: String,
    /// 实例标识，未配置时启动时随机生成
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub invalidation: InvalidationConfig,
    #[serde(default)]
    pub expiry_sync: ExpirySyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: Some(CONFIG_VERSION),
            namespace: "default".to_string(),
            instance_id: None,
            global: GlobalConfig::default(),
            local: LocalConfig::default(),
            remote: RemoteConfig::default(),
            invalidation: InvalidationConfig::default(),
            expiry_sync: ExpirySyncConfig::default(),
        }
    }
}

/// 全局配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct GlobalConfig {
    /// 默认的缓存过期时间（秒），非正数表示永不过期
    pub default_ttl: i64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self { default_ttl: -1 }
    }
}

/// 序列化类型枚举
#[derive(Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SerializationType {
    /// JSON序列化
    #[default]
    Json,
    /// gzip压缩的JSON
    JsonGzip,
}

/// 本地层后端类型
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LocalBackendType {
    /// 进程内存（Moka）
    #[default]
    Memory,
    /// 每个键一个文件
    Disk,
}

/// 本地层条目的淘汰优先级
///
/// 优先级通过权重影响容量占用：低优先级条目占用双倍容量，
/// `NeverRemove` 不计入容量，因此不会因容量压力被淘汰
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPriority {
    Low,
    #[default]
    Normal,
    NeverRemove,
}

impl EvictionPriority {
    /// 条目在容量计算中的权重
    pub fn weight(&self) -> u32 {
        match self {
            EvictionPriority::Low => 2,
            EvictionPriority::Normal => 1,
            EvictionPriority::NeverRemove => 0,
        }
    }
}

/// 本地层配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct LocalConfig {
    pub backend: LocalBackendType,
    /// 最大容量（按权重计）
    pub max_capacity: u64,
    pub eviction_priority: EvictionPriority,
    pub serialization: SerializationType,
    /// 启动时清空本地层
    pub clear_on_startup: bool,
    /// 磁盘层根目录，`backend = "disk"` 时必填
    pub disk_root: Option<PathBuf>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            backend: LocalBackendType::Memory,
            max_capacity: 10000,
            eviction_priority: EvictionPriority::Normal,
            serialization: SerializationType::Json,
            clear_on_startup: false,
            disk_root: None,
        }
    }
}

/// Redis模式枚举
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RedisMode {
    /// 单机模式
    #[default]
    Standalone,
    /// 哨兵模式
    Sentinel,
}

/// 哨兵配置
#[derive(Deserialize, Clone, Debug)]
pub struct SentinelConfig {
    /// 主节点名称
    pub master_name: String,
    /// 哨兵节点列表
    pub nodes: Vec<String>,
}

/// 远程层配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RemoteConfig {
    pub mode: RedisMode,
    /// 连接字符串
    pub connection_string: SecretString,
    /// 连接超时时间（毫秒）
    pub connection_timeout_ms: u64,
    /// 命令执行超时时间（毫秒）
    pub command_timeout_ms: u64,
    /// Redis 密码（可选）
    pub password: Option<SecretString>,
    /// 是否启用 TLS
    pub enable_tls: bool,
    /// 哨兵配置
    pub sentinel: Option<SentinelConfig>,
    pub serialization: SerializationType,
    /// 启动时清空本命名空间下的远程键
    pub clear_on_startup: bool,
    /// 启动时执行 `CONFIG SET notify-keyspace-events Ex`
    pub configure_keyspace_events: bool,
    /// 读取审计哈希键，设置后每次带TTL读取都会记录调用方
    pub audit_key: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            mode: RedisMode::Standalone,
            connection_string: SecretString::new("redis://127.0.0.1:6379".to_string().into()),
            connection_timeout_ms: 5000,
            command_timeout_ms: 3000,
            password: None,
            enable_tls: false,
            sentinel: None,
            serialization: SerializationType::Json,
            clear_on_startup: false,
            configure_keyspace_events: false,
            audit_key: None,
        }
    }
}

/// 缓存失效频道配置
#[derive(Deserialize, Clone, Debug)]
#[serde(untagged)]
pub enum InvalidationChannelConfig {
    /// 完整自定义频道名称
    Custom(String),
    /// 结构化配置
    Structured {
        /// 频道名称前缀
        prefix: Option<String>,
        /// 是否使用命名空间作为后缀
        use_namespace: bool,
    },
}

/// 失效监听器配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct InvalidationConfig {
    pub enabled: bool,
    pub channel: Option<InvalidationChannelConfig>,
    /// Set 时是否也广播失效消息
    pub publish_on_set: bool,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: None,
            publish_on_set: true,
        }
    }
}

impl InvalidationConfig {
    /// 解析失效频道名称
    ///
    /// 未配置时为 `cache:invalidate:<namespace>`
    pub fn resolve_channel(&self, namespace: &str) -> String {
        match &self.channel {
            Some(InvalidationChannelConfig::Custom(name)) => name.clone(),
            Some(InvalidationChannelConfig::Structured {
                prefix,
                use_namespace,
            }) => {
                let prefix = prefix.as_deref().unwrap_or(DEFAULT_CHANNEL_PREFIX);
                if *use_namespace {
                    format!("{}:{}", prefix, namespace)
                } else {
                    prefix.to_string()
                }
            }
            None => format!("{}:{}", DEFAULT_CHANNEL_PREFIX, namespace),
        }
    }
}

/// 过期同步服务配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ExpirySyncConfig {
    pub enabled: bool,
}

impl Default for ExpirySyncConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// 从 TOML 字符串解析配置并校验
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| CacheError::Configuration(e.to_string()))?;
        config.validate().map_err(CacheError::Configuration)?;
        Ok(config)
    }

    /// 从 TOML 文件加载配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CacheError::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// 验证配置
    ///
    /// 检查配置的有效性，确保所有必需的字段都已设置，并且值在合理范围内
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(version) = &self.config_version {
            if *version > CONFIG_VERSION {
                return Err(format!(
                    "Configuration version {} is not supported. Current version is {}.",
                    version, CONFIG_VERSION
                ));
            }
        }

        validate_namespace(&self.namespace)?;

        if let Some(id) = &self.instance_id {
            if id.trim().is_empty() {
                return Err("instance_id cannot be blank".to_string());
            }
        }

        if self.global.default_ttl > 86400 * 30 {
            return Err("Global default_ttl cannot exceed 30 days (2592000 seconds)".to_string());
        }

        let local = &self.local;
        if local.max_capacity == 0 {
            return Err("local max_capacity cannot be zero".to_string());
        }
        if local.max_capacity > 10_000_000 {
            return Err("local max_capacity cannot exceed 10,000,000".to_string());
        }
        if local.backend == LocalBackendType::Disk && local.disk_root.is_none() {
            return Err("local disk_root must be set when backend = \"disk\"".to_string());
        }

        let remote = &self.remote;
        if !(100..=30000).contains(&remote.connection_timeout_ms) {
            return Err("remote connection_timeout_ms must be between 100 and 30000 ms".to_string());
        }
        if !(100..=60000).contains(&remote.command_timeout_ms) {
            return Err("remote command_timeout_ms must be between 100 and 60000 ms".to_string());
        }
        if remote.mode == RedisMode::Sentinel && remote.sentinel.is_none() {
            return Err("remote sentinel section is required in sentinel mode".to_string());
        }

        if let Some(InvalidationChannelConfig::Custom(name)) = &self.invalidation.channel {
            if name.is_empty() {
                return Err("invalidation channel cannot be empty".to_string());
            }
        }

        Ok(())
    }

    /// 解析失效频道名称
    pub fn channel_name(&self) -> String {
        self.invalidation.resolve_channel(&self.namespace)
    }
}
