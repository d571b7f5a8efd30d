//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于文件的本地层：每个键对应根目录下的一个文件。

use super::{EvictionEvent, EvictionReason, LocalEntry, LocalStore, EVICTION_CHANNEL_CAPACITY};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

/// 临时文件前缀，编码后的键不会以它开头
const TEMP_PREFIX: char = '~';

/// 磁盘本地层
///
/// 文件存在即键存在，不持久化TTL，删除是唯一的移除方式。
/// 除"文件不存在"外的IO错误都会作为错误返回，而不是当作未命中
#[derive(Clone)]
pub struct DiskLocalStore {
    root: PathBuf,
    events: broadcast::Sender<EvictionEvent>,
}

impl DiskLocalStore {
    /// 创建磁盘本地层
    ///
    /// # 参数
    ///
    /// * `root` - 根目录，未设置时返回配置错误
    ///
    /// # 返回值
    ///
    /// 返回新的磁盘本地层，根目录不存在时会被创建
    pub async fn new(root: Option<&Path>) -> Result<Self> {
        let root = root.ok_or_else(|| {
            CacheError::Configuration("disk local tier requires a root path".to_string())
        })?;
        fs::create_dir_all(root).await?;
        let (events, _) = broadcast::channel(EVICTION_CHANNEL_CAPACITY);
        debug!("disk local tier rooted at {}", root.display());
        Ok(Self {
            root: root.to_path_buf(),
            events,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(encode_key(key))
    }
}

/// 将键编码为安全的文件名
///
/// 百分号编码后再转义 `~`（临时文件前缀）和首字符 `.`，空键编码为 `%`
pub(crate) fn encode_key(key: &str) -> String {
    if key.is_empty() {
        return "%".to_string();
    }
    let encoded = urlencoding::encode(key).replace(TEMP_PREFIX, "%7E");
    match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{}", rest),
        None => encoded,
    }
}

/// `encode_key` 的逆操作，无法解码时返回 None
pub(crate) fn decode_key(name: &str) -> Option<String> {
    if name == "%" {
        return Some(String::new());
    }
    urlencoding::decode(name).ok().map(|key| key.into_owned())
}

#[async_trait]
impl LocalStore for DiskLocalStore {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<LocalEntry>> {
        match fs::read(self.path_for(key)).await {
            Ok(value) => Ok(Some(LocalEntry {
                value,
                expires_at: None,
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, value), level = "debug", fields(value_len = value.len()))]
    async fn set(&self, key: &str, value: Vec<u8>, _ttl: Option<Duration>) -> Result<()> {
        let target = self.path_for(key);
        let tmp = self.root.join(format!(
            "{}{}",
            TEMP_PREFIX,
            uuid::Uuid::new_v4().simple()
        ));
        fs::write(&tmp, &value).await?;
        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key);
        let value = match fs::read(&path).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        match fs::remove_file(&path).await {
            Ok(()) => {
                let _ = self.events.send(EvictionEvent {
                    key: key.to_string(),
                    value,
                    reason: EvictionReason::Explicit,
                });
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), level = "debug", fields(root = %self.root.display()))]
    async fn delete_all(&self) -> Result<usize> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut removed = 0;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }
            match decode_key(&name) {
                Some(key) => {
                    if self.delete(&key).await? {
                        removed += 1;
                    }
                }
                None => warn!("disk local tier: skipping foreign file {}", name),
            }
        }
        debug!("disk delete_all: removed={}", removed);
        Ok(removed)
    }

    fn subscribe_evictions(&self) -> broadcast::Receiver<EvictionEvent> {
        self.events.subscribe()
    }

    fn name(&self) -> &'static str {
        "disk"
    }
}
