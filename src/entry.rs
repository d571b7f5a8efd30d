//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存条目与过期策略。

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// 单个条目允许的最长TTL（10年），更长的TTL按此上限处理
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

/// 把TTL限制在 [`MAX_TTL`] 以内
pub fn clamp_ttl(ttl: Duration) -> Duration {
    ttl.min(MAX_TTL)
}

/// 以毫秒表示的TTL，至少为1毫秒
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(clamp_ttl(ttl).as_millis())
        .unwrap_or(u64::MAX)
        .max(1)
}

/// 从当前时刻起算的过期时刻
pub(crate) fn deadline_after(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(clamp_ttl(ttl)).unwrap_or(now)
}

/// 过期策略
///
/// 调用方传入的相对秒数会被解析为"永不过期"或一个确定的时长，
/// 非正数（约定为 `-1`）表示永不过期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiration {
    /// 永不过期
    #[default]
    Never,
    /// 从写入起计时
    After(Duration),
    /// 滑动过期：每次从远程层读取都会重置为该窗口
    Sliding(Duration),
}

impl Expiration {
    /// 以秒为单位构造过期策略
    pub fn from_secs(secs: i64) -> Self {
        if secs <= 0 {
            Expiration::Never
        } else {
            Expiration::After(clamp_ttl(Duration::from_secs(secs as u64)))
        }
    }

    /// 写入存储时使用的 TTL，`None` 表示不过期
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            Expiration::Never => None,
            Expiration::After(d) | Expiration::Sliding(d) => Some(clamp_ttl(*d)),
        }
    }

    /// 滑动窗口（如果有）
    pub fn sliding_window(&self) -> Option<Duration> {
        match self {
            Expiration::Sliding(d) => Some(clamp_ttl(*d)),
            _ => None,
        }
    }
}

impl From<i64> for Expiration {
    fn from(secs: i64) -> Self {
        Expiration::from_secs(secs)
    }
}

impl From<Duration> for Expiration {
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            Expiration::Never
        } else {
            Expiration::After(d)
        }
    }
}

impl From<Option<Duration>> for Expiration {
    fn from(d: Option<Duration>) -> Self {
        d.map(Expiration::from).unwrap_or(Expiration::Never)
    }
}

/// 命中来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Local,
    Remote,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Local => "local",
            Tier::Remote => "remote",
        }
    }
}

/// 缓存条目
///
/// 读取时构造：值、读取时刻观察到的剩余TTL、换算出的绝对过期时间，
/// 以及该键最初请求的滑动窗口
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    /// 读取时刻的剩余生存时间
    pub ttl: Option<Duration>,
    /// 绝对过期时间
    pub expires_at: Option<DateTime<Utc>>,
    pub sliding: Option<Duration>,
    pub tier: Tier,
}

impl<T> CacheEntry<T> {
    pub(crate) fn new(value: T, ttl: Option<Duration>, sliding: Option<Duration>, tier: Tier) -> Self {
        let expires_at = ttl
            .and_then(|d| chrono::Duration::from_std(clamp_ttl(d)).ok())
            .and_then(|d| Utc::now().checked_add_signed(d));
        Self {
            value,
            ttl,
            expires_at,
            sliding,
            tier,
        }
    }

    /// 当前剩余生存时间，`None` 表示永不过期
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn into_value(self) -> T {
        self.value
    }
}
