//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存系统的存储后端，包括本地层和远程层。

pub mod local;
pub mod redis_provider;
pub mod remote;

pub use local::{EvictionEvent, EvictionReason, LocalEntry, LocalStore};
pub use remote::{RemoteStore, Subscription};
