//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存系统的同步机制，包括按键加锁、失效广播和过期同步。

pub mod common;
pub mod expiry;
pub mod invalidation;
pub mod keyed_lock;
pub mod sliding;

pub use common::{BackgroundTasks, ListenerHandle, ListenerState};
pub use expiry::ExpirySyncService;
pub use invalidation::{InvalidationListener, InvalidationMessage, InvalidationScope};
pub use keyed_lock::{KeyedLock, KeyedLockGuard};
pub use sliding::SlidingExpirationRegistry;
