//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了按键互斥的异步锁，用于缓存未命中时的单飞加载。

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

struct Slot {
    mutex: Arc<Mutex<()>>,
    /// 持有者和等待者的总数
    refs: usize,
}

/// 按键的异步互斥锁
///
/// 每个键的记录在第一次获取时创建，最后一个持有者或等待者离开时删除，
/// 因此记录数量只与当前活跃的键有关
#[derive(Clone, Default)]
pub struct KeyedLock {
    slots: Arc<DashMap<String, Slot>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取键的独占锁
    ///
    /// 同一个键同时只有一个持有者；不同键之间互不影响。
    /// 等待中的获取被取消时，引用计数同样会被归还
    pub async fn acquire(&self, key: &str) -> KeyedLockGuard {
        let ticket = Ticket::issue(&self.slots, key);
        let permit = ticket.mutex.clone().lock_owned().await;
        trace!("keyed lock acquired: {}", key);
        KeyedLockGuard {
            _permit: permit,
            _ticket: ticket,
        }
    }

    /// 当前有持有者或等待者的键数量
    pub fn active_keys(&self) -> usize {
        self.slots.len()
    }
}

/// 引用计数凭证，drop 时归还
struct Ticket {
    slots: Arc<DashMap<String, Slot>>,
    key: String,
    mutex: Arc<Mutex<()>>,
}

impl Ticket {
    fn issue(slots: &Arc<DashMap<String, Slot>>, key: &str) -> Self {
        let mutex = {
            let mut slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
                mutex: Arc::new(Mutex::new(())),
                refs: 0,
            });
            slot.refs += 1;
            slot.mutex.clone()
        };
        Self {
            slots: slots.clone(),
            key: key.to_string(),
            mutex,
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if let Entry::Occupied(mut slot) = self.slots.entry(std::mem::take(&mut self.key)) {
            slot.get_mut().refs -= 1;
            if slot.get().refs == 0 {
                slot.remove();
            }
        }
    }
}

/// 锁守卫
///
/// 字段按声明顺序析构：先释放互斥锁，再归还引用计数
pub struct KeyedLockGuard {
    _permit: OwnedMutexGuard<()>,
    _ticket: Ticket,
}
