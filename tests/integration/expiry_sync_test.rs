//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 滑动过期与过期同步服务的集成测试

#[path = "../common/mod.rs"]
mod common;

use common::{memory_coordinator, setup_logging, wait_until};
use std::time::Duration;
use tiercache::backend::remote::{MemoryRemoteStore, RemoteStore};
use tiercache::backend::LocalStore;
use tiercache::sync::ExpirySyncService;
use tiercache::{Expiration, ListenerSettings, ListenerState, Tier};

fn expiry_only() -> ListenerSettings {
    ListenerSettings {
        invalidation: false,
        expiry_sync: true,
    }
}

#[tokio::test]
async fn test_remote_expiry_removes_sliding_registration() {
    setup_logging();
    let remote = MemoryRemoteStore::new();
    let (coordinator, _) = memory_coordinator(&remote, "expiry_sync", "a");
    let tasks = coordinator.start_listeners(&expiry_only()).await.unwrap();

    coordinator
        .set("session", &"token", Expiration::Sliding(Duration::from_millis(100)))
        .await
        .unwrap();
    coordinator
        .set("long", &"token", Expiration::Sliding(Duration::from_secs(60)))
        .await
        .unwrap();
    assert_eq!(coordinator.sliding_registry().len(), 2);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(remote.purge_expired(), 1);

    let registry = coordinator.sliding_registry().clone();
    let dropped = wait_until(Duration::from_secs(2), || {
        let registry = registry.clone();
        async move { !registry.contains("session") }
    })
    .await;
    assert!(dropped);
    assert!(registry.contains("long"));
    assert_eq!(tasks.state_of(ExpirySyncService::NAME), Some(ListenerState::Running));

    tasks.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_expiry_does_not_touch_local_tier() {
    let remote = MemoryRemoteStore::new();
    let (coordinator, local) = memory_coordinator(&remote, "expiry_local", "a");
    let tasks = coordinator.start_listeners(&expiry_only()).await.unwrap();

    // 只在远程层设置短TTL，本地层保留一份不过期的副本
    remote
        .set_bytes("k", b"1".to_vec(), Some(Duration::from_millis(50)))
        .await
        .unwrap();
    local.set("k", b"1".to_vec(), None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    remote.purge_expired();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(local.get("k").await.unwrap().is_some());
    tasks.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sliding_window_resets_on_remote_read() {
    let remote = MemoryRemoteStore::new();
    let (writer, _) = memory_coordinator(&remote, "sliding_read", "writer");
    let window = Duration::from_millis(400);

    writer
        .set("s", &1u8, Expiration::Sliding(window))
        .await
        .unwrap();

    // 持续读取使键一直存活，超过原始窗口
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        writer.delete_local("s", false).await.unwrap();
        let entry = writer.get_entry::<u8>("s").await.unwrap().unwrap();
        assert_eq!(entry.tier, Tier::Remote);
        assert_eq!(entry.ttl, Some(window));
    }
    assert!(remote.calls().touches >= 4);

    tokio::time::sleep(Duration::from_millis(600)).await;
    writer.delete_local("s", false).await.unwrap();
    assert!(writer.get::<u8>("s").await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_unregisters_sliding_key() {
    let remote = MemoryRemoteStore::new();
    let (coordinator, _) = memory_coordinator(&remote, "sliding_delete", "a");
    coordinator
        .set("s", &1u8, Expiration::Sliding(Duration::from_secs(30)))
        .await
        .unwrap();

    coordinator.delete("s").await.unwrap();
    assert!(!coordinator.sliding_registry().contains("s"));
}
