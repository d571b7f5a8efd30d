//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 跨实例缓存失效的集成测试
//!
//! 两个协调器共享同一个内存远程层，模拟连接到同一个Redis的两个进程

#[path = "../common/mod.rs"]
mod common;

use common::{memory_coordinator, setup_logging, wait_until};
use std::time::Duration;
use tiercache::backend::remote::{MemoryRemoteStore, RemoteStore};
use tiercache::backend::LocalStore;
use tiercache::sync::{InvalidationListener, InvalidationMessage};
use tiercache::{CacheError, ListenerSettings, ListenerState};

fn invalidation_only() -> ListenerSettings {
    ListenerSettings {
        invalidation: true,
        expiry_sync: false,
    }
}

#[tokio::test]
async fn test_delete_propagates_to_other_instance() {
    setup_logging();
    let remote = MemoryRemoteStore::new();
    let (a, _) = memory_coordinator(&remote, "propagation", "node-a");
    let (b, b_local) = memory_coordinator(&remote, "propagation", "node-b");
    let b_tasks = b.start_listeners(&invalidation_only()).await.unwrap();

    a.set("shared", &"v1", Duration::from_secs(60)).await.unwrap();
    // 等待 set 广播的失效消息先被 B 处理
    tokio::time::sleep(Duration::from_millis(100)).await;
    // B 通过远程层读取并缓存到本地
    assert_eq!(b.get::<String>("shared").await.unwrap().as_deref(), Some("v1"));
    assert!(b_local.get("shared").await.unwrap().is_some());

    assert!(a.delete("shared").await.unwrap());

    let evicted = wait_until(Duration::from_secs(2), || {
        let b_local = b_local.clone();
        async move { b_local.get("shared").await.unwrap().is_none() }
    })
    .await;
    assert!(evicted, "remote delete should evict B's local copy");
    assert!(b.get::<String>("shared").await.unwrap().is_none());

    b_tasks.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_set_propagates_when_publish_on_set() {
    let remote = MemoryRemoteStore::new();
    let (a, _) = memory_coordinator(&remote, "set_propagation", "node-a");
    let (b, b_local) = memory_coordinator(&remote, "set_propagation", "node-b");
    let b_tasks = b.start_listeners(&invalidation_only()).await.unwrap();

    a.set("k", &1u32, -1i64).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(b.get::<u32>("k").await.unwrap(), Some(1));
    assert!(b_local.get("k").await.unwrap().is_some());

    a.set("k", &2u32, -1i64).await.unwrap();
    let refreshed = wait_until(Duration::from_secs(2), || {
        let b = b.clone();
        async move { b.get::<u32>("k").await.unwrap() == Some(2) }
    })
    .await;
    assert!(refreshed);

    b_tasks.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_own_messages_do_not_evict() {
    let remote = MemoryRemoteStore::new();
    let (a, a_local) = memory_coordinator(&remote, "self", "node-a");
    let tasks = a.start_listeners(&invalidation_only()).await.unwrap();
    let mut events = a.subscribe_evictions();

    a.set("k", &"mine", -1i64).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(a_local.get("k").await.unwrap().is_some());
    assert!(events.try_recv().is_err(), "own publish must not evict");

    tasks.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_messages_are_skipped() {
    let remote = MemoryRemoteStore::new();
    let (a, a_local) = memory_coordinator(&remote, "malformed", "node-a");
    let tasks = a.start_listeners(&invalidation_only()).await.unwrap();

    a.set("k", &1u8, -1i64).await.unwrap();
    remote.publish(a.channel(), "not json").await.unwrap();
    remote.publish(a.channel(), r#"{"key":"k"}"#).await.unwrap();

    let foreign = InvalidationMessage::for_key("node-x", "k").to_json().unwrap();
    remote.publish(a.channel(), &foreign).await.unwrap();

    let evicted = wait_until(Duration::from_secs(2), || {
        let a_local = a_local.clone();
        async move { a_local.get("k").await.unwrap().is_none() }
    })
    .await;
    assert!(evicted, "listener should keep running after bad payloads");
    assert_eq!(tasks.state_of(InvalidationListener::NAME), Some(ListenerState::Running));

    tasks.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_delete_all_clears_other_instances() {
    let remote = MemoryRemoteStore::new();
    let (a, _) = memory_coordinator(&remote, "clear_all", "node-a");
    let (b, b_local) = memory_coordinator(&remote, "clear_all", "node-b");
    let b_tasks = b.start_listeners(&invalidation_only()).await.unwrap();

    b_local.set("only-local", b"1".to_vec(), None).await.unwrap();
    a.delete_all().await.unwrap();

    let cleared = wait_until(Duration::from_secs(2), || {
        let b_local = b_local.clone();
        async move { b_local.get("only-local").await.unwrap().is_none() }
    })
    .await;
    assert!(cleared);

    b_tasks.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_listener_lifecycle_and_cancellation() {
    let remote = MemoryRemoteStore::new();
    let (a, _) = memory_coordinator(&remote, "lifecycle", "node-a");
    let tasks = a.start_listeners(&ListenerSettings::default()).await.unwrap();
    assert_eq!(tasks.listeners().len(), 2);

    let mut states: Vec<_> = tasks.listeners().iter().map(|l| l.watch_state()).collect();
    for state in states.iter_mut() {
        tokio::time::timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == ListenerState::Running),
        )
        .await
        .unwrap()
        .unwrap();
    }

    tasks.shutdown().await.unwrap();
    for state in &states {
        assert_eq!(*state.borrow(), ListenerState::Stopped);
    }
}

#[tokio::test]
async fn test_connection_loss_is_fatal() {
    let remote = MemoryRemoteStore::new();
    let (a, _) = memory_coordinator(&remote, "fatal", "node-a");
    let tasks = a.start_listeners(&invalidation_only()).await.unwrap();
    let mut state = tasks.listeners()[0].watch_state();

    remote.set_online(false);
    tokio::time::timeout(
        Duration::from_secs(1),
        state.wait_for(|s| *s == ListenerState::Stopped),
    )
    .await
    .unwrap()
    .unwrap();

    let result = tasks.shutdown().await;
    assert!(matches!(result, Err(CacheError::ListenerFatal(_))));
}

#[tokio::test]
async fn test_start_fails_when_remote_is_down() {
    let remote = MemoryRemoteStore::new();
    let (a, _) = memory_coordinator(&remote, "down", "node-a");
    remote.set_online(false);

    let err = a
        .start_listeners(&ListenerSettings::default())
        .await
        .err()
        .unwrap();
    assert!(err.is_remote_unavailable());
}
