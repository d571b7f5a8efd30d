//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 协调器读写删除的集成测试

#[path = "../common/mod.rs"]
mod common;

use common::{memory_coordinator, setup_logging};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tiercache::backend::remote::{MemoryRemoteStore, RemoteStore};
use tiercache::backend::{EvictionReason, LocalStore};
use tiercache::entry::MAX_TTL;
use tiercache::{Expiration, Tier};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    id: u64,
    name: String,
}

#[tokio::test]
async fn test_local_hit_short_circuits_remote() {
    setup_logging();
    let remote = MemoryRemoteStore::new();
    let (coordinator, _) = memory_coordinator(&remote, "short_circuit", "a");

    coordinator
        .set("k", &"value".to_string(), Duration::from_secs(60))
        .await
        .unwrap();
    remote.reset_calls();

    for _ in 0..10 {
        let entry = coordinator.get_entry::<String>("k").await.unwrap().unwrap();
        assert_eq!(entry.tier, Tier::Local);
        assert_eq!(entry.value, "value");
    }

    assert_eq!(remote.calls().gets, 0);
}

#[tokio::test]
async fn test_remote_hit_populates_local() {
    setup_logging();
    let remote = MemoryRemoteStore::new();
    let (writer, _) = memory_coordinator(&remote, "populate", "writer");
    let (reader, reader_local) = memory_coordinator(&remote, "populate", "reader");

    writer
        .set("k", &7u32, Duration::from_secs(30))
        .await
        .unwrap();

    let first = reader.get_entry::<u32>("k").await.unwrap().unwrap();
    assert_eq!(first.tier, Tier::Remote);
    assert!(first.ttl.unwrap() <= Duration::from_secs(30));

    let cached = reader_local.get("k").await.unwrap().unwrap();
    assert!(cached.remaining().unwrap() <= Duration::from_secs(30));

    remote.reset_calls();
    let second = reader.get_entry::<u32>("k").await.unwrap().unwrap();
    assert_eq!(second.tier, Tier::Local);
    assert_eq!(remote.calls().gets, 0);
}

#[tokio::test]
async fn test_user_42_ttl_fidelity() {
    setup_logging();
    let remote = MemoryRemoteStore::new();
    let (coordinator, local) = memory_coordinator(&remote, "ttl_fidelity", "a");
    let user = User {
        id: 42,
        name: "Ada".to_string(),
    };

    coordinator
        .set("user:42", &user, Expiration::from_secs(5))
        .await
        .unwrap();

    let entry = coordinator.get_entry::<User>("user:42").await.unwrap().unwrap();
    assert_eq!(entry.value, user);
    let ttl = entry.ttl.unwrap();
    assert!(ttl > Duration::ZERO && ttl <= Duration::from_secs(5));

    let (_, remote_ttl) = remote.get_with_ttl("user:42").await.unwrap().unwrap();
    assert!(remote_ttl.unwrap() <= Duration::from_secs(5));

    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(local.get("user:42").await.unwrap().is_none());
    assert!(remote.get_bytes("user:42").await.unwrap().is_none());
    assert!(coordinator.get::<User>("user:42").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unlimited_ttl() {
    let remote = MemoryRemoteStore::new();
    let (coordinator, _) = memory_coordinator(&remote, "unlimited", "a");

    coordinator.set("k", &1u8, -1i64).await.unwrap();
    let entry = coordinator.get_entry::<u8>("k").await.unwrap().unwrap();
    assert!(entry.ttl.is_none());
    assert!(entry.expires_at.is_none());
}

#[tokio::test]
async fn test_get_absent_writes_nothing() {
    let remote = MemoryRemoteStore::new();
    let (coordinator, local) = memory_coordinator(&remote, "absent", "a");

    assert!(coordinator.get::<String>("nope").await.unwrap().is_none());
    assert!(local.get("nope").await.unwrap().is_none());
    assert_eq!(remote.calls().sets, 0);
    assert!(remote.is_empty());
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let remote = MemoryRemoteStore::new();
    let (coordinator, local) = memory_coordinator(&remote, "idempotent", "a");

    coordinator
        .set("k", &"v", Duration::from_secs(60))
        .await
        .unwrap();
    assert!(coordinator.delete("k").await.unwrap());
    assert!(!coordinator.delete("k").await.unwrap());
    assert!(!coordinator.delete("k").await.unwrap());

    assert!(local.get("k").await.unwrap().is_none());
    assert!(remote.get_bytes("k").await.unwrap().is_none());
}

#[tokio::test]
async fn test_get_survives_remote_outage() {
    let remote = MemoryRemoteStore::new();
    let (coordinator, _) = memory_coordinator(&remote, "outage", "a");
    coordinator
        .set("cached", &1u8, Duration::from_secs(60))
        .await
        .unwrap();

    remote.set_online(false);

    // 本地命中不受影响，本地未命中降级为不存在
    assert_eq!(coordinator.get::<u8>("cached").await.unwrap(), Some(1));
    assert_eq!(coordinator.get::<u8>("other").await.unwrap(), None);

    let err = coordinator.set("x", &1u8, -1i64).await.unwrap_err();
    assert!(err.is_remote_unavailable());
    assert_eq!(coordinator.get::<u8>("x").await.unwrap(), Some(1));

    assert!(coordinator.delete("x").await.is_err());
}

#[tokio::test]
async fn test_delete_all_clears_both_tiers() {
    let remote = MemoryRemoteStore::new();
    let (coordinator, local) = memory_coordinator(&remote, "delete_all", "a");

    for i in 0..5u8 {
        coordinator
            .set(&format!("k{}", i), &i, Duration::from_secs(60))
            .await
            .unwrap();
    }
    coordinator
        .set("s", &0u8, Expiration::Sliding(Duration::from_secs(30)))
        .await
        .unwrap();

    assert_eq!(coordinator.delete_all().await.unwrap(), 12);
    assert!(remote.is_empty());
    assert!(local.get("k0").await.unwrap().is_none());
    assert!(coordinator.sliding_registry().is_empty());
}

#[tokio::test]
async fn test_eviction_events_are_exposed() {
    let remote = MemoryRemoteStore::new();
    let (coordinator, _) = memory_coordinator(&remote, "evictions", "a");
    let mut events = coordinator.subscribe_evictions();

    coordinator
        .set("k", &"v", Duration::from_secs(60))
        .await
        .unwrap();
    coordinator.delete_local("k", false).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.key, "k");
    assert_eq!(event.reason, EvictionReason::Explicit);
}

#[tokio::test]
async fn test_non_sliding_set_clears_sliding_registration() {
    let remote = MemoryRemoteStore::new();
    let (coordinator, _) = memory_coordinator(&remote, "sliding_reset", "a");

    coordinator
        .set("k", &1u8, Expiration::Sliding(Duration::from_secs(30)))
        .await
        .unwrap();
    assert!(coordinator.sliding_registry().contains("k"));

    coordinator
        .set("k", &2u8, Duration::from_secs(30))
        .await
        .unwrap();
    assert!(!coordinator.sliding_registry().contains("k"));
}

#[tokio::test]
async fn test_unbounded_ttl_is_clamped_instead_of_overflowing() {
    let remote = MemoryRemoteStore::new();
    let (coordinator, local) = memory_coordinator(&remote, "huge_ttl", "a");

    coordinator.set("secs", &1u8, i64::MAX).await.unwrap();
    coordinator.set("dur", &2u8, Duration::MAX).await.unwrap();
    coordinator
        .set("sliding", &3u8, Expiration::Sliding(Duration::MAX))
        .await
        .unwrap();

    for (key, expected) in [("secs", 1u8), ("dur", 2), ("sliding", 3)] {
        let entry = coordinator.get_entry::<u8>(key).await.unwrap().unwrap();
        assert_eq!(entry.value, expected);
        assert!(entry.ttl.unwrap() <= MAX_TTL);

        let (_, remote_ttl) = remote.get_with_ttl(key).await.unwrap().unwrap();
        assert!(remote_ttl.unwrap() <= MAX_TTL);

        // 绕过本地层，远程命中后以截断的TTL回填
        local.delete(key).await.unwrap();
        let entry = coordinator.get_entry::<u8>(key).await.unwrap().unwrap();
        assert_eq!(entry.tier, Tier::Remote);
        assert!(entry.ttl.unwrap() <= MAX_TTL);
    }
}
