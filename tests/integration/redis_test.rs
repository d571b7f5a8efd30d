//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! Redis远程层的集成测试，Redis不可用时跳过

#[path = "../common/mod.rs"]
mod common;

use common::{is_redis_available, redis_config, setup_logging, unique_namespace, wait_until};
use serial_test::serial;
use std::time::Duration;
use tiercache::backend::remote::{RedisRemoteStore, RemoteStore};
use tiercache::backend::LocalStore;
use tiercache::config::Config;
use tiercache::{CacheCoordinator, CacheError, Expiration, ListenerSettings, Tier};

fn config_for(namespace: &str, instance: &str) -> Config {
    Config {
        namespace: namespace.to_string(),
        instance_id: Some(instance.to_string()),
        remote: redis_config(),
        ..Default::default()
    }
}

#[tokio::test]
#[serial]
async fn test_get_with_ttl_round_trip() {
    setup_logging();
    if !is_redis_available().await {
        println!("Skipping test_get_with_ttl_round_trip because Redis is not available");
        return;
    }

    let ns = unique_namespace("redis_ttl");
    let store = RedisRemoteStore::new(&redis_config(), &ns, "test").await.unwrap();

    assert!(store.get_with_ttl("missing").await.unwrap().is_none());

    store
        .set_bytes("k", b"v".to_vec(), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    let (value, ttl) = store.get_with_ttl("k").await.unwrap().unwrap();
    assert_eq!(value, b"v");
    let ttl = ttl.unwrap();
    assert!(ttl > Duration::ZERO && ttl <= Duration::from_secs(5));
    assert!(store.ttl("k").await.unwrap().unwrap() <= 5);

    store.set_bytes("forever", b"v".to_vec(), None).await.unwrap();
    let (_, ttl) = store.get_with_ttl("forever").await.unwrap().unwrap();
    assert!(ttl.is_none());

    assert!(store.touch("k", Duration::from_secs(60)).await.unwrap());
    assert!(store.ttl("k").await.unwrap().unwrap() > 5);

    assert_eq!(store.delete_all().await.unwrap(), 2);
    assert!(!store.delete("k").await.unwrap());
}

#[tokio::test]
#[serial]
async fn test_audit_key_records_caller() {
    if !is_redis_available().await {
        println!("Skipping test_audit_key_records_caller because Redis is not available");
        return;
    }

    let ns = unique_namespace("redis_audit");
    let audit_key = format!("{}:__audit", ns);
    let mut config = redis_config();
    config.audit_key = Some(audit_key.clone());
    let store = RedisRemoteStore::new(&config, &ns, "caller-1").await.unwrap();

    store.set_bytes("k", b"v".to_vec(), None).await.unwrap();
    store.get_with_ttl("k").await.unwrap().unwrap();

    let client = redis::Client::open(common::redis_url()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let stamp: Option<i64> = redis::cmd("HGET")
        .arg(&audit_key)
        .arg("caller-1")
        .query_async(&mut conn)
        .await
        .unwrap();
    assert!(stamp.unwrap() > 0);

    let _: () = redis::cmd("DEL")
        .arg(&audit_key)
        .query_async(&mut conn)
        .await
        .unwrap();
    store.delete_all().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_invalidation_between_two_coordinators() {
    setup_logging();
    if !is_redis_available().await {
        println!("Skipping test_invalidation_between_two_coordinators because Redis is not available");
        return;
    }

    let ns = unique_namespace("redis_invalidation");
    let a = CacheCoordinator::from_config(&config_for(&ns, "node-a"))
        .await
        .unwrap();
    let b = CacheCoordinator::from_config(&config_for(&ns, "node-b"))
        .await
        .unwrap();
    let settings = ListenerSettings {
        invalidation: true,
        expiry_sync: false,
    };
    let b_tasks = b.start_listeners(&settings).await.unwrap();

    a.set("user:42", &"Ada", Duration::from_secs(60)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let entry = b.get_entry::<String>("user:42").await.unwrap().unwrap();
    assert_eq!(entry.tier, Tier::Remote);

    a.delete("user:42").await.unwrap();
    let local = b.local().clone();
    let evicted = wait_until(Duration::from_secs(3), || {
        let local = local.clone();
        async move { local.get("user:42").await.unwrap().is_none() }
    })
    .await;
    assert!(evicted);

    b_tasks.shutdown().await.unwrap();
    a.delete_all().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_keyspace_expiry_reaches_sync_service() {
    if !is_redis_available().await {
        println!("Skipping test_keyspace_expiry_reaches_sync_service because Redis is not available");
        return;
    }

    let ns = unique_namespace("redis_expiry");
    let coordinator = CacheCoordinator::from_config(&config_for(&ns, "node-a"))
        .await
        .unwrap();
    let settings = ListenerSettings {
        invalidation: false,
        expiry_sync: true,
    };
    let tasks = coordinator.start_listeners(&settings).await.unwrap();

    coordinator
        .set("session", &"token", Expiration::Sliding(Duration::from_secs(1)))
        .await
        .unwrap();
    assert!(coordinator.sliding_registry().contains("session"));

    let registry = coordinator.sliding_registry().clone();
    let dropped = wait_until(Duration::from_secs(5), || {
        let registry = registry.clone();
        async move { !registry.contains("session") }
    })
    .await;
    // CONFIG SET 被禁用的托管Redis收不到过期通知
    if !dropped {
        println!("Keyspace notifications unavailable, expiry event not observed");
    }

    tasks.shutdown().await.unwrap();
    coordinator.delete_all().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_unreachable_redis_is_remote_unavailable() {
    let mut config = redis_config();
    config.connection_string = secrecy::SecretString::new("redis://127.0.0.1:1".into());
    config.connection_timeout_ms = 200;

    let err = RedisRemoteStore::new(&config, "nowhere", "test")
        .await
        .err()
        .unwrap();
    assert!(err.is_remote_unavailable());
}

#[tokio::test]
#[serial]
async fn test_namespace_with_glob_chars_is_rejected_before_connecting() {
    // 不需要Redis：命名空间在建立连接之前校验
    for ns in ["a:b", "a*", "a[1]"] {
        let err = RedisRemoteStore::new(&redis_config(), ns, "test")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CacheError::Configuration(_)), "{:?}", err);
    }
}
