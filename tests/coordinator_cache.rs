mod common;

use std::sync::Arc;

use common::{harness, mock_instance, mock_instance_with, same_manager};
use serde_json::json;
use svcmgr::instance::{ConfigMap, Instance, InstanceStatus, ServiceType};
use svcmgr::manager::{ErrorKind, ManagerError};
use tokio_util::sync::CancellationToken;

/// Test that two concurrent first-time lookups leave one cached manager.
#[tokio::test]
async fn test_concurrent_get_manager_caches_one() {
    let h = harness(vec![mock_instance_with("cache-1", "connect_delay_ms", json!(50))]);

    let (a, b) = {
        let c1 = Arc::clone(&h.coordinator);
        let c2 = Arc::clone(&h.coordinator);
        let t1 = tokio::spawn(async move { c1.get_manager("cache-1", &CancellationToken::new()).await });
        let t2 = tokio::spawn(async move { c2.get_manager("cache-1", &CancellationToken::new()).await });
        (t1.await.unwrap().unwrap(), t2.await.unwrap().unwrap())
    };

    assert!(same_manager(&a, &b));
    assert_eq!(h.coordinator.cached_count().await, 1);
    // Any duplicate built during the race must have been released.
    assert_eq!(h.counters.disconnects(), h.counters.connects() - 1);
}

/// Test that a cached manager is reused without reconnecting.
#[tokio::test]
async fn test_get_manager_fast_path() {
    let h = harness(vec![mock_instance("cache-1")]);
    let cancel = CancellationToken::new();

    let first = h.coordinator.get_manager("cache-1", &cancel).await.unwrap();
    let second = h.coordinator.get_manager("cache-1", &cancel).await.unwrap();

    assert!(same_manager(&first, &second));
    assert_eq!(h.counters.connects(), 1);
}

/// Test that removal disconnects and the next lookup reconnects.
#[tokio::test]
async fn test_remove_then_get_reconnects() {
    let h = harness(vec![mock_instance("cache-1")]);
    let cancel = CancellationToken::new();

    h.coordinator.get_manager("cache-1", &cancel).await.unwrap();
    assert!(h.coordinator.remove_manager("cache-1").await);
    assert_eq!(h.counters.disconnects(), 1);
    assert!(!h.coordinator.is_cached("cache-1").await);

    h.coordinator.get_manager("cache-1", &cancel).await.unwrap();
    assert_eq!(h.counters.connects(), 2);
    assert!(!h.coordinator.remove_manager("never-cached").await);
}

/// Test that a failed connect is returned unchanged and nothing is cached.
#[tokio::test]
async fn test_connect_failure_leaves_cache_unchanged() {
    let h = harness(vec![mock_instance_with("broken", "fail_connect", json!(true))]);

    let err = h
        .coordinator
        .get_manager("broken", &CancellationToken::new())
        .await
        .err()
        .unwrap();

    assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
    assert_eq!(h.coordinator.cached_count().await, 0);
}

/// Test that unknown ids surface the store's not-found error.
#[tokio::test]
async fn test_unknown_instance_is_store_error() {
    let h = harness(vec![]);
    let err = h
        .coordinator
        .get_manager("ghost", &CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Store);
}

/// Test that an unregistered type is unsupported.
#[tokio::test]
async fn test_unregistered_type_is_unsupported() {
    let instance = Instance::new("pg", ServiceType::Postgresql, "db", 5432)
        .with_id("pg")
        .with_status(InstanceStatus::Running);
    let h = harness(vec![instance]);
    let err = h
        .coordinator
        .get_manager("pg", &CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
}

/// Test that disconnect-all empties the cache and lookups reconnect.
#[tokio::test]
async fn test_disconnect_all() {
    let h = harness(vec![mock_instance("a"), mock_instance("b")]);
    let cancel = CancellationToken::new();

    h.coordinator.get_manager("a", &cancel).await.unwrap();
    h.coordinator.get_manager("b", &cancel).await.unwrap();
    assert_eq!(h.coordinator.cached_count().await, 2);

    h.coordinator.disconnect_all().await;
    assert_eq!(h.coordinator.cached_count().await, 0);
    assert_eq!(h.counters.disconnects(), 2);

    h.coordinator.get_manager("a", &cancel).await.unwrap();
    assert_eq!(h.counters.connects(), 3);
}

/// Test that a cancelled token aborts the slow path.
#[tokio::test]
async fn test_cancelled_get_manager() {
    let h = harness(vec![mock_instance_with("slow", "connect_delay_ms", json!(5_000))]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h.coordinator.get_manager("slow", &cancel).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(h.coordinator.cached_count().await, 0);
}

/// Test that test-connection probes without caching.
#[tokio::test]
async fn test_connection_is_not_cached() {
    let h = harness(vec![]);
    let candidate = mock_instance("candidate");

    let status = h
        .coordinator
        .test_connection(&candidate, &CancellationToken::new())
        .await
        .unwrap();

    assert!(status.healthy);
    assert_eq!(h.coordinator.cached_count().await, 0);
    assert_eq!(h.counters.connects(), 1);
    assert_eq!(h.counters.disconnects(), 1);
}

/// Test config validation through the coordinator.
#[tokio::test]
async fn test_validate_config() {
    let h = harness(vec![]);
    let mut config = ConfigMap::new();
    assert!(h.coordinator.validate_config(ServiceType::Redis, &config).is_ok());

    config.insert("invalid".into(), json!(true));
    assert!(matches!(
        h.coordinator.validate_config(ServiceType::Redis, &config),
        Err(ManagerError::InvalidConfig(_))
    ));
    assert!(matches!(
        h.coordinator.validate_config(ServiceType::Nginx, &ConfigMap::new()),
        Err(ManagerError::Unsupported(_))
    ));
}

/// Test that exec is limited to docker instances and validated first.
#[tokio::test]
async fn test_exec_routing_and_validation() {
    let docker = Instance::new("local", ServiceType::Docker, "", 0)
        .with_id("docker-1")
        .with_status(InstanceStatus::Running);
    let h = harness(vec![mock_instance("cache-1"), docker]);
    let cancel = CancellationToken::new();
    let cmd = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    let err = h
        .coordinator
        .exec("cache-1", "web", &cmd(&["ls"]), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);

    let err = h
        .coordinator
        .exec("docker-1", "web", &cmd(&["sudo", "rm", "-rf", "/"]), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CommandRejected);
    assert!(h.counters.execs.lock().is_empty());

    let output = h
        .coordinator
        .exec("docker-1", "web", &cmd(&["ps", "aux"]), &cancel)
        .await
        .unwrap();
    assert_eq!(output.output, "ps aux");
    assert_eq!(h.counters.execs.lock().len(), 1);
}

/// Test get-info delegates to the cached manager.
#[tokio::test]
async fn test_get_info() {
    let h = harness(vec![mock_instance("cache-1")]);
    let info = h
        .coordinator
        .get_info("cache-1", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(info.service_type, ServiceType::Redis);
    assert_eq!(info.version, "1.0.0-mock");
}
