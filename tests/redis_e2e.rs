//! End-to-end checks against a live Redis on localhost:6379.
//!
//! Run with `cargo test --test redis_e2e -- --ignored`.

use std::sync::Arc;

use svcmgr::coordinator::{ManagerCoordinator, MonitorSettings};
use svcmgr::instance::{Instance, InstanceStatus, ServiceType};
use svcmgr::manager::ManagerFactory;
use svcmgr::store::MemoryStore;
use tokio_util::sync::CancellationToken;

fn local_redis() -> Instance {
    let host = std::env::var("SVCMGR_REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    Instance::new("local-redis", ServiceType::Redis, host, 6379)
        .with_id("redis-e2e")
        .with_status(InstanceStatus::Running)
}

#[tokio::test]
#[ignore = "requires a local Redis"]
async fn test_redis_end_to_end() {
    let store = MemoryStore::from_instances([local_redis()]);
    let coordinator = Arc::new(ManagerCoordinator::new(
        Arc::new(ManagerFactory::builtin()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        MonitorSettings::default(),
    ));
    let cancel = CancellationToken::new();

    coordinator
        .validate_config(ServiceType::Redis, &local_redis().config)
        .unwrap();

    let manager = coordinator.get_manager("redis-e2e", &cancel).await.unwrap();
    assert_eq!(manager.service_type(), ServiceType::Redis);

    let status = coordinator.health_check("redis-e2e", &cancel).await.unwrap();
    assert!(status.healthy, "unhealthy: {}", status.message);
    assert!(status.response_time_ms() < 5_000);

    let metrics = coordinator.collect_metrics("redis-e2e", &cancel).await.unwrap();
    assert!(metrics.get("connected_clients").is_some());
    assert!(metrics.get("total_keys").is_some());
    assert!(store.latest("redis-e2e").contains_key("connected_clients"));

    coordinator.disconnect_all().await;
}
