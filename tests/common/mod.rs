//! Shared test utilities and mock infrastructure.

#![allow(dead_code, unused_imports)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use svcmgr::coordinator::{ManagerCoordinator, MonitorSettings};
use svcmgr::instance::{ConfigMap, HealthState, Instance, InstanceStatus, ServiceType};
use svcmgr::manager::{
    ExecOutput, HealthStatus, ManagerBase, ManagerError, ManagerFactory, ServiceInfo, ServiceManager,
    ServiceMetrics,
};
use svcmgr::store::{InstanceStore, MemoryStore, MetricPoint, MetricStore, Page, StoreError};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Call counters shared by every mock built from one factory.
#[derive(Default)]
pub struct MockCounters {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub health_checks: AtomicUsize,
    pub execs: Mutex<Vec<(String, Vec<String>)>>,
}

impl MockCounters {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }
}

/// Manager whose behaviour is scripted through the instance config map:
///
/// - `fail_connect`: connect returns `ConnectionFailed`
/// - `connect_delay_ms`: sleep before connecting
/// - `disconnect_delay_ms`: sleep before disconnecting
/// - `hang`: health check never returns
/// - `degraded`: health check reports `healthy == false`
/// - `invalid`: `validate_config` rejects the map
pub struct MockManager {
    service_type: ServiceType,
    base: ManagerBase,
    counters: Arc<MockCounters>,
    connected: AtomicUsize,
}

impl MockManager {
    pub fn new(service_type: ServiceType, counters: Arc<MockCounters>) -> Self {
        Self {
            service_type,
            base: ManagerBase::new(),
            counters,
            connected: AtomicUsize::new(0),
        }
    }

    fn flag(&self, key: &str) -> bool {
        self.base
            .config()
            .and_then(|c| c.get(key))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    fn delay(&self, key: &str) -> Duration {
        let millis = self
            .base
            .config()
            .and_then(|c| c.get(key))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Duration::from_millis(millis)
    }

    fn ensure_connected(&self) -> Result<(), ManagerError> {
        if self.connected.load(Ordering::SeqCst) == 0 {
            return Err(ManagerError::NotConnected);
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceManager for MockManager {
    fn service_type(&self) -> ServiceType {
        self.service_type
    }

    fn initialize(&mut self, instance: &Instance) -> Result<(), ManagerError> {
        self.base.bind(instance, self.service_type)
    }

    async fn connect(&self, cancel: &CancellationToken) -> Result<(), ManagerError> {
        let delay = self.delay("connect_delay_ms");
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ManagerError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if self.flag("fail_connect") {
            return Err(ManagerError::connection("connection refused"));
        }
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ManagerError> {
        tokio::time::sleep(self.delay("disconnect_delay_ms")).await;
        if self.connected.swap(0, Ordering::SeqCst) == 1 {
            self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn health_check(&self, _cancel: &CancellationToken) -> Result<HealthStatus, ManagerError> {
        self.ensure_connected()?;
        self.counters.health_checks.fetch_add(1, Ordering::SeqCst);
        if self.flag("hang") {
            std::future::pending::<()>().await;
        }
        if self.flag("degraded") {
            return Ok(HealthStatus::unhealthy(
                "replication lag above threshold",
                Duration::from_millis(3),
            ));
        }
        Ok(HealthStatus::healthy("mock is healthy", Duration::from_millis(1)))
    }

    async fn collect_metrics(&self, _cancel: &CancellationToken) -> Result<ServiceMetrics, ManagerError> {
        self.ensure_connected()?;
        let mut metrics = ServiceMetrics::new();
        metrics.insert("connected_clients", 4i64);
        metrics.insert("hit_rate", 0.5);
        metrics.insert("role", "master");
        metrics.insert("cluster_enabled", false);
        Ok(metrics)
    }

    async fn get_info(&self, _cancel: &CancellationToken) -> Result<ServiceInfo, ManagerError> {
        self.ensure_connected()?;
        Ok(ServiceInfo::new(self.service_type, "1.0.0-mock"))
    }

    fn validate_config(&self, config: &ConfigMap) -> Result<(), ManagerError> {
        if config.contains_key("invalid") {
            return Err(ManagerError::InvalidConfig("invalid key present".to_string()));
        }
        Ok(())
    }

    async fn exec(
        &self,
        target: &str,
        command: &[String],
        _cancel: &CancellationToken,
    ) -> Result<ExecOutput, ManagerError> {
        self.ensure_connected()?;
        self.counters
            .execs
            .lock()
            .push((target.to_string(), command.to_vec()));
        Ok(ExecOutput {
            exit_code: Some(0),
            output: command.join(" "),
        })
    }
}

/// Factory with mocks registered for the redis and docker types.
pub fn mock_factory(counters: &Arc<MockCounters>) -> ManagerFactory {
    let mut factory = ManagerFactory::empty();
    for ty in [ServiceType::Redis, ServiceType::Docker] {
        let counters = Arc::clone(counters);
        factory.register(ty, move || -> Box<dyn ServiceManager> {
            Box::new(MockManager::new(ty, Arc::clone(&counters)))
        });
    }
    factory
}

/// A running redis-typed instance with a fixed id.
pub fn mock_instance(id: &str) -> Instance {
    Instance::new(id, ServiceType::Redis, "127.0.0.1", 6379)
        .with_id(id)
        .with_status(InstanceStatus::Running)
}

pub fn mock_instance_with(id: &str, key: &str, value: serde_json::Value) -> Instance {
    mock_instance(id).with_config(key, value)
}

pub struct Harness {
    pub coordinator: Arc<ManagerCoordinator>,
    pub store: MemoryStore,
    pub counters: Arc<MockCounters>,
}

pub fn harness(instances: Vec<Instance>) -> Harness {
    harness_with(instances, MonitorSettings::default())
}

pub fn harness_with(instances: Vec<Instance>, settings: MonitorSettings) -> Harness {
    let counters = Arc::new(MockCounters::default());
    let store = MemoryStore::from_instances(instances);
    let coordinator = Arc::new(ManagerCoordinator::new(
        Arc::new(mock_factory(&counters)),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        settings,
    ));
    Harness {
        coordinator,
        store,
        counters,
    }
}

/// Store whose writes fail: every `update_health`, and `create_point` for
/// the metric named `failing_metric`. Reads and other points pass through
/// to the wrapped memory store.
pub struct FailingStore {
    inner: MemoryStore,
    failing_metric: String,
    pub health_failures: AtomicUsize,
    pub point_failures: AtomicUsize,
}

impl FailingStore {
    pub fn new(inner: MemoryStore, failing_metric: &str) -> Self {
        Self {
            inner,
            failing_metric: failing_metric.to_string(),
            health_failures: AtomicUsize::new(0),
            point_failures: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl InstanceStore for FailingStore {
    async fn get(&self, id: &str) -> Result<Instance, StoreError> {
        self.inner.get(id).await
    }

    async fn list_by_status(&self, status: InstanceStatus, page: Page) -> Result<Vec<Instance>, StoreError> {
        self.inner.list_by_status(status, page).await
    }

    async fn update_health(&self, _id: &str, _state: HealthState, _message: &str) -> Result<(), StoreError> {
        self.health_failures.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Backend("health table is read-only".to_string()))
    }
}

#[async_trait]
impl MetricStore for FailingStore {
    async fn create_point(&self, point: MetricPoint) -> Result<(), StoreError> {
        if point.name == self.failing_metric {
            self.point_failures.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Backend(format!("cannot write series '{}'", point.name)));
        }
        self.inner.create_point(point).await
    }
}

/// Harness whose coordinator persists through a [`FailingStore`].
/// `store` is the wrapped memory store, so successful writes are visible.
pub fn failing_harness(instances: Vec<Instance>, failing_metric: &str) -> (Harness, Arc<FailingStore>) {
    let counters = Arc::new(MockCounters::default());
    let store = MemoryStore::from_instances(instances);
    let failing = Arc::new(FailingStore::new(store.clone(), failing_metric));
    let coordinator = Arc::new(ManagerCoordinator::new(
        Arc::new(mock_factory(&counters)),
        Arc::clone(&failing) as Arc<dyn InstanceStore>,
        Arc::clone(&failing) as Arc<dyn MetricStore>,
        MonitorSettings::default(),
    ));
    let harness = Harness {
        coordinator,
        store,
        counters,
    };
    (harness, failing)
}

/// Same allocation, regardless of vtable identity.
pub fn same_manager(a: &Arc<dyn ServiceManager>, b: &Arc<dyn ServiceManager>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Write `content` to a config file in a fresh temp dir.
pub fn temp_config(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, content).expect("Failed to write config");
    (temp_dir, config_path)
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
