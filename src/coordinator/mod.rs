//! Manager cache and the single entry point request-handling code uses to
//! reach a backend.
//!
//! The cache maps an instance id to a connected manager. A manager only
//! becomes visible once `initialize` and `connect` have both succeeded,
//! and the cache lock is never held across backend I/O on the creation
//! path. Health and metrics results are written back through the two
//! store collaborators.

mod sweep;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::instance::{ConfigMap, HealthState, Instance, InstanceId, ServiceType};
use crate::manager::{
    ExecOutput, HealthStatus, ManagerError, ManagerFactory, ServiceInfo, ServiceManager, ServiceMetrics,
};
use crate::shutdown::{ShutdownPhase, ShutdownState};
use crate::store::{InstanceStore, MetricPoint, MetricStore};

pub use sweep::{MonitorSettings, SweepReport};

type ManagerMap = HashMap<InstanceId, Arc<dyn ServiceManager>>;

pub struct ManagerCoordinator {
    managers: RwLock<ManagerMap>,
    factory: Arc<ManagerFactory>,
    instances: Arc<dyn InstanceStore>,
    metrics: Arc<dyn MetricStore>,
    settings: MonitorSettings,
    monitor: Mutex<Option<sweep::MonitorTask>>,
    lifecycle: ShutdownState,
}

impl ManagerCoordinator {
    pub fn new(
        factory: Arc<ManagerFactory>,
        instances: Arc<dyn InstanceStore>,
        metrics: Arc<dyn MetricStore>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            managers: RwLock::new(HashMap::new()),
            factory,
            instances,
            metrics,
            settings,
            monitor: Mutex::new(None),
            lifecycle: ShutdownState::new(),
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn factory(&self) -> &ManagerFactory {
        &self.factory
    }

    pub fn shutdown_phase(&self) -> ShutdownPhase {
        self.lifecycle.phase()
    }

    /// Follow shutdown progress.
    pub fn subscribe_shutdown(&self) -> tokio::sync::watch::Receiver<ShutdownPhase> {
        self.lifecycle.subscribe()
    }

    /// Return the cached manager for `id`, creating and connecting one on
    /// first use.
    ///
    /// Load and connect errors are returned unchanged and leave the cache
    /// untouched. When two callers race on the same id, both connect but
    /// only the first insert wins; the loser's manager is disconnected and
    /// the winner's is returned.
    pub async fn get_manager(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn ServiceManager>, ManagerError> {
        if let Some(manager) = self.managers.read().await.get(id) {
            return Ok(Arc::clone(manager));
        }

        let instance = self.instances.get(id).await?;
        let mut manager = self.factory.create(instance.service_type)?;
        manager.initialize(&instance)?;
        manager.connect(cancel).await?;
        let manager: Arc<dyn ServiceManager> = Arc::from(manager);

        let mut managers = self.managers.write().await;
        if let Some(existing) = managers.get(id) {
            let existing = Arc::clone(existing);
            drop(managers);
            tracing::debug!(instance_id = %id, "Lost manager creation race, releasing duplicate");
            if let Err(e) = manager.disconnect().await {
                tracing::warn!(instance_id = %id, error = %e, "Failed to disconnect duplicate manager");
            }
            return Ok(existing);
        }
        managers.insert(id.to_string(), Arc::clone(&manager));
        drop(managers);

        tracing::info!(
            instance_id = %id,
            service_type = %instance.service_type,
            "Manager connected and cached"
        );
        Ok(manager)
    }

    /// Disconnect and evict the manager for `id`. Returns whether one was
    /// cached. Disconnect failures are logged, never returned.
    pub async fn remove_manager(&self, id: &str) -> bool {
        let mut managers = self.managers.write().await;
        let Some(manager) = managers.get(id).cloned() else {
            return false;
        };
        if let Err(e) = manager.disconnect().await {
            tracing::warn!(instance_id = %id, error = %e, "Failed to disconnect manager on removal");
        }
        managers.remove(id);
        tracing::info!(instance_id = %id, "Manager removed");
        true
    }

    /// Probe `id` and record the outcome on the instance's health field.
    pub async fn health_check(&self, id: &str, cancel: &CancellationToken) -> Result<HealthStatus, ManagerError> {
        let manager = self.get_manager(id, cancel).await?;
        let status = manager.health_check(cancel).await?;

        let state = HealthState::from_healthy(status.healthy);
        if let Err(e) = self.instances.update_health(id, state, &status.message).await {
            tracing::warn!(instance_id = %id, error = %e, "Failed to persist health status");
        }
        tracing::debug!(
            instance_id = %id,
            healthy = status.healthy,
            response_ms = status.response_time_ms(),
            "Health check complete"
        );
        Ok(status)
    }

    /// Collect metrics for `id` and persist the numeric subset, one point
    /// per value. Non-numeric values are dropped; per-point persistence
    /// failures are logged.
    pub async fn collect_metrics(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<ServiceMetrics, ManagerError> {
        let manager = self.get_manager(id, cancel).await?;
        let metrics = manager.collect_metrics(cancel).await?;

        let mut persisted = 0usize;
        for (name, value) in metrics.numeric() {
            let point = MetricPoint {
                instance_id: id.to_string(),
                name: name.to_string(),
                value,
                timestamp: metrics.collected_at,
            };
            match self.metrics.create_point(point).await {
                Ok(()) => persisted += 1,
                Err(e) => {
                    tracing::warn!(instance_id = %id, metric = %name, error = %e, "Failed to persist metric point");
                }
            }
        }
        tracing::debug!(
            instance_id = %id,
            collected = metrics.len(),
            persisted,
            "Metrics collected"
        );
        Ok(metrics)
    }

    pub async fn get_info(&self, id: &str, cancel: &CancellationToken) -> Result<ServiceInfo, ManagerError> {
        let manager = self.get_manager(id, cancel).await?;
        manager.get_info(cancel).await
    }

    /// Validate a candidate config map for `service_type` without any I/O.
    pub fn validate_config(&self, service_type: ServiceType, config: &ConfigMap) -> Result<(), ManagerError> {
        let manager = self.factory.create(service_type)?;
        manager.validate_config(config)
    }

    /// Connect to an unsaved instance definition, probe it and disconnect.
    /// Nothing is cached.
    pub async fn test_connection(
        &self,
        instance: &Instance,
        cancel: &CancellationToken,
    ) -> Result<HealthStatus, ManagerError> {
        let mut manager = self.factory.create(instance.service_type)?;
        manager.initialize(instance)?;
        manager.connect(cancel).await?;

        let status = manager.health_check(cancel).await;
        if let Err(e) = manager.disconnect().await {
            tracing::warn!(instance_id = %instance.id, error = %e, "Failed to disconnect test connection");
        }
        status
    }

    /// Run `command` inside `container` on a container-runtime instance.
    pub async fn exec(
        &self,
        id: &str,
        container: &str,
        command: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, ManagerError> {
        let manager = self.get_manager(id, cancel).await?;
        if manager.service_type() != ServiceType::Docker {
            return Err(ManagerError::Unsupported(format!(
                "exec requires a docker instance, '{}' is {}",
                id,
                manager.service_type()
            )));
        }
        self.factory.validator().validate(command)?;
        manager.exec(container, command, cancel).await
    }

    /// Disconnect every cached manager and empty the cache.
    pub async fn disconnect_all(&self) {
        let mut managers = self.managers.write().await;
        let count = managers.len();
        for (id, manager) in managers.iter() {
            if let Err(e) = manager.disconnect().await {
                tracing::warn!(instance_id = %id, error = %e, "Failed to disconnect manager");
            }
        }
        *managers = HashMap::new();
        tracing::info!(count, "All managers disconnected");
    }

    pub async fn cached_count(&self) -> usize {
        self.managers.read().await.len()
    }

    pub async fn is_cached(&self, id: &str) -> bool {
        self.managers.read().await.contains_key(id)
    }
}
