//! The manager contract and its backend-specific variants.
//!
//! A manager is the live runtime object bound to one instance. It owns
//! exactly one native client handle and exposes a uniform set of
//! lifecycle, health and metrics operations regardless of the protocol
//! spoken underneath.

pub mod base;
pub mod docker;
pub mod error;
pub mod factory;
pub mod kubernetes;
pub mod minio;
pub mod mysql;
pub mod nginx;
pub mod postgres;
pub mod redis;
mod sql;
pub mod types;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::instance::{ConfigMap, Instance, ServiceType};

pub use base::{cancellable, ClientSlot, ManagerBase};
pub use error::{BoxError, ErrorKind, ManagerError};
pub use factory::{Constructor, ManagerFactory};
pub use types::{Details, ExecOutput, HealthStatus, MetricValue, ServiceInfo, ServiceMetrics};

/// Contract every backend adapter implements.
///
/// `initialize` runs on an exclusively owned manager before it is shared;
/// every other operation takes `&self` so a connected manager can be used
/// concurrently by direct callers and the background sweep.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Discriminant used by the factory for dispatch.
    fn service_type(&self) -> ServiceType;

    /// Bind to an instance definition. No I/O.
    fn initialize(&mut self, instance: &Instance) -> Result<(), ManagerError>;

    /// Open the native client and verify it with a lightweight probe.
    async fn connect(&self, cancel: &CancellationToken) -> Result<(), ManagerError>;

    /// Release the native client. Safe to call when already disconnected.
    async fn disconnect(&self) -> Result<(), ManagerError>;

    /// Cheap round-trip. A reachable but troubled backend yields
    /// `healthy == false`; only a missing connection is an error.
    async fn health_check(&self, cancel: &CancellationToken) -> Result<HealthStatus, ManagerError>;

    /// Best-effort introspection. Missing sub-metrics are omitted.
    async fn collect_metrics(&self, cancel: &CancellationToken) -> Result<ServiceMetrics, ManagerError>;

    /// Display-oriented snapshot (version, topology).
    async fn get_info(&self, cancel: &CancellationToken) -> Result<ServiceInfo, ManagerError>;

    /// Connection-independent validation of a candidate config map.
    fn validate_config(&self, config: &ConfigMap) -> Result<(), ManagerError>;

    /// Run a command inside a workload managed by this backend.
    async fn exec(
        &self,
        _target: &str,
        _command: &[String],
        _cancel: &CancellationToken,
    ) -> Result<ExecOutput, ManagerError> {
        Err(ManagerError::Unsupported(format!(
            "exec is not supported by {} managers",
            self.service_type()
        )))
    }
}
