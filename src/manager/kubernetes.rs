//! Kubernetes manager backed by a `kube` client built from a kubeconfig
//! document carried in the instance config map.

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio_util::sync::CancellationToken;

use crate::instance::{ConfigMap, Instance, ServiceType};
use crate::manager::base::{cancellable, config_str, ClientSlot, ManagerBase};
use crate::manager::error::ManagerError;
use crate::manager::types::{HealthStatus, ServiceInfo, ServiceMetrics};
use crate::manager::ServiceManager;

pub struct KubernetesManager {
    base: ManagerBase,
    client: ClientSlot<Client>,
}

impl KubernetesManager {
    pub fn new() -> Self {
        Self {
            base: ManagerBase::new(),
            client: ClientSlot::new(),
        }
    }

    /// Inline `kubeconfig` wins over `kubeconfig_path`.
    fn source(config: &ConfigMap) -> Result<KubeconfigSource<'_>, ManagerError> {
        if let Some(raw) = config_str(config, "kubeconfig") {
            return Ok(KubeconfigSource::Inline(raw));
        }
        match config_str(config, "kubeconfig_path") {
            Some(path) if !path.trim().is_empty() => Ok(KubeconfigSource::Path(path)),
            _ => Err(ManagerError::InvalidConfig(
                "kubeconfig or kubeconfig_path is required".to_string(),
            )),
        }
    }

    /// Parse the kubeconfig. Reads the file for path sources.
    fn load(source: KubeconfigSource<'_>) -> Result<Kubeconfig, ManagerError> {
        match source {
            KubeconfigSource::Inline(raw) => Kubeconfig::from_yaml(raw)
                .map_err(|e| ManagerError::InvalidConfig(format!("invalid kubeconfig: {}", e))),
            KubeconfigSource::Path(path) => Kubeconfig::read_from(path)
                .map_err(|e| ManagerError::InvalidConfig(format!("cannot read kubeconfig '{}': {}", path, e))),
        }
    }

    fn check_context(kubeconfig: &Kubeconfig, config: &ConfigMap) -> Result<(), ManagerError> {
        if let Some(context) = config_str(config, "context") {
            if !kubeconfig.contexts.iter().any(|c| c.name == context) {
                return Err(ManagerError::InvalidConfig(format!(
                    "context '{}' not found in kubeconfig",
                    context
                )));
            }
        }
        Ok(())
    }

    fn options(config: &ConfigMap) -> KubeConfigOptions {
        KubeConfigOptions {
            context: config_str(config, "context").map(str::to_string),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KubeconfigSource<'a> {
    Inline(&'a str),
    Path(&'a str),
}

impl Default for KubernetesManager {
    fn default() -> Self {
        Self::new()
    }
}

fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// Count pods per phase; pods without a reported phase land in `Unknown`.
fn pods_by_phase(pods: &[Pod]) -> BTreeMap<String, i64> {
    let mut phases = BTreeMap::new();
    for pod in pods {
        let phase = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        *phases.entry(phase).or_insert(0) += 1;
    }
    phases
}

#[async_trait]
impl ServiceManager for KubernetesManager {
    fn service_type(&self) -> ServiceType {
        ServiceType::Kubernetes
    }

    fn initialize(&mut self, instance: &Instance) -> Result<(), ManagerError> {
        self.validate_config(&instance.config)?;
        self.base.bind(instance, ServiceType::Kubernetes)
    }

    async fn connect(&self, cancel: &CancellationToken) -> Result<(), ManagerError> {
        let instance = self.base.instance()?;
        let kubeconfig = Self::load(Self::source(&instance.config)?)?;
        Self::check_context(&kubeconfig, &instance.config)?;
        let options = Self::options(&instance.config);

        let (client, version) = cancellable(cancel, async {
            let config = Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(ManagerError::connection)?;
            let client = Client::try_from(config).map_err(ManagerError::connection)?;
            let version = client.apiserver_version().await.map_err(ManagerError::connection)?;
            Ok::<_, ManagerError>((client, version))
        })
        .await?;

        tracing::info!(
            instance_id = %instance.id,
            context = ?options.context,
            server_version = %version.git_version,
            "Kubernetes API server connected"
        );
        self.client.set(client);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ManagerError> {
        if self.client.take().is_some() {
            tracing::debug!(instance_id = %self.base.instance_id(), "Kubernetes client released");
        }
        Ok(())
    }

    async fn health_check(&self, cancel: &CancellationToken) -> Result<HealthStatus, ManagerError> {
        let client = self.client.get()?;
        let start = Instant::now();
        let version = cancellable(cancel, async { Ok::<_, ManagerError>(client.apiserver_version().await) }).await?;
        let elapsed = start.elapsed();

        let version = match version {
            Ok(version) => version,
            Err(e) => {
                return Ok(HealthStatus::unhealthy(
                    format!("API server unreachable: {}", e),
                    elapsed,
                ))
            }
        };

        let nodes: Api<Node> = Api::all(client);
        let listed = cancellable(cancel, async {
            Ok::<_, ManagerError>(nodes.list(&ListParams::default()).await)
        })
        .await?;

        let status = match listed {
            Ok(list) => {
                let total = list.items.len();
                let ready = list.items.iter().filter(|n| node_is_ready(n)).count();
                let status = if total > 0 && ready == 0 {
                    HealthStatus::unhealthy("no nodes are ready", elapsed)
                } else {
                    HealthStatus::healthy("Kubernetes cluster is healthy", elapsed)
                };
                status
                    .with_detail("nodes_total", total)
                    .with_detail("nodes_ready", ready)
            }
            Err(e) => HealthStatus::unhealthy(format!("cannot list nodes: {}", e), elapsed),
        };
        Ok(status.with_detail("version", version.git_version))
    }

    async fn collect_metrics(&self, cancel: &CancellationToken) -> Result<ServiceMetrics, ManagerError> {
        let client = self.client.get()?;
        let nodes: Api<Node> = Api::all(client.clone());
        let pods: Api<Pod> = Api::all(client.clone());
        let namespaces: Api<Namespace> = Api::all(client);
        let params = ListParams::default();

        // Nodes are mandatory; the other lists are best effort.
        let node_list = cancellable(cancel, async {
            nodes.list(&params).await.map_err(ManagerError::metrics)
        })
        .await?;
        let pod_list = cancellable(cancel, async { Ok::<_, ManagerError>(pods.list(&params).await.ok()) }).await?;
        let ns_list =
            cancellable(cancel, async { Ok::<_, ManagerError>(namespaces.list(&params).await.ok()) }).await?;

        let mut metrics = ServiceMetrics::new();
        metrics.insert("nodes_total", node_list.items.len());
        metrics.insert(
            "nodes_ready",
            node_list.items.iter().filter(|n| node_is_ready(n)).count(),
        );
        if let Some(pod_list) = pod_list {
            metrics.insert("pods_total", pod_list.items.len());
            for (phase, count) in pods_by_phase(&pod_list.items) {
                metrics.insert(format!("pods_{}", phase.to_lowercase()), count);
            }
        }
        if let Some(ns_list) = ns_list {
            metrics.insert("namespaces", ns_list.items.len());
        }
        Ok(metrics)
    }

    async fn get_info(&self, cancel: &CancellationToken) -> Result<ServiceInfo, ManagerError> {
        let client = self.client.get()?;
        let version = cancellable(cancel, async {
            client.apiserver_version().await.map_err(ManagerError::health)
        })
        .await?;

        let context = self
            .base
            .config()
            .and_then(|c| config_str(c, "context"))
            .unwrap_or("")
            .to_string();
        Ok(ServiceInfo::new(ServiceType::Kubernetes, version.git_version)
            .with_detail("major", version.major)
            .with_detail("minor", version.minor)
            .with_detail("platform", version.platform)
            .with_detail("go_version", version.go_version)
            .with_detail("context", context))
    }

    /// Inline documents are parsed here. Path sources are only read on
    /// connect.
    fn validate_config(&self, config: &ConfigMap) -> Result<(), ManagerError> {
        match Self::source(config)? {
            source @ KubeconfigSource::Inline(_) => Self::check_context(&Self::load(source)?, config),
            KubeconfigSource::Path(_) => Ok(()),
        }
    }
}
