//! MinIO (and other S3-compatible stores) through `aws-sdk-s3`, plus the
//! unauthenticated cluster health endpoint over `reqwest`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Builder, Credentials, Region};
use aws_sdk_s3::Client;
use tokio_util::sync::CancellationToken;

use crate::instance::{ConfigMap, Instance, ServiceType};
use crate::manager::base::{cancellable, config_duration, config_str, config_u64, ClientSlot, ManagerBase};
use crate::manager::error::ManagerError;
use crate::manager::types::{HealthStatus, ServiceInfo, ServiceMetrics};
use crate::manager::ServiceManager;

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Buckets inspected per metrics pass.
const DEFAULT_MAX_BUCKETS: u64 = 20;
const CLUSTER_HEALTH_PATH: &str = "/minio/health/cluster";

#[derive(Clone)]
struct MinioClients {
    s3: Client,
    http: reqwest::Client,
    endpoint: String,
}

pub struct MinioManager {
    base: ManagerBase,
    timeout: Duration,
    max_buckets: u64,
    clients: ClientSlot<MinioClients>,
}

impl MinioManager {
    pub fn new() -> Self {
        Self {
            base: ManagerBase::new(),
            timeout: DEFAULT_TIMEOUT,
            max_buckets: DEFAULT_MAX_BUCKETS,
            clients: ClientSlot::new(),
        }
    }

    fn endpoint(instance: &Instance) -> String {
        let scheme = if instance.use_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, instance.host, instance.port)
    }

    /// Instance credentials take precedence over `access_key`/`secret_key`.
    fn credentials(instance: &Instance) -> Result<Credentials, ManagerError> {
        let access_key = instance
            .username
            .as_deref()
            .filter(|u| !u.is_empty())
            .or_else(|| config_str(&instance.config, "access_key"));
        let secret_key = instance
            .password()
            .or_else(|| config_str(&instance.config, "secret_key"));

        match (access_key, secret_key) {
            (Some(access), Some(secret)) => Ok(Credentials::new(access, secret, None, None, "static")),
            _ => Err(ManagerError::InvalidConnectionParams(format!(
                "instance '{}' has no access key / secret key",
                instance.id
            ))),
        }
    }

    fn build(&self, instance: &Instance) -> Result<MinioClients, ManagerError> {
        let endpoint = Self::endpoint(instance);
        let region = config_str(&instance.config, "region").unwrap_or(DEFAULT_REGION);
        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .endpoint_url(endpoint.clone())
            .credentials_provider(Self::credentials(instance)?)
            .force_path_style(true)
            .build();
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(ManagerError::connection)?;

        Ok(MinioClients {
            s3: Client::from_conf(config),
            http,
            endpoint,
        })
    }
}

impl Default for MinioManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceManager for MinioManager {
    fn service_type(&self) -> ServiceType {
        ServiceType::Minio
    }

    fn initialize(&mut self, instance: &Instance) -> Result<(), ManagerError> {
        self.validate_config(&instance.config)?;
        self.timeout = config_duration(&instance.config, "timeout")?.unwrap_or(DEFAULT_TIMEOUT);
        self.max_buckets = config_u64(&instance.config, "max_buckets")?.unwrap_or(DEFAULT_MAX_BUCKETS);
        self.base.bind(instance, ServiceType::Minio)?;
        Self::credentials(instance)?;
        Ok(())
    }

    async fn connect(&self, cancel: &CancellationToken) -> Result<(), ManagerError> {
        let instance = self.base.instance()?;
        let clients = self.build(instance)?;

        let buckets = cancellable(cancel, async {
            let listed = clients.s3.list_buckets().send().await.map_err(ManagerError::connection)?;
            Ok::<_, ManagerError>(listed.buckets().len())
        })
        .await?;

        tracing::info!(
            instance_id = %instance.id,
            endpoint = %clients.endpoint,
            buckets,
            "MinIO connected"
        );
        self.clients.set(clients);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ManagerError> {
        if self.clients.take().is_some() {
            tracing::debug!(instance_id = %self.base.instance_id(), "MinIO clients released");
        }
        Ok(())
    }

    async fn health_check(&self, cancel: &CancellationToken) -> Result<HealthStatus, ManagerError> {
        let clients = self.clients.get()?;
        let start = Instant::now();
        let listed = cancellable(cancel, async {
            Ok::<_, ManagerError>(clients.s3.list_buckets().send().await)
        })
        .await?;
        let elapsed = start.elapsed();

        let buckets = match listed {
            Ok(output) => output.buckets().len(),
            Err(e) => {
                return Ok(HealthStatus::unhealthy(format!("ListBuckets failed: {}", e), elapsed));
            }
        };

        let url = format!("{}{}", clients.endpoint, CLUSTER_HEALTH_PATH);
        let cluster = cancellable(cancel, async {
            Ok::<_, ManagerError>(clients.http.get(&url).send().await.map(|r| r.status()))
        })
        .await?;

        let status = match cluster {
            Ok(code) if !code.is_success() => HealthStatus::unhealthy(
                format!("cluster health endpoint returned {}", code),
                elapsed,
            ),
            _ => HealthStatus::healthy("MinIO is healthy", elapsed),
        };
        Ok(status.with_detail("buckets", buckets))
    }

    async fn collect_metrics(&self, cancel: &CancellationToken) -> Result<ServiceMetrics, ManagerError> {
        let clients = self.clients.get()?;
        let listed = cancellable(cancel, async {
            clients.s3.list_buckets().send().await.map_err(ManagerError::metrics)
        })
        .await?;

        let names: Vec<String> = listed
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(str::to_string))
            .collect();

        let mut metrics = ServiceMetrics::new();
        metrics.insert("buckets", names.len());

        let mut objects = 0i64;
        let mut bytes = 0i64;
        let mut truncated = false;
        for name in names.iter().take(self.max_buckets as usize) {
            let page = cancellable(cancel, async {
                Ok::<_, ManagerError>(clients.s3.list_objects_v2().bucket(name).send().await)
            })
            .await?;
            match page {
                Ok(page) => {
                    objects += i64::from(page.key_count().unwrap_or(0));
                    bytes += page.contents().iter().filter_map(|o| o.size()).sum::<i64>();
                    truncated |= page.is_truncated().unwrap_or(false);
                }
                Err(e) => {
                    tracing::debug!(bucket = %name, error = %e, "Skipping bucket in metrics");
                }
            }
        }
        metrics.insert("objects_sampled", objects);
        metrics.insert("bytes_sampled", bytes);
        metrics.insert("sample_truncated", truncated || names.len() as u64 > self.max_buckets);

        let url = format!("{}{}", clients.endpoint, CLUSTER_HEALTH_PATH);
        let cluster = cancellable(cancel, async {
            Ok::<_, ManagerError>(clients.http.get(&url).send().await.ok())
        })
        .await?;
        if let Some(resp) = cluster {
            metrics.insert("cluster_healthy", resp.status().is_success());
        }
        Ok(metrics)
    }

    async fn get_info(&self, cancel: &CancellationToken) -> Result<ServiceInfo, ManagerError> {
        let clients = self.clients.get()?;
        let url = format!("{}{}", clients.endpoint, CLUSTER_HEALTH_PATH);
        let resp = cancellable(cancel, async {
            clients.http.get(&url).send().await.map_err(ManagerError::health)
        })
        .await?;

        let server = resp
            .headers()
            .get(reqwest::header::SERVER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let region = self
            .base
            .config()
            .and_then(|c| config_str(c, "region"))
            .unwrap_or(DEFAULT_REGION)
            .to_string();
        Ok(ServiceInfo::new(ServiceType::Minio, server)
            .with_detail("endpoint", clients.endpoint.clone())
            .with_detail("region", region)
            .with_detail("cluster_status", resp.status().as_u16()))
    }

    fn validate_config(&self, config: &ConfigMap) -> Result<(), ManagerError> {
        config_duration(config, "timeout")?;
        if let Some(0) = config_u64(config, "max_buckets")? {
            return Err(ManagerError::InvalidConfig("max_buckets must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_scheme_follows_tls() {
        let mut instance = Instance::new("s3", ServiceType::Minio, "minio.local", 9000);
        assert_eq!(MinioManager::endpoint(&instance), "http://minio.local:9000");
        instance.use_tls = true;
        assert_eq!(MinioManager::endpoint(&instance), "https://minio.local:9000");
    }

    #[test]
    fn test_credentials_from_config_keys() {
        let instance = Instance::new("s3", ServiceType::Minio, "minio.local", 9000)
            .with_config("access_key", json!("minioadmin"))
            .with_config("secret_key", json!("minioadmin"));
        let creds = MinioManager::credentials(&instance).unwrap();
        assert_eq!(creds.access_key_id(), "minioadmin");
    }

    #[test]
    fn test_initialize_requires_credentials() {
        let instance = Instance::new("s3", ServiceType::Minio, "minio.local", 9000);
        let mut manager = MinioManager::new();
        assert!(matches!(
            manager.initialize(&instance),
            Err(ManagerError::InvalidConnectionParams(_))
        ));
    }

    #[test]
    fn test_validate_config_rejects_zero_buckets() {
        let manager = MinioManager::new();
        let mut config = ConfigMap::new();
        config.insert("max_buckets".into(), json!(0));
        assert!(manager.validate_config(&config).is_err());
    }
}
