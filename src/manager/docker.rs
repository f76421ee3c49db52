//! Docker manager backed by a `bollard` client.
//!
//! The API version is negotiated with the daemon on connect. Commands run
//! through [`ServiceManager::exec`] must first pass the shared
//! [`CommandValidator`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::command::CommandValidator;
use crate::instance::{ConfigMap, Instance, ServiceType};
use crate::manager::base::{cancellable, config_duration, config_str, ClientSlot, ManagerBase};
use crate::manager::error::ManagerError;
use crate::manager::types::{ExecOutput, HealthStatus, ServiceInfo, ServiceMetrics};
use crate::manager::ServiceManager;

const DEFAULT_PORT: u16 = 2375;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_EXEC_OUTPUT: usize = 64 * 1024;

/// Where the daemon is reached.
#[derive(Debug, Clone, PartialEq)]
enum Endpoint {
    Local,
    Unix(String),
    Http(String),
    Tls {
        address: String,
        cert_dir: PathBuf,
    },
}

pub struct DockerManager {
    base: ManagerBase,
    validator: Arc<CommandValidator>,
    timeout: Duration,
    client: ClientSlot<Docker>,
}

impl DockerManager {
    pub fn new(validator: Arc<CommandValidator>) -> Self {
        Self {
            base: ManagerBase::new(),
            validator,
            timeout: DEFAULT_TIMEOUT,
            client: ClientSlot::new(),
        }
    }

    fn endpoint(instance: &Instance) -> Result<Endpoint, ManagerError> {
        if let Some(socket) = config_str(&instance.config, "socket_path") {
            return Ok(Endpoint::Unix(socket.to_string()));
        }
        let host = instance.host.trim();
        if host.is_empty() {
            return Ok(Endpoint::Local);
        }
        if let Some(path) = host.strip_prefix("unix://") {
            return Ok(Endpoint::Unix(path.to_string()));
        }

        let port = if instance.port == 0 { DEFAULT_PORT } else { instance.port };
        let host = host
            .trim_start_matches("tcp://")
            .trim_start_matches("http://")
            .trim_start_matches("https://");
        if instance.use_tls {
            let cert_dir = config_str(&instance.config, "tls_cert_dir").ok_or_else(|| {
                ManagerError::InvalidConfig("tls_cert_dir is required when TLS is enabled".to_string())
            })?;
            return Ok(Endpoint::Tls {
                address: format!("https://{}:{}", host, port),
                cert_dir: PathBuf::from(cert_dir),
            });
        }
        Ok(Endpoint::Http(format!("http://{}:{}", host, port)))
    }

    fn open(endpoint: &Endpoint, timeout: Duration) -> Result<Docker, bollard::errors::Error> {
        let secs = timeout.as_secs().max(1);
        match endpoint {
            Endpoint::Local => Docker::connect_with_local_defaults(),
            Endpoint::Unix(path) => Docker::connect_with_unix(path, secs, API_DEFAULT_VERSION),
            Endpoint::Http(address) => Docker::connect_with_http(address, secs, API_DEFAULT_VERSION),
            Endpoint::Tls { address, cert_dir } => Docker::connect_with_ssl(
                address,
                &cert_dir.join("key.pem"),
                &cert_dir.join("cert.pem"),
                &cert_dir.join("ca.pem"),
                secs,
                API_DEFAULT_VERSION,
            ),
        }
    }
}

fn truncate_output(output: &mut String) {
    if output.len() <= MAX_EXEC_OUTPUT {
        return;
    }
    let mut cut = MAX_EXEC_OUTPUT;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
}

#[async_trait]
impl ServiceManager for DockerManager {
    fn service_type(&self) -> ServiceType {
        ServiceType::Docker
    }

    fn initialize(&mut self, instance: &Instance) -> Result<(), ManagerError> {
        self.validate_config(&instance.config)?;
        Self::endpoint(instance)?;
        self.timeout = config_duration(&instance.config, "timeout")?.unwrap_or(DEFAULT_TIMEOUT);
        self.base.bind(instance, ServiceType::Docker)
    }

    async fn connect(&self, cancel: &CancellationToken) -> Result<(), ManagerError> {
        let instance = self.base.instance()?;
        let endpoint = Self::endpoint(instance)?;
        let docker = Self::open(&endpoint, self.timeout).map_err(ManagerError::connection)?;

        let docker = cancellable(cancel, async {
            let docker = docker.negotiate_version().await.map_err(ManagerError::connection)?;
            docker.ping().await.map_err(ManagerError::connection)?;
            Ok::<_, ManagerError>(docker)
        })
        .await?;

        tracing::info!(
            instance_id = %instance.id,
            endpoint = ?endpoint,
            api_version = %docker.client_version(),
            "Docker daemon connected"
        );
        self.client.set(docker);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ManagerError> {
        if self.client.take().is_some() {
            tracing::debug!(instance_id = %self.base.instance_id(), "Docker client released");
        }
        Ok(())
    }

    async fn health_check(&self, cancel: &CancellationToken) -> Result<HealthStatus, ManagerError> {
        let docker = self.client.get()?;
        let start = Instant::now();
        let ping = cancellable(cancel, async { Ok::<_, ManagerError>(docker.ping().await) }).await?;
        let elapsed = start.elapsed();

        if let Err(e) = ping {
            return Ok(HealthStatus::unhealthy(format!("daemon ping failed: {}", e), elapsed));
        }

        let info = cancellable(cancel, async { Ok::<_, ManagerError>(docker.info().await.ok()) }).await?;
        let mut status = HealthStatus::healthy("Docker daemon is healthy", elapsed);
        if let Some(info) = info {
            status = status
                .with_detail("containers", info.containers.unwrap_or(0))
                .with_detail("containers_running", info.containers_running.unwrap_or(0))
                .with_detail("images", info.images.unwrap_or(0));
            if let Some(version) = info.server_version {
                status = status.with_detail("version", version);
            }
        }
        Ok(status)
    }

    async fn collect_metrics(&self, cancel: &CancellationToken) -> Result<ServiceMetrics, ManagerError> {
        let docker = self.client.get()?;
        let info = cancellable(cancel, async { docker.info().await.map_err(ManagerError::metrics) }).await?;

        let mut metrics = ServiceMetrics::new();
        metrics.insert_opt("containers_total", info.containers);
        metrics.insert_opt("containers_running", info.containers_running);
        metrics.insert_opt("containers_paused", info.containers_paused);
        metrics.insert_opt("containers_stopped", info.containers_stopped);
        metrics.insert_opt("images", info.images);
        metrics.insert_opt("cpus", info.ncpu);
        metrics.insert_opt("memory_total_bytes", info.mem_total);
        metrics.insert_opt("server_version", info.server_version);
        metrics.insert_opt("storage_driver", info.driver);
        Ok(metrics)
    }

    async fn get_info(&self, cancel: &CancellationToken) -> Result<ServiceInfo, ManagerError> {
        let docker = self.client.get()?;
        let (version, info) = cancellable(cancel, async {
            let version = docker.version().await.map_err(ManagerError::health)?;
            let info = docker.info().await.ok();
            Ok::<_, ManagerError>((version, info))
        })
        .await?;

        let mut result = ServiceInfo::new(ServiceType::Docker, version.version.unwrap_or_default())
            .with_detail("api_version", version.api_version.unwrap_or_default())
            .with_detail("os", version.os.unwrap_or_default())
            .with_detail("arch", version.arch.unwrap_or_default())
            .with_detail("kernel_version", version.kernel_version.unwrap_or_default());
        if let Some(info) = info {
            result = result
                .with_detail("name", info.name.unwrap_or_default())
                .with_detail("operating_system", info.operating_system.unwrap_or_default());
        }
        Ok(result)
    }

    fn validate_config(&self, config: &ConfigMap) -> Result<(), ManagerError> {
        config_duration(config, "timeout")?;
        if let Some(value) = config.get("socket_path") {
            if !value.is_string() {
                return Err(ManagerError::InvalidConfig("socket_path must be a string".to_string()));
            }
        }
        Ok(())
    }

    async fn exec(
        &self,
        target: &str,
        command: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, ManagerError> {
        let docker = self.client.get()?;
        if target.trim().is_empty() {
            return Err(ManagerError::InvalidConfig("container id is empty".to_string()));
        }
        self.validator.validate(command)?;

        tracing::info!(
            instance_id = %self.base.instance_id(),
            container = %target,
            command = ?command,
            "Executing command in container"
        );

        cancellable(cancel, async {
            let created = docker
                .create_exec(
                    target,
                    CreateExecOptions {
                        cmd: Some(command.to_vec()),
                        attach_stdout: Some(true),
                        attach_stderr: Some(true),
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| ManagerError::operation("exec create", e))?;

            let mut output = String::new();
            let started = docker
                .start_exec(&created.id, None)
                .await
                .map_err(|e| ManagerError::operation("exec start", e))?;
            if let StartExecResults::Attached { output: mut stream, .. } = started {
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| ManagerError::operation("exec stream", e))?;
                    output.push_str(&chunk.to_string());
                    if output.len() > MAX_EXEC_OUTPUT {
                        truncate_output(&mut output);
                        break;
                    }
                }
            }

            let inspected = docker
                .inspect_exec(&created.id)
                .await
                .map_err(|e| ManagerError::operation("exec inspect", e))?;
            Ok(ExecOutput {
                exit_code: inspected.exit_code,
                output,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ErrorKind;
    use serde_json::json;

    fn manager() -> DockerManager {
        DockerManager::new(Arc::new(CommandValidator::new()))
    }

    #[test]
    fn test_endpoint_selection() {
        let local = Instance::new("d", ServiceType::Docker, "", 0);
        assert_eq!(DockerManager::endpoint(&local).unwrap(), Endpoint::Local);

        let tcp = Instance::new("d", ServiceType::Docker, "tcp://10.0.0.5", 0);
        assert_eq!(
            DockerManager::endpoint(&tcp).unwrap(),
            Endpoint::Http("http://10.0.0.5:2375".to_string())
        );

        let socket = Instance::new("d", ServiceType::Docker, "", 0)
            .with_config("socket_path", json!("/run/user/1000/docker.sock"));
        assert_eq!(
            DockerManager::endpoint(&socket).unwrap(),
            Endpoint::Unix("/run/user/1000/docker.sock".to_string())
        );
    }

    #[test]
    fn test_tls_requires_cert_dir() {
        let mut instance = Instance::new("d", ServiceType::Docker, "docker.internal", 2376);
        instance.use_tls = true;
        let mut m = manager();
        assert!(matches!(m.initialize(&instance), Err(ManagerError::InvalidConfig(_))));
    }

    #[test]
    fn test_truncate_output_respects_char_boundaries() {
        let mut output = "é".repeat(MAX_EXEC_OUTPUT);
        truncate_output(&mut output);
        assert!(output.len() <= MAX_EXEC_OUTPUT);
        assert!(output.chars().all(|c| c == 'é'));
    }

    #[tokio::test]
    async fn test_exec_without_connection_is_not_connected() {
        let mut m = manager();
        m.initialize(&Instance::new("d", ServiceType::Docker, "", 0)).unwrap();
        let err = m
            .exec("web", &["ls".to_string()], &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
    }
}
