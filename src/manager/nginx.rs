//! Nginx manager reading the `stub_status` page over `reqwest`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::instance::{ConfigMap, Instance, ServiceType};
use crate::manager::base::{cancellable, config_duration, config_str, ClientSlot, ManagerBase};
use crate::manager::error::ManagerError;
use crate::manager::types::{HealthStatus, ServiceInfo, ServiceMetrics};
use crate::manager::ServiceManager;

const DEFAULT_STATUS_PATH: &str = "/nginx_status";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Parsed `stub_status` counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StubStatus {
    pub active: i64,
    pub accepts: i64,
    pub handled: i64,
    pub requests: i64,
    pub reading: i64,
    pub writing: i64,
    pub waiting: i64,
}

/// Parse the fixed four-line `stub_status` format:
///
/// ```text
/// Active connections: 2
/// server accepts handled requests
///  16 16 31
/// Reading: 0 Writing: 1 Waiting: 1
/// ```
pub(crate) fn parse_stub_status(body: &str) -> Option<StubStatus> {
    let mut status = StubStatus::default();
    let mut lines = body.lines().map(str::trim).filter(|l| !l.is_empty());

    status.active = lines
        .next()?
        .strip_prefix("Active connections:")?
        .trim()
        .parse()
        .ok()?;

    if !lines.next()?.starts_with("server") {
        return None;
    }
    let counters: Vec<i64> = lines
        .next()?
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    if counters.len() < 3 {
        return None;
    }
    status.accepts = counters[0];
    status.handled = counters[1];
    status.requests = counters[2];

    let tokens: Vec<&str> = lines.next()?.split_whitespace().collect();
    for pair in tokens.chunks(2) {
        if let [label, value] = pair {
            let value: i64 = value.parse().ok()?;
            match *label {
                "Reading:" => status.reading = value,
                "Writing:" => status.writing = value,
                "Waiting:" => status.waiting = value,
                _ => {}
            }
        }
    }
    Some(status)
}

#[derive(Clone)]
struct StatusClient {
    http: reqwest::Client,
    url: String,
}

pub struct NginxManager {
    base: ManagerBase,
    timeout: Duration,
    client: ClientSlot<StatusClient>,
}

impl NginxManager {
    pub fn new() -> Self {
        Self {
            base: ManagerBase::new(),
            timeout: DEFAULT_TIMEOUT,
            client: ClientSlot::new(),
        }
    }

    fn status_url(instance: &Instance) -> String {
        let scheme = if instance.use_tls { "https" } else { "http" };
        let path = config_str(&instance.config, "status_path").unwrap_or(DEFAULT_STATUS_PATH);
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        format!("{}://{}:{}{}", scheme, instance.host, instance.port, path)
    }

    async fn fetch(
        client: &StatusClient,
        cancel: &CancellationToken,
    ) -> Result<Result<(reqwest::StatusCode, Option<String>, String), reqwest::Error>, ManagerError> {
        cancellable(cancel, async {
            let result = async {
                let resp = client.http.get(&client.url).send().await?;
                let code = resp.status();
                let server = resp
                    .headers()
                    .get(reqwest::header::SERVER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let body = resp.text().await?;
                Ok::<_, reqwest::Error>((code, server, body))
            }
            .await;
            Ok::<_, ManagerError>(result)
        })
        .await
    }
}

impl Default for NginxManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceManager for NginxManager {
    fn service_type(&self) -> ServiceType {
        ServiceType::Nginx
    }

    fn initialize(&mut self, instance: &Instance) -> Result<(), ManagerError> {
        self.validate_config(&instance.config)?;
        self.timeout = config_duration(&instance.config, "timeout")?.unwrap_or(DEFAULT_TIMEOUT);
        self.base.bind(instance, ServiceType::Nginx)
    }

    async fn connect(&self, cancel: &CancellationToken) -> Result<(), ManagerError> {
        let instance = self.base.instance()?;
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(ManagerError::connection)?;
        let client = StatusClient {
            http,
            url: Self::status_url(instance),
        };

        let (code, _, _) = Self::fetch(&client, cancel)
            .await?
            .map_err(ManagerError::connection)?;
        if !code.is_success() {
            return Err(ManagerError::connection(format!(
                "{} returned {}",
                client.url, code
            )));
        }

        tracing::info!(instance_id = %instance.id, url = %client.url, "Nginx status endpoint reachable");
        self.client.set(client);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ManagerError> {
        self.client.take();
        Ok(())
    }

    async fn health_check(&self, cancel: &CancellationToken) -> Result<HealthStatus, ManagerError> {
        let client = self.client.get()?;
        let start = Instant::now();
        let fetched = Self::fetch(&client, cancel).await?;
        let elapsed = start.elapsed();

        let status = match fetched {
            Err(e) => HealthStatus::unhealthy(format!("status request failed: {}", e), elapsed),
            Ok((code, _, _)) if !code.is_success() => {
                HealthStatus::unhealthy(format!("status endpoint returned {}", code), elapsed)
                    .with_detail("status_code", code.as_u16())
            }
            Ok((code, _, body)) => {
                let mut status = HealthStatus::healthy("Nginx is healthy", elapsed)
                    .with_detail("status_code", code.as_u16());
                if let Some(stub) = parse_stub_status(&body) {
                    status = status.with_detail("active_connections", stub.active);
                }
                status
            }
        };
        Ok(status)
    }

    async fn collect_metrics(&self, cancel: &CancellationToken) -> Result<ServiceMetrics, ManagerError> {
        let client = self.client.get()?;
        let (code, _, body) = Self::fetch(&client, cancel).await?.map_err(ManagerError::metrics)?;
        if !code.is_success() {
            return Err(ManagerError::metrics(format!("status endpoint returned {}", code)));
        }

        let mut metrics = ServiceMetrics::new();
        match parse_stub_status(&body) {
            Some(stub) => {
                metrics.insert("active_connections", stub.active);
                metrics.insert("accepts", stub.accepts);
                metrics.insert("handled", stub.handled);
                metrics.insert("requests", stub.requests);
                metrics.insert("reading", stub.reading);
                metrics.insert("writing", stub.writing);
                metrics.insert("waiting", stub.waiting);
                metrics.insert("dropped", stub.accepts - stub.handled);
            }
            None => {
                tracing::debug!(instance_id = %self.base.instance_id(), "Unrecognized stub_status body");
            }
        }
        Ok(metrics)
    }

    async fn get_info(&self, cancel: &CancellationToken) -> Result<ServiceInfo, ManagerError> {
        let client = self.client.get()?;
        let (_, server, _) = Self::fetch(&client, cancel).await?.map_err(ManagerError::health)?;
        // `Server: nginx/1.25.3`
        let server = server.unwrap_or_default();
        let version = server.split_once('/').map(|(_, v)| v).unwrap_or("").to_string();
        Ok(ServiceInfo::new(ServiceType::Nginx, version)
            .with_detail("server", server)
            .with_detail("status_url", client.url.clone()))
    }

    fn validate_config(&self, config: &ConfigMap) -> Result<(), ManagerError> {
        config_duration(config, "timeout")?;
        if let Some(value) = config.get("status_path") {
            if !value.is_string() {
                return Err(ManagerError::InvalidConfig("status_path must be a string".to_string()));
            }
        }
        Ok(())
    }
}
