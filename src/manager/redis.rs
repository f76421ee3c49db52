//! Redis manager backed by a multiplexed, auto-reconnecting
//! [`redis::aio::ConnectionManager`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::instance::{ConfigMap, Instance, ServiceType};
use crate::manager::base::{cancellable, config_duration, config_u64, ClientSlot, ManagerBase};
use crate::manager::error::ManagerError;
use crate::manager::types::{HealthStatus, MetricValue, ServiceInfo, ServiceMetrics};
use crate::manager::ServiceManager;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// `INFO` fields surfaced as metrics, parsed as numbers where possible.
const INFO_FIELDS: &[&str] = &[
    "connected_clients",
    "blocked_clients",
    "used_memory",
    "used_memory_peak",
    "mem_fragmentation_ratio",
    "total_connections_received",
    "total_commands_processed",
    "instantaneous_ops_per_sec",
    "keyspace_hits",
    "keyspace_misses",
    "evicted_keys",
    "expired_keys",
    "uptime_in_seconds",
    "connected_slaves",
    "role",
    "redis_version",
];

pub struct RedisManager {
    base: ManagerBase,
    connect_timeout: Duration,
    conn: ClientSlot<ConnectionManager>,
}

impl RedisManager {
    pub fn new() -> Self {
        Self {
            base: ManagerBase::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            conn: ClientSlot::new(),
        }
    }

    fn connection_url(instance: &Instance) -> Result<Url, ManagerError> {
        let scheme = if instance.use_tls { "rediss" } else { "redis" };
        let db = config_u64(&instance.config, "db")?.unwrap_or(0);
        let mut url = Url::parse(&format!("{}://{}:{}/{}", scheme, instance.host, instance.port, db))
            .map_err(|e| ManagerError::InvalidConnectionParams(format!("invalid redis address: {}", e)))?;

        if let Some(username) = instance.username.as_deref().filter(|u| !u.is_empty()) {
            url.set_username(username).map_err(|_| {
                ManagerError::InvalidConnectionParams("cannot set redis username".to_string())
            })?;
        }
        if let Some(password) = instance.password() {
            url.set_password(Some(password)).map_err(|_| {
                ManagerError::InvalidConnectionParams("cannot set redis password".to_string())
            })?;
        }
        Ok(url)
    }
}

impl Default for RedisManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `INFO` output into `field -> raw value`.
pub(crate) fn parse_info(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Sum `keys=N` across every `dbX:keys=N,expires=M,...` keyspace line.
pub(crate) fn total_keys(info: &HashMap<String, String>) -> Option<i64> {
    let mut found = false;
    let mut total = 0i64;
    for (name, value) in info {
        if !name.starts_with("db") || !name[2..].chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let keys = value
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == "keys")
            .and_then(|(_, v)| v.parse::<i64>().ok());
        if let Some(keys) = keys {
            found = true;
            total += keys;
        }
    }
    found.then_some(total)
}

#[async_trait]
impl ServiceManager for RedisManager {
    fn service_type(&self) -> ServiceType {
        ServiceType::Redis
    }

    fn initialize(&mut self, instance: &Instance) -> Result<(), ManagerError> {
        self.validate_config(&instance.config)?;
        self.connect_timeout =
            config_duration(&instance.config, "connect_timeout")?.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        self.base.bind(instance, ServiceType::Redis)
    }

    async fn connect(&self, cancel: &CancellationToken) -> Result<(), ManagerError> {
        let instance = self.base.instance()?;
        let url = Self::connection_url(instance)?;
        let client = redis::Client::open(url.as_str()).map_err(ManagerError::connection)?;

        let connect_timeout = self.connect_timeout;
        let mut conn = cancellable(cancel, async {
            match tokio::time::timeout(connect_timeout, client.get_connection_manager()).await {
                Ok(result) => result.map_err(ManagerError::connection),
                Err(_) => Err(ManagerError::connection(format!(
                    "timed out after {:?} connecting to {}",
                    connect_timeout,
                    instance.address()
                ))),
            }
        })
        .await?;

        cancellable(cancel, async {
            let pong: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(ManagerError::connection)?;
            tracing::debug!(instance_id = %instance.id, reply = %pong, "Redis ping");
            Ok::<_, ManagerError>(())
        })
        .await?;

        self.conn.set(conn);
        tracing::info!(
            instance_id = %instance.id,
            address = %instance.address(),
            "Redis connected"
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ManagerError> {
        // Dropping the last handle closes the multiplexed connection.
        if self.conn.take().is_some() {
            tracing::debug!(instance_id = %self.base.instance_id(), "Redis connection released");
        }
        Ok(())
    }

    async fn health_check(&self, cancel: &CancellationToken) -> Result<HealthStatus, ManagerError> {
        let mut conn = self.conn.get()?;
        let start = Instant::now();
        let ping = cancellable(cancel, async {
            let reply: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
            Ok::<_, ManagerError>(reply)
        })
        .await?;
        let elapsed = start.elapsed();

        if let Err(e) = ping {
            return Ok(HealthStatus::unhealthy(format!("ping failed: {}", e), elapsed));
        }

        let server = cancellable(cancel, async {
            let reply: redis::RedisResult<String> =
                redis::cmd("INFO").arg("server").query_async(&mut conn).await;
            Ok::<_, ManagerError>(reply.ok())
        })
        .await?;

        let mut status = HealthStatus::healthy("Redis is healthy", elapsed);
        if let Some(raw) = server {
            let info = parse_info(&raw);
            if let Some(version) = info.get("redis_version") {
                status = status.with_detail("version", version.as_str());
            }
            if let Some(uptime) = info.get("uptime_in_seconds").and_then(|v| v.parse::<u64>().ok()) {
                status = status.with_detail("uptime_seconds", uptime);
            }
        }
        Ok(status)
    }

    async fn collect_metrics(&self, cancel: &CancellationToken) -> Result<ServiceMetrics, ManagerError> {
        let mut conn = self.conn.get()?;
        let raw = cancellable(cancel, async {
            let reply: redis::RedisResult<String> = redis::cmd("INFO").query_async(&mut conn).await;
            reply.map_err(ManagerError::metrics)
        })
        .await?;
        let info = parse_info(&raw);

        let mut metrics = ServiceMetrics::new();
        for field in INFO_FIELDS {
            if let Some(value) = info.get(*field) {
                metrics.insert(*field, MetricValue::parse(value));
            }
        }

        let hits = info.get("keyspace_hits").and_then(|v| v.parse::<f64>().ok());
        let misses = info.get("keyspace_misses").and_then(|v| v.parse::<f64>().ok());
        if let (Some(hits), Some(misses)) = (hits, misses) {
            if hits + misses > 0.0 {
                metrics.insert("hit_rate", hits / (hits + misses));
            }
        }

        let keys = match total_keys(&info) {
            Some(keys) => Some(keys),
            None => cancellable(cancel, async {
                let reply: redis::RedisResult<i64> = redis::cmd("DBSIZE").query_async(&mut conn).await;
                Ok::<_, ManagerError>(reply.ok())
            })
            .await?,
        };
        // An empty keyspace has no dbX lines at all.
        metrics.insert("total_keys", keys.unwrap_or(0));

        Ok(metrics)
    }

    async fn get_info(&self, cancel: &CancellationToken) -> Result<ServiceInfo, ManagerError> {
        let mut conn = self.conn.get()?;
        let raw = cancellable(cancel, async {
            let reply: redis::RedisResult<String> = redis::cmd("INFO").query_async(&mut conn).await;
            reply.map_err(ManagerError::health)
        })
        .await?;
        let info = parse_info(&raw);
        let field = |name: &str| info.get(name).cloned().unwrap_or_default();

        Ok(ServiceInfo::new(ServiceType::Redis, field("redis_version"))
            .with_detail("mode", field("redis_mode"))
            .with_detail("role", field("role"))
            .with_detail("os", field("os"))
            .with_detail("connected_slaves", field("connected_slaves"))
            .with_detail("maxmemory_policy", field("maxmemory_policy")))
    }

    fn validate_config(&self, config: &ConfigMap) -> Result<(), ManagerError> {
        config_u64(config, "db")?;
        config_duration(config, "connect_timeout")?;
        Ok(())
    }
}
