//! MySQL / MariaDB manager backed by a `sqlx` connection pool.

use std::time::Instant;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlSslMode};
use tokio_util::sync::CancellationToken;

use crate::instance::{ConfigMap, Instance, ServiceType};
use crate::manager::base::{cancellable, ClientSlot, ManagerBase};
use crate::manager::error::ManagerError;
use crate::manager::sql::{record_pool_stats, PoolSettings};
use crate::manager::types::{HealthStatus, MetricValue, ServiceInfo, ServiceMetrics};
use crate::manager::ServiceManager;

/// `SHOW GLOBAL STATUS` counters surfaced as metrics.
const STATUS_VARIABLES: &[&str] = &[
    "Threads_connected",
    "Threads_running",
    "Questions",
    "Slow_queries",
    "Uptime",
    "Connections",
    "Aborted_connects",
    "Bytes_received",
    "Bytes_sent",
    "Com_select",
    "Com_insert",
    "Com_update",
    "Com_delete",
];

pub struct MySqlManager {
    base: ManagerBase,
    settings: PoolSettings,
    pool: ClientSlot<MySqlPool>,
}

impl MySqlManager {
    pub fn new() -> Self {
        Self {
            base: ManagerBase::new(),
            settings: PoolSettings::default(),
            pool: ClientSlot::new(),
        }
    }

    fn connect_options(instance: &Instance) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&instance.host)
            .port(instance.port)
            .ssl_mode(if instance.use_tls {
                MySqlSslMode::Required
            } else {
                MySqlSslMode::Preferred
            });
        if let Some(username) = instance.username.as_deref().filter(|u| !u.is_empty()) {
            options = options.username(username);
        }
        if let Some(password) = instance.password() {
            options = options.password(password);
        }
        if let Some(database) = instance.database.as_deref().filter(|d| !d.is_empty()) {
            options = options.database(database);
        }
        options
    }
}

impl Default for MySqlManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceManager for MySqlManager {
    fn service_type(&self) -> ServiceType {
        ServiceType::Mysql
    }

    fn initialize(&mut self, instance: &Instance) -> Result<(), ManagerError> {
        self.settings = PoolSettings::from_config(&instance.config)?;
        self.base.bind(instance, ServiceType::Mysql)
    }

    async fn connect(&self, cancel: &CancellationToken) -> Result<(), ManagerError> {
        let instance = self.base.instance()?;
        let settings = &self.settings;
        let options = Self::connect_options(instance);

        let pool = cancellable(cancel, async {
            MySqlPoolOptions::new()
                .max_connections(settings.max_open)
                .min_connections(settings.min_idle)
                .idle_timeout(settings.idle_timeout)
                .max_lifetime(settings.max_lifetime)
                .acquire_timeout(settings.connect_timeout)
                .connect_with(options)
                .await
                .map_err(ManagerError::connection)
        })
        .await?;

        let probe = cancellable(cancel, async {
            sqlx::query("SELECT 1")
                .execute(&pool)
                .await
                .map(|_| ())
                .map_err(ManagerError::connection)
        })
        .await;
        if let Err(e) = probe {
            pool.close().await;
            return Err(e);
        }

        if let Some(previous) = self.pool.set(pool) {
            previous.close().await;
        }
        tracing::info!(
            instance_id = %instance.id,
            address = %instance.address(),
            max_open = settings.max_open,
            "MySQL pool connected"
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ManagerError> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            tracing::debug!(instance_id = %self.base.instance_id(), "MySQL pool closed");
        }
        Ok(())
    }

    async fn health_check(&self, cancel: &CancellationToken) -> Result<HealthStatus, ManagerError> {
        let pool = self.pool.get()?;
        let start = Instant::now();
        let result = cancellable(cancel, async {
            Ok::<_, ManagerError>(
                sqlx::query_scalar::<_, String>("SELECT VERSION()")
                    .fetch_one(&pool)
                    .await,
            )
        })
        .await?;
        let elapsed = start.elapsed();

        let status = match result {
            Ok(version) => HealthStatus::healthy("MySQL is healthy", elapsed)
                .with_detail("version", version)
                .with_detail("pool_open_connections", pool.size())
                .with_detail("pool_idle_connections", pool.num_idle()),
            Err(e) => HealthStatus::unhealthy(format!("version query failed: {}", e), elapsed)
                .with_detail("pool_open_connections", pool.size()),
        };
        Ok(status)
    }

    async fn collect_metrics(&self, cancel: &CancellationToken) -> Result<ServiceMetrics, ManagerError> {
        let pool = self.pool.get()?;
        let query = format!(
            "SHOW GLOBAL STATUS WHERE Variable_name IN ({})",
            STATUS_VARIABLES
                .iter()
                .map(|name| format!("'{}'", name))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let rows = cancellable(cancel, async {
            sqlx::query_as::<_, (String, String)>(&query)
                .fetch_all(&pool)
                .await
                .map_err(ManagerError::metrics)
        })
        .await?;

        let mut metrics = ServiceMetrics::new();
        for (name, value) in rows {
            metrics.insert(name.to_lowercase(), MetricValue::parse(&value));
        }

        let max_connections = cancellable(cancel, async {
            Ok::<_, ManagerError>(
                sqlx::query_scalar::<_, u64>("SELECT @@max_connections")
                    .fetch_one(&pool)
                    .await
                    .ok(),
            )
        })
        .await?;
        metrics.insert_opt("max_connections", max_connections);

        record_pool_stats(&mut metrics, pool.size(), pool.num_idle(), self.settings.max_open);
        Ok(metrics)
    }

    async fn get_info(&self, cancel: &CancellationToken) -> Result<ServiceInfo, ManagerError> {
        let pool = self.pool.get()?;
        let (version, comment, database) = cancellable(cancel, async {
            sqlx::query_as::<_, (String, String, Option<String>)>(
                "SELECT VERSION(), @@version_comment, DATABASE()",
            )
            .fetch_one(&pool)
            .await
            .map_err(ManagerError::health)
        })
        .await?;

        let instance = self.base.instance()?;
        let mut info = ServiceInfo::new(ServiceType::Mysql, version)
            .with_detail("distribution", comment)
            .with_detail("address", instance.address());
        if let Some(database) = database {
            info = info.with_detail("database", database);
        }
        Ok(info)
    }

    fn validate_config(&self, config: &ConfigMap) -> Result<(), ManagerError> {
        PoolSettings::from_config(config).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_initialize_reads_pool_settings() {
        let instance = Instance::new("db", ServiceType::Mysql, "localhost", 3306)
            .with_config("max_open_conns", json!(4))
            .with_config("max_idle_conns", json!(2));
        let mut manager = MySqlManager::new();
        manager.initialize(&instance).unwrap();
        assert_eq!(manager.settings.max_open, 4);
        assert_eq!(manager.settings.min_idle, 2);
    }

    #[test]
    fn test_initialize_rejects_bad_pool_config() {
        let instance = Instance::new("db", ServiceType::Mysql, "localhost", 3306)
            .with_config("max_open_conns", json!("many"));
        let mut manager = MySqlManager::new();
        assert!(matches!(
            manager.initialize(&instance),
            Err(ManagerError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let instance = Instance::new("db", ServiceType::Mysql, "localhost", 3306);
        let mut manager = MySqlManager::new();
        manager.initialize(&instance).unwrap();
        let cancel = CancellationToken::new();

        assert!(matches!(
            manager.health_check(&cancel).await,
            Err(ManagerError::NotConnected)
        ));
        assert!(matches!(
            manager.collect_metrics(&cancel).await,
            Err(ManagerError::NotConnected)
        ));
        manager.disconnect().await.unwrap();
    }
}
