//! PostgreSQL manager backed by a `sqlx` connection pool.

use std::time::Instant;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use tokio_util::sync::CancellationToken;

use crate::instance::{ConfigMap, Instance, ServiceType};
use crate::manager::base::{cancellable, config_str, ClientSlot, ManagerBase};
use crate::manager::error::ManagerError;
use crate::manager::sql::{record_pool_stats, PoolSettings};
use crate::manager::types::{HealthStatus, MetricValue, ServiceInfo, ServiceMetrics};
use crate::manager::ServiceManager;

const SSL_MODES: &[&str] = &["disable", "allow", "prefer", "require", "verify-ca", "verify-full"];

pub struct PostgresManager {
    base: ManagerBase,
    settings: PoolSettings,
    pool: ClientSlot<PgPool>,
}

impl PostgresManager {
    pub fn new() -> Self {
        Self {
            base: ManagerBase::new(),
            settings: PoolSettings::default(),
            pool: ClientSlot::new(),
        }
    }

    fn ssl_mode(instance: &Instance) -> PgSslMode {
        match config_str(&instance.config, "sslmode") {
            Some("disable") => PgSslMode::Disable,
            Some("allow") => PgSslMode::Allow,
            Some("prefer") => PgSslMode::Prefer,
            Some("require") => PgSslMode::Require,
            Some("verify-ca") => PgSslMode::VerifyCa,
            Some("verify-full") => PgSslMode::VerifyFull,
            Some(_) | None if instance.use_tls => PgSslMode::Require,
            _ => PgSslMode::Prefer,
        }
    }

    fn connect_options(instance: &Instance) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&instance.host)
            .port(instance.port)
            .ssl_mode(Self::ssl_mode(instance))
            .application_name("svcmgr");
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

impl Default for PostgresManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceManager for PostgresManager {
    fn service_type(&self) -> ServiceType {
        ServiceType::Postgresql
    }

    fn initialize(&mut self, instance: &Instance) -> Result<(), ManagerError> {
        self.validate_config(&instance.config)?;
        self.settings = PoolSettings::from_config(&instance.config)?;
        self.base.bind(instance, ServiceType::Postgresql)
    }

    async fn connect(&self, cancel: &CancellationToken) -> Result<(), ManagerError> {
        let instance = self.base.instance()?;
        let settings = &self.settings;
        let options = Self::connect_options(instance);

        let pool = cancellable(cancel, async {
            PgPoolOptions::new()
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
            "PostgreSQL pool connected"
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ManagerError> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            tracing::debug!(instance_id = %self.base.instance_id(), "PostgreSQL pool closed");
        }
        Ok(())
    }

    async fn health_check(&self, cancel: &CancellationToken) -> Result<HealthStatus, ManagerError> {
        let pool = self.pool.get()?;
        let start = Instant::now();
        let result = cancellable(cancel, async {
            Ok::<_, ManagerError>(
                sqlx::query_scalar::<_, String>("SELECT version()")
                    .fetch_one(&pool)
                    .await,
            )
        })
        .await?;
        let elapsed = start.elapsed();

        let status = match result {
            Ok(version) => HealthStatus::healthy("PostgreSQL is healthy", elapsed)
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
        let mut metrics = ServiceMetrics::new();

        // The first query doubles as the reachability check.
        let connections = cancellable(cancel, async {
            sqlx::query_scalar::<_, i64>("SELECT count(*) FROM pg_stat_activity")
                .fetch_one(&pool)
                .await
                .map_err(ManagerError::metrics)
        })
        .await?;
        metrics.insert("active_connections", connections);

        let (active_queries, database_size, stats, uptime, max_connections) = cancellable(cancel, async {
            let active_queries = sqlx::query_scalar::<_, i64>(
                "SELECT count(*) FROM pg_stat_activity WHERE state = 'active'",
            )
            .fetch_one(&pool)
            .await
            .ok();
            let database_size =
                sqlx::query_scalar::<_, i64>("SELECT pg_database_size(current_database())")
                    .fetch_one(&pool)
                    .await
                    .ok();
            let stats = sqlx::query_as::<_, (i64, i64, i64, i64, i64)>(
                "SELECT xact_commit, xact_rollback, blks_hit, blks_read, deadlocks \
                 FROM pg_stat_database WHERE datname = current_database()",
            )
            .fetch_one(&pool)
            .await
            .ok();
            let uptime = sqlx::query_scalar::<_, i64>(
                "SELECT EXTRACT(EPOCH FROM (now() - pg_postmaster_start_time()))::bigint",
            )
            .fetch_one(&pool)
            .await
            .ok();
            let max_connections = sqlx::query_scalar::<_, String>("SHOW max_connections")
                .fetch_one(&pool)
                .await
                .ok();
            Ok::<_, ManagerError>((active_queries, database_size, stats, uptime, max_connections))
        })
        .await?;

        metrics.insert_opt("active_queries", active_queries);
        metrics.insert_opt("database_size_bytes", database_size);
        metrics.insert_opt("uptime_seconds", uptime);
        if let Some(raw) = max_connections {
            metrics.insert("max_connections", MetricValue::parse(&raw));
        }
        if let Some((commits, rollbacks, hits, reads, deadlocks)) = stats {
            metrics.insert("xact_commit", commits);
            metrics.insert("xact_rollback", rollbacks);
            metrics.insert("blks_hit", hits);
            metrics.insert("blks_read", reads);
            metrics.insert("deadlocks", deadlocks);
            if hits + reads > 0 {
                metrics.insert("cache_hit_ratio", hits as f64 / (hits + reads) as f64);
            }
        }

        record_pool_stats(&mut metrics, pool.size(), pool.num_idle(), self.settings.max_open);
        Ok(metrics)
    }

    async fn get_info(&self, cancel: &CancellationToken) -> Result<ServiceInfo, ManagerError> {
        let pool = self.pool.get()?;
        let (version, database, in_recovery) = cancellable(cancel, async {
            sqlx::query_as::<_, (String, String, bool)>(
                "SELECT current_setting('server_version'), current_database(), pg_is_in_recovery()",
            )
            .fetch_one(&pool)
            .await
            .map_err(ManagerError::health)
        })
        .await?;

        let instance = self.base.instance()?;
        Ok(ServiceInfo::new(ServiceType::Postgresql, version)
            .with_detail("database", database)
            .with_detail("role", if in_recovery { "replica" } else { "primary" })
            .with_detail("address", instance.address()))
    }

    fn validate_config(&self, config: &ConfigMap) -> Result<(), ManagerError> {
        if let Some(mode) = config_str(config, "sslmode") {
            if !SSL_MODES.contains(&mode) {
                return Err(ManagerError::InvalidConfig(format!(
                    "sslmode must be one of {}, got '{}'",
                    SSL_MODES.join(", "),
                    mode
                )));
            }
        }
        PoolSettings::from_config(config).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_config_rejects_unknown_sslmode() {
        let manager = PostgresManager::new();
        let mut config = ConfigMap::new();
        config.insert("sslmode".into(), json!("sometimes"));
        assert!(matches!(
            manager.validate_config(&config),
            Err(ManagerError::InvalidConfig(_))
        ));

        config.insert("sslmode".into(), json!("verify-full"));
        assert!(manager.validate_config(&config).is_ok());
    }

    #[test]
    fn test_tls_flag_requires_ssl() {
        let mut instance = Instance::new("pg", ServiceType::Postgresql, "localhost", 5432);
        assert!(matches!(PostgresManager::ssl_mode(&instance), PgSslMode::Prefer));
        instance.use_tls = true;
        assert!(matches!(PostgresManager::ssl_mode(&instance), PgSslMode::Require));
    }

    #[tokio::test]
    async fn test_health_check_without_connection_is_an_error() {
        let mut manager = PostgresManager::new();
        manager
            .initialize(&Instance::new("pg", ServiceType::Postgresql, "localhost", 5432))
            .unwrap();
        let result = manager.health_check(&CancellationToken::new()).await;
        assert!(matches!(result, Err(ManagerError::NotConnected)));
    }
}
