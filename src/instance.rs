//! Instance definitions: the persisted reference to one backend deployment.
//!
//! The coordination framework treats instances as read-only apart from
//! their health field, which the coordinator writes back after each probe.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque unique identifier of an instance.
pub type InstanceId = String;

/// Free-form, backend-specific configuration attached to an instance.
pub type ConfigMap = HashMap<String, serde_json::Value>;

/// Backend type discriminant used for factory dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    #[serde(alias = "mariadb")]
    Mysql,
    #[serde(alias = "postgres")]
    Postgresql,
    Redis,
    Docker,
    #[serde(alias = "k8s")]
    Kubernetes,
    #[serde(alias = "s3")]
    Minio,
    Nginx,
}

impl ServiceType {
    pub const ALL: [ServiceType; 7] = [
        ServiceType::Mysql,
        ServiceType::Postgresql,
        ServiceType::Redis,
        ServiceType::Docker,
        ServiceType::Kubernetes,
        ServiceType::Minio,
        ServiceType::Nginx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Mysql => "mysql",
            ServiceType::Postgresql => "postgresql",
            ServiceType::Redis => "redis",
            ServiceType::Docker => "docker",
            ServiceType::Kubernetes => "kubernetes",
            ServiceType::Minio => "minio",
            ServiceType::Nginx => "nginx",
        }
    }

    /// Whether instances of this type must carry a host to connect to.
    ///
    /// Docker falls back to the local socket and Kubernetes reads its
    /// endpoint from the kubeconfig document.
    pub fn requires_host(&self) -> bool {
        !matches!(self, ServiceType::Docker | ServiceType::Kubernetes)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Returned when a type discriminant string names no known backend.
#[derive(Debug, Clone, Error)]
#[error("unknown service type '{0}'")]
pub struct UnknownServiceType(pub String);

impl FromStr for ServiceType {
    type Err = UnknownServiceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(ServiceType::Mysql),
            "postgresql" | "postgres" => Ok(ServiceType::Postgresql),
            "redis" => Ok(ServiceType::Redis),
            "docker" => Ok(ServiceType::Docker),
            "kubernetes" | "k8s" => Ok(ServiceType::Kubernetes),
            "minio" | "s3" => Ok(ServiceType::Minio),
            "nginx" => Ok(ServiceType::Nginx),
            _ => Err(UnknownServiceType(s.to_string())),
        }
    }
}

/// Lifecycle status of an instance as recorded by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Running,
    Stopped,
    Error,
    #[default]
    Unknown,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Error => "error",
            InstanceStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Health classification written back by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

impl HealthState {
    pub fn from_healthy(healthy: bool) -> Self {
        if healthy {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        }
    }
}

/// The health field of an instance record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceHealth {
    pub state: HealthState,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub checked_at: Option<SystemTime>,
}

/// Wrapper for sensitive strings that prevents accidental logging.
///
/// The inner value is never exposed via Debug or Display.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecureString(String);

impl SecureString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the inner value. Only for handing to a native client.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureString(••••••••)")
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "••••••••")
    }
}

/// A configured reference to one backend deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    #[serde(default = "new_instance_id")]
    pub id: InstanceId,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<SecureString>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default)]
    pub health: InstanceHealth,
}

fn new_instance_id() -> InstanceId {
    uuid::Uuid::new_v4().to_string()
}

impl Instance {
    /// Create a new instance definition with a generated id.
    pub fn new(name: impl Into<String>, service_type: ServiceType, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: new_instance_id(),
            name: name.into(),
            service_type,
            host: host.into(),
            port,
            username: None,
            password: None,
            database: None,
            use_tls: false,
            config: ConfigMap::new(),
            status: InstanceStatus::Unknown,
            health: InstanceHealth::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecureString::new(password));
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// `host:port`, as used in log fields and connection URLs.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Password, or `None` when unset or empty.
    pub fn password(&self) -> Option<&str> {
        self.password
            .as_ref()
            .filter(|p| !p.is_empty())
            .map(SecureString::expose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_type_parsing_accepts_aliases() {
        assert_eq!("postgres".parse::<ServiceType>().unwrap(), ServiceType::Postgresql);
        assert_eq!("K8S".parse::<ServiceType>().unwrap(), ServiceType::Kubernetes);
        assert_eq!("mariadb".parse::<ServiceType>().unwrap(), ServiceType::Mysql);
        assert!("mongodb".parse::<ServiceType>().is_err());
    }

    #[test]
    fn test_service_type_round_trips_through_as_str() {
        for ty in ServiceType::ALL {
            assert_eq!(ty.as_str().parse::<ServiceType>().unwrap(), ty);
        }
    }

    #[test]
    fn test_secure_string_is_masked() {
        let instance = Instance::new("cache", ServiceType::Redis, "localhost", 6379)
            .with_credentials("default", "hunter2");
        let debug = format!("{:?}", instance);
        assert!(!debug.contains("hunter2"));
        assert_eq!(instance.password(), Some("hunter2"));
    }

    #[test]
    fn test_empty_password_is_treated_as_unset() {
        let mut instance = Instance::new("cache", ServiceType::Redis, "localhost", 6379);
        instance.password = Some(SecureString::new(""));
        assert_eq!(instance.password(), None);
    }

    #[test]
    fn test_instance_deserializes_from_toml() {
        let instance: Instance = toml::from_str(
            r#"
            id = "pg-main"
            name = "Primary"
            type = "postgres"
            host = "db.internal"
            port = 5432
            password = "secret"
            status = "running"

            [config]
            max_open_conns = 20
            "#,
        )
        .unwrap();

        assert_eq!(instance.id, "pg-main");
        assert_eq!(instance.service_type, ServiceType::Postgresql);
        assert_eq!(instance.status, InstanceStatus::Running);
        assert_eq!(instance.config["max_open_conns"], serde_json::json!(20));
        assert_eq!(instance.health.state, HealthState::Unknown);
    }
}
