//! State and helpers shared by every manager variant.

use std::future::Future;
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::instance::{ConfigMap, Instance, ServiceType};
use crate::manager::error::ManagerError;

/// Bound instance definition embedded in every concrete manager.
#[derive(Debug, Default)]
pub struct ManagerBase {
    instance: Option<Instance>,
}

impl ManagerBase {
    pub fn new() -> Self {
        Self { instance: None }
    }

    /// Bind to `instance` after checking the reference is well formed.
    ///
    /// Pure: performs no I/O.
    pub fn bind(&mut self, instance: &Instance, expected: ServiceType) -> Result<(), ManagerError> {
        if instance.id.trim().is_empty() {
            return Err(ManagerError::InvalidConnectionParams(
                "instance id is empty".to_string(),
            ));
        }
        if instance.service_type != expected {
            return Err(ManagerError::InvalidConnectionParams(format!(
                "instance '{}' is of type {}, expected {}",
                instance.id, instance.service_type, expected
            )));
        }
        if expected.requires_host() {
            if instance.host.trim().is_empty() {
                return Err(ManagerError::InvalidConnectionParams(format!(
                    "instance '{}' has no host",
                    instance.id
                )));
            }
            if instance.port == 0 {
                return Err(ManagerError::InvalidConnectionParams(format!(
                    "instance '{}' has no port",
                    instance.id
                )));
            }
        }
        self.instance = Some(instance.clone());
        Ok(())
    }

    pub fn instance(&self) -> Result<&Instance, ManagerError> {
        self.instance.as_ref().ok_or(ManagerError::NotInitialized)
    }

    /// Instance id for log fields; empty before `bind`.
    pub fn instance_id(&self) -> &str {
        self.instance.as_ref().map(|i| i.id.as_str()).unwrap_or("")
    }

    pub fn config(&self) -> Option<&ConfigMap> {
        self.instance.as_ref().map(|i| &i.config)
    }
}

/// Slot holding a cloneable native client handle.
///
/// The lock is only held to clone the handle in or out, never across
/// backend I/O.
pub struct ClientSlot<C> {
    inner: RwLock<Option<C>>,
}

impl<C: Clone> ClientSlot<C> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Clone the live client, or `NotConnected`.
    pub fn get(&self) -> Result<C, ManagerError> {
        self.inner.read().clone().ok_or(ManagerError::NotConnected)
    }

    /// Install a client, returning the one it replaced.
    pub fn set(&self, client: C) -> Option<C> {
        self.inner.write().replace(client)
    }

    pub fn take(&self) -> Option<C> {
        self.inner.write().take()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.read().is_some()
    }
}

impl<C: Clone> Default for ClientSlot<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Race `fut` against `cancel`, returning `Cancelled` if the token fires first.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, ManagerError>
where
    F: Future<Output = Result<T, ManagerError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ManagerError::Cancelled),
        res = fut => res,
    }
}

// -- Config map accessors -----------------------------------------------------

pub fn config_str<'a>(config: &'a ConfigMap, key: &str) -> Option<&'a str> {
    config
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Read a non-negative integer; numeric strings are accepted.
pub fn config_u64(config: &ConfigMap, key: &str) -> Result<Option<u64>, ManagerError> {
    match config.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| ManagerError::InvalidConfig(format!("{} must be a non-negative integer", key))),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ManagerError::InvalidConfig(format!("{} must be a non-negative integer", key))),
        Some(_) => Err(ManagerError::InvalidConfig(format!(
            "{} must be a non-negative integer",
            key
        ))),
    }
}

pub fn config_bool(config: &ConfigMap, key: &str) -> Result<Option<bool>, ManagerError> {
    match config.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
        Some(serde_json::Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Some(true)),
            "false" | "no" | "0" => Ok(Some(false)),
            _ => Err(ManagerError::InvalidConfig(format!("{} must be a boolean", key))),
        },
        Some(_) => Err(ManagerError::InvalidConfig(format!("{} must be a boolean", key))),
    }
}

/// Read a duration given either as whole seconds or as a string with a
/// `ms`, `s`, `m` or `h` suffix.
pub fn config_duration(config: &ConfigMap, key: &str) -> Result<Option<Duration>, ManagerError> {
    match config.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .map(|secs| Some(Duration::from_secs(secs)))
            .ok_or_else(|| ManagerError::InvalidConfig(format!("{} must be a duration", key))),
        Some(serde_json::Value::String(s)) => parse_duration(s)
            .map(Some)
            .ok_or_else(|| ManagerError::InvalidConfig(format!("{} must be a duration, got '{}'", key, s))),
        Some(_) => Err(ManagerError::InvalidConfig(format!("{} must be a duration", key))),
    }
}

fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().ok()?;
    match unit.trim() {
        "" | "s" => Some(Duration::from_secs(value)),
        "ms" => Some(Duration::from_millis(value)),
        "m" => Some(Duration::from_secs(value.checked_mul(60)?)),
        "h" => Some(Duration::from_secs(value.checked_mul(3600)?)),
        _ => None,
    }
}
