use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::instance::ServiceType;

/// Backend-specific detail attached to health and info snapshots.
pub type Details = BTreeMap<String, serde_json::Value>;

/// Result of one health probe.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
    pub response_time: Duration,
    pub details: Details,
    pub checked_at: SystemTime,
}

impl HealthStatus {
    pub fn healthy(message: impl Into<String>, response_time: Duration) -> Self {
        Self {
            healthy: true,
            message: message.into(),
            response_time,
            details: Details::new(),
            checked_at: SystemTime::now(),
        }
    }

    pub fn unhealthy(message: impl Into<String>, response_time: Duration) -> Self {
        Self {
            healthy: false,
            message: message.into(),
            response_time,
            details: Details::new(),
            checked_at: SystemTime::now(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn response_time_ms(&self) -> u64 {
        self.response_time.as_millis() as u64
    }
}

/// A single collected value. Only numeric values are persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl MetricValue {
    /// Numeric view of the value; `None` for text and booleans.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Integer(v) => Some(*v as f64),
            MetricValue::Float(v) if v.is_finite() => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Integer(v)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<u32> for MetricValue {
    fn from(v: u32) -> Self {
        MetricValue::Integer(v as i64)
    }
}

impl From<usize> for MetricValue {
    fn from(v: usize) -> Self {
        MetricValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Bool(v)
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl MetricValue {
    /// Parse a raw counter string, preferring integers over floats and
    /// falling back to text.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(v) = raw.parse::<i64>() {
            return MetricValue::Integer(v);
        }
        if let Ok(v) = raw.parse::<f64>() {
            return MetricValue::Float(v);
        }
        MetricValue::Text(raw.to_string())
    }
}

/// Timestamped, best-effort bag of named metric values.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceMetrics {
    pub collected_at: SystemTime,
    pub values: BTreeMap<String, MetricValue>,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            collected_at: SystemTime::now(),
            values: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<MetricValue>) {
        self.values.insert(name.into(), value.into());
    }

    /// Insert only when the sub-metric was actually obtained.
    pub fn insert_opt<V: Into<MetricValue>>(&mut self, name: impl Into<String>, value: Option<V>) {
        if let Some(value) = value {
            self.insert(name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.values.get(name)
    }

    /// The numeric subset, in name order.
    pub fn numeric(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values
            .iter()
            .filter_map(|(name, value)| value.as_f64().map(|v| (name.as_str(), v)))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Display-oriented snapshot of a backend.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub service_type: ServiceType,
    pub version: String,
    pub details: Details,
}

impl ServiceInfo {
    pub fn new(service_type: ServiceType, version: impl Into<String>) -> Self {
        Self {
            service_type,
            version: version.into(),
            details: Details::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Output of a command executed inside a container.
#[derive(Debug, Clone, Serialize)]
pub struct ExecOutput {
    pub exit_code: Option<i64>,
    pub output: String,
}
