use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordinator::MonitorSettings;
use crate::instance::Instance;

/// Root configuration container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub instances: Vec<Instance>,
}

/// Background sweep settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between sweep ticks (default: 30).
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Running instances visited per tick (default: 100).
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Per-instance deadline in seconds; the interval when unset.
    #[serde(default)]
    pub task_deadline_seconds: Option<u64>,
}

/// SQL pool defaults, applied to MySQL and PostgreSQL instances that do
/// not set the corresponding config key themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_open")]
    pub max_open: u32,
    #[serde(default = "default_min_idle")]
    pub min_idle: u32,
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
    #[serde(default = "default_max_lifetime_seconds")]
    pub max_lifetime_seconds: u64,
    #[serde(default = "default_acquire_timeout_seconds")]
    pub acquire_timeout_seconds: u64,
}

/// Extra rules layered on top of the built-in command validator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecConfig {
    #[serde(default)]
    pub deny_commands: Vec<String>,
    /// Built-in denied executables to lift.
    #[serde(default)]
    pub allow_commands: Vec<String>,
    #[serde(default)]
    pub deny_patterns: Vec<String>,
    #[serde(default)]
    pub max_args: Option<usize>,
    #[serde(default)]
    pub max_arg_len: Option<usize>,
}

fn default_interval_seconds() -> u64 {
    30
}

fn default_page_size() -> usize {
    100
}

fn default_max_open() -> u32 {
    10
}

fn default_min_idle() -> u32 {
    1
}

fn default_idle_timeout_seconds() -> u64 {
    300
}

fn default_max_lifetime_seconds() -> u64 {
    1800
}

fn default_acquire_timeout_seconds() -> u64 {
    10
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            page_size: default_page_size(),
            task_deadline_seconds: None,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: default_max_open(),
            min_idle: default_min_idle(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
            max_lifetime_seconds: default_max_lifetime_seconds(),
            acquire_timeout_seconds: default_acquire_timeout_seconds(),
        }
    }
}

impl MonitorConfig {
    pub fn settings(&self) -> MonitorSettings {
        MonitorSettings {
            interval: Duration::from_secs(self.interval_seconds),
            page_size: self.page_size,
            task_deadline: self.task_deadline_seconds.map(Duration::from_secs),
        }
    }
}
