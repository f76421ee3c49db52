//! Pool settings shared by the SQL-family managers.

use std::time::Duration;

use crate::instance::ConfigMap;
use crate::manager::base::{config_duration, config_u64};
use crate::manager::error::ManagerError;
use crate::manager::types::ServiceMetrics;

pub(crate) const DEFAULT_MAX_OPEN: u32 = 10;
pub(crate) const DEFAULT_MIN_IDLE: u32 = 1;
pub(crate) const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
pub(crate) const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(1800);
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection pool knobs read from an instance config map.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PoolSettings {
    pub max_open: u32,
    pub min_idle: u32,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_open: DEFAULT_MAX_OPEN,
            min_idle: DEFAULT_MIN_IDLE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_lifetime: DEFAULT_MAX_LIFETIME,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl PoolSettings {
    pub fn from_config(config: &ConfigMap) -> Result<Self, ManagerError> {
        let defaults = Self::default();
        let max_open = match config_u64(config, "max_open_conns")? {
            Some(v) => u32::try_from(v)
                .map_err(|_| ManagerError::InvalidConfig("max_open_conns is too large".to_string()))?,
            None => defaults.max_open,
        };
        let min_idle = match config_u64(config, "max_idle_conns")? {
            Some(v) => u32::try_from(v)
                .map_err(|_| ManagerError::InvalidConfig("max_idle_conns is too large".to_string()))?,
            None => defaults.min_idle.min(max_open),
        };

        if max_open == 0 {
            return Err(ManagerError::InvalidConfig(
                "max_open_conns must be at least 1".to_string(),
            ));
        }
        if min_idle > max_open {
            return Err(ManagerError::InvalidConfig(format!(
                "max_idle_conns ({}) exceeds max_open_conns ({})",
                min_idle, max_open
            )));
        }

        Ok(Self {
            max_open,
            min_idle,
            idle_timeout: config_duration(config, "conn_max_idle_time")?.unwrap_or(defaults.idle_timeout),
            max_lifetime: config_duration(config, "conn_max_lifetime")?.unwrap_or(defaults.max_lifetime),
            connect_timeout: config_duration(config, "connect_timeout")?.unwrap_or(defaults.connect_timeout),
        })
    }
}

/// Record pool occupancy alongside backend counters.
pub(crate) fn record_pool_stats(metrics: &mut ServiceMetrics, size: u32, idle: usize, max_open: u32) {
    metrics.insert("pool_open_connections", size);
    metrics.insert("pool_idle_connections", idle);
    metrics.insert("pool_in_use", (size as usize).saturating_sub(idle));
    metrics.insert("pool_max_open", max_open);
}
