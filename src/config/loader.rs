use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::command::CommandValidator;
use crate::config::credentials::resolve_password;
use crate::config::types::Config;
use crate::instance::ServiceType;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

impl Config {
    /// Returns the path to the configuration file.
    ///
    /// Uses `~/.config/svcmgr/config.toml` on Linux, or the platform
    /// equivalent via `dirs::config_dir()`. Falls back to the current
    /// directory if no config dir is available.
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("svcmgr").join("config.toml")
    }

    /// Loads configuration from the default config file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Loads configuration from `path`.
    ///
    /// - A missing file yields `Config::default()`.
    /// - Otherwise the file is parsed, validated and normalized: passwords
    ///   are resolved from the environment and `[pool]` defaults are merged
    ///   into SQL instances.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        config.normalize();
        tracing::info!(
            path = %path.display(),
            instances = config.instances.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Checks:
    /// - Sweep interval and page size are positive
    /// - Pool bounds are consistent
    /// - Instance ids are non-empty and unique
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.interval_seconds == 0 {
            return Err(validation("monitor.interval_seconds must be at least 1"));
        }
        if self.monitor.page_size == 0 {
            return Err(validation("monitor.page_size must be at least 1"));
        }
        if self.monitor.task_deadline_seconds == Some(0) {
            return Err(validation("monitor.task_deadline_seconds must be at least 1"));
        }
        if self.pool.max_open == 0 {
            return Err(validation("pool.max_open must be at least 1"));
        }
        if self.pool.min_idle > self.pool.max_open {
            return Err(validation(format!(
                "pool.min_idle ({}) exceeds pool.max_open ({})",
                self.pool.min_idle, self.pool.max_open
            )));
        }

        let mut seen = HashSet::new();
        for instance in &self.instances {
            if instance.id.trim().is_empty() {
                return Err(validation(format!(
                    "instance '{}' has an empty id",
                    instance.name
                )));
            }
            if !seen.insert(instance.id.as_str()) {
                return Err(validation(format!("duplicate instance id '{}'", instance.id)));
            }
        }

        Ok(())
    }

    fn normalize(&mut self) {
        let pool = self.pool.clone();
        for instance in &mut self.instances {
            resolve_password(instance);
            if !matches!(instance.service_type, ServiceType::Mysql | ServiceType::Postgresql) {
                continue;
            }
            let defaults = [
                ("max_open_conns", serde_json::Value::from(pool.max_open)),
                ("max_idle_conns", serde_json::Value::from(pool.min_idle)),
                ("conn_max_idle_time", serde_json::Value::from(pool.idle_timeout_seconds)),
                ("conn_max_lifetime", serde_json::Value::from(pool.max_lifetime_seconds)),
                ("connect_timeout", serde_json::Value::from(pool.acquire_timeout_seconds)),
            ];
            for (key, value) in defaults {
                instance.config.entry(key.to_string()).or_insert(value);
            }
        }
    }

    /// Layer the `[exec]` rules onto `validator`.
    pub fn apply_exec_rules(&self, validator: &CommandValidator) {
        for command in &self.exec.deny_commands {
            validator.deny_command(command);
        }
        for command in &self.exec.allow_commands {
            validator.allow_command(command);
        }
        for pattern in &self.exec.deny_patterns {
            validator.deny_pattern(pattern);
        }
        if self.exec.max_args.is_some() || self.exec.max_arg_len.is_some() {
            validator.set_limits(
                self.exec.max_args.unwrap_or(crate::command::DEFAULT_MAX_ARGS),
                self.exec.max_arg_len.unwrap_or(crate::command::DEFAULT_MAX_ARG_LEN),
            );
        }
    }
}

fn validation(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        message: message.into(),
    }
}
