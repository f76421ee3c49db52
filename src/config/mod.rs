//! TOML configuration: sweep settings, SQL pool defaults, exec rules and
//! the instance inventory.

pub mod credentials;
pub mod loader;
pub mod types;

pub use credentials::{resolve_password, CredentialStatus, PASSWORD_ENV_KEY};
pub use loader::ConfigError;
pub use types::{Config, ExecConfig, MonitorConfig, PoolConfig};
