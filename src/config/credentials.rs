//! Credential resolution for configured instances.
//!
//! Passwords may be written inline or referenced through an environment
//! variable named by the `password_env` config key, so secrets can stay
//! out of the config file.

use crate::instance::{Instance, SecureString};

pub const PASSWORD_ENV_KEY: &str = "password_env";

/// Where an instance's password came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStatus {
    /// Password written inline in the config file.
    Inline,
    /// Password read from the named environment variable.
    FromEnv(String),
    /// `password_env` names a variable that is unset or empty.
    Unconfigured { reason: String },
    /// No password configured at all.
    NoAuth,
}

/// Resolve `password_env` into the instance password.
///
/// An inline password wins. This is called once at load time; the key is
/// left in the config map so the source stays visible.
pub fn resolve_password(instance: &mut Instance) -> CredentialStatus {
    if instance.password().is_some() {
        return CredentialStatus::Inline;
    }
    let Some(var) = instance
        .config
        .get(PASSWORD_ENV_KEY)
        .and_then(|v| v.as_str())
        .map(str::to_string)
    else {
        return CredentialStatus::NoAuth;
    };

    match std::env::var(&var) {
        Ok(value) if !value.is_empty() => {
            instance.password = Some(SecureString::new(value));
            CredentialStatus::FromEnv(var)
        }
        _ => {
            tracing::warn!(instance_id = %instance.id, env = %var, "Password environment variable is not set");
            CredentialStatus::Unconfigured {
                reason: format!("{} is not set", var),
            }
        }
    }
}
