//! Shared error taxonomy for every manager variant.
//!
//! Each variant of [`ManagerError`] is a sentinel: callers branch on the
//! variant (or on [`ManagerError::kind`]) while the `#[source]` chain keeps
//! the underlying transport detail for logs.

use thiserror::Error;

use crate::command::CommandError;
use crate::store::StoreError;

/// Boxed transport error carried by the wrapping variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by managers, the factory and the coordinator.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// An operation ran before `initialize` bound an instance.
    #[error("manager not initialized")]
    NotInitialized,

    /// The instance reference is malformed (missing host, port 0, ...).
    #[error("invalid connection parameters: {0}")]
    InvalidConnectionParams(String),

    /// The backend could not be reached or rejected the session.
    #[error("connection failed: {source}")]
    ConnectionFailed {
        #[source]
        source: BoxError,
    },

    /// The manager holds no live client.
    #[error("manager not connected")]
    NotConnected,

    /// Candidate configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("health check failed: {source}")]
    HealthCheckFailed {
        #[source]
        source: BoxError,
    },

    /// The backend was wholly unreachable during metrics collection.
    #[error("metrics collection failed: {source}")]
    MetricsCollectionFailed {
        #[source]
        source: BoxError,
    },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A backend-specific operation (exec, listing) failed mid-flight.
    #[error("{operation} failed: {source}")]
    OperationFailed {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    /// The command validator refused an exec request.
    #[error("command rejected: {0}")]
    CommandRejected(#[from] CommandError),

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Identity-comparable classification of a [`ManagerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotInitialized,
    InvalidConnectionParams,
    ConnectionFailed,
    NotConnected,
    InvalidConfig,
    HealthCheckFailed,
    MetricsCollectionFailed,
    Unsupported,
    OperationFailed,
    CommandRejected,
    Cancelled,
    Store,
}

impl ManagerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ManagerError::NotInitialized => ErrorKind::NotInitialized,
            ManagerError::InvalidConnectionParams(_) => ErrorKind::InvalidConnectionParams,
            ManagerError::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            ManagerError::NotConnected => ErrorKind::NotConnected,
            ManagerError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            ManagerError::HealthCheckFailed { .. } => ErrorKind::HealthCheckFailed,
            ManagerError::MetricsCollectionFailed { .. } => ErrorKind::MetricsCollectionFailed,
            ManagerError::Unsupported(_) => ErrorKind::Unsupported,
            ManagerError::OperationFailed { .. } => ErrorKind::OperationFailed,
            ManagerError::CommandRejected(_) => ErrorKind::CommandRejected,
            ManagerError::Cancelled => ErrorKind::Cancelled,
            ManagerError::Store(_) => ErrorKind::Store,
        }
    }

    pub fn connection(source: impl Into<BoxError>) -> Self {
        ManagerError::ConnectionFailed {
            source: source.into(),
        }
    }

    pub fn health(source: impl Into<BoxError>) -> Self {
        ManagerError::HealthCheckFailed {
            source: source.into(),
        }
    }

    pub fn metrics(source: impl Into<BoxError>) -> Self {
        ManagerError::MetricsCollectionFailed {
            source: source.into(),
        }
    }

    pub fn operation(operation: &'static str, source: impl Into<BoxError>) -> Self {
        ManagerError::OperationFailed {
            operation,
            source: source.into(),
        }
    }

    /// Configuration and parameter errors are never worth retrying.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidConfig | ErrorKind::InvalidConnectionParams
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_connection_failed_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ManagerError::connection(io);

        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
        assert!(err.to_string().contains("refused"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_config_errors_are_classified() {
        assert!(ManagerError::InvalidConfig("x".into()).is_config_error());
        assert!(ManagerError::InvalidConnectionParams("x".into()).is_config_error());
        assert!(!ManagerError::NotConnected.is_config_error());
    }

    #[test]
    fn test_store_error_converts() {
        let err: ManagerError = StoreError::NotFound("abc".into()).into();
        assert_eq!(err.kind(), ErrorKind::Store);
    }
}
