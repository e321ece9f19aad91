//! Error types for crunchy-users
//!
//! Errors are structured with fields to aid debugging in production. The
//! variants fall into the three runtime categories the controller cares about:
//! configuration mistakes on a watched resource, transient infrastructure
//! failures, and internal faults. None of them is fatal once the process has
//! started; the convergence loop logs them and moves on to the next item.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for crunchy-users operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Database error (connection, ping, query or statement)
    #[error("database error [{operation}]: {message}")]
    Database {
        /// Description of what failed
        message: String,
        /// Operation that was running (e.g. "ping", "role-exists")
        operation: String,
    },

    /// The superuser secret lacks one of the required fields
    #[error("superuser secret {secret} missing field {field}")]
    MissingCredentialField {
        /// Name of the secret that was read
        secret: String,
        /// Name of the absent field
        field: String,
    },

    /// A superuser secret field is not valid UTF-8
    #[error("superuser secret {secret} field {field} is not valid UTF-8")]
    InvalidCredentialField {
        /// Name of the secret that was read
        secret: String,
        /// Name of the undecodable field
        field: String,
    },

    /// The superuser secret port is not an integer
    #[error("could not parse port {value:?} from superuser secret {secret}")]
    InvalidPort {
        /// Name of the secret that was read
        secret: String,
        /// The raw port value
        value: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being deserialized (if known)
        kind: Option<String>,
    },

    /// Process configuration error
    #[error("configuration error: {message}")]
    Config {
        /// Description of what is wrong
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g. "watcher", "controller")
        context: String,
    },
}

impl Error {
    /// Create a database error without a specific operation
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database {
            message: msg.into(),
            operation: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create a database error tagged with the operation that failed
    pub fn database_during(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Database {
            message: msg.into(),
            operation: operation.into(),
        }
    }

    /// Create a missing credential field error
    pub fn missing_field(secret: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingCredentialField {
            secret: secret.into(),
            field: field.into(),
        }
    }

    /// Create an invalid credential field error
    pub fn invalid_field(secret: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidCredentialField {
            secret: secret.into(),
            field: field.into(),
        }
    }

    /// Create an invalid port error
    pub fn invalid_port(secret: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidPort {
            secret: secret.into(),
            value: value.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error was caused by how a resource or the process is configured
    ///
    /// These never resolve on their own; the resource author has to fix them.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Error::MissingCredentialField { .. }
                | Error::InvalidCredentialField { .. }
                | Error::InvalidPort { .. }
                | Error::Serialization { .. }
                | Error::Config { .. }
        )
    }

    /// Check if this error is an infrastructure hiccup that a later pass may not hit
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Database { .. } | Error::Internal { .. } => true,
            _ => false,
        }
    }

    /// Get the operation or context this error is tagged with, if any
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Database { operation, .. } => Some(operation),
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::database(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(err.to_string())
    }
}
