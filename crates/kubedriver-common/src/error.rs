//! Error types for kubedriver
//!
//! Errors are structured with fields to aid debugging in production. Each
//! variant carries the context needed to tell which object or endpoint was
//! involved without re-reading the logs around it.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for kubedriver operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A request or object failed validation before touching the cluster
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "capabilities.alwaysMatch.platformName")
        field: Option<String>,
    },

    /// Create was rejected because an object with the same name already exists
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Kind of the object
        kind: String,
        /// Name of the object
        name: String,
    },

    /// A watch stream failed
    #[error("watch error for {kind}: {message}")]
    Watch {
        /// Kind of the watched collection
        kind: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Call to the WebDriver server inside a session pod failed
    #[error("driver error [{endpoint}]: {message}")]
    Driver {
        /// Endpoint that was called
        endpoint: String,
        /// Description of what failed
        message: String,
    },

    /// Operator configuration is incomplete or inconsistent
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of what's missing
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "operator", "watcher")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error pointing at a specific field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an already-exists error
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a watch error for a resource kind
    pub fn watch(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Watch {
            kind: kind.into(),
            message: msg.into(),
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

    /// Create a driver error for the given endpoint
    pub fn driver(endpoint: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Driver {
            endpoint: endpoint.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
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

    /// True when a create lost a race against an identical create
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::AlreadyExists { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409 && ae.reason == "AlreadyExists",
            _ => false,
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, configuration and serialization errors need a fix before a
    /// retry can succeed. Kubernetes errors are retryable unless the API server
    /// answered with a 4xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                !matches!(source, kube::Error::Api(ae) if (400..500).contains(&ae.code))
            }
            Error::Validation { .. } => false,
            Error::AlreadyExists { .. } => false,
            Error::Watch { .. } => true,
            Error::Serialization { .. } => false,
            Error::Driver { .. } => true,
            Error::Configuration { .. } => false,
            Error::Internal { .. } => true,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
