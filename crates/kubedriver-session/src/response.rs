//! Results of session requests as seen by WebDriver clients

use std::fmt;

use kubedriver_common::crd::WebDriverSessionStatus;
use kubedriver_common::Error;
use serde::Serialize;
use serde_json::{json, Value};

/// A session that is ready to accept commands
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    /// Session id; the name of the `WebDriverSession` resource
    pub session_id: String,
    /// Capabilities the driver matched
    pub capabilities: Value,
}

/// WebDriver error code of a failed request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// The request was malformed; nothing was created
    InvalidArgument,
    /// The session could not be started
    SessionNotCreated,
    /// No session with the given id exists
    InvalidSessionId,
    /// The session did not become ready in time
    Timeout,
    /// The caller abandoned the request
    Cancelled,
    /// The cluster could not be reached or misbehaved
    UnknownError,
    /// Any other code reported by the driver, kept verbatim
    Driver(String),
}

impl FailureKind {
    /// Kind for an error code reported by a driver
    pub fn from_code(code: &str) -> Self {
        match code {
            "invalid argument" => Self::InvalidArgument,
            "session not created" => Self::SessionNotCreated,
            "invalid session id" => Self::InvalidSessionId,
            "timeout" => Self::Timeout,
            "unknown error" => Self::UnknownError,
            other => Self::Driver(other.to_string()),
        }
    }

    /// Error code on the wire
    pub fn as_str(&self) -> &str {
        match self {
            Self::InvalidArgument => "invalid argument",
            Self::SessionNotCreated => "session not created",
            Self::InvalidSessionId => "invalid session id",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::UnknownError => "unknown error",
            Self::Driver(code) => code,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed session request
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct WebDriverFailure {
    /// Error code
    pub kind: FailureKind,
    /// Human-readable message
    pub message: String,
    /// Driver-side stack trace, when the driver reported one
    pub stacktrace: Option<String>,
    /// Additional error data, when the driver reported some
    pub data: Option<String>,
}

impl WebDriverFailure {
    /// Failure without stack trace or data
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stacktrace: None,
            data: None,
        }
    }

    /// The request was rejected before anything was created
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidArgument, message)
    }

    /// The session could not be started
    pub fn session_not_created(message: impl Into<String>) -> Self {
        Self::new(FailureKind::SessionNotCreated, message)
    }

    /// No session named `session_id` exists
    pub fn invalid_session_id(session_id: &str) -> Self {
        Self::new(
            FailureKind::InvalidSessionId,
            format!("No session with id {} exists.", session_id),
        )
    }

    /// The session creation timed out
    pub fn timeout() -> Self {
        Self::new(FailureKind::Timeout, "The session creation timed out.")
    }

    /// The caller abandoned the request
    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "The session creation was cancelled.")
    }

    /// Failure reported by the driver through the session status
    ///
    /// Returns `None` when the status carries no error.
    pub fn from_status(status: &WebDriverSessionStatus) -> Option<Self> {
        let code = status.error.as_deref()?;
        Some(Self {
            kind: FailureKind::from_code(code),
            message: status.message.clone().unwrap_or_default(),
            stacktrace: status.stacktrace.clone(),
            data: status.data.clone(),
        })
    }

    /// WebDriver error body: `{"value": {"error", "message", "stacktrace", "data"?}}`
    pub fn to_value(&self) -> Value {
        let mut value = json!({
            "error": self.kind.as_str(),
            "message": self.message,
            "stacktrace": self.stacktrace.clone().unwrap_or_default(),
        });
        if let Some(data) = &self.data {
            value["data"] = Value::String(data.clone());
        }
        json!({ "value": value })
    }
}

impl From<Error> for WebDriverFailure {
    fn from(error: Error) -> Self {
        match error {
            Error::Validation { .. } => Self::invalid_argument(error.to_string()),
            other => Self::new(FailureKind::UnknownError, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_to_kinds_and_back() {
        for code in ["invalid argument", "session not created", "invalid session id", "timeout"] {
            assert_eq!(FailureKind::from_code(code).as_str(), code);
        }
        assert_eq!(
            FailureKind::from_code("no such element"),
            FailureKind::Driver("no such element".to_string())
        );
    }

    #[test]
    fn status_errors_are_copied_verbatim() {
        let status = WebDriverSessionStatus {
            error: Some("error".into()),
            message: Some("message".into()),
            stacktrace: Some("stacktrace".into()),
            data: Some("data".into()),
            ..Default::default()
        };
        let failure = WebDriverFailure::from_status(&status).unwrap();
        assert_eq!(failure.kind.as_str(), "error");
        assert_eq!(failure.message, "message");
        assert_eq!(failure.stacktrace.as_deref(), Some("stacktrace"));
        assert_eq!(failure.data.as_deref(), Some("data"));

        assert!(WebDriverFailure::from_status(&WebDriverSessionStatus::default()).is_none());
    }

    #[test]
    fn wire_body_follows_the_protocol() {
        let body = WebDriverFailure::timeout().to_value();
        assert_eq!(
            body,
            json!({"value": {
                "error": "timeout",
                "message": "The session creation timed out.",
                "stacktrace": ""
            }})
        );

        let session = NewSession {
            session_id: "session-abc".into(),
            capabilities: json!({}),
        };
        assert_eq!(
            serde_json::to_value(session).unwrap(),
            json!({"sessionId": "session-abc", "capabilities": {}})
        );
    }

    #[test]
    fn validation_errors_become_invalid_argument() {
        let failure = WebDriverFailure::from(Error::validation("platformName is required"));
        assert_eq!(failure.kind, FailureKind::InvalidArgument);

        let failure = WebDriverFailure::from(Error::internal("boom"));
        assert_eq!(failure.kind, FailureKind::UnknownError);
    }
}
