//! Client for the WebDriver server running inside a session pod

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use kubedriver_common::retry::{retry_with_backoff_if, RetryConfig};
use kubedriver_common::Error;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Timeout for a single new-session request
///
/// Requests are sent from the operator's only reconciliation consumer, so a
/// hung driver stalls every other session for this long.
pub const NEW_SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for establishing the connection to the driver
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Retry policy for drivers that are not accepting connections yet
pub fn driver_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(250),
        max_delay: Duration::from_secs(1),
        backoff_multiplier: 2.0,
    }
}

/// Body of a `POST /session` request
#[derive(Debug, Serialize)]
struct NewSessionRequest<'a> {
    capabilities: &'a Value,
}

/// Response envelope of the WebDriver protocol
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct DriverResponse {
    /// Payload, either a new session or an error
    #[serde(default)]
    pub value: DriverValue,
}

/// Payload of a new-session response
///
/// A successful response carries `session_id` and `capabilities`; a failed
/// one carries `error` and usually `message` and `stacktrace`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverValue {
    /// Id of the created session
    #[serde(default)]
    pub session_id: Option<String>,
    /// Capabilities the driver matched
    #[serde(default)]
    pub capabilities: Option<Value>,
    /// WebDriver error code
    #[serde(default)]
    pub error: Option<String>,
    /// Human-readable error message
    #[serde(default)]
    pub message: Option<String>,
    /// Driver-side stack trace
    #[serde(default)]
    pub stacktrace: Option<String>,
    /// Additional error data
    #[serde(default)]
    pub data: Option<Value>,
}

/// Sends new-session requests to a WebDriver server
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DriverClient: Send + Sync {
    /// POST `{"capabilities": ...}` to `<endpoint>/session`
    ///
    /// Driver-reported errors are returned as `Ok` responses with `error`
    /// set; `Err` means the driver could not be reached or answered garbage.
    async fn new_session(&self, endpoint: &str, capabilities: &Value) -> Result<DriverResponse, Error>;
}

/// A failed POST and whether it may be sent again
///
/// Only requests that never reached the driver are retried. A request that
/// timed out may already have started a session.
struct PostFailure {
    error: Error,
    retry: bool,
}

impl PostFailure {
    fn fatal(error: Error) -> Self {
        Self { error, retry: false }
    }
}

impl fmt::Display for PostFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

/// [`DriverClient`] over HTTP
pub struct HttpDriverClient {
    http: reqwest::Client,
    retry: RetryConfig,
}

impl HttpDriverClient {
    /// Create a client with the default retry policy and timeout
    pub fn new() -> Result<Self, Error> {
        Self::with_settings(driver_retry(), NEW_SESSION_TIMEOUT)
    }

    /// Create a client with a custom retry policy
    pub fn with_retry(retry: RetryConfig) -> Result<Self, Error> {
        Self::with_settings(retry, NEW_SESSION_TIMEOUT)
    }

    /// Create a client with a custom retry policy and request timeout
    pub fn with_settings(retry: RetryConfig, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, retry })
    }

    async fn post_once(&self, url: &str, capabilities: &Value) -> Result<DriverResponse, PostFailure> {
        let response = self
            .http
            .post(url)
            .json(&NewSessionRequest { capabilities })
            .send()
            .await
            .map_err(|e| PostFailure {
                retry: e.is_connect() && !e.is_timeout(),
                error: Error::driver(url, format!("request failed: {}", e)),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PostFailure::fatal(Error::driver(url, format!("failed to read response: {}", e))))?;

        // WebDriver errors arrive with a 4xx/5xx status and a regular envelope
        match serde_json::from_str::<DriverResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(e) if status.is_success() => Err(PostFailure::fatal(Error::serialization_for_kind(
                "DriverResponse",
                e.to_string(),
            ))),
            Err(_) => Err(PostFailure::fatal(Error::driver(url, format!("{} - {}", status, body)))),
        }
    }
}

#[async_trait]
impl DriverClient for HttpDriverClient {
    async fn new_session(&self, endpoint: &str, capabilities: &Value) -> Result<DriverResponse, Error> {
        let url = format!("{}/session", endpoint.trim_end_matches('/'));
        debug!(url = %url, "requesting new session");
        retry_with_backoff_if(
            &self.retry,
            "new_session",
            |failure: &PostFailure| failure.retry,
            || self.post_once(&url, capabilities),
        )
        .await
        .map_err(|failure| failure.error)
    }
}
