//! WebDriverSession CRD types
//!
//! A `WebDriverSession` records a caller's intent to run one automated test
//! session. Operators provision a pod, a service and an ingress for it and
//! copy what they observe back onto the session's status.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired state of a WebDriver session
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubedriver.io",
    version = "v1alpha1",
    kind = "WebDriverSession",
    plural = "webdriversessions",
    shortname = "wds",
    namespaced,
    status = "WebDriverSessionStatus",
    printcolumn = r#"{"name":"Session","type":"string","jsonPath":".status.sessionId"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.sessionReady"}"#,
    printcolumn = r#"{"name":"Error","type":"string","jsonPath":".status.error"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WebDriverSessionSpec {
    /// Requested capabilities, serialized as JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<String>,
}

/// Observed state of a WebDriver session
///
/// Every field is written by exactly one feedback function; `error`,
/// `message`, `stacktrace` and `data` are copied verbatim from the driver.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebDriverSessionStatus {
    /// Session id assigned by the driver running in the session pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// The driver accepted the new-session request
    #[serde(default)]
    pub session_ready: bool,

    /// The session service has a cluster IP
    #[serde(default)]
    pub service_ready: bool,

    /// The session ingress is in place
    #[serde(default)]
    pub ingress_ready: bool,

    /// Capabilities returned by the driver, serialized as JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<String>,

    /// WebDriver error code reported by the driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Human-readable error message reported by the driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Stack trace reported by the driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<String>,

    /// Additional error data reported by the driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl WebDriverSessionStatus {
    /// All readiness flags are set and the driver returned capabilities
    pub fn is_ready(&self) -> bool {
        self.ingress_ready && self.service_ready && self.session_ready && self.capabilities.is_some()
    }

    /// The driver reported an error; no further progress will be made
    pub fn is_errored(&self) -> bool {
        self.error.is_some()
    }
}

impl WebDriverSession {
    /// Parsed requested capabilities, or `None` when absent or not valid JSON
    pub fn requested_capabilities(&self) -> Option<serde_json::Value> {
        let raw = self.spec.capabilities.as_deref()?;
        match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(
                    session = %self.name_any(),
                    error = %e,
                    "session capabilities are not valid JSON"
                );
                None
            }
        }
    }

    /// The session failed according to its status
    pub fn is_errored(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.is_errored())
    }

    /// The session reached a terminal status (errored or being deleted)
    pub fn is_terminal(&self) -> bool {
        self.is_errored() || self.metadata.deletion_timestamp.is_some()
    }

    /// The session is fully provisioned and usable
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.is_ready())
    }
}
