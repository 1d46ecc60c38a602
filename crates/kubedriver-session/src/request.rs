//! New-session requests

use kubedriver_common::{requested_platform, Platform};
use serde::Deserialize;
use serde_json::Value;

use crate::response::WebDriverFailure;

/// Body of a WebDriver `POST /session` request
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct NewSessionRequest {
    /// Requested capabilities (`alwaysMatch` / `firstMatch`)
    #[serde(default)]
    pub capabilities: Value,
}

impl NewSessionRequest {
    /// Request for the given capabilities
    pub fn new(capabilities: Value) -> Self {
        Self { capabilities }
    }

    /// Platform the request asks for
    ///
    /// Fails with `invalid argument` when `platformName` is missing, not a
    /// non-empty string, or names an unsupported platform.
    pub fn platform(&self) -> Result<Platform, WebDriverFailure> {
        requested_platform(&self.capabilities).map_err(WebDriverFailure::from)
    }
}
