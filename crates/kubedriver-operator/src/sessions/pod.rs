//! Session pod: runs the WebDriver server for the session's platform

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, ContainerPort, HTTPGetAction, Pod, PodSpec, Probe};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kubedriver_common::crd::WebDriverSession;
use kubedriver_common::{Error, Platform, StatusPatch, DRIVER_BASE_PATH, DRIVER_PORT, SESSION_LABEL};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{accepts_feedback, has_supported_platform, session_platform, COMPONENT_LABEL};
use crate::config::{ChildOperatorBuilder, ChildOperatorConfig};
use crate::driver::{DriverClient, DriverValue};
use crate::feedback::Feedback;
use crate::queue::ReconcileContext;

/// Name of the pod operator
pub const POD_OPERATOR: &str = "kubedriver-pod-operator";

const DRIVER_CONTAINER: &str = "driver";
const DRIVER_PORT_NAME: &str = "webdriver";

/// WebDriver server image per platform
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverImages {
    /// Image for the fake platform
    pub fake: String,
    /// Image for Android sessions
    pub android: String,
    /// Image for iOS sessions
    pub ios: String,
}

impl Default for DriverImages {
    fn default() -> Self {
        Self {
            fake: "ghcr.io/kubedriver/fake-driver:latest".to_string(),
            android: "ghcr.io/kubedriver/android-driver:latest".to_string(),
            ios: "ghcr.io/kubedriver/ios-driver:latest".to_string(),
        }
    }
}

impl DriverImages {
    /// Image serving `platform`
    pub fn image_for(&self, platform: Platform) -> &str {
        match platform {
            Platform::Fake => &self.fake,
            Platform::Android => &self.android,
            Platform::Ios => &self.ios,
        }
    }
}

/// Configuration of the pod operator
pub fn pod_operator_config(
    namespace: &str,
    images: DriverImages,
    driver: Arc<dyn DriverClient>,
) -> Result<ChildOperatorConfig<WebDriverSession, Pod>, Error> {
    ChildOperatorBuilder::new(POD_OPERATOR)
        .namespace(namespace)
        .child_label(COMPONENT_LABEL, "driver")
        .parent_name_label(SESSION_LABEL)
        .filter(has_supported_platform)
        .create_child(move |session: &WebDriverSession, pod: &mut Pod| {
            // Sessions without a platform are filtered out before this runs
            let platform = session_platform(session).unwrap_or(Platform::Fake);
            pod.spec = Some(driver_pod_spec(images.image_for(platform)));
        })
        .with_feedback(PodFeedback::new(driver))
        .build()
}

fn driver_pod_spec(image: &str) -> PodSpec {
    PodSpec {
        containers: vec![Container {
            name: DRIVER_CONTAINER.to_string(),
            image: Some(image.to_string()),
            ports: Some(vec![ContainerPort {
                name: Some(DRIVER_PORT_NAME.to_string()),
                container_port: i32::from(DRIVER_PORT),
                ..Default::default()
            }]),
            readiness_probe: Some(Probe {
                http_get: Some(HTTPGetAction {
                    path: Some(format!("{}/status", DRIVER_BASE_PATH)),
                    port: IntOrString::Int(i32::from(DRIVER_PORT)),
                    ..Default::default()
                }),
                period_seconds: Some(2),
                ..Default::default()
            }),
            ..Default::default()
        }],
        // A session lives exactly as long as its driver process
        restart_policy: Some("Never".to_string()),
        ..Default::default()
    }
}

/// The pod is running and every container reports ready
pub fn pod_is_ready(pod: &Pod) -> bool {
    let Some(status) = &pod.status else {
        return false;
    };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }
    status
        .container_statuses
        .as_ref()
        .is_some_and(|containers| !containers.is_empty() && containers.iter().all(|c| c.ready))
}

/// Requests a driver session once the session pod is ready
pub struct PodFeedback {
    driver: Arc<dyn DriverClient>,
}

impl PodFeedback {
    /// Feedback sending new-session requests through `driver`
    pub fn new(driver: Arc<dyn DriverClient>) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl Feedback<WebDriverSession, Pod> for PodFeedback {
    fn name(&self) -> &str {
        "driver-session"
    }

    async fn feedback(
        &self,
        context: &ReconcileContext<WebDriverSession, Pod>,
    ) -> Result<Option<StatusPatch>, Error> {
        let session = &context.parent;
        if !accepts_feedback(session) {
            return Ok(None);
        }
        if session.status.as_ref().is_some_and(|s| s.session_ready) {
            return Ok(None);
        }
        let Some(pod) = context.child.as_ref().filter(|pod| pod_is_ready(pod)) else {
            return Ok(None);
        };
        let Some(pod_ip) = pod.status.as_ref().and_then(|s| s.pod_ip.as_deref()) else {
            return Ok(None);
        };
        let Some(capabilities) = session.requested_capabilities() else {
            return Ok(None);
        };

        let endpoint = format!("http://{}:{}{}", pod_ip, DRIVER_PORT, DRIVER_BASE_PATH);
        debug!(endpoint = %endpoint, "pod ready, requesting driver session");
        let response = self.driver.new_session(&endpoint, &capabilities).await?;

        let patch = driver_patch(response.value);
        if patch.get("error").is_some() {
            warn!(error = ?patch.get("error"), "driver refused the session");
        } else {
            info!(session_id = ?patch.get("sessionId"), "driver session created");
        }
        Ok(Some(patch))
    }
}

/// Status fields for a driver response; errors are copied verbatim
fn driver_patch(value: DriverValue) -> StatusPatch {
    if let Some(error) = value.error {
        return StatusPatch::new()
            .set("error", error)
            .set_opt("message", value.message)
            .set_opt("stacktrace", value.stacktrace)
            .set_opt("data", value.data.map(data_text));
    }

    let Some(session_id) = value.session_id else {
        return StatusPatch::new()
            .set("error", "session not created")
            .set("message", "driver response carried no session id");
    };

    let capabilities = value
        .capabilities
        .map(|c| c.to_string())
        .unwrap_or_else(|| "{}".to_string());
    StatusPatch::new()
        .set("sessionId", session_id)
        .set("capabilities", capabilities)
        .set("sessionReady", true)
}

fn data_text(data: Value) -> String {
    match data {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
