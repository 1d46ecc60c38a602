//! Operators provisioning the pod, service and ingress behind each session
//!
//! All three use [`WebDriverSession`] as their parent and name each child
//! after the session. Every child also carries the session name under
//! [`SESSION_LABEL`], which is how the service finds the session's pod.

mod ingress;
mod pod;
mod service;

pub use ingress::{ingress_operator_config, IngressFeedback, INGRESS_OPERATOR};
pub use pod::{pod_is_ready, pod_operator_config, DriverImages, PodFeedback, POD_OPERATOR};
pub use service::{service_operator_config, ServiceFeedback, SERVICE_OPERATOR};

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::Client;
use kubedriver_common::crd::WebDriverSession;
use kubedriver_common::{requested_platform, Error, KubeResourceClient, Platform};
use tokio_util::sync::CancellationToken;

use crate::driver::DriverClient;
use crate::operator::ChildOperator;

/// Label naming the role of a session child
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";

/// Settings shared by the session operators
#[derive(Clone, Debug)]
pub struct SessionOperatorSettings {
    /// Namespace sessions and their children live in
    pub namespace: String,
    /// Driver image per platform
    pub images: DriverImages,
}

/// Platform requested by a session, if its capabilities are usable
pub fn session_platform(session: &WebDriverSession) -> Option<Platform> {
    let capabilities = session.requested_capabilities()?;
    requested_platform(&capabilities).ok()
}

/// Parent filter shared by the session operators
///
/// Sessions without a supported platform never get children; the session
/// API rejects them up front, so these only come from hand-written objects.
pub fn has_supported_platform(session: &WebDriverSession) -> bool {
    session_platform(session).is_some()
}

/// Feedback applies only to sessions with usable capabilities that are not terminal yet
pub(crate) fn accepts_feedback(session: &WebDriverSession) -> bool {
    session.requested_capabilities().is_some() && !session.is_terminal()
}

/// The three operators backing every session
pub struct SessionOperators {
    /// Runs the WebDriver server
    pub pod: ChildOperator<WebDriverSession, Pod>,
    /// Gives the pod a stable address
    pub service: ChildOperator<WebDriverSession, Service>,
    /// Routes the session's URL prefix to the service
    pub ingress: ChildOperator<WebDriverSession, Ingress>,
}

impl SessionOperators {
    /// Wire the operators against a Kubernetes client
    pub fn new(
        client: Client,
        settings: &SessionOperatorSettings,
        driver: Arc<dyn DriverClient>,
    ) -> Result<Self, Error> {
        let sessions = Arc::new(KubeResourceClient::<WebDriverSession>::new(client.clone()));

        Ok(Self {
            pod: ChildOperator::new(
                pod_operator_config(&settings.namespace, settings.images.clone(), driver)?,
                sessions.clone(),
                Arc::new(KubeResourceClient::<Pod>::new(client.clone())),
            ),
            service: ChildOperator::new(
                service_operator_config(&settings.namespace)?,
                sessions.clone(),
                Arc::new(KubeResourceClient::<Service>::new(client.clone())),
            ),
            ingress: ChildOperator::new(
                ingress_operator_config(&settings.namespace)?,
                sessions,
                Arc::new(KubeResourceClient::<Ingress>::new(client)),
            ),
        })
    }

    /// Run all three until shutdown or until one of them stops
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), Error> {
        tokio::select! {
            result = self.pod.run(shutdown.clone()) => result,
            result = self.service.run(shutdown.clone()) => result,
            result = self.ingress.run(shutdown.clone()) => result,
        }
    }
}
