//! Session ingress: exposes `/wd/hub/session/<name>/` outside the cluster

use async_trait::async_trait;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use kube::ResourceExt;
use kubedriver_common::crd::WebDriverSession;
use kubedriver_common::{Error, StatusPatch, DRIVER_BASE_PATH, DRIVER_PORT, SESSION_LABEL};

use super::{accepts_feedback, has_supported_platform, COMPONENT_LABEL};
use crate::config::{ChildOperatorBuilder, ChildOperatorConfig};
use crate::feedback::Feedback;
use crate::queue::ReconcileContext;

/// Name of the ingress operator
pub const INGRESS_OPERATOR: &str = "kubedriver-ingress-operator";

/// Configuration of the ingress operator
pub fn ingress_operator_config(
    namespace: &str,
) -> Result<ChildOperatorConfig<WebDriverSession, Ingress>, Error> {
    ChildOperatorBuilder::new(INGRESS_OPERATOR)
        .namespace(namespace)
        .child_label(COMPONENT_LABEL, "ingress")
        .parent_name_label(SESSION_LABEL)
        .filter(has_supported_platform)
        .create_child(|session: &WebDriverSession, ingress: &mut Ingress| {
            ingress.spec = Some(session_ingress_spec(&session.name_any()));
        })
        .with_feedback(IngressFeedback)
        .build()
}

/// URL prefix routed to a session's driver
pub fn session_path(session: &str) -> String {
    format!("{}/session/{}/", DRIVER_BASE_PATH, session)
}

fn session_ingress_spec(session: &str) -> IngressSpec {
    IngressSpec {
        rules: Some(vec![IngressRule {
            http: Some(HTTPIngressRuleValue {
                paths: vec![HTTPIngressPath {
                    path: Some(session_path(session)),
                    path_type: "Prefix".to_string(),
                    backend: IngressBackend {
                        // The service carries the session's name
                        service: Some(IngressServiceBackend {
                            name: session.to_string(),
                            port: Some(ServiceBackendPort {
                                number: Some(i32::from(DRIVER_PORT)),
                                ..Default::default()
                            }),
                        }),
                        ..Default::default()
                    },
                }],
            }),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Marks the session's ingress ready once the ingress exists
pub struct IngressFeedback;

#[async_trait]
impl Feedback<WebDriverSession, Ingress> for IngressFeedback {
    fn name(&self) -> &str {
        "ingress-ready"
    }

    async fn feedback(
        &self,
        context: &ReconcileContext<WebDriverSession, Ingress>,
    ) -> Result<Option<StatusPatch>, Error> {
        if !accepts_feedback(&context.parent) || context.child.is_none() {
            return Ok(None);
        }
        if context.parent.status.as_ref().is_some_and(|s| s.ingress_ready) {
            return Ok(None);
        }
        Ok(Some(StatusPatch::new().set("ingressReady", true)))
    }
}
