//! Session service: stable in-cluster address for the session pod

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kubedriver_common::crd::WebDriverSession;
use kubedriver_common::{Error, StatusPatch, DRIVER_PORT, SESSION_LABEL};

use super::{accepts_feedback, has_supported_platform, COMPONENT_LABEL};
use crate::config::{ChildOperatorBuilder, ChildOperatorConfig};
use crate::feedback::Feedback;
use crate::queue::ReconcileContext;

/// Name of the service operator
pub const SERVICE_OPERATOR: &str = "kubedriver-service-operator";

/// Configuration of the service operator
pub fn service_operator_config(
    namespace: &str,
) -> Result<ChildOperatorConfig<WebDriverSession, Service>, Error> {
    ChildOperatorBuilder::new(SERVICE_OPERATOR)
        .namespace(namespace)
        .child_label(COMPONENT_LABEL, "service")
        .parent_name_label(SESSION_LABEL)
        .filter(has_supported_platform)
        .create_child(|session: &WebDriverSession, service: &mut Service| {
            service.spec = Some(session_service_spec(&session.name_any()));
        })
        .with_feedback(ServiceFeedback)
        .build()
}

fn session_service_spec(session: &str) -> ServiceSpec {
    ServiceSpec {
        type_: Some("ClusterIP".to_string()),
        selector: Some(BTreeMap::from([(
            SESSION_LABEL.to_string(),
            session.to_string(),
        )])),
        ports: Some(vec![ServicePort {
            name: Some("webdriver".to_string()),
            port: i32::from(DRIVER_PORT),
            target_port: Some(IntOrString::Int(i32::from(DRIVER_PORT))),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Marks the session's service ready once it has a cluster IP
pub struct ServiceFeedback;

#[async_trait]
impl Feedback<WebDriverSession, Service> for ServiceFeedback {
    fn name(&self) -> &str {
        "service-ready"
    }

    async fn feedback(
        &self,
        context: &ReconcileContext<WebDriverSession, Service>,
    ) -> Result<Option<StatusPatch>, Error> {
        if !accepts_feedback(&context.parent) {
            return Ok(None);
        }
        if context.parent.status.as_ref().is_some_and(|s| s.service_ready) {
            return Ok(None);
        }
        let has_cluster_ip = context
            .child
            .as_ref()
            .and_then(|service| service.spec.as_ref())
            .and_then(|spec| spec.cluster_ip.as_deref())
            .is_some_and(|ip| !ip.is_empty() && ip != "None");
        if !has_cluster_ip {
            return Ok(None);
        }
        Ok(Some(StatusPatch::new().set("serviceReady", true)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{owned_meta, session};
    use kubedriver_common::crd::WebDriverSessionStatus;
    use serde_json::json;

    fn service_for(parent: &WebDriverSession, cluster_ip: Option<&str>) -> Service {
        let mut spec = session_service_spec(&parent.name_any());
        spec.cluster_ip = cluster_ip.map(str::to_string);
        Service {
            metadata: owned_meta(parent, SERVICE_OPERATOR),
            spec: Some(spec),
            ..Default::default()
        }
    }

    #[test]
    fn service_selects_the_session_pod() {
        let spec = session_service_spec("session-abc");
        assert_eq!(spec.selector.unwrap()[SESSION_LABEL], "session-abc");
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 4774);
        assert_eq!(port.target_port, Some(IntOrString::Int(4774)));
    }

    #[tokio::test]
    async fn cluster_ip_marks_the_service_ready() {
        let parent = session("session-abc", "uid-abc");

        let pending = ReconcileContext::with_child(parent.clone(), Some(service_for(&parent, None)));
        assert!(ServiceFeedback.feedback(&pending).await.unwrap().is_none());

        let assigned = ReconcileContext::with_child(
            parent.clone(),
            Some(service_for(&parent, Some("10.96.0.12"))),
        );
        let patch = ServiceFeedback.feedback(&assigned).await.unwrap().unwrap();
        assert_eq!(patch.get("serviceReady"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn ready_or_failed_sessions_are_not_patched_again() {
        let mut parent = session("session-abc", "uid-abc");
        parent.status = Some(WebDriverSessionStatus {
            service_ready: true,
            ..Default::default()
        });
        let service = service_for(&parent, Some("10.96.0.12"));
        let context = ReconcileContext::with_child(parent.clone(), Some(service.clone()));
        assert!(ServiceFeedback.feedback(&context).await.unwrap().is_none());

        parent.status = Some(WebDriverSessionStatus {
            error: Some("error".into()),
            ..Default::default()
        });
        let context = ReconcileContext::with_child(parent, Some(service));
        assert!(ServiceFeedback.feedback(&context).await.unwrap().is_none());
    }
}
