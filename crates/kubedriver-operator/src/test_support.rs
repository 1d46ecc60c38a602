//! Mocks and fixtures shared by the operator tests

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use kubedriver_common::crd::{WebDriverSession, WebDriverSessionSpec};
use kubedriver_common::{Error, ResourceClient, Selector, StatusPatch, WatchStream, MANAGED_BY_LABEL};
use mockall::mock;

macro_rules! resource_client_mock {
    ($name:ident, $kind:ident) => {
        mock! {
            pub $name {}

            #[async_trait]
            impl ResourceClient<$kind> for $name {
                async fn list(&self, namespace: &str, selector: &Selector) -> Result<Vec<$kind>, Error>;
                fn watch(&self, namespace: &str, selector: &Selector) -> WatchStream<$kind>;
                async fn create(&self, object: &$kind) -> Result<$kind, Error>;
                async fn delete(&self, object: &$kind, grace_period: Option<Duration>) -> Result<(), Error>;
                async fn try_read(&self, namespace: &str, name: &str) -> Result<Option<$kind>, Error>;
                async fn patch_status(
                    &self,
                    namespace: &str,
                    name: &str,
                    patch: &StatusPatch,
                ) -> Result<$kind, Error>;
            }
        }
    };
}

resource_client_mock!(Sessions, WebDriverSession);
resource_client_mock!(Pods, Pod);
resource_client_mock!(Services, Service);
resource_client_mock!(Ingresses, Ingress);

/// Session in the default namespace with the given name and uid
pub fn session(name: &str, uid: &str) -> WebDriverSession {
    let mut session = WebDriverSession::new(
        name,
        WebDriverSessionSpec {
            capabilities: Some(r#"{"alwaysMatch":{"platformName":"fake"}}"#.to_string()),
        },
    );
    session.metadata.namespace = Some("default".to_string());
    session.metadata.uid = Some(uid.to_string());
    session
}

/// Pod created by `operator` for `parent`
pub fn pod_owned_by(parent: &WebDriverSession, operator: &str) -> Pod {
    Pod {
        metadata: owned_meta(parent, operator),
        ..Default::default()
    }
}

/// Metadata of a child created by `operator` for `parent`
pub fn owned_meta(parent: &WebDriverSession, operator: &str) -> ObjectMeta {
    ObjectMeta {
        name: parent.metadata.name.clone(),
        namespace: parent.metadata.namespace.clone(),
        labels: Some([(MANAGED_BY_LABEL.to_string(), operator.to_string())].into()),
        owner_references: parent.controller_owner_ref(&()).map(|owner| vec![owner]),
        ..Default::default()
    }
}

/// Answer `try_read` on `sessions` from a fixed set of stored sessions
pub fn serve_reads(sessions: &mut MockSessions, stored: Vec<WebDriverSession>) {
    sessions.expect_try_read().returning(move |_, name| {
        Ok(stored
            .iter()
            .find(|s| s.metadata.name.as_deref() == Some(name))
            .cloned())
    });
}
