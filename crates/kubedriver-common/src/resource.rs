//! Resource client abstraction
//!
//! The operators and the session watcher are written against
//! [`ResourceClient`], which exposes the handful of primitives they need:
//! list, watch, create, delete, point reads and status patches. The kube-rs
//! implementation lives in [`KubeResourceClient`]; tests substitute mocks.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, PropagationPolicy};
use kube::runtime::watcher;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace};

use crate::status::StatusPatch;
use crate::{Error, FIELD_MANAGER};

/// Server-side watch timeout (seconds); must stay below the client read timeout
/// so idle watches are closed by the API server rather than timing out locally
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Type of a change observed on a watched collection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchEventType {
    /// Object appeared (including objects present when the watch started)
    Added,
    /// Object changed
    Modified,
    /// Object was removed
    Deleted,
    /// Progress marker carrying no change
    Bookmark,
}

/// A single change observed on a watched collection
#[derive(Clone, Debug, PartialEq)]
pub struct WatchEvent<K> {
    /// What happened to the object
    pub event_type: WatchEventType,
    /// The object as of this event
    pub object: K,
}

impl<K> WatchEvent<K> {
    /// Create an event
    pub fn new(event_type: WatchEventType, object: K) -> Self {
        Self { event_type, object }
    }

    /// Shorthand for an `Added` event
    pub fn added(object: K) -> Self {
        Self::new(WatchEventType::Added, object)
    }

    /// Shorthand for a `Modified` event
    pub fn modified(object: K) -> Self {
        Self::new(WatchEventType::Modified, object)
    }

    /// Shorthand for a `Deleted` event
    pub fn deleted(object: K) -> Self {
        Self::new(WatchEventType::Deleted, object)
    }
}

/// Stream of watch events; ends with an error if the watch breaks
pub type WatchStream<K> = BoxStream<'static, Result<WatchEvent<K>, Error>>;

/// Field and label selectors scoping a list or watch
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    /// Field selector (e.g. `metadata.name=session-abc`)
    pub fields: Option<String>,
    /// Label selector (e.g. `app.kubernetes.io/managed-by=kubedriver`)
    pub labels: Option<String>,
}

impl Selector {
    /// Selector matching everything
    pub fn all() -> Self {
        Self::default()
    }

    /// Selector matching objects carrying the given labels
    pub fn labels(labels: impl Into<String>) -> Self {
        Self {
            fields: None,
            labels: Some(labels.into()),
        }
    }

    /// Selector matching a single object by name
    pub fn name(name: &str) -> Self {
        Self {
            fields: Some(format!("metadata.name={}", name)),
            labels: None,
        }
    }

    /// Add a label selector, keeping any field selector
    pub fn with_labels(mut self, labels: Option<String>) -> Self {
        self.labels = labels;
        self
    }

    fn list_params(&self) -> ListParams {
        let mut params = ListParams::default();
        if let Some(fields) = &self.fields {
            params = params.fields(fields);
        }
        if let Some(labels) = &self.labels {
            params = params.labels(labels);
        }
        params
    }

    fn watcher_config(&self) -> watcher::Config {
        let mut config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
        if let Some(fields) = &self.fields {
            config = config.fields(fields);
        }
        if let Some(labels) = &self.labels {
            config = config.labels(labels);
        }
        config
    }
}

/// Cluster primitives the operators and session watcher are built on
#[async_trait]
pub trait ResourceClient<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    /// List objects in a namespace matching the selector
    async fn list(&self, namespace: &str, selector: &Selector) -> Result<Vec<K>, Error>;

    /// Watch objects in a namespace matching the selector
    ///
    /// The stream starts with an `Added` event for every object that already
    /// matches. It ends with an error when the watch cannot be continued.
    fn watch(&self, namespace: &str, selector: &Selector) -> WatchStream<K>;

    /// Create an object; the server assigns the name when only `generateName` is set
    ///
    /// Returns [`Error::AlreadyExists`] when an object with the same name exists.
    async fn create(&self, object: &K) -> Result<K, Error>;

    /// Delete an object; deleting an object that is already gone succeeds
    async fn delete(&self, object: &K, grace_period: Option<Duration>) -> Result<(), Error>;

    /// Read an object by name, or `None` when it does not exist
    async fn try_read(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>;

    /// Apply a status patch and return the object as stored after the patch
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &StatusPatch,
    ) -> Result<K, Error>;
}

/// Drive a watch, handing every event to `on_event` until it breaks
///
/// Returns `Ok(())` when `on_event` returns [`ControlFlow::Break`] or the
/// stream ends, and the watch error otherwise. Cancellation is dropping the
/// returned future.
pub async fn watch_until<K, C, F>(
    client: &C,
    namespace: &str,
    selector: &Selector,
    mut on_event: F,
) -> Result<(), Error>
where
    K: Send + Sync + 'static,
    C: ResourceClient<K> + ?Sized,
    F: FnMut(WatchEventType, K) -> ControlFlow<()>,
{
    let mut events = client.watch(namespace, selector);
    while let Some(event) = events.next().await {
        let event = event?;
        trace!(event = ?event.event_type, "watch event");
        if on_event(event.event_type, event.object).is_break() {
            return Ok(());
        }
    }
    Ok(())
}

/// [`ResourceClient`] backed by the Kubernetes API
pub struct KubeResourceClient<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeResourceClient<K> {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K> Clone for KubeResourceClient<K> {
    fn clone(&self) -> Self {
        Self::new(self.client.clone())
    }
}

impl<K> KubeResourceClient<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn kind() -> String {
        K::kind(&()).to_string()
    }
}

#[async_trait]
impl<K> ResourceClient<K> for KubeResourceClient<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn list(&self, namespace: &str, selector: &Selector) -> Result<Vec<K>, Error> {
        let list = self.api(namespace).list(&selector.list_params()).await?;
        Ok(list.items)
    }

    fn watch(&self, namespace: &str, selector: &Selector) -> WatchStream<K> {
        let kind = Self::kind();
        watcher::watcher(self.api(namespace), selector.watcher_config())
            .filter_map(move |event| {
                let mapped = match event {
                    Ok(watcher::Event::InitApply(obj)) => Some(Ok(WatchEvent::added(obj))),
                    Ok(watcher::Event::Apply(obj)) => Some(Ok(WatchEvent::modified(obj))),
                    Ok(watcher::Event::Delete(obj)) => Some(Ok(WatchEvent::deleted(obj))),
                    Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => None,
                    Err(e) => Some(Err(Error::watch(kind.clone(), e.to_string()))),
                };
                futures::future::ready(mapped)
            })
            .boxed()
    }

    async fn create(&self, object: &K) -> Result<K, Error> {
        let namespace = object
            .namespace()
            .ok_or_else(|| Error::validation_for_field("metadata.namespace", "namespace is required"))?;
        let name = object
            .meta()
            .name
            .clone()
            .or_else(|| object.meta().generate_name.clone())
            .unwrap_or_default();

        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        match self.api(&namespace).create(&params, object).await {
            Ok(created) => Ok(created),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                Err(Error::already_exists(Self::kind(), name))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, object: &K, grace_period: Option<Duration>) -> Result<(), Error> {
        let namespace = object
            .namespace()
            .ok_or_else(|| Error::validation_for_field("metadata.namespace", "namespace is required"))?;
        let name = object.name_any();
        let params = DeleteParams {
            grace_period_seconds: grace_period.map(grace_period_seconds),
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        match self.api(&namespace).delete(&name, &params).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(kind = %Self::kind(), name = %name, "object already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn try_read(&self, namespace: &str, name: &str) -> Result<Option<K>, Error> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &StatusPatch,
    ) -> Result<K, Error> {
        let merge = patch.to_merge_patch();
        Ok(self
            .api(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&merge))
            .await?)
    }
}

/// Grace period in whole seconds, saturating at the API's `u32` range
fn grace_period_seconds(grace_period: Duration) -> u32 {
    u32::try_from(grace_period.as_secs()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn grace_periods_saturate_instead_of_wrapping() {
        assert_eq!(grace_period_seconds(Duration::from_millis(30_500)), 30);
        assert_eq!(grace_period_seconds(Duration::from_secs(u64::from(u32::MAX) + 1)), u32::MAX);
    }

    /// Minimal client whose watch replays a fixed script of events
    struct ScriptedWatch {
        events: std::sync::Mutex<Option<Vec<Result<WatchEvent<String>, Error>>>>,
    }

    impl ScriptedWatch {
        fn new(events: Vec<Result<WatchEvent<String>, Error>>) -> Self {
            Self {
                events: std::sync::Mutex::new(Some(events)),
            }
        }
    }

    #[async_trait]
    impl ResourceClient<String> for ScriptedWatch {
        async fn list(&self, _: &str, _: &Selector) -> Result<Vec<String>, Error> {
            Ok(vec![])
        }

        fn watch(&self, _: &str, _: &Selector) -> WatchStream<String> {
            let events = self
                .events
                .lock()
                .expect("mutex should not be poisoned")
                .take()
                .unwrap_or_default();
            stream::iter(events).boxed()
        }

        async fn create(&self, object: &String) -> Result<String, Error> {
            Ok(object.clone())
        }

        async fn delete(&self, _: &String, _: Option<Duration>) -> Result<(), Error> {
            Ok(())
        }

        async fn try_read(&self, _: &str, _: &str) -> Result<Option<String>, Error> {
            Ok(None)
        }

        async fn patch_status(&self, _: &str, name: &str, _: &StatusPatch) -> Result<String, Error> {
            Ok(name.to_string())
        }
    }

    #[tokio::test]
    async fn watch_until_stops_when_callback_breaks() {
        let client = ScriptedWatch::new(vec![
            Ok(WatchEvent::added("a".to_string())),
            Ok(WatchEvent::modified("b".to_string())),
            Ok(WatchEvent::modified("c".to_string())),
        ]);

        let mut seen = Vec::new();
        watch_until(&client, "default", &Selector::all(), |event_type, obj| {
            seen.push((event_type, obj.clone()));
            if obj == "b" {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .await
        .expect("watch should succeed");

        assert_eq!(
            seen,
            vec![
                (WatchEventType::Added, "a".to_string()),
                (WatchEventType::Modified, "b".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn watch_until_surfaces_watch_errors() {
        let client = ScriptedWatch::new(vec![
            Ok(WatchEvent::added("a".to_string())),
            Err(Error::watch("String", "stream reset")),
            Ok(WatchEvent::modified("never seen".to_string())),
        ]);

        let mut count = 0;
        let result = watch_until(&client, "default", &Selector::all(), |_, _| {
            count += 1;
            ControlFlow::Continue(())
        })
        .await;

        assert!(matches!(result, Err(Error::Watch { .. })));
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn watch_until_returns_when_stream_ends() {
        let client = ScriptedWatch::new(vec![Ok(WatchEvent::deleted("a".to_string()))]);
        let result = watch_until(&client, "default", &Selector::all(), |_, _| {
            ControlFlow::Continue(())
        })
        .await;
        assert!(result.is_ok());
    }

    #[test]
    fn name_selector_scopes_by_metadata_name() {
        let selector = Selector::name("session-abc");
        assert_eq!(selector.fields.as_deref(), Some("metadata.name=session-abc"));
        assert!(selector.labels.is_none());

        let selector = selector.with_labels(Some("app=x".to_string()));
        assert_eq!(selector.labels.as_deref(), Some("app=x"));
    }
}
