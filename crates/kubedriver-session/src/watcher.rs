//! Synchronous session creation over asynchronous operators
//!
//! [`SessionWatcher::create_session`] records the request as a
//! `WebDriverSession` and then waits on a watch of that one object until it
//! becomes ready, fails, disappears, or the timeout fires. Sessions that end
//! in anything but ready are deleted so their pod, service and ingress are
//! garbage-collected.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use kube::{Client, ResourceExt};
use kubedriver_common::crd::{WebDriverSession, WebDriverSessionSpec};
use kubedriver_common::{
    watch_until, KubeResourceClient, ResourceClient, Selector, WatchEventType, KUBEDRIVER_MANAGER, MANAGED_BY_LABEL,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::request::NewSessionRequest;
use crate::response::{NewSession, WebDriverFailure};

/// How long a session may take to become ready
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(120);

/// Name prefix of sessions created through the watcher
pub const SESSION_NAME_PREFIX: &str = "session-";

/// Where a session creation stands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Still being provisioned
    Pending,
    /// Pod, service and ingress are up and the driver accepted the session
    Ready,
    /// The driver reported an error
    Errored,
    /// The session was deleted before it became ready
    Deleted,
    /// The session did not become ready in time
    TimedOut,
}

impl SessionState {
    /// State after observing `session` through a watch event
    pub fn on_event(event_type: WatchEventType, session: &WebDriverSession) -> Self {
        if event_type == WatchEventType::Deleted {
            Self::Deleted
        } else if session.is_errored() {
            Self::Errored
        } else if session.is_ready() {
            Self::Ready
        } else {
            Self::Pending
        }
    }

    /// No further events are processed once a terminal state is reached
    pub fn is_terminal(self) -> bool {
        self != Self::Pending
    }
}

/// Creates sessions and waits for them to become usable
pub struct SessionWatcher {
    sessions: Arc<dyn ResourceClient<WebDriverSession>>,
    namespace: String,
    timeout: Duration,
}

impl SessionWatcher {
    /// Watcher creating sessions in `namespace` with the default timeout
    pub fn new(sessions: Arc<dyn ResourceClient<WebDriverSession>>, namespace: impl Into<String>) -> Self {
        Self {
            sessions,
            namespace: namespace.into(),
            timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }

    /// Watcher backed by the Kubernetes API
    pub fn from_client(client: Client, namespace: impl Into<String>) -> Self {
        Self::new(Arc::new(KubeResourceClient::<WebDriverSession>::new(client)), namespace)
    }

    /// Override the creation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Namespace sessions are created in
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Create a session and wait until it is ready
    ///
    /// Invalid requests fail before anything is created. Cancelling `cancel`
    /// abandons the wait and leaves the session in place.
    #[instrument(skip(self, request, cancel), fields(namespace = %self.namespace))]
    pub async fn create_session(
        &self,
        request: &NewSessionRequest,
        cancel: &CancellationToken,
    ) -> Result<NewSession, WebDriverFailure> {
        let platform = request.platform()?;
        if cancel.is_cancelled() {
            return Err(WebDriverFailure::cancelled());
        }

        let created = self.sessions.create(&self.draft(request)).await?;
        let name = created.name_any();
        info!(session = %name, %platform, "session requested");

        let selector = Selector::name(&name);
        let wait = async {
            let mut state = SessionState::Pending;
            let mut last = None;
            let result = watch_until(
                self.sessions.as_ref(),
                &self.namespace,
                &selector,
                |event_type, session| {
                    state = SessionState::on_event(event_type, &session);
                    debug!(session = %name, event = ?event_type, ?state, "session event");
                    last = Some(session);
                    if state.is_terminal() {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                },
            )
            .await;
            if let Err(e) = result {
                warn!(session = %name, error = %e, "session watch failed");
            }
            (state, last)
        };

        let (state, last) = tokio::select! {
            _ = cancel.cancelled() => {
                info!(session = %name, "session creation cancelled");
                return Err(WebDriverFailure::cancelled());
            }
            _ = tokio::time::sleep(self.timeout) => (SessionState::TimedOut, None),
            outcome = wait => outcome,
        };

        match (state, last) {
            (SessionState::Ready, Some(session)) => {
                info!(session = %name, "session ready");
                Ok(NewSession {
                    session_id: name,
                    capabilities: ready_capabilities(&session),
                })
            }
            (state, last) => Err(self.abandon(&name, state, last).await),
        }
    }

    fn draft(&self, request: &NewSessionRequest) -> WebDriverSession {
        let mut session = WebDriverSession::new(
            "",
            WebDriverSessionSpec {
                capabilities: Some(request.capabilities.to_string()),
            },
        );
        session.metadata.name = None;
        session.metadata.generate_name = Some(SESSION_NAME_PREFIX.to_string());
        session.metadata.namespace = Some(self.namespace.clone());
        session.metadata.labels = Some(
            [(MANAGED_BY_LABEL.to_string(), KUBEDRIVER_MANAGER.to_string())].into(),
        );
        session
    }

    /// Build the failure for a session that will not become ready, deleting it if it still exists
    async fn abandon(
        &self,
        name: &str,
        state: SessionState,
        last: Option<WebDriverSession>,
    ) -> WebDriverFailure {
        // The terminating event may not carry the full status
        let current = match self.sessions.try_read(&self.namespace, name).await {
            Ok(current) => current,
            Err(e) => {
                warn!(session = %name, error = %e, "failed to read session");
                None
            }
        };

        if let Some(session) = &current {
            match self.sessions.delete(session, None).await {
                Ok(()) => debug!(session = %name, "deleted session"),
                Err(e) => warn!(session = %name, error = %e, "failed to delete session"),
            }
        }

        let failure = match state {
            SessionState::TimedOut => WebDriverFailure::timeout(),
            SessionState::Errored => current
                .or(last)
                .and_then(|s| s.status)
                .and_then(|status| WebDriverFailure::from_status(&status))
                .unwrap_or_else(|| WebDriverFailure::session_not_created("The session failed.")),
            SessionState::Deleted => WebDriverFailure::session_not_created(
                "The session was deleted before it became ready.",
            ),
            SessionState::Pending | SessionState::Ready => WebDriverFailure::session_not_created(
                "The session watch ended before the session became ready.",
            ),
        };
        info!(session = %name, ?state, kind = %failure.kind, "session not created");
        failure
    }

    /// Delete the session named `session_id`
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn delete_session(&self, session_id: &str) -> Result<(), WebDriverFailure> {
        let Some(session) = self.sessions.try_read(&self.namespace, session_id).await? else {
            return Err(WebDriverFailure::invalid_session_id(session_id));
        };
        self.sessions.delete(&session, None).await?;
        info!(session = %session_id, "session deleted");
        Ok(())
    }
}

fn ready_capabilities(session: &WebDriverSession) -> Value {
    let raw = session
        .status
        .as_ref()
        .and_then(|s| s.capabilities.as_deref())
        .unwrap_or("{}");
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(session = %session.name_any(), error = %e, "driver capabilities are not valid JSON");
        Value::Object(Default::default())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::FailureKind;
    use futures::stream::{self, StreamExt};
    use kubedriver_common::crd::WebDriverSessionStatus;
    use kubedriver_common::{Error, StatusPatch, WatchEvent, WatchStream};
    use mockall::mock;
    use serde_json::json;

    mock! {
        pub Sessions {}

        #[async_trait::async_trait]
        impl ResourceClient<WebDriverSession> for Sessions {
            async fn list(&self, namespace: &str, selector: &Selector) -> Result<Vec<WebDriverSession>, Error>;
            fn watch(&self, namespace: &str, selector: &Selector) -> WatchStream<WebDriverSession>;
            async fn create(&self, object: &WebDriverSession) -> Result<WebDriverSession, Error>;
            async fn delete(&self, object: &WebDriverSession, grace_period: Option<Duration>) -> Result<(), Error>;
            async fn try_read(&self, namespace: &str, name: &str) -> Result<Option<WebDriverSession>, Error>;
            async fn patch_status(
                &self,
                namespace: &str,
                name: &str,
                patch: &StatusPatch,
            ) -> Result<WebDriverSession, Error>;
        }
    }

    const NAME: &str = "session-x7k2p";

    fn request() -> NewSessionRequest {
        NewSessionRequest::new(json!({"alwaysMatch": {"platformName": "fake"}}))
    }

    fn observed(status: Option<WebDriverSessionStatus>) -> WebDriverSession {
        let mut session = WebDriverSession::new(NAME, WebDriverSessionSpec::default());
        session.metadata.namespace = Some("default".to_string());
        session.status = status;
        session
    }

    fn status(ingress: bool, service: bool, session: bool, capabilities: Option<&str>) -> Option<WebDriverSessionStatus> {
        Some(WebDriverSessionStatus {
            ingress_ready: ingress,
            service_ready: service,
            session_ready: session,
            capabilities: capabilities.map(str::to_string),
            ..Default::default()
        })
    }

    /// Mock that names created sessions and replays `events` on the watch
    fn sessions_with_events(events: Vec<WatchEvent<WebDriverSession>>) -> MockSessions {
        let mut sessions = MockSessions::new();
        sessions.expect_create().times(1).returning(|draft| {
            let mut created = draft.clone();
            created.metadata.name = Some(NAME.to_string());
            Ok(created)
        });
        sessions
            .expect_watch()
            .withf(|namespace, selector| {
                namespace == "default"
                    && selector.fields.as_deref() == Some("metadata.name=session-x7k2p")
            })
            .times(1)
            .returning(move |_, _| {
                stream::iter(events.clone().into_iter().map(Ok))
                    .chain(stream::pending())
                    .boxed()
            });
        sessions
    }

    fn watcher(sessions: MockSessions) -> SessionWatcher {
        SessionWatcher::new(Arc::new(sessions), "default")
    }

    mod create_session {
        use super::*;

        #[tokio::test]
        async fn session_becomes_ready_once_every_flag_is_set() {
            let mut sessions = sessions_with_events(vec![
                WatchEvent::added(observed(None)),
                WatchEvent::modified(observed(status(false, false, false, None))),
                WatchEvent::modified(observed(status(true, false, false, None))),
                WatchEvent::modified(observed(status(true, false, true, Some("{}")))),
                WatchEvent::modified(observed(status(true, true, true, Some("{}")))),
            ]);
            sessions.expect_try_read().never();
            sessions.expect_delete().never();

            let session = watcher(sessions)
                .create_session(&request(), &CancellationToken::new())
                .await
                .expect("session should become ready");

            assert_eq!(session.session_id, NAME);
            assert_eq!(session.capabilities, json!({}));
        }

        #[tokio::test]
        async fn created_session_records_the_request() {
            let mut sessions = MockSessions::new();
            sessions
                .expect_create()
                .withf(|draft| {
                    draft.metadata.name.is_none()
                        && draft.metadata.generate_name.as_deref() == Some("session-")
                        && draft.metadata.namespace.as_deref() == Some("default")
                        && draft.labels().get(MANAGED_BY_LABEL).map(String::as_str) == Some("kubedriver")
                        && draft.requested_capabilities()
                            == Some(json!({"alwaysMatch": {"platformName": "fake"}}))
                })
                .times(1)
                .returning(|_| Err(Error::internal("api server unavailable")));

            let failure = watcher(sessions)
                .create_session(&request(), &CancellationToken::new())
                .await
                .unwrap_err();
            assert_eq!(failure.kind, FailureKind::UnknownError);
        }

        #[tokio::test]
        async fn driver_errors_are_reported_verbatim_and_the_session_removed() {
            let errored = observed(Some(WebDriverSessionStatus {
                error: Some("error".into()),
                message: Some("message".into()),
                stacktrace: Some("stacktrace".into()),
                data: Some("data".into()),
                ..Default::default()
            }));
            let mut sessions = sessions_with_events(vec![WatchEvent::modified(errored.clone())]);
            sessions
                .expect_try_read()
                .withf(|namespace, name| namespace == "default" && name == NAME)
                .times(1)
                .returning(move |_, _| Ok(Some(errored.clone())));
            sessions
                .expect_delete()
                .withf(|session, _| session.name_any() == NAME)
                .times(1)
                .returning(|_, _| Ok(()));

            let failure = watcher(sessions)
                .create_session(&request(), &CancellationToken::new())
                .await
                .unwrap_err();

            assert_eq!(failure.kind, FailureKind::Driver("error".into()));
            assert_eq!(failure.message, "message");
            assert_eq!(failure.stacktrace.as_deref(), Some("stacktrace"));
            assert_eq!(failure.data.as_deref(), Some("data"));
        }

        #[tokio::test(start_paused = true)]
        async fn silent_sessions_time_out_and_are_removed() {
            let mut sessions = sessions_with_events(vec![]);
            sessions
                .expect_try_read()
                .times(1)
                .returning(|_, _| Ok(Some(observed(None))));
            sessions.expect_delete().times(1).returning(|_, _| Ok(()));

            let failure = watcher(sessions)
                .create_session(&request(), &CancellationToken::new())
                .await
                .unwrap_err();

            assert_eq!(failure.kind, FailureKind::Timeout);
            assert_eq!(failure.message, "The session creation timed out.");
        }

        #[tokio::test]
        async fn deleted_sessions_are_not_created() {
            let mut sessions = sessions_with_events(vec![WatchEvent::deleted(observed(None))]);
            sessions.expect_try_read().times(1).returning(|_, _| Ok(None));
            sessions.expect_delete().never();

            let failure = watcher(sessions)
                .create_session(&request(), &CancellationToken::new())
                .await
                .unwrap_err();
            assert_eq!(failure.kind, FailureKind::SessionNotCreated);
        }

        #[tokio::test]
        async fn errors_come_from_the_fresh_read_when_available() {
            // The terminating event only carries the error code
            let partial = observed(Some(WebDriverSessionStatus {
                error: Some("session not created".into()),
                ..Default::default()
            }));
            let full = observed(Some(WebDriverSessionStatus {
                error: Some("session not created".into()),
                message: Some("no android device available".into()),
                ..Default::default()
            }));
            let mut sessions = sessions_with_events(vec![WatchEvent::modified(partial)]);
            sessions
                .expect_try_read()
                .returning(move |_, _| Ok(Some(full.clone())));
            sessions.expect_delete().returning(|_, _| Ok(()));

            let failure = watcher(sessions)
                .create_session(&request(), &CancellationToken::new())
                .await
                .unwrap_err();
            assert_eq!(failure.kind, FailureKind::SessionNotCreated);
            assert_eq!(failure.message, "no android device available");
        }

        #[tokio::test]
        async fn broken_watch_removes_the_session() {
            let scripts: Vec<Vec<Result<WatchEvent<WebDriverSession>, Error>>> = vec![
                vec![
                    Ok(WatchEvent::added(observed(None))),
                    Err(Error::watch("WebDriverSession", "410 Gone")),
                ],
                // The stream closes without an error
                vec![],
            ];
            for script in scripts {
                let mut sessions = MockSessions::new();
                sessions.expect_create().times(1).returning(|draft| {
                    let mut created = draft.clone();
                    created.metadata.name = Some(NAME.to_string());
                    Ok(created)
                });
                sessions.expect_watch().times(1).returning(move |_, _| {
                    let events: Vec<_> = script
                        .iter()
                        .map(|event| match event {
                            Ok(event) => Ok(event.clone()),
                            Err(_) => Err(Error::watch("WebDriverSession", "410 Gone")),
                        })
                        .collect();
                    stream::iter(events).boxed()
                });
                sessions
                    .expect_try_read()
                    .times(1)
                    .returning(|_, _| Ok(Some(observed(None))));
                sessions
                    .expect_delete()
                    .withf(|session, _| session.name_any() == NAME)
                    .times(1)
                    .returning(|_, _| Ok(()));

                let failure = watcher(sessions)
                    .create_session(&request(), &CancellationToken::new())
                    .await
                    .unwrap_err();
                assert_eq!(failure.kind, FailureKind::SessionNotCreated);
            }
        }

        #[tokio::test(start_paused = true)]
        async fn cancelling_abandons_the_wait_without_cleanup() {
            let mut sessions = sessions_with_events(vec![]);
            sessions.expect_try_read().never();
            sessions.expect_delete().never();

            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                trigger.cancel();
            });

            let failure = watcher(sessions)
                .create_session(&request(), &cancel)
                .await
                .unwrap_err();
            assert_eq!(failure.kind, FailureKind::Cancelled);
        }

        #[tokio::test]
        async fn invalid_requests_never_reach_the_cluster() {
            for capabilities in [
                json!({"alwaysMatch": {}}),
                json!({"alwaysMatch": {"platformName": true}}),
                json!({"alwaysMatch": {"platformName": ""}}),
                json!({"alwaysMatch": {"platformName": "blackberry"}}),
            ] {
                let mut sessions = MockSessions::new();
                sessions.expect_create().never();
                sessions.expect_watch().never();

                let failure = watcher(sessions)
                    .create_session(&NewSessionRequest::new(capabilities), &CancellationToken::new())
                    .await
                    .unwrap_err();
                assert_eq!(failure.kind, FailureKind::InvalidArgument);
            }
        }
    }

    mod delete_session {
        use super::*;

        #[tokio::test]
        async fn unknown_sessions_are_invalid() {
            let mut sessions = MockSessions::new();
            sessions.expect_try_read().times(1).returning(|_, _| Ok(None));
            sessions.expect_delete().never();

            let failure = watcher(sessions).delete_session("session-nope").await.unwrap_err();
            assert_eq!(failure.kind, FailureKind::InvalidSessionId);
        }

        #[tokio::test]
        async fn known_sessions_are_deleted_once() {
            let mut sessions = MockSessions::new();
            sessions
                .expect_try_read()
                .times(1)
                .returning(|_, _| Ok(Some(observed(None))));
            sessions.expect_delete().times(1).returning(|_, _| Ok(()));

            watcher(sessions)
                .delete_session(NAME)
                .await
                .expect("delete should succeed");
        }
    }

    #[test]
    fn transitions_follow_the_session_status() {
        let pending = observed(status(true, true, false, None));
        assert_eq!(SessionState::on_event(WatchEventType::Modified, &pending), SessionState::Pending);
        assert_eq!(SessionState::on_event(WatchEventType::Deleted, &pending), SessionState::Deleted);

        // Readiness needs the capabilities too
        let no_caps = observed(status(true, true, true, None));
        assert_eq!(SessionState::on_event(WatchEventType::Added, &no_caps), SessionState::Pending);

        let ready = observed(status(true, true, true, Some("{}")));
        assert_eq!(SessionState::on_event(WatchEventType::Added, &ready), SessionState::Ready);
        assert!(SessionState::Ready.is_terminal());
        assert!(!SessionState::Pending.is_terminal());
    }
}
