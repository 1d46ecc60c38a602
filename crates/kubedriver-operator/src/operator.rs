//! Child operator core
//!
//! A [`ChildOperator`] keeps exactly one child of kind `C` alive for every
//! parent of kind `P` it selects, and feeds what it observes on that child
//! back onto the parent's status.
//!
//! Three activities run per instance: a parent watch, a child watch and a
//! single consumer draining the reconciliation queue. Both watches only
//! enqueue work; all reconciliation happens on the consumer, one context at
//! a time. The instance stops when any of the three stops.
//!
//! Parents and children are correlated through the child's owner reference
//! (parent UID), never through names.

use std::collections::HashMap;
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use kube::{Resource, ResourceExt};
use kubedriver_common::{Error, ResourceClient, Selector, WatchEventType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ChildOperatorConfig;
use crate::queue::{reconciliation_queue, QueueReceiver, QueueSender, ReconcileContext};

/// Resources the operator can manage as parents or children
pub trait ManagedResource:
    Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static
{
}

impl<T> ManagedResource for T where
    T: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static
{
}

/// Result of a single reconciliation step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The parent is not handled by this operator (filtered out or being deleted)
    Skipped,
    /// A child was created for the parent
    ChildCreated,
    /// Another writer created the child first
    ChildAlreadyExists,
    /// The feedback chain ran; `applied` patches were written to the parent
    Feedback {
        /// Number of feedback functions that produced a patch
        applied: usize,
    },
}

/// Parent/child reconciliation engine for one (parent kind, child kind) pair
pub struct ChildOperator<P, C>
where
    P: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    config: Arc<ChildOperatorConfig<P, C>>,
    parents: Arc<dyn ResourceClient<P>>,
    children: Arc<dyn ResourceClient<C>>,
}

impl<P, C> ChildOperator<P, C>
where
    P: ManagedResource,
    C: ManagedResource + Default,
{
    /// Create an operator from its configuration and resource clients
    pub fn new(
        config: ChildOperatorConfig<P, C>,
        parents: Arc<dyn ResourceClient<P>>,
        children: Arc<dyn ResourceClient<C>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            parents,
            children,
        }
    }

    /// Operator configuration
    pub fn config(&self) -> &ChildOperatorConfig<P, C> {
        &self.config
    }

    fn name(&self) -> &str {
        self.config.operator().name()
    }

    fn namespace(&self) -> &str {
        self.config.operator().namespace()
    }

    /// Enqueue a context for every selected parent, with the child it owns if any
    ///
    /// Children whose owner is not among the listed parents are dropped;
    /// they are normally being garbage-collected after their parent went away.
    /// Returns the number of contexts enqueued.
    pub async fn initialize(&self, queue: &QueueSender<ReconcileContext<P, C>>) -> Result<usize, Error> {
        let op = self.config.operator();
        let parents = self.parents.list(self.namespace(), &op.parent_selector()).await?;
        let children = self.children.list(self.namespace(), &op.child_selector()).await?;

        let parent_uids: HashMap<String, usize> = parents
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.uid().map(|uid| (uid, i)))
            .collect();

        let mut owned: HashMap<usize, C> = HashMap::new();
        for child in children {
            let owner = child
                .owner_references()
                .iter()
                .find_map(|r| parent_uids.get(&r.uid).copied());
            match owner {
                Some(index) if owned.contains_key(&index) => {
                    warn!(
                        operator = %self.name(),
                        child = %child.name_any(),
                        "parent already has a child, ignoring extra child"
                    );
                }
                Some(index) => {
                    owned.insert(index, child);
                }
                None => {
                    debug!(
                        operator = %self.name(),
                        child = %child.name_any(),
                        "dropping child without a listed parent"
                    );
                }
            }
        }

        let mut scheduled = 0;
        for (index, parent) in parents.into_iter().enumerate() {
            if !self.config.accepts(&parent) {
                continue;
            }
            queue.post(ReconcileContext::with_child(parent, owned.remove(&index)))?;
            scheduled += 1;
        }

        info!(operator = %self.name(), scheduled, "initial reconciliation scheduled");
        Ok(scheduled)
    }

    /// Re-evaluate a parent after any event on it
    ///
    /// Looks up the child the parent owns and enqueues the pair. Returns
    /// false when the parent is not handled by this operator.
    pub async fn schedule_from_parent(
        &self,
        parent: P,
        queue: &QueueSender<ReconcileContext<P, C>>,
    ) -> Result<bool, Error> {
        if !self.config.accepts(&parent) {
            return Ok(false);
        }
        let child = self.find_child(&parent).await?;
        queue.post(ReconcileContext::with_child(parent, child))?;
        Ok(true)
    }

    /// Re-evaluate the parent of a child after any event on the child
    ///
    /// Returns false when the child is an orphan (its parent cannot be
    /// found) or its parent is not handled by this operator.
    pub async fn schedule_from_child(
        &self,
        child: C,
        queue: &QueueSender<ReconcileContext<P, C>>,
    ) -> Result<bool, Error> {
        let Some(parent) = self.find_parent(&child).await? else {
            debug!(
                operator = %self.name(),
                child = %child.name_any(),
                "dropping event for orphaned child"
            );
            return Ok(false);
        };
        if !self.config.accepts(&parent) {
            return Ok(false);
        }
        queue.post(ReconcileContext::with_child(parent, Some(child)))?;
        Ok(true)
    }

    async fn find_child(&self, parent: &P) -> Result<Option<C>, Error> {
        let Some(uid) = parent.uid() else {
            return Ok(None);
        };
        let children = self
            .children
            .list(self.namespace(), &self.config.operator().child_selector())
            .await?;
        Ok(children
            .into_iter()
            .find(|child| child.owner_references().iter().any(|r| r.uid == uid)))
    }

    async fn find_parent(&self, child: &C) -> Result<Option<P>, Error> {
        let kind = P::kind(&());
        let Some(owner) = child.owner_references().iter().find(|r| r.kind == kind) else {
            return Ok(None);
        };
        let selector = Selector::name(&owner.name)
            .with_labels(self.config.operator().parent_selector().labels);
        let parents = self.parents.list(self.namespace(), &selector).await?;
        Ok(parents
            .into_iter()
            .find(|p| p.uid().as_deref() == Some(owner.uid.as_str())))
    }

    /// Take at most one corrective action for a (parent, child) pair
    ///
    /// Without a child, a child is drafted, filled in by the factory, stamped
    /// with the parent's name and namespace, the operator's labels and a
    /// single controller owner reference, and created. A create that loses a
    /// race against another writer counts as success.
    ///
    /// With a child, the parent is read again so that duplicate or stale
    /// deliveries act on its current status, then the feedback functions
    /// run in order. Each patch is applied as soon as it is produced and the
    /// patched parent returned by the API server replaces the context's
    /// parent, so later functions see the fields written by earlier ones.
    #[instrument(
        skip(self, context),
        fields(operator = %self.name(), parent = %context.parent.name_any())
    )]
    pub async fn reconcile(&self, context: ReconcileContext<P, C>) -> Result<ReconcileOutcome, Error> {
        if !self.config.accepts(&context.parent) {
            return Ok(ReconcileOutcome::Skipped);
        }
        if context.parent.meta().deletion_timestamp.is_some() {
            debug!("parent is being deleted, skipping");
            return Ok(ReconcileOutcome::Skipped);
        }

        match context.child {
            None => self.create_child(&context.parent).await,
            Some(child) => self.run_feedback(context.parent, child).await,
        }
    }

    /// Draft the child for `parent` without creating it
    pub fn build_child(&self, parent: &P) -> Result<C, Error> {
        let owner = parent.controller_owner_ref(&()).ok_or_else(|| {
            Error::internal_with_context(
                "operator",
                format!("{} {} has no uid", P::kind(&()), parent.name_any()),
            )
        })?;
        let name = parent.name_any();

        let mut child = C::default();
        self.config.fill_child(parent, &mut child);

        let meta = child.meta_mut();
        meta.name = Some(name.clone());
        meta.generate_name = None;
        meta.namespace = Some(
            parent
                .namespace()
                .unwrap_or_else(|| self.namespace().to_string()),
        );
        meta.labels = Some(self.config.operator().labels_for(&name));
        meta.owner_references = Some(vec![owner]);
        Ok(child)
    }

    async fn create_child(&self, parent: &P) -> Result<ReconcileOutcome, Error> {
        let child = self.build_child(parent)?;
        match self.children.create(&child).await {
            Ok(created) => {
                info!(child = %created.name_any(), kind = %C::kind(&()), "created child");
                Ok(ReconcileOutcome::ChildCreated)
            }
            Err(e) if e.is_already_exists() => {
                debug!(child = %child.name_any(), "child already exists");
                Ok(ReconcileOutcome::ChildAlreadyExists)
            }
            Err(e) => Err(e),
        }
    }

    async fn run_feedback(&self, parent: P, child: C) -> Result<ReconcileOutcome, Error> {
        // Queued copies go stale when the same parent is delivered twice
        let Some(parent) = self.reread_parent(&parent).await? else {
            return Ok(ReconcileOutcome::Skipped);
        };
        let mut context = ReconcileContext::with_child(parent, Some(child));
        let mut applied = 0;

        for feedback in self.config.feedback() {
            let Some(patch) = feedback.feedback(&context).await? else {
                continue;
            };
            if patch.is_empty() {
                continue;
            }

            let name = context.parent.name_any();
            let namespace = context
                .parent
                .namespace()
                .unwrap_or_else(|| self.namespace().to_string());
            context.parent = self.parents.patch_status(&namespace, &name, &patch).await?;
            applied += 1;

            debug!(feedback = %feedback.name(), fields = patch.fields().len(), "applied status patch");
        }

        Ok(ReconcileOutcome::Feedback { applied })
    }

    /// Latest stored copy of `parent`, or `None` when it is gone, replaced or no longer handled
    async fn reread_parent(&self, parent: &P) -> Result<Option<P>, Error> {
        let name = parent.name_any();
        let namespace = parent
            .namespace()
            .unwrap_or_else(|| self.namespace().to_string());
        let Some(current) = self.parents.try_read(&namespace, &name).await? else {
            debug!("parent no longer exists, skipping");
            return Ok(None);
        };
        if current.uid() != parent.uid() {
            debug!("parent was replaced, skipping");
            return Ok(None);
        }
        if !self.config.accepts(&current) || current.meta().deletion_timestamp.is_some() {
            return Ok(None);
        }
        Ok(Some(current))
    }

    /// Reconcile queued contexts one at a time until every producer is gone
    ///
    /// A failing or panicking reconciliation is logged and the next context
    /// is processed; nothing is retried here.
    pub async fn drain(&self, mut queue: QueueReceiver<ReconcileContext<P, C>>) {
        while let Some(context) = queue.next().await {
            let parent = context.parent.name_any();
            let child = context.child.as_ref().map(|c| c.name_any());

            match AssertUnwindSafe(self.reconcile(context)).catch_unwind().await {
                Ok(Ok(outcome)) => {
                    debug!(operator = %self.name(), parent = %parent, ?outcome, "reconciled");
                }
                Ok(Err(e)) => {
                    error!(
                        operator = %self.name(),
                        parent = %parent,
                        child = ?child,
                        error = %e,
                        "reconciliation failed"
                    );
                }
                Err(_) => {
                    error!(
                        operator = %self.name(),
                        parent = %parent,
                        child = ?child,
                        "reconciliation panicked"
                    );
                }
            }
        }
    }

    async fn watch_parents(&self, queue: QueueSender<ReconcileContext<P, C>>) -> Result<(), Error> {
        let mut events = self
            .parents
            .watch(self.namespace(), &self.config.operator().parent_selector());
        while let Some(event) = events.next().await {
            let event = event?;
            // kube-rs bookmarks carry only a resource version, not a real object
            if event.event_type == WatchEventType::Bookmark {
                continue;
            }
            let name = event.object.name_any();
            if let Err(e) = self.schedule_from_parent(event.object, &queue).await {
                warn!(operator = %self.name(), parent = %name, error = %e, "failed to schedule parent");
            }
        }
        Err(Error::watch(P::kind(&()), "watch ended"))
    }

    async fn watch_children(&self, queue: QueueSender<ReconcileContext<P, C>>) -> Result<(), Error> {
        let mut events = self
            .children
            .watch(self.namespace(), &self.config.operator().child_selector());
        while let Some(event) = events.next().await {
            let event = event?;
            // Same as for parents: nothing to correlate on a bookmark
            if event.event_type == WatchEventType::Bookmark {
                continue;
            }
            let name = event.object.name_any();
            if let Err(e) = self.schedule_from_child(event.object, &queue).await {
                warn!(operator = %self.name(), child = %name, error = %e, "failed to schedule child");
            }
        }
        Err(Error::watch(C::kind(&()), "watch ended"))
    }

    /// Run the operator until shutdown or until one of its activities stops
    ///
    /// Returns `Ok(())` on shutdown and the failure otherwise. A broken
    /// watch stops the whole instance.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), Error> {
        let (queue, receiver) = reconciliation_queue();
        info!(operator = %self.name(), namespace = %self.namespace(), "starting operator");

        let parent_watch = self.watch_parents(queue.clone());
        let child_watch = self.watch_children(queue.clone());
        let reconcile_loop = async {
            if let Err(e) = self.initialize(&queue).await {
                warn!(operator = %self.name(), error = %e, "initial list failed, relying on watches");
            }
            self.drain(receiver).await;
        };

        let result = tokio::select! {
            _ = shutdown.cancelled() => Ok(()),
            result = parent_watch => result,
            result = child_watch => result,
            _ = reconcile_loop => Err(Error::internal_with_context(
                "operator",
                "reconciliation queue closed",
            )),
        };

        match &result {
            Ok(()) => info!(operator = %self.name(), "operator stopped"),
            Err(e) => error!(operator = %self.name(), error = %e, "operator failed"),
        }
        result
    }
}
