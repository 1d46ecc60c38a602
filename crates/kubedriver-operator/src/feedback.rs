//! Feedback functions
//!
//! A feedback function looks at a parent and the child it owns and decides
//! whether something observed on the child should be copied onto the
//! parent's status. The operator runs them in order; see
//! [`ChildOperator::reconcile`](crate::ChildOperator::reconcile) for how
//! their patches are applied.

use async_trait::async_trait;
use kubedriver_common::{Error, StatusPatch};

use crate::queue::ReconcileContext;

/// Translates observed child state into a parent status patch
///
/// Implementations must return `Ok(None)` when the parent has no usable
/// spec, when the parent already reached a terminal status, or when the
/// child is not observably ready yet.
#[async_trait]
pub trait Feedback<P, C>: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Produce a status patch for the parent, if any
    async fn feedback(&self, context: &ReconcileContext<P, C>) -> Result<Option<StatusPatch>, Error>;
}

/// Feedback backed by a synchronous closure
pub struct FeedbackFn<F> {
    name: String,
    f: F,
}

/// Wrap a synchronous closure as a [`Feedback`]
pub fn feedback_fn<P, C, F>(name: impl Into<String>, f: F) -> FeedbackFn<F>
where
    F: Fn(&ReconcileContext<P, C>) -> Option<StatusPatch>,
{
    FeedbackFn {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<P, C, F> Feedback<P, C> for FeedbackFn<F>
where
    P: Send + Sync,
    C: Send + Sync,
    F: Fn(&ReconcileContext<P, C>) -> Option<StatusPatch> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn feedback(&self, context: &ReconcileContext<P, C>) -> Result<Option<StatusPatch>, Error> {
        Ok((self.f)(context))
    }
}
