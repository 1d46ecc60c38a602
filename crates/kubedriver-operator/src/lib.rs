//! Parent/child reconciliation engine and the session operators built on it
//!
//! A [`ChildOperator`] watches a parent kind and a child kind, keeps one
//! child per parent and runs an ordered chain of [`Feedback`] functions that
//! copy child state back onto the parent's status. [`sessions`] wires three
//! of them (pod, service, ingress) behind every `WebDriverSession`.

pub mod config;
pub mod driver;
pub mod feedback;
pub mod operator;
pub mod queue;
pub mod sessions;

#[cfg(test)]
mod test_support;

pub use config::{ChildOperatorBuilder, ChildOperatorConfig, OperatorConfig};
pub use driver::{DriverClient, HttpDriverClient};
pub use feedback::{feedback_fn, Feedback};
pub use operator::{ChildOperator, ManagedResource, ReconcileOutcome};
pub use queue::{reconciliation_queue, QueueReceiver, QueueSender, ReconcileContext};
pub use sessions::{DriverImages, SessionOperatorSettings, SessionOperators};
