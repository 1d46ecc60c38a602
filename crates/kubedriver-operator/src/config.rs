//! Operator configuration
//!
//! [`OperatorConfig`] is the immutable identity of one operator instance:
//! its name, the namespace it works in, which parents it selects and which
//! labels it stamps on the children it creates. [`ChildOperatorConfig`] adds
//! the behaviour (parent filter, child factory, feedback functions) and is
//! assembled with [`ChildOperatorBuilder`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use kubedriver_common::{Error, Selector, MANAGED_BY_LABEL};

use crate::feedback::Feedback;

/// Predicate deciding whether a parent is handled by an operator
pub type ParentFilter<P> = Arc<dyn Fn(&P) -> bool + Send + Sync>;

/// Fills the type-specific part of a freshly drafted child
///
/// Identity (name, namespace, labels, owner reference) is stamped by the
/// operator after the factory runs.
pub type ChildFactory<P, C> = Arc<dyn Fn(&P, &mut C) + Send + Sync>;

/// Identity and scope of an operator instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    name: String,
    namespace: String,
    parent_labels: Option<String>,
    child_labels: BTreeMap<String, String>,
    parent_name_label: Option<String>,
}

impl OperatorConfig {
    /// Operator named `name` working in `namespace`, selecting every parent
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            parent_labels: None,
            child_labels: BTreeMap::new(),
            parent_name_label: None,
        }
    }

    /// Only handle parents matching this label selector
    pub fn with_parent_labels(mut self, selector: impl Into<String>) -> Self {
        self.parent_labels = Some(selector.into());
        self
    }

    /// Stamp this label on every child
    pub fn with_child_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.child_labels.insert(key.into(), value.into());
        self
    }

    /// Stamp the owning parent's name under `key` on every child
    pub fn with_parent_name_label(mut self, key: impl Into<String>) -> Self {
        self.parent_name_label = Some(key.into());
        self
    }

    /// Operator name; also the value of the managed-by label on children
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace parents and children live in
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Selector for listing and watching parents
    pub fn parent_selector(&self) -> Selector {
        Selector::all().with_labels(self.parent_labels.clone())
    }

    /// Labels shared by every child of this operator, including the managed-by marker
    pub fn child_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.child_labels.clone();
        labels.insert(MANAGED_BY_LABEL.to_string(), self.name.clone());
        labels
    }

    /// Full label set for the child of `parent_name`
    pub fn labels_for(&self, parent_name: &str) -> BTreeMap<String, String> {
        let mut labels = self.child_labels();
        if let Some(key) = &self.parent_name_label {
            labels.insert(key.clone(), parent_name.to_string());
        }
        labels
    }

    /// Selector for listing and watching this operator's children
    pub fn child_selector(&self) -> Selector {
        let labels = self
            .child_labels()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        Selector::labels(labels)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::configuration("operator name must not be empty"));
        }
        if self.namespace.trim().is_empty() {
            return Err(Error::configuration(format!(
                "operator {} needs a namespace",
                self.name
            )));
        }
        if self.child_labels.contains_key(MANAGED_BY_LABEL) {
            return Err(Error::configuration(format!(
                "operator {}: {} is reserved for the managed-by marker",
                self.name, MANAGED_BY_LABEL
            )));
        }
        if let Some(key) = &self.parent_name_label {
            if key == MANAGED_BY_LABEL || self.child_labels.contains_key(key) {
                return Err(Error::configuration(format!(
                    "operator {}: parent name label {} collides with a child label",
                    self.name, key
                )));
            }
        }
        Ok(())
    }
}

/// Complete, immutable description of a child operator
pub struct ChildOperatorConfig<P, C> {
    operator: OperatorConfig,
    filter: ParentFilter<P>,
    factory: ChildFactory<P, C>,
    feedback: Vec<Arc<dyn Feedback<P, C>>>,
}

impl<P, C> ChildOperatorConfig<P, C> {
    /// Identity and scope of the operator
    pub fn operator(&self) -> &OperatorConfig {
        &self.operator
    }

    /// True when the operator handles `parent`
    pub fn accepts(&self, parent: &P) -> bool {
        (self.filter)(parent)
    }

    /// Let the factory fill in the type-specific part of `child`
    pub fn fill_child(&self, parent: &P, child: &mut C) {
        (self.factory)(parent, child)
    }

    /// Feedback functions in the order they run
    pub fn feedback(&self) -> &[Arc<dyn Feedback<P, C>>] {
        &self.feedback
    }
}

impl<P, C> fmt::Debug for ChildOperatorConfig<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildOperatorConfig")
            .field("operator", &self.operator)
            .field("feedback", &self.feedback.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ChildOperatorConfig`]
///
/// ```ignore
/// let config = ChildOperatorBuilder::new("kubedriver-service-operator")
///     .namespace("default")
///     .child_label("app.kubernetes.io/component", "service")
///     .create_child(|session: &WebDriverSession, service: &mut Service| { ... })
///     .with_feedback(ServiceFeedback)
///     .build()?;
/// ```
pub struct ChildOperatorBuilder<P, C> {
    name: String,
    namespace: Option<String>,
    parent_labels: Option<String>,
    child_labels: BTreeMap<String, String>,
    parent_name_label: Option<String>,
    filter: Option<ParentFilter<P>>,
    factory: Option<ChildFactory<P, C>>,
    feedback: Vec<Arc<dyn Feedback<P, C>>>,
}

impl<P, C> ChildOperatorBuilder<P, C>
where
    P: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    /// Start building an operator named `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            parent_labels: None,
            child_labels: BTreeMap::new(),
            parent_name_label: None,
            filter: None,
            factory: None,
            feedback: Vec::new(),
        }
    }

    /// Namespace the operator watches
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Only handle parents matching this label selector
    pub fn parent_labels(mut self, selector: impl Into<String>) -> Self {
        self.parent_labels = Some(selector.into());
        self
    }

    /// Stamp this label on every child
    pub fn child_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.child_labels.insert(key.into(), value.into());
        self
    }

    /// Stamp the owning parent's name under `key` on every child
    pub fn parent_name_label(mut self, key: impl Into<String>) -> Self {
        self.parent_name_label = Some(key.into());
        self
    }

    /// Only handle parents for which `filter` returns true
    pub fn filter(mut self, filter: impl Fn(&P) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Factory filling in the type-specific part of each new child
    pub fn create_child(mut self, factory: impl Fn(&P, &mut C) + Send + Sync + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Append a feedback function to the chain
    pub fn with_feedback(mut self, feedback: impl Feedback<P, C> + 'static) -> Self {
        self.feedback.push(Arc::new(feedback));
        self
    }

    /// Validate and freeze the configuration
    pub fn build(self) -> Result<ChildOperatorConfig<P, C>, Error> {
        let namespace = self.namespace.ok_or_else(|| {
            Error::configuration(format!("operator {} needs a namespace", self.name))
        })?;

        let mut operator = OperatorConfig::new(self.name, namespace);
        operator.parent_labels = self.parent_labels;
        operator.child_labels = self.child_labels;
        operator.parent_name_label = self.parent_name_label;
        operator.validate()?;

        let factory = self.factory.ok_or_else(|| {
            Error::configuration(format!(
                "operator {} needs a child factory",
                operator.name()
            ))
        })?;

        let filter: ParentFilter<P> = match self.filter {
            Some(filter) => filter,
            None => Arc::new(|_: &P| true),
        };

        Ok(ChildOperatorConfig {
            operator,
            filter,
            factory,
            feedback: self.feedback,
        })
    }
}
