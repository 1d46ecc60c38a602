//! Common types for kubedriver: the session CRD, errors, and the resource client

#![deny(missing_docs)]

pub mod capabilities;
pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod resource;
pub mod retry;
pub mod status;
pub mod telemetry;

pub use capabilities::{requested_platform, Platform};
pub use error::Error;
pub use resource::{
    watch_until, KubeResourceClient, ResourceClient, Selector, WatchEvent, WatchEventType,
    WatchStream,
};
pub use status::StatusPatch;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label stamped on every object created by an operator, carrying the operator's name
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Label carrying the owning session's name on every session child
pub const SESSION_LABEL: &str = "kubedriver.io/session";

/// Value of [`MANAGED_BY_LABEL`] on sessions created through the session API
pub const KUBEDRIVER_MANAGER: &str = "kubedriver";

/// Default namespace for sessions and their children
pub const DEFAULT_NAMESPACE: &str = "default";

/// Port the WebDriver server listens on inside a session pod
pub const DRIVER_PORT: u16 = 4774;

/// Base path of the WebDriver HTTP API exposed by session pods
pub const DRIVER_BASE_PATH: &str = "/wd/hub";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "kubedriver";
