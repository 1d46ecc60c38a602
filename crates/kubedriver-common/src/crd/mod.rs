//! Custom Resource Definitions for kubedriver
//!
//! This module contains all CRD definitions used by the kubedriver operators.

mod session;

pub use session::{WebDriverSession, WebDriverSessionSpec, WebDriverSessionStatus};
