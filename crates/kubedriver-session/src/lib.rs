//! Session creation and deletion for WebDriver clients
//!
//! The operators provision sessions asynchronously; this crate gives callers
//! the synchronous view the WebDriver protocol expects: `create_session`
//! returns once the session is usable (or failed), `delete_session` removes it.

#![deny(missing_docs)]

pub mod request;
pub mod response;
pub mod watcher;

pub use request::NewSessionRequest;
pub use response::{FailureKind, NewSession, WebDriverFailure};
pub use watcher::{SessionState, SessionWatcher, DEFAULT_SESSION_TIMEOUT, SESSION_NAME_PREFIX};
