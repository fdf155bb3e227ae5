//! Recording-session hub: drives every capture backend through one session state machine
//! and serves the operator's session-control connection.

pub mod backend;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod control_server;
pub mod dispatch;
pub mod error;
pub mod hooks;
pub mod lifecycle;
pub mod naming;
pub mod orchestrator;
pub mod remote;
pub mod startup;

pub use error::{BackendError, SessionError};
pub use lifecycle::SessionLifecycle;
pub use orchestrator::{FanOutReport, Orchestrator, SessionState};
