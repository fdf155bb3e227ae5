//! Typed errors crossing the orchestrator boundary.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// A single backend recorder failed an operation.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("not connected: {0}")]
    NotConnected(String),
    #[error("device validation failed: {0}")]
    Validation(String),
    #[error("`{command}` exited with {status}: {stderr}")]
    ProcessExit {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("data-plane transfer failed: {0}")]
    Transfer(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("task aborted: {0}")]
    Aborted(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// An operator request the session cannot honour in its current state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot rename while recording")]
    RenameWhileRecording,
    #[error("session name must not be empty")]
    EmptyName,
    #[error("not recording")]
    NotRecording,
    #[error("no active backends")]
    NoBackends,
    #[error("session is shutting down")]
    ShuttingDown,
    #[error("previous take still saving")]
    StillSaving,
}

/// Rejected OSC handler registration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("OSC address must start with '/': {0:?}")]
    InvalidAddress(String),
    #[error("handler already registered for {0}")]
    Duplicate(String),
}
