//! Backend recorders fanned out to by the orchestrator.
//!
//! Every recorder owns its external process or connection exclusively. The orchestrator
//! wraps each one in a mutex, so one operation runs on a backend at a time.

pub mod camera;
pub mod face;
pub mod mocap;
pub mod scene;

use async_trait::async_trait;

use crate::error::BackendError;

pub use camera::{CameraBackend, FfmpegCapture, FfmpegSettings};
pub use face::RemoteFaceBackend;
pub use mocap::MocapBackend;
pub use scene::SceneBackend;

#[async_trait]
pub trait BackendRecorder: Send {
    /// Stable id used in logs and reports.
    fn id(&self) -> &str;
    /// Physical device identifier appended to session names; empty for none.
    fn device_id(&self) -> &str;
    /// Check the device is present and usable. Called once at startup.
    async fn validate(&mut self) -> Result<(), BackendError>;
    async fn start(&mut self) -> Result<(), BackendError>;
    async fn stop(&mut self) -> Result<(), BackendError>;
    /// Receives the already decorated name.
    async fn set_name(&mut self, name: &str) -> Result<(), BackendError>;
    async fn ping(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
    /// Whether the artifacts of the last successful stop have been collected or placed.
    /// Backends that finish their artifacts inside `stop` keep the default.
    async fn artifacts_saved(&mut self) -> Result<bool, BackendError> {
        Ok(true)
    }
    /// Tear down external processes or connections.
    async fn shutdown(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// `{name}_{device_id}`, or `name` unchanged when there is no device id.
pub fn decorate(name: &str, device_id: &str) -> String {
    if device_id.is_empty() {
        name.to_string()
    } else {
        format!("{name}_{device_id}")
    }
}
