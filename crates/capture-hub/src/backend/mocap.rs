//! Motion-capture host.
//!
//! The host writes `{capture_folder}/{name}.mcp` when a capture stops and would overwrite a
//! previous take with the same name, so that file is archived first.

use async_trait::async_trait;

use crate::backend::BackendRecorder;
use crate::collaborators::MocapHost;
use crate::error::BackendError;
use crate::naming::archive_existing;

const CAPTURE_EXTENSION: &str = "mcp";
const ARCHIVE_TAG: &str = "old";

pub struct MocapBackend {
    id: String,
    device_id: String,
    host: Box<dyn MocapHost>,
    name: Option<String>,
}

impl MocapBackend {
    pub fn new(id: impl Into<String>, device_id: impl Into<String>, host: Box<dyn MocapHost>) -> Self {
        Self {
            id: id.into(),
            device_id: device_id.into(),
            host,
            name: None,
        }
    }

    async fn archive_previous(&self) -> Result<(), BackendError> {
        let Some(name) = self.name.as_deref() else {
            return Ok(());
        };
        let folder = self.host.capture_folder().await?;
        let path = folder.join(format!("{name}.{CAPTURE_EXTENSION}"));
        let archived = tokio::task::spawn_blocking(move || archive_existing(&path, ARCHIVE_TAG))
            .await
            .map_err(|e| BackendError::Aborted(e.to_string()))??;
        if let Some(archived) = archived {
            tracing::info!(backend = %self.id, to = %archived.display(), "previous capture archived");
        }
        Ok(())
    }
}

#[async_trait]
impl BackendRecorder for MocapBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn validate(&mut self) -> Result<(), BackendError> {
        if self.host.is_connected().await {
            Ok(())
        } else {
            Err(BackendError::NotConnected("motion-capture host".to_string()))
        }
    }

    async fn start(&mut self) -> Result<(), BackendError> {
        self.host.start_capture().await
    }

    async fn stop(&mut self) -> Result<(), BackendError> {
        self.archive_previous().await?;
        let result = self.host.stop_capture().await?;
        tracing::info!(backend = %self.id, result = %result, "capture stopped");
        Ok(())
    }

    async fn set_name(&mut self, name: &str) -> Result<(), BackendError> {
        if name.trim().is_empty() {
            tracing::warn!(backend = %self.id, "ignoring empty capture name");
            return Ok(());
        }
        self.host.set_capture_name(name).await?;
        self.name = Some(name.to_string());
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), BackendError> {
        self.validate().await
    }
}
