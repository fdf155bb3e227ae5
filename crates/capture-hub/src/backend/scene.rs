//! Screen/scene recorder.
//!
//! Each take records into `{root}/{YYYY-MM-DD}/{name}/{n}`. Some sources write to a shared
//! buffer folder instead, so after stopping the buffer is emptied into the take folder and
//! every file there is prefixed with the session name.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::BackendRecorder;
use crate::collaborators::{ConfirmDialog, SceneRecorderApi};
use crate::error::BackendError;
use crate::naming::{PlacementReport, RetryPolicy, dated_folder, incremental_folder, prepend_label, relocate};

pub struct SceneBackend {
    id: String,
    device_id: String,
    recorder: Box<dyn SceneRecorderApi>,
    dialog: Arc<dyn ConfirmDialog>,
    root: PathBuf,
    buffer: PathBuf,
    retry: RetryPolicy,
    name: String,
    take_dir: Option<PathBuf>,
}

impl SceneBackend {
    pub fn new(
        id: impl Into<String>,
        device_id: impl Into<String>,
        recorder: Box<dyn SceneRecorderApi>,
        dialog: Arc<dyn ConfirmDialog>,
        root: PathBuf,
        buffer: PathBuf,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            id: id.into(),
            device_id: device_id.into(),
            recorder,
            dialog,
            root,
            buffer,
            retry,
            name: "Recording".to_string(),
            take_dir: None,
        }
    }

    /// Ask before creating a missing root folder. The dialog may wait on the operator, so it
    /// runs on the blocking pool where the fan-out timeout can still fire.
    async fn ensure_root(&self) -> Result<(), BackendError> {
        if self.root.is_dir() {
            return Ok(());
        }
        let dialog = self.dialog.clone();
        let message = format!(
            "The folder '{}' does not exist. Do you want to create it?",
            self.root.display()
        );
        let create = tokio::task::spawn_blocking(move || dialog.ask_yes_no("Warning", &message))
            .await
            .map_err(|e| BackendError::Aborted(e.to_string()))?;
        if !create {
            return Err(BackendError::Validation(format!(
                "root folder {} does not exist",
                self.root.display()
            )));
        }
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    fn log_placement(&self, what: &str, report: &PlacementReport) {
        if report.is_complete() {
            tracing::info!(backend = %self.id, placed = report.moved.len(), "{what} complete");
        } else {
            for left in &report.left_behind {
                tracing::warn!(
                    backend = %self.id,
                    file = %left.path.display(),
                    error = %left.error,
                    "{what}: file left for manual recovery"
                );
            }
        }
    }
}

#[async_trait]
impl BackendRecorder for SceneBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn validate(&mut self) -> Result<(), BackendError> {
        if !self.recorder.is_connected().await {
            return Err(BackendError::NotConnected("scene recorder".to_string()));
        }
        self.ensure_root().await?;
        std::fs::create_dir_all(&self.buffer)?;
        Ok(())
    }

    async fn start(&mut self) -> Result<(), BackendError> {
        self.ensure_root().await?;
        let day = dated_folder(&self.root, chrono::Local::now().date_naive())?;
        let take_dir = incremental_folder(&day.join(&self.name))?;
        self.recorder.set_record_directory(&take_dir).await?;
        self.recorder.start_recording().await?;
        tracing::info!(backend = %self.id, dir = %take_dir.display(), "scene recording started");
        self.take_dir = Some(take_dir);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), BackendError> {
        self.recorder.stop_recording().await?;
        let Some(take_dir) = self.take_dir.take() else {
            tracing::warn!(backend = %self.id, "no take folder; buffer files left in place");
            return Ok(());
        };

        let buffer = self.buffer.clone();
        let label = self.name.clone();
        let retry = self.retry;
        let (moved, labelled) = tokio::task::spawn_blocking(move || {
            let moved = relocate(&buffer, &take_dir, retry);
            let labelled = prepend_label(&take_dir, &label, retry);
            (moved, labelled)
        })
        .await
        .map_err(|e| BackendError::Aborted(e.to_string()))?;

        self.log_placement("relocate", &moved);
        self.log_placement("label", &labelled);
        Ok(())
    }

    async fn set_name(&mut self, name: &str) -> Result<(), BackendError> {
        self.name = name.to_string();
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), BackendError> {
        if self.recorder.is_connected().await {
            Ok(())
        } else {
            Err(BackendError::NotConnected("scene recorder".to_string()))
        }
    }
}
