//! Interfaces to the external systems the backends drive.
//!
//! Only the calls the backends make are modelled here. [`crate::hooks`] provides
//! command-hook implementations; tests use in-memory fakes.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::BackendError;

/// Motion-capture host.
#[async_trait]
pub trait MocapHost: Send + Sync {
    async fn start_capture(&self) -> Result<(), BackendError>;
    /// Returns the host's textual result.
    async fn stop_capture(&self) -> Result<String, BackendError>;
    async fn set_capture_name(&self, name: &str) -> Result<(), BackendError>;
    /// Folder the host writes `{name}.mcp` into.
    async fn capture_folder(&self) -> Result<PathBuf, BackendError>;
    async fn is_connected(&self) -> bool;
}

/// Screen/scene recorder remote-control API.
#[async_trait]
pub trait SceneRecorderApi: Send + Sync {
    async fn start_recording(&self) -> Result<(), BackendError>;
    async fn stop_recording(&self) -> Result<(), BackendError>;
    async fn set_record_directory(&self, path: &Path) -> Result<(), BackendError>;
    async fn is_connected(&self) -> bool;
}

/// Local video/audio capture process.
#[async_trait]
pub trait VideoCapture: Send {
    /// Start writing to `output`.
    async fn start(&mut self, output: &Path) -> Result<(), BackendError>;
    /// Stop and report whether the process finished cleanly.
    async fn stop(&mut self) -> Result<bool, BackendError>;
    async fn validate_devices(&self) -> Result<bool, BackendError>;
    fn is_recording(&self) -> bool;
}

/// Yes/no question put to the operator.
pub trait ConfirmDialog: Send + Sync {
    fn ask_yes_no(&self, title: &str, message: &str) -> bool;
}

/// Answers every question the same way.
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

impl ConfirmDialog for AutoConfirm {
    fn ask_yes_no(&self, title: &str, message: &str) -> bool {
        tracing::info!(title, message, answer = self.0, "auto-answered confirmation");
        self.0
    }
}

/// Prompts on stdout and reads the answer from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleDialog;

impl ConfirmDialog for ConsoleDialog {
    fn ask_yes_no(&self, title: &str, message: &str) -> bool {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        prompt_yes_no(&mut stdin.lock(), &mut stdout, title, message)
    }
}

fn prompt_yes_no(
    input: &mut impl BufRead,
    output: &mut impl Write,
    title: &str,
    message: &str,
) -> bool {
    let _ = write!(output, "[{title}] {message} [y/N] ");
    let _ = output.flush();
    let mut line = String::new();
    if input.read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
