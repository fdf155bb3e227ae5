//! Command-hook collaborators.
//!
//! Each hook is an argv template. `{name}` and `{dir}` are substituted per call and the
//! command runs without a shell. An unconfigured hook is a successful no-op.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::process::Command;

use crate::collaborators::{MocapHost, SceneRecorderApi};
use crate::error::BackendError;

const REACH_TIMEOUT: Duration = Duration::from_secs(2);

/// One external command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandHook {
    argv: Vec<String>,
}

impl CommandHook {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        match argv.first() {
            Some(program) if !program.trim().is_empty() => Ok(Self { argv }),
            _ => Err(anyhow!("command hook needs a program")),
        }
    }

    /// Build from an optional config value.
    pub fn optional(argv: Option<Vec<String>>) -> Result<Option<Self>> {
        argv.map(Self::new).transpose()
    }

    fn render(&self, vars: &[(&str, &str)]) -> Vec<String> {
        self.argv
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (key, value)| {
                    acc.replace(&format!("{{{key}}}"), value)
                })
            })
            .collect()
    }

    /// Run the rendered command; returns trimmed stdout.
    pub async fn run(&self, vars: &[(&str, &str)]) -> Result<String, BackendError> {
        let argv = self.render(vars);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| BackendError::Validation("empty command hook".to_string()))?;
        tracing::debug!(command = ?argv, "running hook");
        let output = Command::new(program).args(args).output().await?;
        if !output.status.success() {
            return Err(BackendError::ProcessExit {
                command: argv.join(" "),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

async fn run_optional(
    hook: Option<&CommandHook>,
    what: &str,
    vars: &[(&str, &str)],
) -> Result<String, BackendError> {
    match hook {
        Some(hook) => hook.run(vars).await,
        None => {
            tracing::debug!(hook = what, "no hook configured");
            Ok(String::new())
        }
    }
}

/// TCP reachability check. No address means always reachable.
async fn reachable(addr: Option<SocketAddr>) -> bool {
    let Some(addr) = addr else {
        return true;
    };
    match tokio::time::timeout(REACH_TIMEOUT, tokio::net::TcpStream::connect(addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::warn!(addr = %addr, error = %e, "host unreachable");
            false
        }
        Err(_) => {
            tracing::warn!(addr = %addr, "host reachability check timed out");
            false
        }
    }
}

/// Scene recorder driven through command hooks.
#[derive(Debug, Clone, Default)]
pub struct HookSceneRecorder {
    pub start: Option<CommandHook>,
    pub stop: Option<CommandHook>,
    pub set_directory: Option<CommandHook>,
    pub reach_addr: Option<SocketAddr>,
}

#[async_trait]
impl SceneRecorderApi for HookSceneRecorder {
    async fn start_recording(&self) -> Result<(), BackendError> {
        run_optional(self.start.as_ref(), "start", &[]).await.map(drop)
    }

    async fn stop_recording(&self) -> Result<(), BackendError> {
        run_optional(self.stop.as_ref(), "stop", &[]).await.map(drop)
    }

    async fn set_record_directory(&self, path: &Path) -> Result<(), BackendError> {
        let dir = path.to_string_lossy().into_owned();
        run_optional(self.set_directory.as_ref(), "set_directory", &[("dir", dir.as_str())])
            .await
            .map(drop)
    }

    async fn is_connected(&self) -> bool {
        reachable(self.reach_addr).await
    }
}

/// Motion-capture host driven through command hooks.
#[derive(Debug, Clone)]
pub struct HookMocapHost {
    pub start: Option<CommandHook>,
    pub stop: Option<CommandHook>,
    pub set_name: Option<CommandHook>,
    pub capture_folder: PathBuf,
    pub host: Option<SocketAddr>,
}

#[async_trait]
impl MocapHost for HookMocapHost {
    async fn start_capture(&self) -> Result<(), BackendError> {
        run_optional(self.start.as_ref(), "start", &[]).await.map(drop)
    }

    async fn stop_capture(&self) -> Result<String, BackendError> {
        run_optional(self.stop.as_ref(), "stop", &[]).await
    }

    async fn set_capture_name(&self, name: &str) -> Result<(), BackendError> {
        run_optional(self.set_name.as_ref(), "set_name", &[("name", name)])
            .await
            .map(drop)
    }

    async fn capture_folder(&self) -> Result<PathBuf, BackendError> {
        Ok(self.capture_folder.clone())
    }

    async fn is_connected(&self) -> bool {
        reachable(self.host).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hook(argv: &[&str]) -> CommandHook {
        CommandHook::new(argv.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[test]
    fn rejects_empty_program() {
        assert!(CommandHook::new(Vec::new()).is_err());
        assert!(CommandHook::new(vec![" ".to_string()]).is_err());
        assert!(CommandHook::optional(None).unwrap().is_none());
    }

    #[test]
    fn render_substitutes_every_placeholder() {
        let h = hook(&["rec", "--name={name}", "{dir}/{name}.mcp", "{unknown}"]);
        assert_eq!(
            h.render(&[("name", "hello"), ("dir", "/data")]),
            vec!["rec", "--name=hello", "/data/hello.mcp", "{unknown}"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_returns_stdout_or_exit_error() {
        let echo = hook(&["sh", "-c", "echo {name}"]);
        assert_eq!(echo.run(&[("name", "take_01")]).await.unwrap(), "take_01");

        let fail = hook(&["sh", "-c", "echo boom >&2; exit 3"]);
        match fail.run(&[]).await {
            Err(BackendError::ProcessExit { stderr, .. }) => assert_eq!(stderr, "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unconfigured_hooks_are_noops() {
        let scene = HookSceneRecorder::default();
        scene.start_recording().await.unwrap();
        scene.set_record_directory(Path::new("/tmp")).await.unwrap();
        assert!(scene.is_connected().await);
    }

    #[tokio::test]
    async fn reachability_follows_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let up = listener.local_addr().unwrap();
        assert!(reachable(Some(up)).await);
        drop(listener);
        assert!(!reachable(Some(up)).await);
    }
}
