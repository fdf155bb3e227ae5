//! Session-control line server.
//!
//! One operator connection is served at a time; its lines are applied to the orchestrator
//! in order. `close` (or a lifecycle shutdown) tears the session down and ends serving.
//! `status` reports the session state, so a take still saving its artifacts is visible.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use capture_sync_proto::{Reply, SessionCommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::lifecycle::SessionLifecycle;
use crate::orchestrator::Orchestrator;

/// What to do after one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handled {
    pub reply: Option<Reply>,
    pub close: bool,
}

impl Handled {
    fn reply(reply: Reply) -> Self {
        Self {
            reply: Some(reply),
            close: false,
        }
    }

    fn silent() -> Self {
        Self {
            reply: None,
            close: false,
        }
    }
}

/// Apply one command line to the orchestrator.
pub async fn handle_line(orch: &mut Orchestrator, line: &str) -> Handled {
    match SessionCommand::parse(line) {
        SessionCommand::Close => {
            orch.shutdown().await;
            Handled {
                reply: Some(Reply::Bye),
                close: true,
            }
        }
        SessionCommand::RecordStart => match orch.start().await {
            Ok(_) => Handled::reply(Reply::Recording),
            Err(e) => Handled::reply(Reply::Error(e.to_string())),
        },
        SessionCommand::RecordStop => match orch.stop().await {
            Ok(_) => Handled::reply(Reply::Stopping),
            Err(e) => Handled::reply(Reply::Error(e.to_string())),
        },
        SessionCommand::Ping => {
            orch.ping().await;
            Handled::reply(Reply::Pong)
        }
        SessionCommand::Status => {
            let state = orch.refresh_saving().await;
            Handled::reply(Reply::Status {
                state: state.to_string(),
                name: orch.session_name().to_string(),
                take: orch.take_number(),
            })
        }
        SessionCommand::FileName(name) if name.is_empty() => {
            tracing::warn!("fileName without a name; ignored");
            Handled::silent()
        }
        SessionCommand::FileName(name) => match orch.set_name(&name).await {
            Ok(_) => Handled::reply(Reply::FilenameSet),
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "rename rejected");
                Handled::reply(Reply::Error(e.to_string()))
            }
        },
        SessionCommand::Greet(text) => {
            tracing::info!(text = %text, "operator connected");
            Handled::silent()
        }
        SessionCommand::Unknown(line) => {
            tracing::info!(line = %line, "unknown session command");
            Handled::silent()
        }
    }
}

pub struct ControlServer {
    listener: TcpListener,
    lifecycle: SessionLifecycle,
}

impl ControlServer {
    pub async fn bind(addr: SocketAddr, lifecycle: SessionLifecycle) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind session control {addr}"))?;
        tracing::info!(bind = %listener.local_addr()?, "session control listening");
        Ok(Self {
            listener,
            lifecycle,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve operator connections until `close` or shutdown; backends are shut down on exit.
    pub async fn serve(self, mut orch: Orchestrator) -> Result<()> {
        loop {
            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => accepted.context("accept session control")?,
                _ = self.lifecycle.wait() => {
                    orch.shutdown().await;
                    return Ok(());
                }
            };
            tracing::info!(peer = %peer, "operator connected");
            match self.serve_connection(stream, &mut orch).await {
                Ok(true) => return Ok(()),
                Ok(false) => tracing::info!(peer = %peer, "operator disconnected"),
                Err(e) => tracing::warn!(peer = %peer, "operator connection error: {e:#}"),
            }
        }
    }

    /// Returns true when the session was closed.
    async fn serve_connection(&self, stream: TcpStream, orch: &mut Orchestrator) -> Result<bool> {
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = self.lifecycle.wait() => {
                    orch.shutdown().await;
                    return Ok(true);
                }
            };
            let Some(line) = line else {
                return Ok(false);
            };
            if line.trim().is_empty() {
                continue;
            }
            tracing::debug!(line = %line, "session command");
            let handled = handle_line(orch, &line).await;
            if let Some(reply) = handled.reply {
                write.write_all(format!("{reply}\n").as_bytes()).await?;
            }
            if handled.close {
                return Ok(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendRecorder;
    use crate::error::BackendError;
    use crate::orchestrator::SessionState;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Noop {
        /// Artifacts of the last stop still in flight.
        in_flight: Arc<AtomicBool>,
    }

    #[async_trait]
    impl BackendRecorder for Noop {
        fn id(&self) -> &str {
            "noop"
        }

        fn device_id(&self) -> &str {
            ""
        }

        async fn validate(&mut self) -> Result<(), BackendError> {
            Ok(())
        }

        async fn start(&mut self) -> Result<(), BackendError> {
            Ok(())
        }

        async fn stop(&mut self) -> Result<(), BackendError> {
            Ok(())
        }

        async fn set_name(&mut self, _name: &str) -> Result<(), BackendError> {
            Ok(())
        }

        async fn artifacts_saved(&mut self) -> Result<bool, BackendError> {
            Ok(!self.in_flight.load(Ordering::SeqCst))
        }
    }

    async fn orchestrator(lifecycle: SessionLifecycle) -> Orchestrator {
        orchestrator_with(Noop::default(), lifecycle).await
    }

    async fn orchestrator_with(backend: Noop, lifecycle: SessionLifecycle) -> Orchestrator {
        Orchestrator::initialize(
            vec![Box::new(backend) as Box<dyn BackendRecorder>],
            "hello",
            Duration::from_secs(1),
            lifecycle,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn handle_line_maps_commands_to_replies() {
        let mut orch = orchestrator(SessionLifecycle::new()).await;
        let reply = |h: Handled| h.reply.map(|r| r.to_string());

        assert_eq!(reply(handle_line(&mut orch, "fileName:take").await), Some("filename_set".into()));
        assert_eq!(reply(handle_line(&mut orch, "fileName:").await), None);
        assert_eq!(orch.session_name(), "take");
        assert_eq!(reply(handle_line(&mut orch, "recordStart").await), Some("recording".into()));
        assert_eq!(
            reply(handle_line(&mut orch, "fileName:other").await),
            Some("error:cannot rename while recording".into())
        );
        assert_eq!(reply(handle_line(&mut orch, "recordStop").await), Some("stopping".into()));
        assert_eq!(
            reply(handle_line(&mut orch, "recordStop").await),
            Some("error:not recording".into())
        );
        assert_eq!(reply(handle_line(&mut orch, "greet:hi").await), None);
        assert_eq!(reply(handle_line(&mut orch, "launch").await), None);
        assert_eq!(orch.state(), SessionState::Idle);

        let closed = handle_line(&mut orch, "close").await;
        assert_eq!(closed.reply, Some(Reply::Bye));
        assert!(closed.close);
    }

    #[tokio::test]
    async fn status_reports_saving_until_artifacts_arrive() {
        let backend = Noop::default();
        let in_flight = backend.in_flight.clone();
        in_flight.store(true, Ordering::SeqCst);
        let mut orch = orchestrator_with(backend, SessionLifecycle::new()).await;
        let reply = |h: Handled| h.reply.map(|r| r.to_string());

        assert_eq!(reply(handle_line(&mut orch, "status").await), Some("status:armed:hello:0".into()));
        handle_line(&mut orch, "recordStart").await;
        assert_eq!(
            reply(handle_line(&mut orch, "status").await),
            Some("status:recording:hello:0".into())
        );
        assert_eq!(reply(handle_line(&mut orch, "recordStop").await), Some("stopping".into()));
        assert_eq!(reply(handle_line(&mut orch, "status").await), Some("status:saving:hello:1".into()));
        assert_eq!(
            reply(handle_line(&mut orch, "recordStart").await),
            Some("error:previous take still saving".into())
        );

        in_flight.store(false, Ordering::SeqCst);
        assert_eq!(reply(handle_line(&mut orch, "status").await), Some("status:idle:hello:1".into()));
        assert_eq!(reply(handle_line(&mut orch, "recordStart").await), Some("recording".into()));
    }

    #[tokio::test]
    async fn serves_an_operator_session_until_close() {
        let lifecycle = SessionLifecycle::new();
        let orch = orchestrator(lifecycle.clone()).await;
        let server = ControlServer::bind("127.0.0.1:0".parse().unwrap(), lifecycle.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let task = tokio::spawn(server.serve(orch));

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = tokio::io::BufReader::new(read).lines();
        write
            .write_all(b"greet:console\nfileName:hello\nrecordStart\nping\nrecordStop\nstatus\nclose\n")
            .await
            .unwrap();
        let mut replies = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            replies.push(line);
        }
        assert_eq!(
            replies,
            ["filename_set", "recording", "pong", "stopping", "status:idle:hello:1", "BYE"]
        );

        task.await.unwrap().unwrap();
        assert!(lifecycle.is_shutting_down());
    }

    #[tokio::test]
    async fn lifecycle_shutdown_stops_an_idle_server() {
        let lifecycle = SessionLifecycle::new();
        let orch = orchestrator(lifecycle.clone()).await;
        let server = ControlServer::bind("127.0.0.1:0".parse().unwrap(), lifecycle.clone())
            .await
            .unwrap();
        let task = tokio::spawn(server.serve(orch));
        lifecycle.request_shutdown();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
