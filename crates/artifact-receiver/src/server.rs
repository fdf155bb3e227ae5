//! Transfer server: one listener per channel, one connection at a time.
//!
//! Per message:
//! - `CLOSE`:  stop serving; the writer is drained before the listener is released.
//! - `ALIVE`:  logged; liveness is answered on the control plane.
//! - `FILE`:   set the pending artifact name.
//! - `RECORD`: a payload is expected next.
//! - payload:  queued for the writer under the pending name, then the name is re-armed with
//!   [`REARM_SUFFIX`] so a second payload without a new `FILE` lands in a different file.
//!
//! Protocol violations and short reads drop the connection; the channel keeps listening.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use anyhow::{Context, Result};
use capture_sync_proto::{TransferMessage, Verb, read_message};

use crate::config::ChannelConfig;
use crate::writer::{ArtifactWriter, WriterStats};

/// Name used for payloads that arrive before any `FILE` command.
pub const UNNAMED_ARTIFACT: &str = "NoFileNameGiven";

/// Appended to the pending name after each payload.
pub const REARM_SUFFIX: &str = "_rerecorded";

/// Consecutive accept failures after which the channel gives up.
const MAX_ACCEPT_FAILURES: u32 = 20;

/// Pause before retrying `accept`: doubles per consecutive failure, capped at two seconds.
fn accept_backoff(consecutive: u32) -> Duration {
    let ms = 50u64.saturating_mul(1 << consecutive.saturating_sub(1).min(6));
    Duration::from_millis(ms.min(2_000))
}

/// Whether the channel expects a command or a payload next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    AwaitingCommand,
    AwaitingPayload,
}

/// Per-channel naming state; lives across connections.
#[derive(Debug)]
struct ChannelState {
    pending_name: String,
    named: bool,
    mode: ChannelMode,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            pending_name: UNNAMED_ARTIFACT.to_string(),
            named: false,
            mode: ChannelMode::AwaitingCommand,
        }
    }
}

impl ChannelState {
    fn arm(&mut self, name: &str) -> bool {
        let name = sanitize_name(name);
        if name.is_empty() {
            return false;
        }
        self.pending_name = name;
        self.named = true;
        true
    }

    fn rearm(&mut self) {
        self.pending_name.push_str(REARM_SUFFIX);
        self.mode = ChannelMode::AwaitingCommand;
    }
}

/// Keep artifact names inside the destination directory.
fn sanitize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

enum Flow {
    Continue,
    Close,
}

/// Result of a channel that stopped serving after `CLOSE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeSummary {
    pub channel: String,
    pub connections: usize,
    pub writer: WriterStats,
}

/// A bound, not yet serving, transfer channel.
pub struct TransferServer {
    config: ChannelConfig,
    listener: TcpListener,
    state: ChannelState,
}

impl TransferServer {
    pub fn bind(config: ChannelConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind)
            .with_context(|| format!("bind channel {} on {}", config.id, config.bind))?;
        tracing::info!(
            channel = %config.id,
            bind = %listener.local_addr().unwrap_or(config.bind),
            dir = %config.dest_dir.display(),
            ext = %config.extension,
            "transfer channel listening"
        );
        Ok(Self {
            config,
            listener,
            state: ChannelState::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve connections until a `CLOSE` command arrives.
    pub fn serve(mut self) -> Result<ServeSummary> {
        let writer = ArtifactWriter::spawn(
            &self.config.id,
            &self.config.dest_dir,
            &self.config.extension,
        );
        let mut connections = 0usize;
        let mut accept_failures = 0u32;

        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(x) => x,
                Err(e) => {
                    accept_failures += 1;
                    if accept_failures >= MAX_ACCEPT_FAILURES {
                        tracing::error!(
                            channel = %self.config.id,
                            error = %e,
                            "accept keeps failing; closing channel"
                        );
                        break;
                    }
                    let pause = accept_backoff(accept_failures);
                    tracing::warn!(channel = %self.config.id, error = %e, retry_in = ?pause, "accept error");
                    std::thread::sleep(pause);
                    continue;
                }
            };
            accept_failures = 0;
            connections += 1;
            tracing::debug!(channel = %self.config.id, peer = %peer, "connection accepted");
            stream.set_nodelay(true).ok();

            match self.handle_connection(stream, peer, &writer) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) => break,
                Err(e) => {
                    tracing::warn!(
                        channel = %self.config.id,
                        peer = %peer,
                        pending = %self.state.pending_name,
                        "connection dropped: {e:#}"
                    );
                }
            }
        }

        let stats = writer.shutdown();
        drop(self.listener);
        tracing::info!(
            channel = %self.config.id,
            written = stats.written.len(),
            failed = stats.failed,
            "transfer channel closed"
        );
        Ok(ServeSummary {
            channel: self.config.id,
            connections,
            writer: stats,
        })
    }

    fn handle_connection(
        &mut self,
        mut stream: TcpStream,
        peer: SocketAddr,
        writer: &ArtifactWriter,
    ) -> Result<Flow> {
        let channel = self.config.id.as_str();
        loop {
            let msg = match read_message(&mut stream) {
                Ok(Some(msg)) => msg,
                Ok(None) => return Ok(Flow::Continue),
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    return Err(e).context("protocol violation");
                }
                Err(e) => return Err(e).context("read message"),
            };

            match msg {
                TransferMessage::Command { verb: Verb::Close, .. } => {
                    tracing::info!(channel = %channel, peer = %peer, "close requested");
                    return Ok(Flow::Close);
                }
                TransferMessage::Command { verb: Verb::Alive, .. } => {
                    tracing::info!(channel = %channel, peer = %peer, "alive");
                }
                TransferMessage::Command { verb: Verb::File, argument } => {
                    if self.state.arm(&argument) {
                        tracing::info!(channel = %channel, artifact = %self.state.pending_name, "armed");
                    } else {
                        tracing::warn!(channel = %channel, peer = %peer, "ignoring FILE with empty name");
                    }
                }
                TransferMessage::Command { verb: Verb::Record, .. } => {
                    self.state.mode = ChannelMode::AwaitingPayload;
                    tracing::info!(channel = %channel, artifact = %self.state.pending_name, "recording; payload expected");
                }
                TransferMessage::Payload(bytes) => {
                    let name = self.state.pending_name.clone();
                    if !self.state.named {
                        tracing::warn!(
                            channel = %channel,
                            peer = %peer,
                            artifact = %name,
                            "payload received before any FILE command; needs manual recovery"
                        );
                    }
                    if self.state.mode == ChannelMode::AwaitingCommand {
                        tracing::debug!(channel = %channel, artifact = %name, "payload without RECORD");
                    }
                    tracing::info!(channel = %channel, peer = %peer, artifact = %name, bytes = bytes.len(), "payload received");
                    writer.enqueue(name, bytes);
                    self.state.rearm();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{push_artifact, send_command};
    use std::path::Path;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn spawn_server(dir: &Path) -> (SocketAddr, std::thread::JoinHandle<Result<ServeSummary>>) {
        let server = TransferServer::bind(ChannelConfig {
            id: "csv".to_string(),
            bind: "127.0.0.1:0".parse().unwrap(),
            extension: "csv".to_string(),
            dest_dir: dir.to_path_buf(),
        })
        .unwrap();
        let addr = server.local_addr().unwrap();
        (addr, std::thread::spawn(move || server.serve()))
    }

    #[test]
    fn sanitize_keeps_names_inside_dir() {
        assert_eq!(sanitize_name("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_name(" take_01 "), "take_01");
        assert_eq!(sanitize_name("a\\b"), "a_b");
    }

    #[test]
    fn state_rearm_appends_suffix_and_resets_mode() {
        let mut st = ChannelState::default();
        assert!(st.arm("sign"));
        st.mode = ChannelMode::AwaitingPayload;
        st.rearm();
        assert_eq!(st.pending_name, "sign_rerecorded");
        assert_eq!(st.mode, ChannelMode::AwaitingCommand);
        assert!(!st.arm("   "));
        assert_eq!(st.pending_name, "sign_rerecorded");
    }

    #[test]
    fn accept_backoff_grows_then_caps() {
        assert_eq!(accept_backoff(1), Duration::from_millis(50));
        assert_eq!(accept_backoff(2), Duration::from_millis(100));
        assert_eq!(accept_backoff(4), Duration::from_millis(400));
        assert_eq!(accept_backoff(7), Duration::from_millis(2_000));
        assert_eq!(accept_backoff(u32::MAX), Duration::from_millis(2_000));
        let total: Duration = (1..MAX_ACCEPT_FAILURES).map(accept_backoff).sum();
        assert!(total < Duration::from_secs(60));
    }

    #[test]
    fn consecutive_payloads_never_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, join) = spawn_server(dir.path());

        send_command(addr, Verb::File, "take_003", TIMEOUT).unwrap();
        send_command(addr, Verb::Record, "", TIMEOUT).unwrap();
        push_artifact(addr, b"first", TIMEOUT).unwrap();
        push_artifact(addr, b"second", TIMEOUT).unwrap();
        send_command(addr, Verb::Close, "", TIMEOUT).unwrap();

        let summary = join.join().unwrap().unwrap();
        assert_eq!(summary.writer.written.len(), 2);
        assert_eq!(std::fs::read(dir.path().join("take_003.csv")).unwrap(), b"first");
        assert_eq!(
            std::fs::read(dir.path().join("take_003_rerecorded.csv")).unwrap(),
            b"second"
        );
    }

    #[test]
    fn unnamed_payload_uses_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, join) = spawn_server(dir.path());

        push_artifact(addr, b"orphan", TIMEOUT).unwrap();
        send_command(addr, Verb::Close, "", TIMEOUT).unwrap();

        join.join().unwrap().unwrap();
        let path = dir.path().join(format!("{UNNAMED_ARTIFACT}.csv"));
        assert_eq!(std::fs::read(path).unwrap(), b"orphan");
    }

    #[test]
    fn close_drains_every_queued_payload() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, join) = spawn_server(dir.path());

        // Everything on one connection, so CLOSE is read right behind the payloads.
        let mut stream = TcpStream::connect(addr).unwrap();
        capture_sync_proto::write_command(&mut stream, Verb::File, "bulk").unwrap();
        let n = 12;
        for i in 0..n {
            capture_sync_proto::write_message(&mut stream, &vec![b'x'; 4096 + i]).unwrap();
        }
        capture_sync_proto::write_command(&mut stream, Verb::Close, "").unwrap();

        let summary = join.join().unwrap().unwrap();
        assert_eq!(summary.writer.written.len(), n);
        assert_eq!(summary.writer.failed, 0);
        let on_disk = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(on_disk, n);
        // The listener is released once serve returns.
        assert!(TcpListener::bind(addr).is_ok());
    }

    #[test]
    fn protocol_violation_drops_connection_but_keeps_listening() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, join) = spawn_server(dir.path());

        let mut bad = TcpStream::connect(addr).unwrap();
        capture_sync_proto::write_message(&mut bad, b"COMMAND:FILE").unwrap();
        drop(bad);

        send_command(addr, Verb::File, "after", TIMEOUT).unwrap();
        push_artifact(addr, b"ok", TIMEOUT).unwrap();
        send_command(addr, Verb::Close, "", TIMEOUT).unwrap();

        let summary = join.join().unwrap().unwrap();
        assert_eq!(summary.connections, 4);
        assert_eq!(std::fs::read(dir.path().join("after.csv")).unwrap(), b"ok");
    }

    #[test]
    fn short_read_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, join) = spawn_server(dir.path());

        let mut partial = TcpStream::connect(addr).unwrap();
        use std::io::Write;
        partial.write_all(&100u32.to_be_bytes()).unwrap();
        partial.write_all(b"only a few").unwrap();
        drop(partial);

        send_command(addr, Verb::Close, "", TIMEOUT).unwrap();
        let summary = join.join().unwrap().unwrap();
        assert!(summary.writer.written.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
