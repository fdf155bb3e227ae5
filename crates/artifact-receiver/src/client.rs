//! Sender side of the data plane.
//!
//! Each call opens a fresh connection, writes one message and closes, which is how the hub
//! and the phone address a channel.

use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use capture_sync_proto::transfer::{COMMAND_MARKER, Verb, write_command, write_message};

fn connect(addr: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    let stream =
        TcpStream::connect_timeout(&addr, timeout).with_context(|| format!("connect {addr}"))?;
    stream.set_write_timeout(Some(timeout)).ok();
    stream.set_nodelay(true).ok();
    Ok(stream)
}

/// Send a single `COMMAND:VERB!ARG` message.
pub fn send_command(addr: SocketAddr, verb: Verb, argument: &str, timeout: Duration) -> Result<()> {
    let mut stream = connect(addr, timeout)?;
    write_command(&mut stream, verb, argument)
        .with_context(|| format!("send {verb} to {addr}"))?;
    tracing::debug!(addr = %addr, verb = %verb, argument, "command sent");
    Ok(())
}

/// Push raw artifact bytes as one payload message.
pub fn push_artifact(addr: SocketAddr, bytes: &[u8], timeout: Duration) -> Result<()> {
    if bytes.starts_with(COMMAND_MARKER) {
        bail!("artifact bytes start with the reserved command marker");
    }
    let mut stream = connect(addr, timeout)?;
    write_message(&mut stream, bytes).with_context(|| format!("push artifact to {addr}"))?;
    tracing::debug!(addr = %addr, bytes = bytes.len(), "artifact pushed");
    Ok(())
}
