//! Receiver runtime helpers.
//!
//! `listen` binds every channel up front, then serves each on its own thread until it sees
//! `CLOSE`. Ctrl-C is turned into a `CLOSE` per channel so queued artifacts still reach disk.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use capture_sync_proto::Verb;

use crate::client::{push_artifact, send_command};
use crate::config::ReceiverListenConfig;
use crate::server::{ServeSummary, TransferServer};

const SHUTDOWN_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Serve all configured channels until each has been closed.
pub fn run_listen(config: ReceiverListenConfig) -> Result<Vec<ServeSummary>> {
    if config.channels.is_empty() {
        return Err(anyhow!("no channels configured"));
    }

    let mut servers = Vec::with_capacity(config.channels.len());
    for channel in config.channels {
        servers.push(TransferServer::bind(channel)?);
    }

    let local: Vec<SocketAddr> = servers
        .iter()
        .map(|s| s.local_addr().map(loopback_for))
        .collect::<std::io::Result<_>>()
        .context("read listener addresses")?;

    if config.install_ctrlc {
        let targets = local.clone();
        ctrlc::set_handler(move || {
            tracing::info!("interrupt; closing channels");
            let mut all_sent = true;
            for addr in &targets {
                if let Err(e) = send_command(*addr, Verb::Close, "", SHUTDOWN_CONNECT_TIMEOUT) {
                    tracing::warn!(addr = %addr, "close on interrupt failed: {e:#}");
                    all_sent = false;
                }
            }
            if !all_sent {
                std::process::exit(130);
            }
        })
        .context("install ctrl-c handler")?;
    }

    let handles: Vec<_> = servers
        .into_iter()
        .map(|server| std::thread::spawn(move || server.serve()))
        .collect();

    let mut summaries = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.join() {
            Ok(Ok(summary)) => summaries.push(summary),
            Ok(Err(e)) => tracing::error!("channel failed: {e:#}"),
            Err(_) => tracing::error!("channel thread panicked"),
        }
    }
    Ok(summaries)
}

/// Push one file to a channel.
pub fn run_send(to: SocketAddr, file: &Path, timeout: Duration) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("read {}", file.display()))?;
    push_artifact(to, &bytes, timeout)?;
    tracing::info!(to = %to, file = %file.display(), bytes = bytes.len(), "artifact sent");
    Ok(())
}

/// Send one control command to a channel.
pub fn run_command(to: SocketAddr, verb: Verb, arg: &str, timeout: Duration) -> Result<()> {
    send_command(to, verb, arg, timeout)?;
    tracing::info!(to = %to, verb = %verb, arg, "command sent");
    Ok(())
}

/// A wildcard bind address is not connectable; use loopback of the same family.
fn loopback_for(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;

    #[test]
    fn loopback_replaces_wildcard_only() {
        let wild: SocketAddr = "0.0.0.0:8007".parse().unwrap();
        assert_eq!(loopback_for(wild), "127.0.0.1:8007".parse().unwrap());
        let v6: SocketAddr = "[::]:8008".parse().unwrap();
        assert_eq!(loopback_for(v6), "[::1]:8008".parse().unwrap());
        let fixed: SocketAddr = "192.168.1.5:9000".parse().unwrap();
        assert_eq!(loopback_for(fixed), fixed);
    }

    #[test]
    fn run_listen_rejects_empty_config() {
        let err = run_listen(ReceiverListenConfig {
            channels: Vec::new(),
            install_ctrlc: false,
        })
        .unwrap_err();
        assert!(err.to_string().contains("no channels"));
    }

    #[test]
    fn handler_install_failure_is_reported() {
        // Only one ctrl-c handler may exist per process; this one makes the next install fail.
        let _ = ctrlc::set_handler(|| {});
        let dir = tempfile::tempdir().unwrap();
        let err = run_listen(ReceiverListenConfig {
            channels: vec![ChannelConfig {
                id: "csv".to_string(),
                bind: "127.0.0.1:0".parse().unwrap(),
                extension: "csv".to_string(),
                dest_dir: dir.path().to_path_buf(),
            }],
            install_ctrlc: true,
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("install ctrl-c handler"));
    }

    #[test]
    fn send_and_command_reach_a_listening_channel() {
        let dir = tempfile::tempdir().unwrap();
        let server = TransferServer::bind(ChannelConfig {
            id: "video".to_string(),
            bind: "127.0.0.1:0".parse().unwrap(),
            extension: "mov".to_string(),
            dest_dir: dir.path().join("out"),
        })
        .unwrap();
        let addr = server.local_addr().unwrap();
        let join = std::thread::spawn(move || server.serve());

        let src = dir.path().join("clip.bin");
        std::fs::write(&src, b"frames").unwrap();
        let timeout = Duration::from_secs(5);
        run_command(addr, Verb::File, "take_07_iphone", timeout).unwrap();
        run_send(addr, &src, timeout).unwrap();
        run_command(addr, Verb::Close, "", timeout).unwrap();

        let summary = join.join().unwrap().unwrap();
        assert_eq!(summary.channel, "video");
        assert_eq!(
            std::fs::read(dir.path().join("out").join("take_07_iphone.mov")).unwrap(),
            b"frames"
        );
    }
}
