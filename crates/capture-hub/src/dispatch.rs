//! Inbound OSC callbacks from the mobile device.
//!
//! Handlers are keyed by OSC address and checked when registered. Anything without a handler
//! goes to the default handler; an unknown address is never an error.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use artifact_receiver::client::send_command;
use capture_sync_proto::osc::decode_packet;
use capture_sync_proto::{OscMessage, Verb};

use crate::error::RegistrationError;
use crate::lifecycle::SessionLifecycle;
use crate::remote::RemoteControlClient;

const RECV_TIMEOUT: Duration = Duration::from_millis(250);
const MAX_DATAGRAM: usize = 64 * 1024;
const ALIVE_TIMEOUT: Duration = Duration::from_secs(2);

pub trait OscHandler: Send + Sync {
    fn handle(&self, msg: &OscMessage);
}

impl<F> OscHandler for F
where
    F: Fn(&OscMessage) + Send + Sync,
{
    fn handle(&self, msg: &OscMessage) {
        self(msg)
    }
}

pub struct OscDispatcher {
    handlers: HashMap<String, Box<dyn OscHandler>>,
    default: Box<dyn OscHandler>,
}

impl OscDispatcher {
    pub fn new(default: impl OscHandler + 'static) -> Self {
        Self {
            handlers: HashMap::new(),
            default: Box::new(default),
        }
    }

    pub fn register(
        &mut self,
        addr: &str,
        handler: impl OscHandler + 'static,
    ) -> Result<(), RegistrationError> {
        if !addr.starts_with('/') || addr.len() < 2 || addr.contains(char::is_whitespace) {
            return Err(RegistrationError::InvalidAddress(addr.to_string()));
        }
        if self.handlers.contains_key(addr) {
            return Err(RegistrationError::Duplicate(addr.to_string()));
        }
        self.handlers.insert(addr.to_string(), Box::new(handler));
        Ok(())
    }

    pub fn dispatch(&self, msg: &OscMessage) {
        match self.handlers.get(&msg.addr) {
            Some(handler) => handler.handle(msg),
            None => self.default.handle(msg),
        }
    }

    pub fn is_registered(&self, addr: &str) -> bool {
        self.handlers.contains_key(addr)
    }
}

fn log_unhandled(msg: &OscMessage) {
    tracing::info!(addr = %msg.addr, args = ?msg.args, "unhandled osc message");
}

/// Handler table for the face-capture device.
pub fn device_dispatcher(
    client: Arc<RemoteControlClient>,
    channels: Vec<SocketAddr>,
    lifecycle: SessionLifecycle,
) -> Result<OscDispatcher, RegistrationError> {
    let mut dispatcher = OscDispatcher::new(log_unhandled);

    dispatcher.register("/OSCSetSendTargetConfirm", |msg: &OscMessage| {
        tracing::info!(args = ?msg.args, "device confirmed callback target");
    })?;

    let stop_client = client.clone();
    dispatcher.register("/RecordStopConfirm", move |msg: &OscMessage| {
        let (Some(csv), Some(mov)) = (msg.str_arg(1), msg.str_arg(2)) else {
            tracing::warn!(args = ?msg.args, "RecordStopConfirm without artifact references");
            return;
        };
        tracing::info!(timecode = ?msg.args.first(), csv, mov, "device saved take");
        if let Err(e) = stop_client.request_artifacts(csv, mov) {
            tracing::warn!(error = %e, "transport request failed");
        }
    })?;

    let battery_client = client;
    dispatcher.register("/BatteryQueryConfirm", move |msg: &OscMessage| {
        match msg.args.first().and_then(|a| a.as_f64()) {
            Some(level) => battery_client.record_battery(level),
            None => tracing::warn!(args = ?msg.args, "battery report without level"),
        }
    })?;

    dispatcher.register("/Alive", move |_: &OscMessage| {
        tracing::info!("device liveness check");
        for addr in &channels {
            if let Err(e) = send_command(*addr, Verb::Alive, "", ALIVE_TIMEOUT) {
                tracing::warn!(channel = %addr, "alive relay failed: {e:#}");
            }
        }
    })?;

    dispatcher.register("/QuitServer", move |_: &OscMessage| {
        tracing::info!("device requested quit");
        lifecycle.request_shutdown();
    })?;

    Ok(dispatcher)
}

/// Receive datagrams on `bind` and dispatch them until shutdown is requested.
pub fn spawn_listener(
    bind: SocketAddr,
    dispatcher: OscDispatcher,
    lifecycle: SessionLifecycle,
) -> io::Result<(SocketAddr, JoinHandle<()>)> {
    let socket = UdpSocket::bind(bind)?;
    socket.set_read_timeout(Some(RECV_TIMEOUT))?;
    let local = socket.local_addr()?;
    tracing::info!(bind = %local, "osc listener started");

    let handle = std::thread::spawn(move || {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        while !lifecycle.is_shutting_down() {
            let (n, peer) = match socket.recv_from(&mut buf) {
                Ok(x) => x,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "osc receive error");
                    continue;
                }
            };
            match decode_packet(&buf[..n]) {
                Ok(messages) => {
                    for msg in &messages {
                        tracing::debug!(peer = %peer, addr = %msg.addr, "osc received");
                        dispatcher.dispatch(msg);
                    }
                }
                Err(e) => tracing::warn!(peer = %peer, error = %e, "malformed osc packet"),
            }
        }
        tracing::info!("osc listener stopped");
    });
    Ok((local, handle))
}
