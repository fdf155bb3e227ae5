//! Remote Control Client for the mobile face-capture device.
//!
//! Outbound calls are single OSC datagrams with no acknowledgement and no retry. Inbound
//! callbacks arrive on a separate listener (see [`crate::dispatch`]).
//!
//! Take numbering: a take advances when a stop is sent, never on start, so repeated starts
//! without a stop reuse the same number. Re-slating the current name keeps the take; a new
//! name resets it to 0.
//!
//! A stop leaves the take unconfirmed until the device answers with `RecordStopConfirm` and
//! the artifact transports have been requested.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Mutex, MutexGuard};

use capture_sync_proto::{OscArg, OscMessage};

/// Where the device should push artifacts after a take: the two receiver channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportTargets {
    pub receiver_host: String,
    pub csv_port: u16,
    pub video_port: u16,
}

impl TransportTargets {
    pub fn csv(&self) -> String {
        format!("{}:{}", self.receiver_host, self.csv_port)
    }

    pub fn video(&self) -> String {
        format!("{}:{}", self.receiver_host, self.video_port)
    }
}

#[derive(Debug)]
struct Slate {
    name: String,
    take: u32,
    awaiting_confirm: bool,
}

#[derive(Debug)]
pub struct RemoteControlClient {
    socket: UdpSocket,
    device: SocketAddr,
    targets: TransportTargets,
    slate: Mutex<Slate>,
    battery: Mutex<Option<f64>>,
}

impl RemoteControlClient {
    /// Bind an ephemeral sending socket for `device`.
    pub fn connect(
        device: SocketAddr,
        initial_name: &str,
        targets: TransportTargets,
    ) -> io::Result<Self> {
        let bind: SocketAddr = if device.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind)?;
        tracing::info!(device = %device, "remote control client ready");
        Ok(Self {
            socket,
            device,
            targets,
            slate: Mutex::new(Slate {
                name: initial_name.to_string(),
                take: 0,
                awaiting_confirm: false,
            }),
            battery: Mutex::new(None),
        })
    }

    pub fn device(&self) -> SocketAddr {
        self.device
    }

    pub fn name(&self) -> String {
        self.slate().name.clone()
    }

    pub fn take(&self) -> u32 {
        self.slate().take
    }

    /// False between a stop and the device's `RecordStopConfirm`.
    pub fn stop_confirmed(&self) -> bool {
        !self.slate().awaiting_confirm
    }

    pub fn last_battery(&self) -> Option<f64> {
        *self.battery.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn record_battery(&self, level: f64) {
        tracing::info!(device = %self.device, level, "battery level");
        *self.battery.lock().unwrap_or_else(|e| e.into_inner()) = Some(level);
    }

    /// Tell the device where to send callbacks, switch its preview on, and slate the
    /// current name.
    pub fn announce(&self, callback_host: &str, callback_port: u16) -> io::Result<()> {
        self.send(
            OscMessage::new("/OSCSetSendTarget")
                .with_arg(callback_host)
                .with_arg(i32::from(callback_port)),
        )?;
        self.send(OscMessage::new("/VideoDisplayOn"))?;
        let name = self.name();
        self.send(OscMessage::new("/Slate").with_arg(name))
    }

    /// Start recording; returns the take number used.
    pub fn start_capture(&self) -> io::Result<u32> {
        let (name, take) = {
            let slate = self.slate();
            (slate.name.clone(), slate.take)
        };
        self.send(
            OscMessage::new("/RecordStart")
                .with_arg(name.as_str())
                .with_arg(OscArg::Int(take_arg(take))),
        )?;
        tracing::info!(device = %self.device, name = %name, take, "remote capture started");
        Ok(take)
    }

    pub fn stop_capture(&self) -> io::Result<()> {
        self.send(OscMessage::new("/RecordStop"))?;
        let mut slate = self.slate();
        tracing::info!(device = %self.device, name = %slate.name, take = slate.take, "remote capture stopped");
        slate.take += 1;
        slate.awaiting_confirm = true;
        Ok(())
    }

    pub fn set_name(&self, name: &str) -> io::Result<()> {
        self.send(OscMessage::new("/Slate").with_arg(name))?;
        let mut slate = self.slate();
        if slate.name != name {
            slate.name = name.to_string();
            slate.take = 0;
        }
        Ok(())
    }

    pub fn request_battery(&self) -> io::Result<()> {
        self.send(OscMessage::new("/BatteryQuery"))
    }

    /// Ask the device to push `artifact` to `host_port` over the data plane.
    pub fn transport(&self, host_port: &str, artifact: &str) -> io::Result<()> {
        tracing::info!(device = %self.device, to = host_port, artifact, "requesting transport");
        self.send(
            OscMessage::new("/Transport")
                .with_arg(host_port)
                .with_arg(artifact),
        )
    }

    /// Handle `RecordStopConfirm`: route the motion CSV and the reference video to their
    /// receiver channels.
    pub fn request_artifacts(&self, csv_ref: &str, mov_ref: &str) -> io::Result<()> {
        self.slate().awaiting_confirm = false;
        self.transport(&self.targets.csv(), csv_ref)?;
        self.transport(&self.targets.video(), mov_ref)
    }

    fn send(&self, msg: OscMessage) -> io::Result<()> {
        let bytes = msg.encode()?;
        self.socket.send_to(&bytes, self.device)?;
        tracing::debug!(device = %self.device, addr = %msg.addr, args = ?msg.args, "osc sent");
        Ok(())
    }

    fn slate(&self) -> MutexGuard<'_, Slate> {
        self.slate.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn take_arg(take: u32) -> i32 {
    i32::try_from(take).unwrap_or(i32::MAX)
}
