//! Mobile face-capture device: OSC control plane plus the receiver's data-plane channels.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use artifact_receiver::client::send_command;
use async_trait::async_trait;
use capture_sync_proto::Verb;

use crate::backend::BackendRecorder;
use crate::error::BackendError;
use crate::remote::RemoteControlClient;

pub struct RemoteFaceBackend {
    id: String,
    device_id: String,
    client: Arc<RemoteControlClient>,
    /// Receiver channels, typically csv then video.
    channels: Vec<SocketAddr>,
    /// Address the device should send callbacks to.
    callback_host: String,
    callback_port: u16,
    timeout: Duration,
}

impl RemoteFaceBackend {
    pub fn new(
        id: impl Into<String>,
        device_id: impl Into<String>,
        client: Arc<RemoteControlClient>,
        channels: Vec<SocketAddr>,
        callback: (String, u16),
        timeout: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            device_id: device_id.into(),
            client,
            channels,
            callback_host: callback.0,
            callback_port: callback.1,
            timeout,
        }
    }

    /// Send one data-plane command to every channel. The first failure is returned after all
    /// channels have been tried.
    async fn broadcast(&self, verb: Verb, arg: &str) -> Result<(), BackendError> {
        let channels = self.channels.clone();
        let arg = arg.to_string();
        let timeout = self.timeout;
        let backend = self.id.clone();
        tokio::task::spawn_blocking(move || {
            let mut first_err = None;
            for addr in channels {
                if let Err(e) = send_command(addr, verb, &arg, timeout) {
                    tracing::warn!(backend = %backend, channel = %addr, verb = %verb, "{e:#}");
                    first_err.get_or_insert(BackendError::Transfer(format!("{addr}: {e:#}")));
                }
            }
            first_err.map_or(Ok(()), Err)
        })
        .await
        .map_err(|e| BackendError::Aborted(e.to_string()))?
    }
}

#[async_trait]
impl BackendRecorder for RemoteFaceBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn validate(&mut self) -> Result<(), BackendError> {
        self.client
            .announce(&self.callback_host, self.callback_port)?;
        self.broadcast(Verb::Alive, "").await
    }

    /// Once `/RecordStart` is out the device is recording, so the backend counts as started
    /// and will be stopped even if a channel misses RECORD.
    async fn start(&mut self) -> Result<(), BackendError> {
        let take = self.client.start_capture()?;
        if let Err(e) = self.broadcast(Verb::Record, "").await {
            tracing::warn!(backend = %self.id, take, error = %e, "partial start: device recording, channel not armed");
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), BackendError> {
        self.client.stop_capture()?;
        Ok(())
    }

    async fn artifacts_saved(&mut self) -> Result<bool, BackendError> {
        Ok(self.client.stop_confirmed())
    }

    async fn set_name(&mut self, name: &str) -> Result<(), BackendError> {
        self.client.set_name(name)?;
        self.broadcast(Verb::File, name).await
    }

    async fn ping(&mut self) -> Result<(), BackendError> {
        self.client.request_battery()?;
        self.broadcast(Verb::Alive, "").await
    }

    async fn shutdown(&mut self) -> Result<(), BackendError> {
        self.broadcast(Verb::Close, "").await
    }
}
