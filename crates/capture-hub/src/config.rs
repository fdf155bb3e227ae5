//! Configuration loading and parsing.
//!
//! Defines the hub config schema and resolves it into backend settings. Each backend
//! section is enabled when present unless it sets `enabled = false`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::backend::FfmpegSettings;
use crate::hooks::{CommandHook, HookMocapHost, HookSceneRecorder};
use crate::naming::RetryPolicy;
use crate::orchestrator::DEFAULT_SAVE_TIMEOUT;
use crate::remote::TransportTargets;

const DEFAULT_INITIAL_NAME: &str = "session";
const DEFAULT_FANOUT_TIMEOUT_MS: u64 = 10_000;

/// Top-level hub configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct HubConfig {
    pub session: Option<SessionConfig>,
    /// Session-control line server.
    pub control: Option<ControlConfig>,
    pub fanout: Option<FanoutConfig>,
    pub face: Option<FaceConfig>,
    pub camera: Option<CameraConfig>,
    pub scene: Option<SceneConfig>,
    pub mocap: Option<MocapConfig>,
    pub dialog: Option<DialogConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionConfig {
    /// Name slated at startup.
    pub initial_name: Option<String>,
    /// Seconds a stopped take may wait for its artifacts.
    pub save_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ControlConfig {
    /// Bind address (host:port).
    pub bind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FanoutConfig {
    /// Per-backend bound on each fan-out call, in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Mobile face-capture device.
#[derive(Debug, Default, Deserialize)]
pub struct FaceConfig {
    pub enabled: Option<bool>,
    pub device_id: Option<String>,
    /// Device OSC address (host:port).
    pub device_addr: String,
    /// Local OSC callback listener (host:port).
    pub listen: String,
    /// Host the device should send callbacks to (defaults to the listen host).
    pub advertise_host: Option<String>,
    /// Host running the artifact receiver.
    pub receiver_host: String,
    pub csv_port: u16,
    pub video_port: u16,
    /// Data-plane command timeout in milliseconds.
    pub command_timeout_ms: Option<u64>,
}

/// Optical camera recorded through ffmpeg.
#[derive(Debug, Default, Deserialize)]
pub struct CameraConfig {
    pub enabled: Option<bool>,
    pub device_id: Option<String>,
    /// Save root; recordings go to `{root}/{YYYY-MM-DD}`.
    pub root: String,
    pub program: Option<String>,
    pub input_format: Option<String>,
    pub video_device: String,
    pub audio_device: String,
    pub resolution: Option<String>,
    pub framerate: Option<u32>,
    pub bitrate: Option<String>,
    pub skip_validation: Option<bool>,
}

/// Scene recorder driven by command hooks.
#[derive(Debug, Default, Deserialize)]
pub struct SceneConfig {
    pub enabled: Option<bool>,
    pub device_id: Option<String>,
    pub root: String,
    /// Folder some sources write into; emptied into the take folder on stop.
    pub buffer: String,
    /// Recorder websocket/TCP address used as a reachability check.
    pub reach_addr: Option<String>,
    pub start: Option<Vec<String>>,
    pub stop: Option<Vec<String>>,
    /// `{dir}` is replaced with the take folder.
    pub set_directory: Option<Vec<String>>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

/// Motion-capture host driven by command hooks.
#[derive(Debug, Default, Deserialize)]
pub struct MocapConfig {
    pub enabled: Option<bool>,
    pub device_id: Option<String>,
    pub capture_folder: String,
    /// Host address used as a reachability check.
    pub host: Option<String>,
    pub start: Option<Vec<String>>,
    pub stop: Option<Vec<String>>,
    /// `{name}` is replaced with the decorated capture name.
    pub set_name: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DialogMode {
    #[default]
    Console,
    AutoYes,
    AutoNo,
}

#[derive(Debug, Default, Deserialize)]
pub struct DialogConfig {
    pub mode: Option<DialogMode>,
}

impl HubConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg =
            toml::from_str::<HubConfig>(&raw).with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Resolved face-capture settings.
#[derive(Debug, Clone)]
pub struct FaceSettings {
    pub device_id: String,
    pub device_addr: SocketAddr,
    pub listen: SocketAddr,
    pub advertise_host: String,
    pub targets: TransportTargets,
    /// Receiver channels the hub arms directly: csv then video.
    pub channels: Vec<SocketAddr>,
    pub command_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device_id: String,
    pub root: PathBuf,
    pub ffmpeg: FfmpegSettings,
}

#[derive(Debug, Clone)]
pub struct SceneSettings {
    pub device_id: String,
    pub root: PathBuf,
    pub buffer: PathBuf,
    pub recorder: HookSceneRecorder,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct MocapSettings {
    pub device_id: String,
    pub host: HookMocapHost,
}

fn enabled(flag: Option<bool>) -> bool {
    flag.unwrap_or(true)
}

fn parse_addr(raw: &str, what: &str) -> Result<SocketAddr> {
    raw.trim()
        .parse()
        .with_context(|| format!("parse {what} {raw}"))
}

fn parse_optional_addr(raw: Option<&str>, what: &str) -> Result<Option<SocketAddr>> {
    raw.map(|r| parse_addr(r, what)).transpose()
}

fn required_path(raw: &str, what: &str) -> Result<PathBuf> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("{what} is required in config"));
    }
    Ok(PathBuf::from(trimmed))
}

/// Parse the optional session-control bind address.
pub fn bind_from_config(cfg: &HubConfig) -> Result<Option<SocketAddr>> {
    let Some(bind) = cfg.control.as_ref().and_then(|c| c.bind.as_deref()) else {
        return Ok(None);
    };
    Ok(Some(parse_addr(bind, "control bind")?))
}

pub fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8765))
}

pub fn initial_name_from_config(cfg: &HubConfig) -> String {
    cfg.session
        .as_ref()
        .and_then(|s| s.initial_name.as_deref())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_INITIAL_NAME)
        .to_string()
}

pub fn fanout_timeout_from_config(cfg: &HubConfig) -> Duration {
    let ms = cfg
        .fanout
        .as_ref()
        .and_then(|f| f.timeout_ms)
        .unwrap_or(DEFAULT_FANOUT_TIMEOUT_MS);
    Duration::from_millis(ms)
}

pub fn save_timeout_from_config(cfg: &HubConfig) -> Duration {
    cfg.session
        .as_ref()
        .and_then(|s| s.save_timeout_secs)
        .map_or(DEFAULT_SAVE_TIMEOUT, Duration::from_secs)
}

pub fn dialog_mode_from_config(cfg: &HubConfig) -> DialogMode {
    cfg.dialog
        .as_ref()
        .and_then(|d| d.mode)
        .unwrap_or_default()
}

pub fn face_from_config(cfg: &HubConfig) -> Result<Option<FaceSettings>> {
    let Some(face) = cfg.face.as_ref().filter(|f| enabled(f.enabled)) else {
        return Ok(None);
    };
    let device_addr = parse_addr(&face.device_addr, "face device_addr")?;
    let listen = parse_addr(&face.listen, "face listen")?;
    let advertise_host = face
        .advertise_host
        .clone()
        .unwrap_or_else(|| listen.ip().to_string());
    let targets = TransportTargets {
        receiver_host: face.receiver_host.trim().to_string(),
        csv_port: face.csv_port,
        video_port: face.video_port,
    };
    let channels = vec![
        parse_addr(&targets.csv(), "face csv channel")?,
        parse_addr(&targets.video(), "face video channel")?,
    ];
    Ok(Some(FaceSettings {
        device_id: face.device_id.clone().unwrap_or_default(),
        device_addr,
        listen,
        advertise_host,
        targets,
        channels,
        command_timeout: Duration::from_millis(face.command_timeout_ms.unwrap_or(2000)),
    }))
}

pub fn camera_from_config(cfg: &HubConfig) -> Result<Option<CameraSettings>> {
    let Some(camera) = cfg.camera.as_ref().filter(|c| enabled(c.enabled)) else {
        return Ok(None);
    };
    let defaults = FfmpegSettings::default();
    let ffmpeg = FfmpegSettings {
        program: camera.program.clone().unwrap_or(defaults.program),
        input_format: camera.input_format.clone().unwrap_or(defaults.input_format),
        video_device: camera.video_device.clone(),
        audio_device: camera.audio_device.clone(),
        resolution: camera.resolution.clone().unwrap_or(defaults.resolution),
        framerate: camera.framerate.unwrap_or(defaults.framerate),
        bitrate: camera.bitrate.clone().unwrap_or(defaults.bitrate),
        stop_grace: defaults.stop_grace,
        skip_validation: camera.skip_validation.unwrap_or(defaults.skip_validation),
    };
    Ok(Some(CameraSettings {
        device_id: camera.device_id.clone().unwrap_or_default(),
        root: required_path(&camera.root, "camera root")?,
        ffmpeg,
    }))
}

pub fn scene_from_config(cfg: &HubConfig) -> Result<Option<SceneSettings>> {
    let Some(scene) = cfg.scene.as_ref().filter(|s| enabled(s.enabled)) else {
        return Ok(None);
    };
    let defaults = RetryPolicy::default();
    let retry = RetryPolicy {
        max_retries: scene.max_retries.unwrap_or(defaults.max_retries),
        delay: scene
            .retry_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.delay),
    };
    let recorder = HookSceneRecorder {
        start: CommandHook::optional(scene.start.clone()).context("scene start hook")?,
        stop: CommandHook::optional(scene.stop.clone()).context("scene stop hook")?,
        set_directory: CommandHook::optional(scene.set_directory.clone())
            .context("scene set_directory hook")?,
        reach_addr: parse_optional_addr(scene.reach_addr.as_deref(), "scene reach_addr")?,
    };
    Ok(Some(SceneSettings {
        device_id: scene.device_id.clone().unwrap_or_default(),
        root: required_path(&scene.root, "scene root")?,
        buffer: required_path(&scene.buffer, "scene buffer")?,
        recorder,
        retry,
    }))
}

pub fn mocap_from_config(cfg: &HubConfig) -> Result<Option<MocapSettings>> {
    let Some(mocap) = cfg.mocap.as_ref().filter(|m| enabled(m.enabled)) else {
        return Ok(None);
    };
    let host = HookMocapHost {
        start: CommandHook::optional(mocap.start.clone()).context("mocap start hook")?,
        stop: CommandHook::optional(mocap.stop.clone()).context("mocap stop hook")?,
        set_name: CommandHook::optional(mocap.set_name.clone()).context("mocap set_name hook")?,
        capture_folder: required_path(&mocap.capture_folder, "mocap capture_folder")?,
        host: parse_optional_addr(mocap.host.as_deref(), "mocap host")?,
    };
    Ok(Some(MocapSettings {
        device_id: mocap.device_id.clone().unwrap_or_default(),
        host,
    }))
}
