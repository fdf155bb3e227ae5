//! Hub startup: load config, build backends, initialise the session, serve operators.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result, anyhow};

use crate::backend::{
    BackendRecorder, CameraBackend, FfmpegCapture, MocapBackend, RemoteFaceBackend, SceneBackend,
    camera, decorate,
};
use crate::cli::Args;
use crate::collaborators::{AutoConfirm, ConfirmDialog, ConsoleDialog};
use crate::config::{self, DialogMode, FaceSettings, HubConfig};
use crate::control_server::ControlServer;
use crate::dispatch::{device_dispatcher, spawn_listener};
use crate::lifecycle::SessionLifecycle;
use crate::orchestrator::Orchestrator;
use crate::remote::RemoteControlClient;

/// Run the hub until the session is closed or shutdown is requested.
pub async fn run(args: Args) -> Result<()> {
    if args.list_devices {
        let devices = camera::list_devices(&args.ffmpeg).await?;
        println!("video devices:");
        for (i, d) in devices.video.iter().enumerate() {
            println!("#{i}: {d}");
        }
        println!("audio devices:");
        for (i, d) in devices.audio.iter().enumerate() {
            println!("#{i}: {d}");
        }
        return Ok(());
    }

    let cfg = load_config(args.config.as_ref())?;
    let bind = resolve_bind(args.bind, &cfg)?;
    let initial_name = config::initial_name_from_config(&cfg);
    let fanout_timeout = config::fanout_timeout_from_config(&cfg);
    let save_timeout = config::save_timeout_from_config(&cfg);

    let lifecycle = SessionLifecycle::new();
    let signal = lifecycle.clone();
    ctrlc::set_handler(move || signal.request_shutdown()).context("install ctrl-c handler")?;

    let dialog = dialog_for(config::dialog_mode_from_config(&cfg));
    let (backends, listeners) = build_backends(&cfg, &initial_name, dialog, &lifecycle)?;
    if backends.is_empty() {
        return Err(anyhow!("no backends enabled in config"));
    }
    tracing::info!(count = backends.len(), name = %initial_name, "validating backends");

    let orch = Orchestrator::initialize(backends, &initial_name, fanout_timeout, lifecycle.clone())
        .await
        .context("initialize session")?
        .with_save_timeout(save_timeout);
    let server = ControlServer::bind(bind, lifecycle.clone()).await?;
    let served = server.serve(orch).await;

    lifecycle.request_shutdown();
    for handle in listeners {
        if !matches!(tokio::task::spawn_blocking(move || handle.join()).await, Ok(Ok(()))) {
            tracing::warn!("osc listener did not stop cleanly");
        }
    }
    served
}

fn dialog_for(mode: DialogMode) -> Arc<dyn ConfirmDialog> {
    match mode {
        DialogMode::Console => Arc::new(ConsoleDialog),
        DialogMode::AutoYes => Arc::new(AutoConfirm(true)),
        DialogMode::AutoNo => Arc::new(AutoConfirm(false)),
    }
}

/// Build every enabled backend. Returned handles belong to background OSC listeners.
fn build_backends(
    cfg: &HubConfig,
    initial_name: &str,
    dialog: Arc<dyn ConfirmDialog>,
    lifecycle: &SessionLifecycle,
) -> Result<(Vec<Box<dyn BackendRecorder>>, Vec<JoinHandle<()>>)> {
    let mut backends: Vec<Box<dyn BackendRecorder>> = Vec::new();
    let mut listeners = Vec::new();

    if let Some(face) = config::face_from_config(cfg)? {
        let (backend, listener) = face_backend(face, initial_name, lifecycle)?;
        backends.push(backend);
        listeners.push(listener);
    }
    if let Some(camera) = config::camera_from_config(cfg)? {
        backends.push(Box::new(CameraBackend::new(
            "camera",
            camera.device_id,
            camera.root,
            Box::new(FfmpegCapture::new(camera.ffmpeg)),
        )));
    }
    if let Some(scene) = config::scene_from_config(cfg)? {
        backends.push(Box::new(SceneBackend::new(
            "scene",
            scene.device_id,
            Box::new(scene.recorder),
            dialog,
            scene.root,
            scene.buffer,
            scene.retry,
        )));
    }
    if let Some(mocap) = config::mocap_from_config(cfg)? {
        backends.push(Box::new(MocapBackend::new(
            "mocap",
            mocap.device_id,
            Box::new(mocap.host),
        )));
    }
    Ok((backends, listeners))
}

fn face_backend(
    face: FaceSettings,
    initial_name: &str,
    lifecycle: &SessionLifecycle,
) -> Result<(Box<dyn BackendRecorder>, JoinHandle<()>)> {
    let client = Arc::new(
        RemoteControlClient::connect(
            face.device_addr,
            &decorate(initial_name, &face.device_id),
            face.targets.clone(),
        )
        .context("open face control socket")?,
    );
    let dispatcher = device_dispatcher(client.clone(), face.channels.clone(), lifecycle.clone())?;
    let (local, listener) = spawn_listener(face.listen, dispatcher, lifecycle.clone())
        .with_context(|| format!("bind face callback listener {}", face.listen))?;
    let backend = RemoteFaceBackend::new(
        "face",
        face.device_id,
        client,
        face.channels,
        (face.advertise_host, local.port()),
        face.command_timeout,
    );
    Ok((Box::new(backend), listener))
}

/// Load hub config from `--config` or `config.toml` next to the executable.
fn load_config(path: Option<&PathBuf>) -> Result<HubConfig> {
    match path {
        Some(path) => HubConfig::load(path),
        None => {
            let auto_path = std::env::current_exe()
                .ok()
                .and_then(|path| path.parent().map(|dir| dir.join("config.toml")));
            match auto_path {
                Some(path) if path.exists() => HubConfig::load(&path),
                _ => Err(anyhow!("config file is required; use --config")),
            }
        }
    }
}

/// Resolve the session-control bind address from args + config.
fn resolve_bind(
    bind: Option<std::net::SocketAddr>,
    cfg: &HubConfig,
) -> Result<std::net::SocketAddr> {
    Ok(match bind {
        Some(addr) => addr,
        None => config::bind_from_config(cfg)?.unwrap_or_else(config::default_bind),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_prefers_cli_over_config() {
        let cfg: HubConfig = toml::from_str("[control]\nbind = \"0.0.0.0:9100\"\n").unwrap();
        let cli = "127.0.0.1:7000".parse().unwrap();
        assert_eq!(resolve_bind(Some(cli), &cfg).unwrap(), cli);
        assert_eq!(
            resolve_bind(None, &cfg).unwrap(),
            "0.0.0.0:9100".parse().unwrap()
        );
        assert_eq!(
            resolve_bind(None, &HubConfig::default()).unwrap(),
            config::default_bind()
        );
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn backends_follow_enabled_sections() {
        let root = tempfile::tempdir().unwrap();
        let raw = format!(
            r#"
            [camera]
            root = '{root}'
            video_device = "cam"
            audio_device = "mic"
            skip_validation = true

            [mocap]
            enabled = false
            capture_folder = '{root}'

            [scene]
            device_id = "obs"
            root = '{root}'
            buffer = '{root}/buffer'
            "#,
            root = root.path().display()
        );
        let cfg: HubConfig = toml::from_str(&raw).unwrap();
        let (backends, listeners) = build_backends(
            &cfg,
            "hello",
            Arc::new(AutoConfirm(true)),
            &SessionLifecycle::new(),
        )
        .unwrap();
        let ids: Vec<&str> = backends.iter().map(|b| b.id()).collect();
        assert_eq!(ids, ["camera", "scene"]);
        assert_eq!(backends[1].device_id(), "obs");
        assert!(listeners.is_empty());
    }
}
