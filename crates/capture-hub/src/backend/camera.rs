//! Optical camera recorded through an ffmpeg subprocess.
//!
//! Recordings land in `{root}/{YYYY-MM-DD}/{name}.mp4`, numbered when the name is taken.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::backend::BackendRecorder;
use crate::collaborators::VideoCapture;
use crate::error::BackendError;
use crate::naming::{dated_folder, unique_file_name};

const RECORDING_EXTENSION: &str = "mp4";

/// ffmpeg invocation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegSettings {
    pub program: String,
    /// Input format, `dshow` on Windows.
    pub input_format: String,
    pub video_device: String,
    pub audio_device: String,
    pub resolution: String,
    pub framerate: u32,
    pub bitrate: String,
    /// Trailing-frame grace period before `q` is sent.
    pub stop_grace: Duration,
    /// Skip device enumeration (non-Windows hosts cannot enumerate dshow devices).
    pub skip_validation: bool,
}

impl Default for FfmpegSettings {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            input_format: "dshow".to_string(),
            video_device: String::new(),
            audio_device: String::new(),
            resolution: "1920x1080".to_string(),
            framerate: 60,
            bitrate: "5000k".to_string(),
            stop_grace: Duration::from_secs(1),
            skip_validation: false,
        }
    }
}

impl FfmpegSettings {
    fn record_args(&self, output: &Path) -> Vec<String> {
        vec![
            "-f".to_string(),
            self.input_format.clone(),
            "-i".to_string(),
            format!("video={}:audio={}", self.video_device, self.audio_device),
            "-vf".to_string(),
            "format=yuv420p".to_string(),
            "-s".to_string(),
            self.resolution.clone(),
            "-r".to_string(),
            self.framerate.to_string(),
            "-preset".to_string(),
            "fast".to_string(),
            "-y".to_string(),
            "-b:v".to_string(),
            self.bitrate.clone(),
            "-shortest".to_string(),
            output.to_string_lossy().into_owned(),
        ]
    }
}

/// Capture devices reported by ffmpeg.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceList {
    pub audio: Vec<String>,
    pub video: Vec<String>,
}

/// Parse the stderr of `ffmpeg -list_devices true -f dshow -i dummy`.
pub fn parse_dshow_devices(output: &str) -> DeviceList {
    #[derive(Clone, Copy)]
    enum Section {
        Audio,
        Video,
    }

    let mut devices = DeviceList::default();
    let mut section = None;
    for line in output.lines().map(str::trim) {
        if line.contains("DirectShow audio devices") || line.contains("(audio)") {
            section = Some(Section::Audio);
        } else if line.contains("DirectShow video devices") || line.contains("(video)") {
            section = Some(Section::Video);
        }
        if !line.starts_with("[dshow @") {
            continue;
        }
        let Some(name) = line.split('"').nth(1).filter(|n| !n.is_empty()) else {
            continue;
        };
        if line.contains("Alternative name") {
            continue;
        }
        match section {
            Some(Section::Audio) => devices.audio.push(name.to_string()),
            Some(Section::Video) => devices.video.push(name.to_string()),
            None => {}
        }
    }
    devices
}

/// Enumerate capture devices. Only Windows hosts have dshow devices.
pub async fn list_devices(program: &str) -> Result<DeviceList, BackendError> {
    if !cfg!(windows) {
        tracing::info!("device listing is only supported on Windows");
        return Ok(DeviceList::default());
    }
    let output = Command::new(program)
        .args(["-list_devices", "true", "-f", "dshow", "-i", "dummy"])
        .stdin(Stdio::null())
        .output()
        .await?;
    Ok(parse_dshow_devices(&String::from_utf8_lossy(&output.stderr)))
}

/// Wait out the trailing-frame grace, send `q`, and wait for ffmpeg to finish the file.
/// The task owns the child, so dropping the returned handle leaves ffmpeg running to exit.
fn finalize(mut child: Child, grace: Duration) -> JoinHandle<io::Result<ExitStatus>> {
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(b"q").await {
                tracing::warn!(error = %e, "could not send quit to ffmpeg");
            }
        }
        child.wait().await
    })
}

pub struct FfmpegCapture {
    settings: FfmpegSettings,
    child: Option<Child>,
}

impl FfmpegCapture {
    pub fn new(settings: FfmpegSettings) -> Self {
        Self {
            settings,
            child: None,
        }
    }
}

#[async_trait]
impl VideoCapture for FfmpegCapture {
    async fn start(&mut self, output: &Path) -> Result<(), BackendError> {
        let child = Command::new(&self.settings.program)
            .args(self.settings.record_args(output))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        tracing::info!(output = %output.display(), pid = ?child.id(), "ffmpeg recording started");
        self.child = Some(child);
        Ok(())
    }

    async fn stop(&mut self) -> Result<bool, BackendError> {
        let Some(child) = self.child.take() else {
            return Ok(false);
        };
        let status = finalize(child, self.settings.stop_grace)
            .await
            .map_err(|e| BackendError::Aborted(e.to_string()))??;
        tracing::info!(status = %status, "ffmpeg exited");
        Ok(status.success())
    }

    async fn validate_devices(&self) -> Result<bool, BackendError> {
        if self.settings.skip_validation {
            return Ok(true);
        }
        let devices = list_devices(&self.settings.program).await?;
        if !devices.audio.contains(&self.settings.audio_device) {
            tracing::warn!(device = %self.settings.audio_device, available = ?devices.audio, "audio device not found");
            return Ok(false);
        }
        if !devices.video.contains(&self.settings.video_device) {
            tracing::warn!(device = %self.settings.video_device, available = ?devices.video, "video device not found");
            return Ok(false);
        }
        Ok(true)
    }

    fn is_recording(&self) -> bool {
        self.child.is_some()
    }
}

pub struct CameraBackend {
    id: String,
    device_id: String,
    root: PathBuf,
    name: String,
    capture: Box<dyn VideoCapture>,
    last_output: Option<PathBuf>,
}

impl CameraBackend {
    pub fn new(
        id: impl Into<String>,
        device_id: impl Into<String>,
        root: PathBuf,
        capture: Box<dyn VideoCapture>,
    ) -> Self {
        Self {
            id: id.into(),
            device_id: device_id.into(),
            root,
            name: "recording".to_string(),
            capture,
            last_output: None,
        }
    }

    pub fn last_output(&self) -> Option<&Path> {
        self.last_output.as_deref()
    }
}

#[async_trait]
impl BackendRecorder for CameraBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn validate(&mut self) -> Result<(), BackendError> {
        if !self.root.is_dir() {
            return Err(BackendError::Validation(format!(
                "save root {} does not exist",
                self.root.display()
            )));
        }
        if self.capture.validate_devices().await? {
            Ok(())
        } else {
            Err(BackendError::Validation(
                "configured capture devices not found".to_string(),
            ))
        }
    }

    async fn start(&mut self) -> Result<(), BackendError> {
        if self.capture.is_recording() {
            tracing::info!(backend = %self.id, "already recording");
            return Ok(());
        }
        let dir = dated_folder(&self.root, chrono::Local::now().date_naive())?;
        let output = dir.join(unique_file_name(&self.name, &dir, RECORDING_EXTENSION));
        self.capture.start(&output).await?;
        self.last_output = Some(output);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), BackendError> {
        if !self.capture.is_recording() {
            tracing::info!(backend = %self.id, "no recording in progress");
            return Ok(());
        }
        if self.capture.stop().await? {
            Ok(())
        } else {
            Err(BackendError::ProcessExit {
                command: "ffmpeg".to_string(),
                status: "unclean exit".to_string(),
                stderr: String::new(),
            })
        }
    }

    async fn set_name(&mut self, name: &str) -> Result<(), BackendError> {
        tracing::info!(backend = %self.id, name, "recording name set");
        self.name = name.to_string();
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), BackendError> {
        if self.capture.is_recording() {
            self.capture.stop().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    const LISTING: &str = r#"
[dshow @ 000001] DirectShow video devices (some may be both video and audio devices)
[dshow @ 000001]  "UT-VID 00K0626579"
[dshow @ 000001]     Alternative name "@device_pnp_\\?\usb#vid"
[dshow @ 000001] DirectShow audio devices
[dshow @ 000001]  "Digital Audio Interface (UT-AUD 00K0626579)"
dummy: Immediate exit requested
"#;

    #[test]
    fn parses_dshow_listing() {
        let devices = parse_dshow_devices(LISTING);
        assert_eq!(devices.video, vec!["UT-VID 00K0626579"]);
        assert_eq!(
            devices.audio,
            vec!["Digital Audio Interface (UT-AUD 00K0626579)"]
        );
    }

    #[test]
    fn parses_newer_listing_format() {
        let listing = "[dshow @ 01] \"Cam Link 4K\" (video)\n[dshow @ 01] \"Mic In\" (audio)\n";
        let devices = parse_dshow_devices(listing);
        assert_eq!(devices.video, vec!["Cam Link 4K"]);
        assert_eq!(devices.audio, vec!["Mic In"]);
    }

    #[test]
    fn record_args_name_both_devices() {
        let settings = FfmpegSettings {
            video_device: "cam".to_string(),
            audio_device: "mic".to_string(),
            ..FfmpegSettings::default()
        };
        let args = settings.record_args(Path::new("/out/take.mp4"));
        assert_eq!(args[3], "video=cam:audio=mic");
        assert_eq!(args.last().map(String::as_str), Some("/out/take.mp4"));
    }

    #[derive(Default)]
    struct FakeCapture {
        outputs: Arc<Mutex<Vec<PathBuf>>>,
        recording: bool,
    }

    #[async_trait]
    impl VideoCapture for FakeCapture {
        async fn start(&mut self, output: &Path) -> Result<(), BackendError> {
            std::fs::write(output, b"frames")?;
            self.outputs.lock().unwrap().push(output.to_path_buf());
            self.recording = true;
            Ok(())
        }

        async fn stop(&mut self) -> Result<bool, BackendError> {
            self.recording = false;
            Ok(true)
        }

        async fn validate_devices(&self) -> Result<bool, BackendError> {
            Ok(true)
        }

        fn is_recording(&self) -> bool {
            self.recording
        }
    }

    #[tokio::test]
    async fn takes_get_unique_names_in_dated_folder() {
        let root = tempfile::tempdir().unwrap();
        let outputs = Arc::new(Mutex::new(Vec::new()));
        let capture = FakeCapture {
            outputs: outputs.clone(),
            recording: false,
        };
        let mut camera = CameraBackend::new("camera", "cam1", root.path().to_path_buf(), Box::new(capture));
        camera.validate().await.unwrap();
        camera.set_name("hello_cam1").await.unwrap();

        camera.start().await.unwrap();
        camera.start().await.unwrap();
        camera.stop().await.unwrap();
        camera.start().await.unwrap();
        camera.stop().await.unwrap();

        let outputs = outputs.lock().unwrap().clone();
        assert_eq!(outputs.len(), 2);
        let day = root
            .path()
            .join(chrono::Local::now().date_naive().format("%Y-%m-%d").to_string());
        assert_eq!(outputs[0], day.join("hello_cam1.mp4"));
        assert_eq!(outputs[1], day.join("hello_cam1_1.mp4"));
    }

    #[tokio::test]
    async fn missing_root_fails_validation() {
        let root = tempfile::tempdir().unwrap();
        let mut camera = CameraBackend::new(
            "camera",
            "",
            root.path().join("missing"),
            Box::new(FakeCapture::default()),
        );
        assert!(matches!(
            camera.validate().await,
            Err(BackendError::Validation(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn abandoned_stop_still_sends_quit() {
        let tmp = tempfile::tempdir().unwrap();
        let seen = tmp.path().join("stdin.txt");
        let child = Command::new("sh")
            .arg("-c")
            .arg("cat > \"$0\"")
            .arg(&seen)
            .stdin(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();

        let waited = tokio::time::timeout(
            Duration::from_millis(50),
            finalize(child, Duration::from_millis(200)),
        )
        .await;
        assert!(waited.is_err());

        for _ in 0..100 {
            if std::fs::read(&seen).is_ok_and(|b| b == b"q") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("quit never reached the capture process");
    }
}
