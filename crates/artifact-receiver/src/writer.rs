//! Background artifact writer.
//!
//! Socket reads never wait on disk: the connection thread enqueues `(name, bytes)` and this
//! single consumer writes `{dest_dir}/{name}.{ext}`, or `{name}_{n}.{ext}` with the first free
//! `n` when that file already exists. Write failures are logged and the loop keeps going. Shutdown is a sentinel job followed by a join, so everything queued before
//! the sentinel is written.

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};

/// Queue depth at which enqueueing starts logging warnings.
const QUEUE_WARN_DEPTH: usize = 8;

enum WriteJob {
    Artifact { name: String, bytes: Vec<u8> },
    Shutdown,
}

/// Outcome of a writer's lifetime.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriterStats {
    /// Paths written successfully, in order.
    pub written: Vec<PathBuf>,
    /// Number of artifacts whose write failed.
    pub failed: usize,
}

/// Handle to the writer thread of one channel.
pub(crate) struct ArtifactWriter {
    channel: String,
    dest_dir: PathBuf,
    extension: String,
    tx: Sender<WriteJob>,
    join: JoinHandle<WriterStats>,
}

impl ArtifactWriter {
    pub(crate) fn spawn(channel: &str, dest_dir: &Path, extension: &str) -> Self {
        if let Err(e) = std::fs::create_dir_all(dest_dir) {
            tracing::warn!(
                channel = %channel,
                dir = %dest_dir.display(),
                error = %e,
                "could not create destination dir; writes will be attempted anyway"
            );
        }

        let (tx, rx) = unbounded();
        let thread_channel = channel.to_string();
        let thread_dir = dest_dir.to_path_buf();
        let thread_ext = extension.to_string();
        let join = std::thread::spawn(move || {
            writer_thread_main(&thread_channel, &thread_dir, &thread_ext, rx)
        });

        Self {
            channel: channel.to_string(),
            dest_dir: dest_dir.to_path_buf(),
            extension: extension.to_string(),
            tx,
            join,
        }
    }

    /// Queue an artifact. If the writer thread is gone the artifact is written inline.
    pub(crate) fn enqueue(&self, name: String, bytes: Vec<u8>) {
        let depth = self.tx.len();
        if depth >= QUEUE_WARN_DEPTH {
            tracing::warn!(channel = %self.channel, depth, "artifact write queue backing up");
        } else {
            tracing::debug!(channel = %self.channel, depth, "artifact queued");
        }

        if let Err(err) = self.tx.send(WriteJob::Artifact { name, bytes }) {
            if let WriteJob::Artifact { name, bytes } = err.into_inner() {
                tracing::error!(channel = %self.channel, artifact = %name, "writer thread gone; writing inline");
                if write_artifact(&self.channel, &self.dest_dir, &self.extension, &name, &bytes)
                    .is_none()
                {
                    tracing::warn!(channel = %self.channel, artifact = %name, "inline write failed; artifact lost");
                }
            }
        }
    }

    /// Drain everything queued so far, then stop the thread.
    pub(crate) fn shutdown(self) -> WriterStats {
        let _ = self.tx.send(WriteJob::Shutdown);
        match self.join.join() {
            Ok(stats) => stats,
            Err(_) => {
                tracing::error!(channel = %self.channel, "writer thread panicked");
                WriterStats::default()
            }
        }
    }
}

fn writer_thread_main(
    channel: &str,
    dest_dir: &Path,
    extension: &str,
    rx: Receiver<WriteJob>,
) -> WriterStats {
    let mut stats = WriterStats::default();
    while let Ok(job) = rx.recv() {
        match job {
            WriteJob::Artifact { name, bytes } => {
                match write_artifact(channel, dest_dir, extension, &name, &bytes) {
                    Some(path) => stats.written.push(path),
                    None => stats.failed += 1,
                }
            }
            WriteJob::Shutdown => break,
        }
    }
    tracing::debug!(channel = %channel, written = stats.written.len(), failed = stats.failed, "writer stopped");
    stats
}

fn write_artifact(
    channel: &str,
    dest_dir: &Path,
    extension: &str,
    name: &str,
    bytes: &[u8],
) -> Option<PathBuf> {
    let path = free_path(dest_dir, name, extension);
    if path != dest_dir.join(format!("{name}.{extension}")) {
        tracing::warn!(
            channel = %channel,
            artifact = %name,
            path = %path.display(),
            "artifact name already taken; writing under a numbered name"
        );
    }
    match std::fs::write(&path, bytes) {
        Ok(()) => {
            tracing::info!(
                channel = %channel,
                artifact = %name,
                path = %path.display(),
                bytes = bytes.len(),
                "artifact written"
            );
            Some(path)
        }
        Err(e) => {
            tracing::error!(
                channel = %channel,
                artifact = %name,
                path = %path.display(),
                error = %e,
                "artifact write failed"
            );
            None
        }
    }
}

/// `{name}.{ext}`, or the first `{name}_{n}.{ext}` that does not exist yet.
fn free_path(dest_dir: &Path, name: &str, extension: &str) -> PathBuf {
    let path = dest_dir.join(format!("{name}.{extension}"));
    if !path.exists() {
        return path;
    }
    (1u32..)
        .map(|n| dest_dir.join(format!("{name}_{n}.{extension}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}
