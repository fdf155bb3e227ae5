//! Artifact naming and post-hoc placement.
//!
//! Name probing is sequential and unlocked; two processes racing on the same directory can
//! pick the same name.
//!
//! `relocate` and `prepend_label` are blocking (they sleep between retries); call them from
//! `spawn_blocking` in async code.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;

/// Retry policy for moves and renames that contend with a writer process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per file.
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 6,
            delay: Duration::from_millis(500),
        }
    }
}

/// A file that could not be placed, with the last error seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeftBehind {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PlacementReport {
    /// Final paths of files that were placed.
    pub moved: Vec<PathBuf>,
    /// Files still at their original location.
    pub left_behind: Vec<LeftBehind>,
}

impl PlacementReport {
    pub fn is_complete(&self) -> bool {
        self.left_behind.is_empty()
    }
}

/// Pick a free file name in `dir`: `{base}.{ext}` when nothing of that series exists yet,
/// otherwise the first free `{base}_{n}.{ext}` with `n >= 1`.
pub fn unique_file_name(base: &str, dir: &Path, extension: &str) -> String {
    let plain = format!("{base}.{extension}");
    let numbered = |n: u32| format!("{base}_{n}.{extension}");
    if !dir.join(&plain).exists() && !dir.join(numbered(1)).exists() {
        return plain;
    }
    let mut n = 1;
    while dir.join(numbered(n)).exists() {
        n += 1;
    }
    numbered(n)
}

/// Create and return the first free `{base}/{n}` with `n >= 1`.
pub fn incremental_folder(base: &Path) -> io::Result<PathBuf> {
    let mut n = 1u32;
    while base.join(n.to_string()).exists() {
        n += 1;
    }
    let dir = base.join(n.to_string());
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Create and return `{root}/{YYYY-MM-DD}`.
pub fn dated_folder(root: &Path, date: NaiveDate) -> io::Result<PathBuf> {
    let dir = root.join(date.format("%Y-%m-%d").to_string());
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Move an existing file aside to the first free `{stem}_{tag}_{i}.{ext}`.
///
/// Returns the archive path, or `None` when there was nothing to move.
pub fn archive_existing(path: &Path, tag: &str) -> io::Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let mut i = 1u32;
    let target = loop {
        let candidate = parent.join(format!("{stem}_{tag}_{i}{ext}"));
        if !candidate.exists() {
            break candidate;
        }
        i += 1;
    };
    fs::rename(path, &target)?;
    tracing::info!(from = %path.display(), to = %target.display(), "archived existing capture");
    Ok(Some(target))
}

/// Move every file in `buffer_dir` into `dest_dir`.
pub fn relocate(buffer_dir: &Path, dest_dir: &Path, policy: RetryPolicy) -> PlacementReport {
    relocate_with(buffer_dir, dest_dir, policy, move_file)
}

/// Rename every file in `dir` to `{label}_{file}`.
pub fn prepend_label(dir: &Path, label: &str, policy: RetryPolicy) -> PlacementReport {
    prepend_label_with(dir, label, policy, |from, to| fs::rename(from, to))
}

pub(crate) fn relocate_with<F>(
    buffer_dir: &Path,
    dest_dir: &Path,
    policy: RetryPolicy,
    mut mover: F,
) -> PlacementReport
where
    F: FnMut(&Path, &Path) -> io::Result<()>,
{
    let mut report = PlacementReport::default();
    if let Err(e) = fs::create_dir_all(dest_dir) {
        tracing::warn!(dir = %dest_dir.display(), error = %e, "cannot create destination; files stay in buffer");
        return report;
    }
    for src in files_in(buffer_dir) {
        let Some(file_name) = src.file_name() else {
            continue;
        };
        let dst = dest_dir.join(file_name);
        place(&src, dst, policy, &mut mover, &mut report);
    }
    report
}

pub(crate) fn prepend_label_with<F>(
    dir: &Path,
    label: &str,
    policy: RetryPolicy,
    mut mover: F,
) -> PlacementReport
where
    F: FnMut(&Path, &Path) -> io::Result<()>,
{
    let mut report = PlacementReport::default();
    if label.is_empty() {
        return report;
    }
    for src in files_in(dir) {
        let Some(file_name) = src.file_name() else {
            continue;
        };
        let dst = dir.join(format!("{label}_{}", file_name.to_string_lossy()));
        place(&src, dst, policy, &mut mover, &mut report);
    }
    report
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot list directory");
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    files
}

fn place<F>(
    src: &Path,
    dst: PathBuf,
    policy: RetryPolicy,
    mover: &mut F,
    report: &mut PlacementReport,
) where
    F: FnMut(&Path, &Path) -> io::Result<()>,
{
    let attempts = policy.max_retries.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match mover(src, &dst) {
            Ok(()) => {
                tracing::info!(from = %src.display(), to = %dst.display(), "file placed");
                report.moved.push(dst);
                return;
            }
            Err(e) if is_retryable(&e) => {
                tracing::warn!(
                    file = %src.display(),
                    attempt,
                    attempts,
                    error = %e,
                    "file busy; retrying"
                );
                last_err = Some(e);
                if attempt < attempts {
                    std::thread::sleep(policy.delay);
                }
            }
            Err(e) => {
                last_err = Some(e);
                break;
            }
        }
    }
    let error = last_err
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown error".to_string());
    tracing::warn!(file = %src.display(), error = %error, "file left in place for manual recovery");
    report.left_behind.push(LeftBehind {
        path: src.to_path_buf(),
        error,
    });
}

/// Lock contention with a writer process.
fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::ResourceBusy | io::ErrorKind::WouldBlock
    )
}

/// Rename, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
        other => other,
    }
}
