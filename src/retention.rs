use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::transcoder::{IN_PROGRESS_SUFFIX, SEGMENT_EXTENSION};

/// Retention parameters for one camera directory.
#[derive(Debug, Clone)]
pub struct CameraRetention {
    pub name: String,
    pub directory: PathBuf,
    /// Byte ceiling for finalized segments; `None` disables budget
    /// enforcement for this camera.
    pub budget_bytes: Option<u64>,
    /// Segments older than this are deleted regardless of the budget.
    pub max_age: Option<Duration>,
}

/// A completed recording chunk found on disk. Produced by the external
/// transcoder; retention only ever reads metadata and deletes.
#[derive(Debug, Clone)]
pub struct SegmentFile {
    pub path: PathBuf,
    pub camera: String,
    pub created_at: SystemTime,
    pub size_bytes: u64,
}

/// What one retention pass did, for logging and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassSummary {
    pub scanned: usize,
    pub deleted: usize,
    pub reclaimed_bytes: u64,
    pub errors: usize,
}

impl PassSummary {
    fn absorb(&mut self, other: PassSummary) {
        self.scanned += other.scanned;
        self.deleted += other.deleted;
        self.reclaimed_bytes += other.reclaimed_bytes;
        self.errors += other.errors;
    }
}

/// Periodically bounds disk usage per camera by deleting the oldest
/// finalized segments. Runs independently of the workers; the only shared
/// resource is the per-camera directory tree, and in-progress segments are
/// excluded by naming convention.
pub struct RetentionManager {
    cameras: Vec<CameraRetention>,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl RetentionManager {
    pub fn new(
        cameras: Vec<CameraRetention>,
        interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cameras,
            interval,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!(
            "Retention manager started ({} camera(s), every {:?})",
            self.cameras.len(),
            self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = run_pass(&self.cameras);
                    if summary.deleted > 0 || summary.errors > 0 {
                        info!(
                            "Retention pass: deleted {} segment(s), reclaimed {} bytes, {} error(s)",
                            summary.deleted, summary.reclaimed_bytes, summary.errors
                        );
                    }
                }
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Retention manager stopped");
    }
}

/// One pass over every camera directory. A failure in one directory never
/// aborts the others.
pub fn run_pass(cameras: &[CameraRetention]) -> PassSummary {
    let mut total = PassSummary::default();
    for camera in cameras {
        total.absorb(run_camera_pass(camera));
    }
    total
}

/// Enforce age cutoff and byte budget for one camera, deleting strictly
/// oldest-first (mtime, then filename for determinism). A directory that
/// does not exist yet is skipped: the camera simply has no segments.
pub fn run_camera_pass(camera: &CameraRetention) -> PassSummary {
    let mut summary = PassSummary::default();
    if !camera.directory.is_dir() {
        debug!(
            "[Retention] {}: no directory at {}, skipping",
            camera.name,
            camera.directory.display()
        );
        return summary;
    }

    let mut segments = list_segments(camera, &mut summary);
    segments.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.path.cmp(&b.path))
    });
    summary.scanned = segments.len();

    let mut total_bytes: u64 = segments.iter().map(|s| s.size_bytes).sum();
    let cutoff = camera.max_age.map(|age| SystemTime::now() - age);

    for segment in &segments {
        let expired = cutoff.is_some_and(|cutoff| segment.created_at < cutoff);
        let over_budget = camera
            .budget_bytes
            .is_some_and(|budget| total_bytes > budget);
        if !expired && !over_budget {
            // Everything after this segment is newer still.
            break;
        }

        match std::fs::remove_file(&segment.path) {
            Ok(()) => {
                total_bytes = total_bytes.saturating_sub(segment.size_bytes);
                summary.deleted += 1;
                summary.reclaimed_bytes += segment.size_bytes;
                info!(
                    "[Retention] {}: deleted {} ({} bytes)",
                    camera.name,
                    segment.path.display(),
                    segment.size_bytes
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Vanished concurrently; it no longer occupies the budget.
                total_bytes = total_bytes.saturating_sub(segment.size_bytes);
            }
            Err(e) => {
                // One bad file must not abort the pass; its bytes still
                // count against the budget.
                warn!(
                    "[Retention] {}: failed to delete {}: {}",
                    camera.name,
                    segment.path.display(),
                    e
                );
                summary.errors += 1;
            }
        }
    }

    summary
}

/// Finalized segments in the camera directory, unsorted. Files carrying the
/// in-progress suffix are never candidates, even if oldest; anything without
/// the segment extension is not ours to manage.
fn list_segments(camera: &CameraRetention, summary: &mut PassSummary) -> Vec<SegmentFile> {
    let entries = match std::fs::read_dir(&camera.directory) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                "[Retention] {}: cannot list {}: {}",
                camera.name,
                camera.directory.display(),
                e
            );
            summary.errors += 1;
            return Vec::new();
        }
    };

    let mut segments = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("[Retention] {}: unreadable entry: {}", camera.name, e);
                summary.errors += 1;
                continue;
            }
        };
        let path = entry.path();
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if file_name.ends_with(IN_PROGRESS_SUFFIX) {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXTENSION) {
            continue;
        }

        match entry.metadata() {
            Ok(meta) if meta.is_file() => {
                let created_at = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                segments.push(SegmentFile {
                    path,
                    camera: camera.name.clone(),
                    created_at,
                    size_bytes: meta.len(),
                });
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    "[Retention] {}: cannot stat {}: {}",
                    camera.name,
                    path.display(),
                    e
                );
                summary.errors += 1;
            }
        }
    }
    segments
}
