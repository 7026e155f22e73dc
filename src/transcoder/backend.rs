use std::path::PathBuf;
use std::time::Duration;

use crate::error::StreamError;

/// Extension of a finalized, retention-eligible segment.
pub const SEGMENT_EXTENSION: &str = "mp4";

/// Suffix carried by a segment that is still being written. A writer that
/// stages segments renames the file on close; retention never touches a file
/// with this suffix.
pub const IN_PROGRESS_SUFFIX: &str = ".part";

/// A camera's recording parameters, resolved against the global defaults.
/// Immutable for the lifetime of its worker.
#[derive(Debug, Clone)]
pub struct CameraSpec {
    pub name: String,
    /// RTSP endpoint with credentials already expanded. Always pass through
    /// `sanitize_rtsp_url` before this reaches a log line.
    pub source_url: String,
    /// Per-camera directory under the storage root. Only this camera's
    /// transcoder writes here.
    pub output_dir: PathBuf,
    pub segment_duration: Duration,
}

/// How an external transcoding run ended. Exit codes are informational only;
/// any exit while a worker considers the stream live is a failure.
#[derive(Debug, Clone, Copy)]
pub struct ExitSummary {
    pub code: Option<i32>,
    /// The transcoder's output indicated the camera rejected our credentials.
    /// Retrying cannot help, so the worker parks the camera in `Failed`.
    pub auth_rejected: bool,
}

/// Handle to one live external transcoding process.
///
/// Invariant: after `wait` or `shutdown` returns, the process is dead and its
/// OS handle released. A worker never holds two of these for the same camera.
#[async_trait::async_trait]
pub trait SegmentProcess: Send {
    /// Wait for the process to exit on its own. Cancel-safe: dropping the
    /// future leaves the process running and the handle usable.
    async fn wait(&mut self) -> ExitSummary;

    /// Ask the process to stop, allowing it up to `grace` to finalize the
    /// in-progress segment, then force-kill. Always returns with the process
    /// confirmed dead.
    async fn shutdown(&mut self, grace: Duration) -> ExitSummary;

    /// OS process id, if the process is (still) running.
    fn id(&self) -> Option<u32>;
}

/// The capability boundary to the external transcoding process: something
/// that can be pointed at an RTSP source and emits time-bounded segment files
/// under the camera's directory.
///
/// Production uses [`super::FfmpegWriter`]; tests substitute a fake that
/// deterministically succeeds, crashes, or stalls.
#[async_trait::async_trait]
pub trait SegmentWriter: Send + Sync {
    /// Launch one transcoding process for `camera`. Fails with
    /// [`StreamError::Spawn`] if the process cannot be started at all.
    async fn spawn(&self, camera: &CameraSpec) -> Result<Box<dyn SegmentProcess>, StreamError>;

    /// Writer name for logging.
    fn name(&self) -> &str;
}
