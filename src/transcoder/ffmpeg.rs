use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{CameraSpec, ExitSummary, SegmentProcess, SegmentWriter, SEGMENT_EXTENSION};
use crate::error::StreamError;
use crate::sanitize::sanitize_rtsp_url;

/// Markers in ffmpeg output that indicate the camera rejected our
/// credentials. Matched case-insensitively.
const AUTH_ERROR_MARKERS: &[&str] = &[
    "401 unauthorized",
    "403 forbidden",
    "authorization failed",
    "auth failed",
    "unauthorized",
    "authentication failed",
];

/// Production segment writer: one ffmpeg process per camera, remuxing the
/// RTSP stream into strftime-named segments under the camera's directory.
/// ffmpeg's own output is streamed, credential-sanitized, into a per-camera
/// log file.
pub struct FfmpegWriter {
    binary: String,
    log_dir: PathBuf,
}

impl FfmpegWriter {
    pub fn new(binary: String, log_dir: PathBuf) -> Self {
        Self { binary, log_dir }
    }

    fn build_args(&self, camera: &CameraSpec) -> Vec<String> {
        let segment_seconds = camera.segment_duration.as_secs();
        // e.g. 20251122_203000_300s.mp4
        let out_pattern = camera
            .output_dir
            .join(format!("%Y%m%d_%H%M%S_{segment_seconds}s.{SEGMENT_EXTENSION}"));

        vec![
            "-rtsp_transport".into(),
            "tcp".into(),
            "-i".into(),
            camera.source_url.clone(),
            "-an".into(),
            "-c".into(),
            "copy".into(),
            "-f".into(),
            "segment".into(),
            "-segment_time".into(),
            segment_seconds.to_string(),
            "-reset_timestamps".into(),
            "1".into(),
            "-strftime".into(),
            "1".into(),
            out_pattern.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait::async_trait]
impl SegmentWriter for FfmpegWriter {
    async fn spawn(&self, camera: &CameraSpec) -> Result<Box<dyn SegmentProcess>, StreamError> {
        std::fs::create_dir_all(&camera.output_dir)?;
        std::fs::create_dir_all(&self.log_dir)?;

        let args = self.build_args(camera);
        info!(
            "[{}] Starting {}: {}",
            camera.name,
            self.binary,
            sanitize_rtsp_url(&args.join(" "))
        );

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take();
        let auth_rejected = Arc::new(AtomicBool::new(false));
        let pump = child.stderr.take().map(|stderr| {
            let log_path = self.log_dir.join(format!("{}.ffmpeg.log", camera.name));
            let camera_name = camera.name.clone();
            let auth_flag = Arc::clone(&auth_rejected);
            tokio::spawn(pump_transcoder_log(
                camera_name,
                log_path,
                stderr,
                auth_flag,
            ))
        });

        Ok(Box::new(FfmpegProcess {
            child,
            stdin,
            auth_rejected,
            pump,
        }))
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// Copy ffmpeg's stderr into the per-camera log file, scrubbing credentials
/// and watching for auth-failure markers.
async fn pump_transcoder_log(
    camera_name: String,
    log_path: PathBuf,
    stderr: tokio::process::ChildStderr,
    auth_flag: Arc<AtomicBool>,
) {
    let mut log_file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .await
    {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(
                "[{}] Cannot open transcoder log {}: {}",
                camera_name,
                log_path.display(),
                e
            );
            None
        }
    };

    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let lower = line.to_lowercase();
        if AUTH_ERROR_MARKERS.iter().any(|m| lower.contains(m)) {
            auth_flag.store(true, Ordering::SeqCst);
        }

        if let Some(file) = &mut log_file {
            let safe_line = sanitize_rtsp_url(&line);
            if file
                .write_all(format!("{safe_line}\n").as_bytes())
                .await
                .is_err()
            {
                // Stop writing but keep draining so the child never blocks on
                // a full pipe.
                log_file = None;
            }
        }
    }
    debug!("[{}] transcoder log stream closed", camera_name);
}

struct FfmpegProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    auth_rejected: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

impl FfmpegProcess {
    async fn summarize(&mut self, code: Option<i32>) -> ExitSummary {
        // Let the log pump finish draining stderr before reading the flag.
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
        ExitSummary {
            code,
            auth_rejected: self.auth_rejected.load(Ordering::SeqCst),
        }
    }
}

#[async_trait::async_trait]
impl SegmentProcess for FfmpegProcess {
    async fn wait(&mut self) -> ExitSummary {
        let code = match self.child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                warn!("wait on ffmpeg failed: {}", e);
                None
            }
        };
        self.summarize(code).await
    }

    async fn shutdown(&mut self, grace: Duration) -> ExitSummary {
        // ffmpeg treats `q` on stdin as a request to stop cleanly, which
        // finalizes the in-progress segment.
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.write_all(b"q").await;
            let _ = stdin.shutdown().await;
        }

        let code = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                warn!("wait on ffmpeg failed: {}", e);
                None
            }
            Err(_) => {
                warn!("ffmpeg did not stop within {:?}, killing", grace);
                let _ = self.child.start_kill();
                match self.child.wait().await {
                    Ok(status) => status.code(),
                    Err(_) => None,
                }
            }
        };
        self.summarize(code).await
    }

    fn id(&self) -> Option<u32> {
        self.child.id()
    }
}
