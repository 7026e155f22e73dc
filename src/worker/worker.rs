use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::Utc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::state::{StreamState, StreamStatus};
use super::BackoffPolicy;
use crate::error::StreamError;
use crate::transcoder::{CameraSpec, SegmentProcess, SegmentWriter};

/// Supervisor-side view of one worker: read the latest state snapshot and
/// request an operator restart of a `Failed` camera. The worker itself runs
/// as an independent tokio task.
pub struct WorkerHandle {
    name: String,
    state_rx: watch::Receiver<StreamState>,
    restart: Arc<Notify>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Latest published state. Never blocks on the worker.
    pub fn state(&self) -> StreamState {
        self.state_rx.borrow().clone()
    }

    /// Wake a worker parked in `Failed` so it retries from a clean slate.
    pub fn request_restart(&self) {
        self.restart.notify_one();
    }
}

/// Keeps exactly one camera's capture pipeline alive: spawn the transcoder,
/// watch it, restart with capped exponential backoff, park in `Failed` once
/// the failure ceiling is hit. At most one transcoder process exists per
/// camera at any time; a new one is only spawned after the previous exit or
/// kill has been confirmed.
pub struct StreamWorker {
    camera: CameraSpec,
    writer: Arc<dyn SegmentWriter>,
    policy: BackoffPolicy,
    shutdown_grace: Duration,
    state_tx: watch::Sender<StreamState>,
    shutdown_rx: watch::Receiver<bool>,
    restart: Arc<Notify>,
}

enum RunEnd {
    Shutdown,
    Failure(StreamError),
}

impl StreamWorker {
    pub fn spawn(
        camera: CameraSpec,
        writer: Arc<dyn SegmentWriter>,
        policy: BackoffPolicy,
        shutdown_grace: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (WorkerHandle, JoinHandle<()>) {
        let (state_tx, state_rx) = watch::channel(StreamState::new());
        let restart = Arc::new(Notify::new());
        let handle = WorkerHandle {
            name: camera.name.clone(),
            state_rx,
            restart: Arc::clone(&restart),
        };
        let worker = StreamWorker {
            camera,
            writer,
            policy,
            shutdown_grace,
            state_tx,
            shutdown_rx,
            restart,
        };
        let task = tokio::spawn(worker.run());
        (handle, task)
    }

    async fn run(mut self) {
        let mut failures: u32 = 0;
        info!("[{}] worker started", self.camera.name);

        loop {
            if self.shutdown_requested() {
                break;
            }

            self.set_status(StreamStatus::Starting);
            match self.writer.spawn(&self.camera).await {
                Ok(process) => {
                    let run_started = Instant::now();
                    info!(
                        "[{}] transcoder running (pid {:?})",
                        self.camera.name,
                        process.id()
                    );
                    self.state_tx.send_modify(|s| {
                        s.status = StreamStatus::Running;
                        s.last_started_at = Some(Utc::now());
                    });

                    match self.monitor(process).await {
                        RunEnd::Shutdown => break,
                        RunEnd::Failure(err) => {
                            if run_started.elapsed() >= self.policy.stability && failures > 0 {
                                debug!(
                                    "[{}] stable for {:?}, resetting failure count",
                                    self.camera.name,
                                    run_started.elapsed()
                                );
                                failures = 0;
                            }
                            failures += 1;
                            let auth_rejected = matches!(err, StreamError::AuthRejected);
                            self.record_failure(err, failures);

                            if auth_rejected {
                                // Retrying against rejected credentials cannot
                                // help; park immediately.
                                if !self.park_failed().await {
                                    break;
                                }
                                failures = 0;
                                continue;
                            }
                        }
                    }
                }
                Err(err) => {
                    failures += 1;
                    self.record_failure(err, failures);
                }
            }

            if failures >= self.policy.failure_ceiling {
                if !self.park_failed().await {
                    break;
                }
                failures = 0;
                continue;
            }

            let delay = self.policy.delay_for(failures);
            info!("[{}] restarting transcoder in {:?}", self.camera.name, delay);
            self.set_status(StreamStatus::Backoff);
            if !self.interruptible_sleep(delay).await {
                break;
            }
        }

        self.set_status(StreamStatus::Stopped);
        info!("[{}] worker stopped", self.camera.name);
    }

    /// Watch one live transcoder until it exits, stalls, or shutdown is
    /// requested. Returns only once the process is confirmed dead.
    async fn monitor(&mut self, mut process: Box<dyn SegmentProcess>) -> RunEnd {
        let stall_after = self.camera.segment_duration * 2;
        let process_started = SystemTime::now();
        let mut watchdog = tokio::time::interval_at(
            tokio::time::Instant::now() + self.camera.segment_duration,
            self.camera.segment_duration,
        );
        let stability = tokio::time::sleep(self.policy.stability);
        tokio::pin!(stability);
        let mut stable = false;

        loop {
            tokio::select! {
                _ = &mut stability, if !stable => {
                    // Survived the stability window: this run has earned a
                    // clean slate, so a later blip starts backoff from zero.
                    stable = true;
                    debug!("[{}] stream stable, failure count reset", self.camera.name);
                    self.state_tx.send_modify(|s| s.consecutive_failures = 0);
                }
                summary = process.wait() => {
                    let err = if summary.auth_rejected {
                        StreamError::AuthRejected
                    } else {
                        StreamError::Interrupted { code: summary.code }
                    };
                    return RunEnd::Failure(err);
                }
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("[{}] stopping transcoder", self.camera.name);
                        process.shutdown(self.shutdown_grace).await;
                        return RunEnd::Shutdown;
                    }
                }
                _ = watchdog.tick() => {
                    if let Some(idle) = self.stalled_for(process_started, stall_after) {
                        warn!(
                            "[{}] no segment activity for {:?}, restarting transcoder",
                            self.camera.name, idle
                        );
                        process.shutdown(self.shutdown_grace).await;
                        return RunEnd::Failure(StreamError::Stalled {
                            stalled_secs: idle.as_secs(),
                        });
                    }
                }
            }
        }
    }

    /// A process that is alive but has written nothing to the camera
    /// directory for more than `stall_after` counts as crashed. Activity is
    /// measured from segment-file mtimes, floored at process start so stale
    /// segments from an earlier run never trip the watchdog.
    fn stalled_for(&self, process_started: SystemTime, stall_after: Duration) -> Option<Duration> {
        let mut last_activity = process_started;
        if let Ok(entries) = std::fs::read_dir(&self.camera.output_dir) {
            for entry in entries.flatten() {
                if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                    if modified > last_activity {
                        last_activity = modified;
                    }
                }
            }
        }
        let idle = SystemTime::now()
            .duration_since(last_activity)
            .unwrap_or_default();
        (idle > stall_after).then_some(idle)
    }

    /// Park in `Failed` until an operator restart or shutdown. Returns false
    /// if shutdown was requested while parked.
    async fn park_failed(&mut self) -> bool {
        error!(
            "[{}] retries suspended; waiting for operator restart",
            self.camera.name
        );
        self.set_status(StreamStatus::Failed);
        loop {
            tokio::select! {
                _ = self.restart.notified() => {
                    info!("[{}] operator restart requested", self.camera.name);
                    self.state_tx.send_modify(|s| {
                        s.consecutive_failures = 0;
                        s.last_error = None;
                    });
                    return true;
                }
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        return false;
                    }
                }
            }
        }
    }

    /// Backoff wait, observable by shutdown. Returns false if shutdown was
    /// requested mid-wait.
    async fn interruptible_sleep(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        return false;
                    }
                }
            }
        }
    }

    fn record_failure(&self, err: StreamError, failures: u32) {
        warn!(
            "[{}] {} (consecutive failures: {})",
            self.camera.name, err, failures
        );
        self.state_tx.send_modify(|s| {
            s.consecutive_failures = failures;
            s.last_error = Some(err.to_string());
        });
    }

    fn set_status(&self, status: StreamStatus) {
        self.state_tx.send_modify(|s| s.status = status);
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}
