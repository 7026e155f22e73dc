use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::ConfigError;
use crate::retention::{CameraRetention, RetentionManager};
use crate::transcoder::SegmentWriter;
use crate::worker::{BackoffPolicy, StreamState, StreamStatus, StreamWorker, WorkerHandle};

#[derive(Debug, Error)]
pub enum RestartError {
    #[error("unknown camera: {0}")]
    UnknownCamera(String),
    #[error("camera {0} is not in the failed state")]
    NotFailed(String),
}

/// Top-level coordinator: owns one worker per enabled camera plus the
/// retention task, aggregates status snapshots, and drives graceful
/// shutdown. A single camera failing permanently never affects the others;
/// it only shows up in `status()`.
pub struct Supervisor {
    workers: HashMap<String, WorkerHandle>,
    shutdown_tx: watch::Sender<bool>,
    /// Join handles, drained by the first `shutdown` call.
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Supervisor {
    /// Validate the configuration and spawn one worker per enabled camera
    /// plus the retention manager. On `ConfigError` nothing is spawned.
    pub fn start(config: &Config, writer: Arc<dyn SegmentWriter>) -> Result<Self, ConfigError> {
        config.validate()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let policy = BackoffPolicy::from(&config.backoff);
        let grace = config.shutdown_grace();

        let mut workers = HashMap::new();
        let mut tasks = Vec::new();
        for camera in &config.cameras {
            if !camera.enabled {
                info!("Camera disabled, skipping: {}", camera.name);
                continue;
            }
            let spec = config.camera_spec(camera);
            let (handle, task) = StreamWorker::spawn(
                spec,
                Arc::clone(&writer),
                policy,
                grace,
                shutdown_rx.clone(),
            );
            info!("Started worker for camera: {}", camera.name);
            workers.insert(camera.name.clone(), handle);
            tasks.push((camera.name.clone(), task));
        }

        let retention_cameras: Vec<CameraRetention> = config
            .enabled_cameras()
            .map(|camera| CameraRetention {
                name: camera.name.clone(),
                directory: config.storage_root.join(&camera.name),
                budget_bytes: config.camera_budget_bytes(camera),
                max_age: config.retention_max_age(),
            })
            .collect();
        let retention = RetentionManager::new(
            retention_cameras,
            config.retention_interval(),
            shutdown_rx.clone(),
        );
        tasks.push(("retention".to_string(), tokio::spawn(retention.run())));

        Ok(Self {
            workers,
            shutdown_tx,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Latest state snapshot for every camera. Never blocks on a worker.
    pub fn status(&self) -> HashMap<String, StreamState> {
        self.workers
            .iter()
            .map(|(name, handle)| (name.clone(), handle.state()))
            .collect()
    }

    pub fn camera_status(&self, name: &str) -> Option<StreamState> {
        self.workers.get(name).map(|handle| handle.state())
    }

    /// Operator action: wake a camera parked in `Failed` so it retries from
    /// a clean slate.
    pub fn restart_camera(&self, name: &str) -> Result<(), RestartError> {
        let worker = self
            .workers
            .get(name)
            .ok_or_else(|| RestartError::UnknownCamera(name.to_string()))?;
        if worker.state().status != StreamStatus::Failed {
            return Err(RestartError::NotFailed(name.to_string()));
        }
        worker.request_restart();
        Ok(())
    }

    /// Signal every worker to stop and wait up to `timeout` for each to
    /// terminate its transcoder cleanly; force-abort stragglers (which kills
    /// the child process with them). Idempotent: a second call finds nothing
    /// left to stop and returns immediately.
    pub async fn shutdown(&self, timeout: Duration) {
        let mut guard = self.tasks.lock().await;
        if guard.is_empty() {
            return;
        }
        let tasks = std::mem::take(&mut *guard);

        info!("Stopping {} task(s)...", tasks.len());
        let _ = self.shutdown_tx.send(true);

        for (name, mut task) in tasks {
            match tokio::time::timeout(timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Task {} panicked: {}", name, e),
                Err(_) => {
                    warn!("{} did not stop within {:?}, forcing termination", name, timeout);
                    task.abort();
                    let _ = task.await;
                }
            }
        }
        info!("All tasks stopped");
    }
}
