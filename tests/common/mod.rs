// Shared test support: a scripted fake segment writer that deterministically
// succeeds, crashes, stalls, or refuses to spawn, plus polling helpers for
// observing worker state transitions.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nvr::{
    BackoffPolicy, CameraSpec, ExitSummary, SegmentProcess, SegmentWriter, StreamError,
    StreamState, WorkerHandle,
};
use tokio::sync::watch;

/// What the next spawned "transcoder" should do.
#[derive(Debug, Clone)]
pub enum SpawnPlan {
    /// Stay alive until the worker shuts it down.
    RunForever,
    /// Exit on its own with `code` after `after`.
    Crash { code: i32, after: Duration },
    /// Exit reporting that the camera rejected our credentials.
    AuthReject,
    /// The spawn itself fails (missing binary, bad arguments).
    SpawnError,
}

pub struct FakeWriter {
    /// Scripted plans per camera, consumed ahead of the default.
    plans: Mutex<HashMap<String, VecDeque<SpawnPlan>>>,
    default_plan: SpawnPlan,
    attempts: AtomicUsize,
    spawned: AtomicUsize,
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
}

impl FakeWriter {
    pub fn new(default_plan: SpawnPlan) -> Arc<Self> {
        Arc::new(Self {
            plans: Mutex::new(HashMap::new()),
            default_plan,
            attempts: AtomicUsize::new(0),
            spawned: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            max_live: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Queue a plan for `camera`'s next spawn, ahead of the default.
    pub fn queue(&self, camera: &str, plan: SpawnPlan) {
        self.plans
            .lock()
            .unwrap()
            .entry(camera.to_string())
            .or_default()
            .push_back(plan);
    }

    /// Spawn calls, including ones that failed.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Processes actually started.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Processes alive right now.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live processes ever observed.
    pub fn max_concurrent(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SegmentWriter for FakeWriter {
    async fn spawn(&self, camera: &CameraSpec) -> Result<Box<dyn SegmentProcess>, StreamError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let plan = self
            .plans
            .lock()
            .unwrap()
            .get_mut(&camera.name)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| self.default_plan.clone());

        if matches!(plan, SpawnPlan::SpawnError) {
            return Err(StreamError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "fake transcoder unavailable",
            )));
        }

        self.spawned.fetch_add(1, Ordering::SeqCst);
        let live_now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live_now, Ordering::SeqCst);

        let (exit_tx, exit_rx) = watch::channel(None::<ExitSummary>);
        match plan {
            SpawnPlan::Crash { code, after } => {
                let tx = exit_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = tx.send(Some(ExitSummary {
                        code: Some(code),
                        auth_rejected: false,
                    }));
                });
            }
            SpawnPlan::AuthReject => {
                let tx = exit_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    let _ = tx.send(Some(ExitSummary {
                        code: Some(1),
                        auth_rejected: true,
                    }));
                });
            }
            SpawnPlan::RunForever | SpawnPlan::SpawnError => {}
        }

        Ok(Box::new(FakeProcess {
            exit_tx,
            exit_rx,
            live: Arc::clone(&self.live),
            dead: false,
        }))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

struct FakeProcess {
    exit_tx: watch::Sender<Option<ExitSummary>>,
    exit_rx: watch::Receiver<Option<ExitSummary>>,
    live: Arc<AtomicUsize>,
    dead: bool,
}

impl FakeProcess {
    fn mark_dead(&mut self) {
        if !self.dead {
            self.dead = true;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl SegmentProcess for FakeProcess {
    async fn wait(&mut self) -> ExitSummary {
        loop {
            let current = *self.exit_rx.borrow();
            if let Some(summary) = current {
                self.mark_dead();
                return summary;
            }
            if self.exit_rx.changed().await.is_err() {
                self.mark_dead();
                return ExitSummary {
                    code: None,
                    auth_rejected: false,
                };
            }
        }
    }

    async fn shutdown(&mut self, _grace: Duration) -> ExitSummary {
        let summary = ExitSummary {
            code: Some(0),
            auth_rejected: false,
        };
        let _ = self.exit_tx.send(Some(summary));
        self.mark_dead();
        summary
    }

    fn id(&self) -> Option<u32> {
        (!self.dead).then_some(4242)
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.mark_dead();
    }
}

/// Camera spec with a segment duration long enough that the stall watchdog
/// never fires during a test.
pub fn quiet_camera(name: &str, output_dir: &Path) -> CameraSpec {
    CameraSpec {
        name: name.to_string(),
        source_url: format!("rtsp://user:pass@{name}.local/stream"),
        output_dir: output_dir.to_path_buf(),
        segment_duration: Duration::from_secs(3600),
    }
}

/// Millisecond-scale backoff so failure cycles complete quickly.
pub fn fast_policy(failure_ceiling: u32) -> BackoffPolicy {
    BackoffPolicy {
        base: Duration::from_millis(2),
        max: Duration::from_millis(10),
        stability: Duration::from_secs(60),
        failure_ceiling,
    }
}

/// Poll a worker's published state until `pred` holds or `timeout` elapses.
pub async fn wait_for_state<F>(
    handle: &WorkerHandle,
    desc: &str,
    timeout: Duration,
    pred: F,
) -> StreamState
where
    F: Fn(&StreamState) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let state = handle.state();
        if pred(&state) {
            return state;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {desc}; last state: {state:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
