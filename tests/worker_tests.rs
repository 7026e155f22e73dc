// Integration tests for the per-camera stream worker state machine:
// running, crash/backoff cycles, the failure ceiling, stall detection, and
// clean shutdown, all driven by a scripted fake transcoder.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_policy, quiet_camera, wait_for_state, FakeWriter, SpawnPlan};
use nvr::{SegmentWriter, StreamStatus, StreamWorker};
use tempfile::TempDir;
use tokio::sync::watch;

fn writer_arc(writer: &Arc<FakeWriter>) -> Arc<dyn SegmentWriter> {
    Arc::clone(writer) as Arc<dyn SegmentWriter>
}

#[tokio::test]
async fn worker_reaches_running_and_stops_cleanly_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let writer = FakeWriter::new(SpawnPlan::RunForever);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (handle, task) = StreamWorker::spawn(
        quiet_camera("front", dir.path()),
        writer_arc(&writer),
        fast_policy(5),
        Duration::from_millis(100),
        shutdown_rx,
    );

    wait_for_state(&handle, "running", Duration::from_secs(2), |s| {
        s.status == StreamStatus::Running
    })
    .await;
    assert_eq!(writer.live(), 1);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();

    let state = handle.state();
    assert_eq!(state.status, StreamStatus::Stopped);
    assert_eq!(writer.live(), 0, "shutdown must terminate the transcoder");
    assert_eq!(writer.spawned(), 1);
}

#[tokio::test]
async fn crashing_transcoder_cycles_through_backoff_with_growing_failure_count() {
    let dir = TempDir::new().unwrap();
    let writer = FakeWriter::new(SpawnPlan::Crash {
        code: 1,
        after: Duration::from_millis(5),
    });
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (handle, task) = StreamWorker::spawn(
        quiet_camera("flaky", dir.path()),
        writer_arc(&writer),
        fast_policy(100),
        Duration::from_millis(100),
        shutdown_rx,
    );

    let state = wait_for_state(&handle, "three failures", Duration::from_secs(5), |s| {
        s.consecutive_failures >= 3
    })
    .await;
    assert!(state.last_error.as_deref().unwrap().contains("exited"));

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
    assert_eq!(handle.state().status, StreamStatus::Stopped);
}

#[tokio::test]
async fn at_most_one_transcoder_instance_exists_per_camera() {
    let dir = TempDir::new().unwrap();
    let writer = FakeWriter::new(SpawnPlan::Crash {
        code: 1,
        after: Duration::from_millis(2),
    });
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (_handle, task) = StreamWorker::spawn(
        quiet_camera("churn", dir.path()),
        writer_arc(&writer),
        fast_policy(1000),
        Duration::from_millis(100),
        shutdown_rx,
    );

    // Let the worker churn through many crash/restart cycles.
    tokio::time::sleep(Duration::from_millis(400)).await;
    shutdown_tx.send(true).unwrap();
    task.await.unwrap();

    assert!(writer.spawned() >= 5, "expected many restart cycles");
    assert_eq!(
        writer.max_concurrent(),
        1,
        "two transcoder instances were alive at once"
    );
}

#[tokio::test]
async fn unspawnable_transcoder_reaches_failed_and_stops_retrying() {
    let dir = TempDir::new().unwrap();
    let writer = FakeWriter::new(SpawnPlan::SpawnError);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (handle, task) = StreamWorker::spawn(
        quiet_camera("ghost", dir.path()),
        writer_arc(&writer),
        fast_policy(3),
        Duration::from_millis(100),
        shutdown_rx,
    );

    let state = wait_for_state(&handle, "failed", Duration::from_secs(2), |s| {
        s.status == StreamStatus::Failed
    })
    .await;
    assert_eq!(state.consecutive_failures, 3);
    assert_eq!(writer.attempts(), 3);

    // Parked in Failed: no further attempts happen on their own.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(writer.attempts(), 3);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
    assert_eq!(handle.state().status, StreamStatus::Stopped);
}

#[tokio::test]
async fn operator_restart_revives_a_failed_camera() {
    let dir = TempDir::new().unwrap();
    let writer = FakeWriter::new(SpawnPlan::RunForever);
    for _ in 0..3 {
        writer.queue("revived", SpawnPlan::SpawnError);
    }
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (handle, task) = StreamWorker::spawn(
        quiet_camera("revived", dir.path()),
        writer_arc(&writer),
        fast_policy(3),
        Duration::from_millis(100),
        shutdown_rx,
    );

    wait_for_state(&handle, "failed", Duration::from_secs(2), |s| {
        s.status == StreamStatus::Failed
    })
    .await;

    handle.request_restart();
    let state = wait_for_state(&handle, "running after restart", Duration::from_secs(2), |s| {
        s.status == StreamStatus::Running
    })
    .await;
    assert_eq!(state.consecutive_failures, 0);
    assert!(state.last_error.is_none());

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn auth_rejection_parks_the_camera_without_exhausting_retries() {
    let dir = TempDir::new().unwrap();
    let writer = FakeWriter::new(SpawnPlan::AuthReject);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (handle, task) = StreamWorker::spawn(
        quiet_camera("locked-out", dir.path()),
        writer_arc(&writer),
        fast_policy(10),
        Duration::from_millis(100),
        shutdown_rx,
    );

    let state = wait_for_state(&handle, "failed", Duration::from_secs(2), |s| {
        s.status == StreamStatus::Failed
    })
    .await;
    assert!(
        state.consecutive_failures < 10,
        "auth rejection must not burn through the whole retry budget"
    );
    assert!(state
        .last_error
        .as_deref()
        .unwrap()
        .contains("credentials"));

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn silent_transcoder_is_declared_stalled_and_restarted() {
    let dir = TempDir::new().unwrap();
    let writer = FakeWriter::new(SpawnPlan::RunForever);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Short segments so the watchdog fires quickly; the fake never writes a
    // segment file, so the run counts as stalled after 2x the duration.
    let mut camera = quiet_camera("silent", dir.path());
    camera.segment_duration = Duration::from_millis(50);

    let (handle, task) = StreamWorker::spawn(
        camera,
        writer_arc(&writer),
        fast_policy(100),
        Duration::from_millis(100),
        shutdown_rx,
    );

    let state = wait_for_state(&handle, "stall failure", Duration::from_secs(5), |s| {
        s.consecutive_failures >= 1
    })
    .await;
    assert!(state.last_error.as_deref().unwrap().contains("stalled"));

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
    assert_eq!(writer.live(), 0);
}

#[tokio::test]
async fn stable_run_resets_the_consecutive_failure_count() {
    let dir = TempDir::new().unwrap();
    let writer = FakeWriter::new(SpawnPlan::RunForever);
    // One quick crash, then a run that outlives the stability window.
    writer.queue(
        "recovering",
        SpawnPlan::Crash {
            code: 1,
            after: Duration::from_millis(5),
        },
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut policy = fast_policy(100);
    policy.stability = Duration::from_millis(50);

    let (handle, task) = StreamWorker::spawn(
        quiet_camera("recovering", dir.path()),
        writer_arc(&writer),
        policy,
        Duration::from_millis(100),
        shutdown_rx,
    );

    wait_for_state(&handle, "first failure", Duration::from_secs(2), |s| {
        s.consecutive_failures == 1
    })
    .await;

    // The second run stays up past the stability window; the published
    // failure count drops back to zero.
    let state = wait_for_state(&handle, "stability reset", Duration::from_secs(2), |s| {
        s.status == StreamStatus::Running && s.consecutive_failures == 0
    })
    .await;
    assert_eq!(state.consecutive_failures, 0);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}
