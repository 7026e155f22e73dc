use chrono::{DateTime, Utc};
use serde::Serialize;

/// Where a camera's worker currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    /// Launching the external transcoding process.
    Starting,
    /// Transcoder is alive and (presumed) producing segments.
    Running,
    /// Waiting out a restart delay after a failure.
    Backoff,
    /// Worker has shut down; no process is running.
    Stopped,
    /// Consecutive-failure ceiling exceeded (or credentials rejected);
    /// retries suspended until an operator restart.
    Failed,
}

/// Snapshot of one camera's stream state, published by its worker and read
/// by the supervisor. Only the worker's state machine mutates this.
#[derive(Debug, Clone, Serialize)]
pub struct StreamState {
    pub status: StreamStatus,
    pub consecutive_failures: u32,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl StreamState {
    pub fn new() -> Self {
        Self {
            status: StreamStatus::Starting,
            consecutive_failures: 0,
            last_started_at: None,
            last_error: None,
        }
    }
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new()
    }
}
