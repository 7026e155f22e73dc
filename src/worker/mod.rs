mod state;
mod worker;

pub use state::{StreamState, StreamStatus};
pub use worker::{StreamWorker, WorkerHandle};

use std::time::Duration;

use crate::config::BackoffConfig;

/// Restart pacing for one camera: capped exponential backoff, a stability
/// window that forgives old failures, and a ceiling after which the worker
/// parks in `Failed` instead of retrying forever.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub stability: Duration,
    pub failure_ceiling: u32,
}

impl BackoffPolicy {
    /// `min(base * 2^failures, max)`, non-decreasing in `failures`.
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let exp = consecutive_failures.min(16);
        self.base.saturating_mul(1u32 << exp).min(self.max)
    }
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(cfg: &BackoffConfig) -> Self {
        Self {
            base: Duration::from_secs(cfg.base_secs),
            max: Duration::from_secs(cfg.max_secs),
            stability: Duration::from_secs(cfg.stability_secs),
            failure_ceiling: cfg.max_consecutive_failures,
        }
    }
}
