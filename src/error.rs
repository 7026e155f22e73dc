use thiserror::Error;

/// Fatal configuration problems. These abort startup; nothing is spawned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("duplicate camera name: {0}")]
    DuplicateCamera(String),

    #[error("camera {camera}: {reason}")]
    InvalidCamera { camera: String, reason: String },
}

/// Per-camera stream failures. Never fatal to the process; a worker absorbs
/// these into its state machine and retries with backoff.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to spawn transcoder: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("transcoder exited unexpectedly (code {code:?})")]
    Interrupted { code: Option<i32> },

    #[error("no segment activity for {stalled_secs}s, transcoder presumed stalled")]
    Stalled { stalled_secs: u64 },

    #[error("camera rejected the configured credentials")]
    AuthRejected,
}
