pub mod config;
pub mod error;
pub mod http;
pub mod retention;
pub mod sanitize;
pub mod supervisor;
pub mod transcoder;
pub mod worker;

pub use config::{BackoffConfig, CameraConfig, Config, HttpConfig, RetentionConfig};
pub use error::{ConfigError, StreamError};
pub use http::{create_router, AppState};
pub use retention::{CameraRetention, PassSummary, RetentionManager, SegmentFile};
pub use sanitize::sanitize_rtsp_url;
pub use supervisor::{RestartError, Supervisor};
pub use transcoder::{
    CameraSpec, ExitSummary, FfmpegWriter, SegmentProcess, SegmentWriter, IN_PROGRESS_SUFFIX,
    SEGMENT_EXTENSION,
};
pub use worker::{BackoffPolicy, StreamState, StreamStatus, StreamWorker, WorkerHandle};
