use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::error::ConfigError;
use crate::transcoder::CameraSpec;

/// Environment variables holding the RTSP credentials injected into camera
/// URLs at load time. The expanded URL never appears in logs in plaintext.
pub const RTSP_USER_VAR: &str = "RTSP_USER";
pub const RTSP_PASSWORD_VAR: &str = "RTSP_PASSWORD";

const USER_PLACEHOLDER: &str = "{RTSP_USER}";
const PASSWORD_PLACEHOLDER: &str = "{RTSP_PASSWORD}";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root of the (network-mounted) recording tree; one subdirectory per camera.
    pub storage_root: PathBuf,
    /// Directory for per-camera transcoder logs.
    pub log_path: PathBuf,
    #[serde(default = "default_ffmpeg_binary")]
    pub ffmpeg_binary: String,
    /// Default segment length, overridable per camera.
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u64,
    /// Grace period given to a transcoder to finalize its open segment on stop.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Unique key; also the name of the camera's directory under `storage_root`.
    pub name: String,
    /// RTSP endpoint. `{RTSP_USER}` / `{RTSP_PASSWORD}` placeholders are
    /// expanded from the environment when the config is loaded.
    pub rtsp_url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-camera override of the global segment length.
    #[serde(default)]
    pub segment_seconds: Option<u64>,
    /// Per-camera override of the global retention byte budget.
    #[serde(default)]
    pub retention_max_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Byte ceiling per camera directory; unset disables budget enforcement.
    pub max_bytes_per_camera: Option<u64>,
    /// Segments older than this are deleted regardless of the byte budget.
    pub max_age_days: Option<u32>,
    /// How often a retention pass runs.
    pub interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_bytes_per_camera: None,
            max_age_days: None,
            interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_secs: u64,
    pub max_secs: u64,
    /// Continuous running time after which the failure counter resets.
    pub stability_secs: u64,
    /// Consecutive failures after which a camera is parked in `Failed`.
    pub max_consecutive_failures: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_secs: 2,
            max_secs: 60,
            stability_secs: 30,
            max_consecutive_failures: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8380,
        }
    }
}

impl Config {
    /// Load configuration from `path` (extension resolved by the loader),
    /// layered with an optional `<path>.debug` local-override file, then
    /// expand credentials and validate.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let overlay = format!("{path}.debug");
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::File::with_name(&overlay).required(false))
            .build()?;

        let mut cfg: Config = settings.try_deserialize()?;
        cfg.expand_credentials();
        cfg.validate()?;
        Ok(cfg)
    }

    fn expand_credentials(&mut self) {
        let user = env::var(RTSP_USER_VAR).unwrap_or_default();
        let password = env::var(RTSP_PASSWORD_VAR).unwrap_or_default();
        for camera in &mut self.cameras {
            camera.rtsp_url = camera
                .rtsp_url
                .replace(USER_PLACEHOLDER, &user)
                .replace(PASSWORD_PLACEHOLDER, &password);
        }
    }

    /// Reject duplicate camera names and URLs that survived expansion with
    /// placeholders still present. Duplicates are fatal: starting two workers
    /// with the same name would race on one output directory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if camera.name.is_empty() {
                return Err(ConfigError::InvalidCamera {
                    camera: camera.rtsp_url_sanitized(),
                    reason: "camera name must not be empty".to_string(),
                });
            }
            if !seen.insert(camera.name.as_str()) {
                return Err(ConfigError::DuplicateCamera(camera.name.clone()));
            }
            if camera.rtsp_url.is_empty()
                || camera.rtsp_url.contains(USER_PLACEHOLDER)
                || camera.rtsp_url.contains(PASSWORD_PLACEHOLDER)
            {
                return Err(ConfigError::InvalidCamera {
                    camera: camera.name.clone(),
                    reason: format!(
                        "invalid RTSP URL after env expansion: {}",
                        camera.rtsp_url_sanitized()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Cameras that should get a worker at startup.
    pub fn enabled_cameras(&self) -> impl Iterator<Item = &CameraConfig> {
        self.cameras.iter().filter(|c| c.enabled)
    }

    /// Resolve a camera's recording parameters against the global defaults.
    pub fn camera_spec(&self, camera: &CameraConfig) -> CameraSpec {
        CameraSpec {
            name: camera.name.clone(),
            source_url: camera.rtsp_url.clone(),
            output_dir: self.storage_root.join(&camera.name),
            segment_duration: Duration::from_secs(
                camera.segment_seconds.unwrap_or(self.segment_seconds),
            ),
        }
    }

    pub fn camera_budget_bytes(&self, camera: &CameraConfig) -> Option<u64> {
        camera
            .retention_max_bytes
            .or(self.retention.max_bytes_per_camera)
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention.interval_secs)
    }

    pub fn retention_max_age(&self) -> Option<Duration> {
        self.retention
            .max_age_days
            .map(|days| Duration::from_secs(u64::from(days) * 24 * 60 * 60))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn log_summary(&self) {
        info!(
            "Loaded {} camera(s) ({} enabled), storage root {}",
            self.cameras.len(),
            self.enabled_cameras().count(),
            self.storage_root.display()
        );
    }
}

impl CameraConfig {
    fn rtsp_url_sanitized(&self) -> String {
        crate::sanitize::sanitize_rtsp_url(&self.rtsp_url)
    }
}

fn default_ffmpeg_binary() -> String {
    "ffmpeg".to_string()
}

fn default_segment_seconds() -> u64 {
    300
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}
