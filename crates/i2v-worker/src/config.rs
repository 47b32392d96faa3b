//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use i2v_storage::RetryPolicy;

use crate::error::{WorkerError, WorkerResult};

/// Upper bound for `UPLOAD_MAX_RETRIES`.
pub const MAX_UPLOAD_RETRIES: u32 = 10;

/// Which video pipeline the worker drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineBackend {
    /// External inference command that writes PNG frames
    Command,
    /// ComfyUI server running an img2vid node graph
    #[default]
    ComfyUi,
}

impl FromStr for PipelineBackend {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "command" | "frames" => Ok(PipelineBackend::Command),
            "comfyui" | "comfy" => Ok(PipelineBackend::ComfyUi),
            other => Err(WorkerError::config_error(format!(
                "unknown PIPELINE_BACKEND '{}' (expected 'command' or 'comfyui')",
                other
            ))),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Work directory for temporary files
    pub work_dir: PathBuf,
    /// Pipeline backend
    pub pipeline_backend: PipelineBackend,
    /// Inference command line for the command backend (program and fixed args)
    pub pipeline_command: Option<String>,
    /// ComfyUI server URL
    pub comfyui_url: String,
    /// Checkpoint loaded by the ComfyUI workflow
    pub comfyui_checkpoint: String,
    /// Delay between ComfyUI history polls
    pub comfyui_poll_interval: Duration,
    /// Maximum time to wait for a ComfyUI prompt
    pub comfyui_timeout: Duration,
    /// H.264 CRF used when encoding frames
    pub video_crf: u8,
    /// Upload retry policy
    pub upload_retry: RetryPolicy,
    /// Delay between queue polls when no job is available
    pub job_poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/i2v"),
            pipeline_backend: PipelineBackend::default(),
            pipeline_command: None,
            comfyui_url: "http://127.0.0.1:8188".to_string(),
            comfyui_checkpoint: "svd_xt.safetensors".to_string(),
            comfyui_poll_interval: Duration::from_millis(1000),
            comfyui_timeout: Duration::from_secs(900), // 15 minutes
            video_crf: 18,
            upload_retry: RetryPolicy::default(),
            job_poll_interval: Duration::from_millis(1000),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Build the upload retry policy from optional overrides.
fn upload_retry_from(
    max_retries: Option<u32>,
    initial_delay_secs: Option<f64>,
) -> WorkerResult<RetryPolicy> {
    let defaults = RetryPolicy::default();
    let max_retries = max_retries.unwrap_or(defaults.max_retries);
    if max_retries > MAX_UPLOAD_RETRIES {
        return Err(WorkerError::config_error(format!(
            "UPLOAD_MAX_RETRIES must be at most {}",
            MAX_UPLOAD_RETRIES
        )));
    }

    match initial_delay_secs {
        Some(secs) => RetryPolicy::from_secs_f64(max_retries, secs).ok_or_else(|| {
            WorkerError::config_error("UPLOAD_INITIAL_DELAY_SECS must be a positive number")
        }),
        None => Ok(defaults.with_max_retries(max_retries)),
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();

        let pipeline_backend = match std::env::var("PIPELINE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.pipeline_backend,
        };

        let upload_retry = upload_retry_from(
            env_parse("UPLOAD_MAX_RETRIES"),
            env_parse("UPLOAD_INITIAL_DELAY_SECS"),
        )?;

        Ok(Self {
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            pipeline_backend,
            pipeline_command: std::env::var("PIPELINE_COMMAND")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            comfyui_url: std::env::var("COMFYUI_URL").unwrap_or(defaults.comfyui_url),
            comfyui_checkpoint: std::env::var("COMFYUI_CHECKPOINT")
                .unwrap_or(defaults.comfyui_checkpoint),
            comfyui_poll_interval: env_parse("COMFYUI_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.comfyui_poll_interval),
            comfyui_timeout: env_parse("COMFYUI_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.comfyui_timeout),
            video_crf: env_parse("VIDEO_CRF").unwrap_or(defaults.video_crf),
            upload_retry,
            job_poll_interval: env_parse("JOB_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.job_poll_interval),
        })
    }

    /// Directory for staging encoder frames.
    pub fn scratch_dir(&self) -> PathBuf {
        self.work_dir.join("scratch")
    }
}
