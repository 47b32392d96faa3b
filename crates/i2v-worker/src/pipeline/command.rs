//! Frame-producing pipeline backed by an external inference command.
//!
//! The command receives the prepared image and the generation parameters as
//! arguments and must write one PNG per frame into `--output-dir`. Frames
//! are read back in file-name order.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{PipelineOutput, PipelineRequest, VideoPipeline};
use crate::error::{WorkerError, WorkerResult};

/// Max stderr characters kept in error messages.
const MAX_STDERR_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub struct CommandPipeline {
    program: PathBuf,
    base_args: Vec<String>,
    scratch_dir: PathBuf,
}

impl CommandPipeline {
    /// Resolve the command line (program followed by fixed arguments).
    pub fn new(command_line: &str, scratch_dir: impl Into<PathBuf>) -> WorkerResult<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| WorkerError::config_error("pipeline command is empty"))?;
        let program = which::which(program).map_err(|e| {
            WorkerError::config_error(format!("pipeline command '{}' not found: {}", program, e))
        })?;

        Ok(Self {
            program,
            base_args: parts.map(str::to_string).collect(),
            scratch_dir: scratch_dir.into(),
        })
    }

    /// Arguments passed to the command for one request.
    pub fn args_for(&self, request: &PipelineRequest<'_>, frames_dir: &Path) -> Vec<String> {
        let p = request.params;
        let mut args = self.base_args.clone();
        args.extend([
            "--image".to_string(),
            request.image_path.to_string_lossy().to_string(),
            "--output-dir".to_string(),
            frames_dir.to_string_lossy().to_string(),
            "--width".to_string(),
            p.width.to_string(),
            "--height".to_string(),
            p.height.to_string(),
            "--num-frames".to_string(),
            p.num_frames.to_string(),
            "--fps".to_string(),
            p.fps.to_string(),
            "--motion-bucket-id".to_string(),
            p.motion_bucket_id.to_string(),
            "--noise-aug-strength".to_string(),
            p.noise_aug_strength.to_string(),
            "--seed".to_string(),
            p.seed.to_string(),
            "--decode-chunk-size".to_string(),
            p.decode_chunk_size.to_string(),
        ]);
        args
    }
}

#[async_trait]
impl VideoPipeline for CommandPipeline {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn generate(&self, request: PipelineRequest<'_>) -> WorkerResult<PipelineOutput> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let frames_dir = tempfile::Builder::new()
            .prefix("svd-frames-")
            .tempdir_in(&self.scratch_dir)?;

        let args = self.args_for(&request, frames_dir.path());
        debug!("Running pipeline: {} {}", self.program.display(), args.join(" "));

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .chars()
                .rev()
                .take(MAX_STDERR_CHARS)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            return Err(WorkerError::pipeline_failed(format!(
                "pipeline command exited with {}: {}",
                output.status,
                tail.trim()
            )));
        }

        let frames = i2v_media::load_frames(frames_dir.path()).await?;
        if frames.is_empty() {
            return Err(WorkerError::pipeline_failed("pipeline command produced no frames"));
        }

        info!(
            job_id = %request.job_id,
            "Pipeline produced {} frames",
            frames.len()
        );
        Ok(PipelineOutput::Frames(frames))
    }
}
