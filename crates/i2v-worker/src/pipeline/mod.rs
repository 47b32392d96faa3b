//! Video pipeline seam.
//!
//! The model itself is opaque: a pipeline takes the prepared input image and
//! the generation parameters and either returns raw frames or writes an
//! already encoded video. Pipelines are built once at process start and
//! shared immutably across jobs.

pub mod command;
pub mod comfyui;
pub mod workflow;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use i2v_media::{DynamicImage, RgbImage};
use i2v_models::{GenerationParams, JobId};
use tracing::info;

use crate::config::{PipelineBackend, WorkerConfig};
use crate::error::{WorkerError, WorkerResult};

pub use command::CommandPipeline;
pub use comfyui::ComfyUiPipeline;

/// Inputs for one generation.
#[derive(Debug, Clone, Copy)]
pub struct PipelineRequest<'a> {
    pub job_id: &'a JobId,
    /// Input image, already resized to the requested dimensions
    pub image: &'a DynamicImage,
    /// The same image stored as PNG
    pub image_path: &'a Path,
    pub params: &'a GenerationParams,
    /// Where an encoding pipeline must write its video
    pub output_path: &'a Path,
}

/// What a pipeline produced.
#[derive(Debug)]
pub enum PipelineOutput {
    /// Raw frames that still need encoding
    Frames(Vec<RgbImage>),
    /// The final video was written to the request's `output_path`
    Encoded,
}

/// An image-to-video generation backend.
#[async_trait]
pub trait VideoPipeline: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Run one generation.
    async fn generate(&self, request: PipelineRequest<'_>) -> WorkerResult<PipelineOutput>;
}

/// Build the configured pipeline.
///
/// This is the one-time startup cost of the worker (binary lookup or server
/// health check); the returned pipeline is reused for every job.
pub async fn build_pipeline(
    config: &WorkerConfig,
    http: reqwest::Client,
) -> WorkerResult<Arc<dyn VideoPipeline>> {
    let started = Instant::now();

    let pipeline: Arc<dyn VideoPipeline> = match config.pipeline_backend {
        PipelineBackend::Command => {
            let command_line = config.pipeline_command.as_deref().ok_or_else(|| {
                WorkerError::config_error("PIPELINE_COMMAND must be set for the command backend")
            })?;
            Arc::new(CommandPipeline::new(command_line, config.scratch_dir())?)
        }
        PipelineBackend::ComfyUi => Arc::new(ComfyUiPipeline::connect(config, http).await?),
    };

    info!(
        "Pipeline '{}' initialized in {:.2}s",
        pipeline.name(),
        started.elapsed().as_secs_f64()
    );
    Ok(pipeline)
}
