//! The generation routine.
//!
//! One call turns a job input into a public video URL:
//! 1. Parse and validate the parameters (before any network call)
//! 2. Download the input image and resize it
//! 3. Run the video pipeline
//! 4. Encode frames to MP4 when the pipeline returned raw frames
//! 5. Upload the video with retry
//!
//! Temporary files are [`TempArtifact`]s and are removed on every exit path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use i2v_media::{decode_and_resize, write_png, FrameEncoder};
use i2v_models::{GenerationParams, JobRequest};
use i2v_storage::{RetryPolicy, UploadResult, UploadThingClient};
use reqwest::Client;
use tracing::debug;

use crate::artifact::TempArtifact;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::pipeline::{PipelineOutput, PipelineRequest, VideoPipeline};

const TOTAL_STAGES: usize = 4;

/// Runs image-to-video jobs against a shared pipeline.
#[derive(Clone)]
pub struct Generator {
    http: Client,
    pipeline: Arc<dyn VideoPipeline>,
    encoder: Arc<dyn FrameEncoder>,
    uploader: UploadThingClient,
    work_dir: PathBuf,
    retry: RetryPolicy,
}

impl Generator {
    pub fn new(
        http: Client,
        pipeline: Arc<dyn VideoPipeline>,
        encoder: Arc<dyn FrameEncoder>,
        uploader: UploadThingClient,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            http,
            pipeline,
            encoder,
            uploader,
            work_dir: config.work_dir.clone(),
            retry: config.upload_retry.clone(),
        }
    }

    /// Generate and upload a video for one job.
    pub async fn generate(&self, job: &JobRequest) -> WorkerResult<UploadResult> {
        let logger = JobLogger::new(&job.id, "generate_video");
        let started = Instant::now();

        let params = GenerationParams::from_input(&job.input)?;
        logger.log_start(&format!(
            "{}x{}, {} frames at {} fps ({:.1}s), seed {} ({} backend)",
            params.width,
            params.height,
            params.num_frames,
            params.fps,
            params.duration_secs(),
            params.seed,
            self.pipeline.name()
        ));

        logger.log_stage(1, TOTAL_STAGES, "Downloading input image");
        let bytes = self.download_image(&params.image_url).await?;
        let image = decode_and_resize(bytes, params.width, params.height).await?;
        let input_image =
            TempArtifact::create(&self.work_dir, "input-", ".png", "input image").await?;
        write_png(&image, input_image.path()).await?;

        logger.log_stage(2, TOTAL_STAGES, "Generating video frames");
        let video = TempArtifact::create(&self.work_dir, "video-", ".mp4", "video").await?;
        let output = self
            .pipeline
            .generate(PipelineRequest {
                job_id: &job.id,
                image: &image,
                image_path: input_image.path(),
                params: &params,
                output_path: video.path(),
            })
            .await?;

        logger.log_stage(3, TOTAL_STAGES, "Encoding video");
        match output {
            PipelineOutput::Frames(frames) => {
                debug!("Encoding {} frames at {} fps", frames.len(), params.fps);
                self.encoder.encode(frames, params.fps, video.path()).await?;
            }
            PipelineOutput::Encoded => debug!("Pipeline wrote the video directly"),
        }
        let size = tokio::fs::metadata(video.path()).await?.len();
        if size == 0 {
            return Err(WorkerError::pipeline_failed("generated video is empty"));
        }
        input_image.cleanup();

        logger.log_stage(4, TOTAL_STAGES, "Uploading video");
        let upload = self
            .uploader
            .upload_with_retry(video.path(), &self.retry)
            .await?;
        video.cleanup();
        if upload.retries() > 0 {
            logger.log_warning(&format!("Upload needed {} retries", upload.retries()));
        }

        logger.log_completion(&format!(
            "{} ({} bytes, {} upload attempt(s), {:.1}s)",
            upload.public_url,
            size,
            upload.attempts,
            started.elapsed().as_secs_f64()
        ));
        Ok(upload)
    }

    async fn download_image(&self, url: &str) -> WorkerResult<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| WorkerError::download_failed(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::download_failed(format!(
                "{} returned HTTP {}",
                url, status
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| WorkerError::download_failed(format!("{}: {}", url, e)))?;
        debug!("Downloaded {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
}
