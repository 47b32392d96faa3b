//! Job handler.
//!
//! Turns every generation outcome into a [`JobResponse`]: errors and panics
//! inside the generator become an `ERROR` response carrying the message.

use std::sync::Arc;

use i2v_models::{JobRequest, JobResponse};
use tracing::{info, Instrument};

use crate::generator::Generator;
use crate::logging::JobLogger;

#[derive(Clone)]
pub struct JobHandler {
    generator: Arc<Generator>,
}

impl JobHandler {
    pub fn new(generator: Generator) -> Self {
        Self {
            generator: Arc::new(generator),
        }
    }

    /// Handle one job. Never fails.
    pub async fn handle(&self, job: &JobRequest) -> JobResponse {
        let logger = JobLogger::new(&job.id, "handle_job");
        let generator = Arc::clone(&self.generator);
        let request = job.clone();

        // Spawned so a panic in the pipeline surfaces as a JoinError
        let outcome = tokio::spawn(
            async move { generator.generate(&request).await }.instrument(logger.create_span()),
        )
        .await;

        match outcome {
            Ok(Ok(upload)) => {
                info!(job_id = %job.id, url = %upload.public_url, "Job succeeded");
                JobResponse::success(upload.public_url)
            }
            Ok(Err(e)) => {
                if e.is_validation() {
                    logger.log_warning(&format!("Rejected input: {}", e));
                } else {
                    logger.log_error(&format!("{} (retryable: {})", e, e.is_retryable()));
                }
                JobResponse::error(e.to_string())
            }
            Err(join_error) => {
                logger.log_error(&format!("Generation task panicked: {}", join_error));
                JobResponse::error(format!("Generation task failed: {}", join_error))
            }
        }
    }
}
