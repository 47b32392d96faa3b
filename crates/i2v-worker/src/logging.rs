//! Per-job log events.

use i2v_models::JobId;
use tracing::{error, info, warn, Span};

/// Emits job events tagged with `job_id` and `operation` fields.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
}

impl JobLogger {
    /// Create a new job logger for a specific job and operation.
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Log the start of a job operation.
    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    /// Log entry into a numbered pipeline stage.
    pub fn log_stage(&self, stage: usize, total: usize, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            stage,
            "Job stage {}/{}: {}", stage, total, message
        );
    }

    /// Log a warning during job execution.
    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    /// Log an error during job execution.
    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job error: {}", message
        );
    }

    /// Log the completion of a job operation.
    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = %self.operation
        )
    }
}
