//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Bad job input; the message is reported to the caller unchanged.
    #[error(transparent)]
    Validation(#[from] i2v_models::ValidationError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Pipeline failed: {0}")]
    PipelineFailed(String),

    #[error("Pipeline timed out: {0}")]
    PipelineTimeout(String),

    #[error("Queue operation failed: {0}")]
    QueueFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] i2v_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] i2v_media::MediaError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn pipeline_failed(msg: impl Into<String>) -> Self {
        Self::PipelineFailed(msg.into())
    }

    pub fn pipeline_timeout(msg: impl Into<String>) -> Self {
        Self::PipelineTimeout(msg.into())
    }

    pub fn queue_failed(msg: impl Into<String>) -> Self {
        Self::QueueFailed(msg.into())
    }

    /// Check if error is a bad-input error.
    pub fn is_validation(&self) -> bool {
        matches!(self, WorkerError::Validation(_))
    }

    /// Check if error might succeed on a later run of the same job.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Storage(e) => e.is_retryable(),
            WorkerError::DownloadFailed(_)
            | WorkerError::PipelineTimeout(_)
            | WorkerError::QueueFailed(_)
            | WorkerError::Http(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use i2v_models::ValidationError;
    use i2v_storage::StorageError;

    #[test]
    fn test_validation_message_is_bare() {
        let err = WorkerError::from(ValidationError::MissingField("image_url"));
        assert_eq!(err.to_string(), "Missing 'image_url' in input");
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(WorkerError::download_failed("503").is_retryable());
        assert!(WorkerError::from(StorageError::upload_failed("x")).is_retryable());
        assert!(!WorkerError::from(StorageError::config_error("no key")).is_retryable());
        assert!(!WorkerError::pipeline_failed("oom").is_retryable());
    }
}
