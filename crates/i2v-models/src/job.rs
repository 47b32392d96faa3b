//! Queue job types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A job handed to the worker by the queue.
///
/// `input` is kept as raw JSON; it is validated into
/// [`GenerationParams`](crate::GenerationParams) by the generation routine
/// so that malformed input becomes an error response rather than a
/// deserialization failure at the queue boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Job ID assigned by the queue (generated when absent)
    #[serde(default)]
    pub id: JobId,

    /// Raw job input mapping
    #[serde(default)]
    pub input: serde_json::Value,
}

impl JobRequest {
    /// Create a job with a fresh ID.
    pub fn new(input: serde_json::Value) -> Self {
        Self {
            id: JobId::new(),
            input,
        }
    }
}

/// Outcome status reported back to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Success,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "SUCCESS",
            JobStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Response returned for every job, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResponse {
    pub status: JobStatus,

    /// Public URL of the uploaded video; `null` on failure
    pub result: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResponse {
    pub fn success(url: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Success,
            result: Some(url.into()),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Error,
            result: None,
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}
