//! Shared data models for the image-to-video worker.
//!
//! This crate provides Serde-serializable types for:
//! - Queue jobs and their responses
//! - Generation parameters with defaults and validation

pub mod error;
pub mod job;
pub mod params;

// Re-export common types
pub use error::{ValidationError, ValidationResult};
pub use job::{JobId, JobRequest, JobResponse, JobStatus};
pub use params::GenerationParams;
