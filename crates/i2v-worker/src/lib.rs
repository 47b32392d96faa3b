//! Image-to-video serverless worker.
//!
//! This crate provides:
//! - Worker configuration from the environment
//! - The video pipeline seam and its backends (external command, ComfyUI)
//! - The generation routine (download, generate, encode, upload, cleanup)
//! - The job handler that turns every outcome into a job response
//! - Job sources (local test input, HTTP queue) and the sequential run loop

pub mod artifact;
pub mod config;
pub mod error;
pub mod executor;
pub mod generator;
pub mod handler;
pub mod logging;
pub mod pipeline;
pub mod source;

pub use artifact::TempArtifact;
pub use config::{PipelineBackend, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use generator::Generator;
pub use handler::JobHandler;
pub use logging::JobLogger;
pub use pipeline::{PipelineOutput, PipelineRequest, VideoPipeline};
pub use source::{HttpJobSource, JobSource, LocalJobSource};
