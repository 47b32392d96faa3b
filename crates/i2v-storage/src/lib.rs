//! UploadThing storage client.
//!
//! This crate provides:
//! - Two-phase uploads (presign, then direct multipart upload)
//! - Retrying uploads with exponential backoff
//! - Randomized upload file names

pub mod client;
pub mod descriptor;
pub mod error;
pub mod retry;

pub use client::{PresignedFile, UploadResult, UploadThingClient, UploadThingConfig};
pub use descriptor::FileDescriptor;
pub use error::{StorageError, StorageResult};
pub use retry::{RetryPolicy, RetryState};
