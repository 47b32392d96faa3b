//! Media helpers for the image-to-video worker.
//!
//! This crate provides:
//! - Input image decoding and resizing
//! - Frame directory loading and PNG writing
//! - FFmpeg command building and execution
//! - Encoding frame sequences to MP4

pub mod command;
pub mod encode;
pub mod error;
pub mod frames;

pub use command::{check_ffmpeg, run_ffmpeg, FfmpegCommand};
pub use encode::{FfmpegFrameEncoder, FrameEncoder};
pub use error::{MediaError, MediaResult};
pub use frames::{decode_and_resize, load_frames, write_frames, write_png};

// Re-export image types used across the public API
pub use image::{DynamicImage, RgbImage};
