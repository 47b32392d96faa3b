//! Frame sequence to MP4 encoding.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::RgbImage;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::command::{run_ffmpeg, FfmpegCommand};
use crate::error::{MediaError, MediaResult};
use crate::frames::write_frames;

/// Encodes a sequence of frames into a video file.
#[async_trait]
pub trait FrameEncoder: Send + Sync {
    /// Encode `frames` at `fps` into `output`, replacing any existing file.
    async fn encode(&self, frames: Vec<RgbImage>, fps: u32, output: &Path) -> MediaResult<()>;
}

/// H.264 MP4 encoder backed by the FFmpeg CLI.
///
/// Frames are staged as PNG files in a scratch directory that is removed
/// when encoding finishes, whether or not FFmpeg succeeded.
#[derive(Debug, Clone)]
pub struct FfmpegFrameEncoder {
    scratch_dir: PathBuf,
    codec: String,
    pixel_format: String,
    crf: u8,
}

impl FfmpegFrameEncoder {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            codec: "libx264".to_string(),
            pixel_format: "yuv420p".to_string(),
            crf: 18,
        }
    }

    /// Set CRF (quality).
    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = crf;
        self
    }

    /// Build the FFmpeg command for an input frame pattern.
    pub fn command(&self, pattern: &Path, fps: u32, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(pattern, output)
            .framerate(fps)
            .video_codec(self.codec.clone())
            .pixel_format(self.pixel_format.clone())
            .crf(self.crf)
            .faststart()
    }
}

/// Check that all frames share the first frame's dimensions.
pub fn check_frame_sizes(frames: &[RgbImage]) -> MediaResult<(u32, u32)> {
    let first = frames.first().ok_or(MediaError::NoFrames)?;
    let expected = first.dimensions();

    for (index, frame) in frames.iter().enumerate().skip(1) {
        let actual = frame.dimensions();
        if actual != expected {
            return Err(MediaError::FrameSizeMismatch {
                index,
                expected,
                actual,
            });
        }
    }

    Ok(expected)
}

#[async_trait]
impl FrameEncoder for FfmpegFrameEncoder {
    async fn encode(&self, frames: Vec<RgbImage>, fps: u32, output: &Path) -> MediaResult<()> {
        let (width, height) = check_frame_sizes(&frames)?;
        let count = frames.len();

        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let staging: TempDir = tempfile::Builder::new()
            .prefix("frames-")
            .tempdir_in(&self.scratch_dir)?;

        debug!(
            "Staging {} frames ({}x{}) in {}",
            count,
            width,
            height,
            staging.path().display()
        );
        let pattern = write_frames(frames, staging.path()).await?;

        let cmd = self.command(&pattern, fps, output);
        run_ffmpeg(&cmd).await?;

        info!(
            "Encoded {} frames at {} fps into {}",
            count,
            fps,
            output.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_check_frame_sizes() {
        let frames = vec![RgbImage::new(16, 8), RgbImage::new(16, 8)];
        assert_eq!(check_frame_sizes(&frames).unwrap(), (16, 8));

        assert!(matches!(check_frame_sizes(&[]), Err(MediaError::NoFrames)));

        let mixed = vec![RgbImage::new(16, 8), RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]))];
        match check_frame_sizes(&mixed) {
            Err(MediaError::FrameSizeMismatch { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_encoder_command() {
        let encoder = FfmpegFrameEncoder::new("/tmp/i2v").with_crf(23);
        let args = encoder
            .command(Path::new("/tmp/i2v/f/frame_%05d.png"), 7, Path::new("/tmp/i2v/out.mp4"))
            .build_args();

        let joined = args.join(" ");
        assert!(joined.contains("-framerate 7 -i /tmp/i2v/f/frame_%05d.png"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-pix_fmt yuv420p"));
        assert!(joined.contains("-crf 23"));
        assert!(joined.ends_with("/tmp/i2v/out.mp4"));
    }

    #[tokio::test]
    async fn test_encode_rejects_empty_input() {
        let dir = tempfile::TempDir::new().unwrap();
        let encoder = FfmpegFrameEncoder::new(dir.path());
        let err = encoder
            .encode(Vec::new(), 7, &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::NoFrames));
    }
}
