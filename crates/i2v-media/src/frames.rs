//! Image decoding, resizing and frame I/O.
//!
//! All image work is CPU bound and runs on the blocking thread pool.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbImage};
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Decode an image in any supported format and resize it to exactly
/// `width` x `height` RGB.
pub async fn decode_and_resize(
    bytes: Vec<u8>,
    width: u32,
    height: u32,
) -> MediaResult<DynamicImage> {
    let image = tokio::task::spawn_blocking(move || -> MediaResult<DynamicImage> {
        let decoded = image::load_from_memory(&bytes)?;
        debug!(
            "Decoded input image {}x{}, resizing to {}x{}",
            decoded.width(),
            decoded.height(),
            width,
            height
        );
        let resized = decoded.resize_exact(width, height, FilterType::CatmullRom);
        Ok(DynamicImage::ImageRgb8(resized.to_rgb8()))
    })
    .await??;

    Ok(image)
}

/// Write an image as PNG.
pub async fn write_png(image: &DynamicImage, path: impl AsRef<Path>) -> MediaResult<()> {
    let image = image.clone();
    let path = path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || image.save_with_format(&path, ImageFormat::Png)).await??;
    Ok(())
}

/// Write frames as `frame_00000.png`, `frame_00001.png`, ... into `dir`.
///
/// Returns the FFmpeg input pattern matching the written files.
pub async fn write_frames(frames: Vec<RgbImage>, dir: impl AsRef<Path>) -> MediaResult<PathBuf> {
    let dir = dir.as_ref().to_path_buf();
    let pattern = dir.join("frame_%05d.png");

    tokio::task::spawn_blocking(move || -> MediaResult<()> {
        for (index, frame) in frames.iter().enumerate() {
            let path = dir.join(format!("frame_{:05}.png", index));
            frame.save_with_format(&path, ImageFormat::Png)?;
        }
        Ok(())
    })
    .await??;

    Ok(pattern)
}

/// Load every `.png` in `dir` as a frame, ordered by file name.
pub async fn load_frames(dir: impl AsRef<Path>) -> MediaResult<Vec<RgbImage>> {
    let dir = dir.as_ref().to_path_buf();
    if !dir.is_dir() {
        return Err(MediaError::FileNotFound(dir));
    }

    tokio::task::spawn_blocking(move || -> MediaResult<Vec<RgbImage>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("png"))
            })
            .collect();
        paths.sort();

        paths
            .iter()
            .map(|p| -> MediaResult<RgbImage> { Ok(image::open(p)?.to_rgb8()) })
            .collect()
    })
    .await?
}
