//! Frame persistence and multi-camera previews.

use crate::errors::{CameraError, Result};
use crate::frame::Frame;
use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Convert a BGR8 frame into an RGB image.
pub fn to_rgb_image(frame: &Frame) -> Result<RgbImage> {
    let rgb: Vec<u8> = frame
        .data
        .chunks_exact(3)
        .flat_map(|p| [p[2], p[1], p[0]])
        .collect();

    RgbImage::from_vec(frame.width, frame.height, rgb).ok_or_else(|| {
        CameraError::InvalidFrame(format!(
            "{} bytes do not hold a {}x{} BGR image",
            frame.data.len(),
            frame.width,
            frame.height
        ))
    })
}

/// Write `frame` as `<directory>/<random uuid>.jpg`, creating the directory
/// if needed. Returns the written path.
pub fn save_frame<P: AsRef<Path>>(frame: &Frame, directory: P) -> Result<PathBuf> {
    let directory = directory.as_ref();
    fs::create_dir_all(directory)?;

    let path = directory.join(format!("{}.jpg", Uuid::new_v4()));
    to_rgb_image(frame)?.save_with_format(&path, ImageFormat::Jpeg)?;

    log::info!("Saved frame {} to {:?}", frame.sequence, path);
    Ok(path)
}

/// Shrink each frame by its factor and place them side by side.
///
/// Shorter tiles are padded with black at the bottom. A factor of 0 or 1
/// keeps the frame at full size.
pub fn compose_preview(tiles: &[(&Frame, u32)]) -> Result<RgbImage> {
    let mut images = Vec::with_capacity(tiles.len());
    for (frame, factor) in tiles {
        let image = to_rgb_image(frame)?;
        let image = if *factor > 1 {
            let width = (image.width() / factor).max(1);
            let height = (image.height() / factor).max(1);
            imageops::resize(&image, width, height, FilterType::Triangle)
        } else {
            image
        };
        images.push(image);
    }

    let width: u32 = images.iter().map(RgbImage::width).sum();
    let height = images.iter().map(RgbImage::height).max().unwrap_or(0);
    let mut canvas = RgbImage::new(width, height);

    let mut x = 0i64;
    for image in &images {
        imageops::replace(&mut canvas, image, x, 0);
        x += i64::from(image.width());
    }

    Ok(canvas)
}

/// Save a composed preview, the format follows the file extension.
pub fn save_preview<P: AsRef<Path>>(preview: &RgbImage, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    preview.save(path)?;
    log::info!("Saved preview to {:?}", path);
    Ok(())
}
