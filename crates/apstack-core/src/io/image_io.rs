use std::path::Path;

use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb};
use ndarray::Array3;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::consts::COLOR_CHANNEL_COUNT;
use crate::error::{Result, StackError};
use crate::frame::BitDepth;
use crate::source::{MemoryFrameSource, SourceOptions};

fn to_array<T: Copy + Into<f32>>(raw: Vec<T>, width: u32, height: u32, channels: usize) -> Result<Array3<f32>> {
    let data = raw.into_iter().map(Into::into).collect();
    Array3::from_shape_vec((height as usize, width as usize, channels), data).map_err(|_| {
        StackError::InvalidDimensions {
            width: width as usize,
            height: height as usize,
        }
    })
}

/// Load one image as an `(h, w, c)` frame at native sample values.
///
/// 8-bit and 16-bit gray and RGB images keep their depth; any other layout
/// is converted to 16 bits (RGB if it carries color, gray otherwise).
pub fn load_frame(path: &Path) -> Result<(Array3<f32>, BitDepth)> {
    let img = image::open(path)?;
    let (width, height) = (img.width(), img.height());
    let loaded = match img {
        DynamicImage::ImageLuma8(buf) => (to_array(buf.into_raw(), width, height, 1)?, BitDepth::Eight),
        DynamicImage::ImageRgb8(buf) => (to_array(buf.into_raw(), width, height, 3)?, BitDepth::Eight),
        DynamicImage::ImageLuma16(buf) => (to_array(buf.into_raw(), width, height, 1)?, BitDepth::Sixteen),
        DynamicImage::ImageRgb16(buf) => (to_array(buf.into_raw(), width, height, 3)?, BitDepth::Sixteen),
        other if other.color().has_color() => {
            (to_array(other.to_rgb16().into_raw(), width, height, 3)?, BitDepth::Sixteen)
        }
        other => (to_array(other.to_luma16().into_raw(), width, height, 1)?, BitDepth::Sixteen),
    };
    debug!(path = %path.display(), width, height, depth = %loaded.1, "Loaded frame");
    Ok(loaded)
}

/// Load a sequence of image files, in the given order, into an in-memory
/// frame source. All files must share shape, channel count and bit depth.
pub fn load_sequence<P: AsRef<Path> + Sync>(paths: &[P], options: SourceOptions) -> Result<MemoryFrameSource> {
    if paths.is_empty() {
        return Err(StackError::EmptySequence);
    }
    let loaded: Vec<(Array3<f32>, BitDepth)> = paths
        .par_iter()
        .map(|p| load_frame(p.as_ref()))
        .collect::<Result<_>>()?;

    let bit_depth = loaded[0].1;
    if let Some(index) = loaded.iter().position(|(_, depth)| *depth != bit_depth) {
        return Err(StackError::Argument(format!(
            "{} is {}, but the sequence started with {}",
            paths[index].as_ref().display(),
            loaded[index].1,
            bit_depth
        )));
    }
    info!(frames = loaded.len(), %bit_depth, "Loaded image sequence");
    let frames = loaded.into_iter().map(|(frame, _)| frame).collect();
    MemoryFrameSource::new(frames, bit_depth, options)
}

/// Save a stacked `(h, w, c)` image, choosing the format from the extension.
///
/// PNG and JPEG are written with 8 bits per sample, TIFF (the default) with
/// 16. One channel gives a gray image, three an RGB image.
pub fn save_stacked(image: &Array3<u16>, path: &Path) -> Result<()> {
    let (h, w, channels) = image.dim();
    if channels != 1 && channels != COLOR_CHANNEL_COUNT {
        return Err(StackError::Argument(format!(
            "cannot save an image with {} channels",
            channels
        )));
    }
    let (width, height) = (w as u32, h as u32);
    let size_error = || StackError::InvalidDimensions { width: w, height: h };

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some(ext @ ("png" | "jpg" | "jpeg")) => {
            let format = if ext == "png" { ImageFormat::Png } else { ImageFormat::Jpeg };
            let pixels: Vec<u8> = image.iter().map(|&v| (v >> 8) as u8).collect();
            if channels == 1 {
                ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(width, height, pixels)
                    .ok_or_else(size_error)?
                    .save_with_format(path, format)?;
            } else {
                ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(width, height, pixels)
                    .ok_or_else(size_error)?
                    .save_with_format(path, format)?;
            }
        }
        _ => {
            let pixels: Vec<u16> = image.iter().copied().collect();
            if channels == 1 {
                ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(width, height, pixels)
                    .ok_or_else(size_error)?
                    .save_with_format(path, ImageFormat::Tiff)?;
            } else {
                ImageBuffer::<Rgb<u16>, Vec<u16>>::from_raw(width, height, pixels)
                    .ok_or_else(size_error)?
                    .save_with_format(path, ImageFormat::Tiff)?;
            }
        }
    }
    info!(path = %path.display(), width = w, height = h, channels, "Saved stacked image");
    Ok(())
}
