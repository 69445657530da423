//! Thumbnail resizing.
//!
//! The transform stage delegates the pixel work to an [`ImageTransformer`].
//! The default implementation, [`ImageResizer`], uses the `image` crate:
//!
//! 1. Guess the input format from the magic bytes
//! 2. Decode
//! 3. Resize into the target box (crop to fill, or fit inside)
//! 4. Re-encode: JPEG stays JPEG, every other input becomes PNG
//!
//! Calls are CPU-bound and synchronous; the pipeline runs them on the
//! blocking thread pool.

use anyhow::{Context, Result};
use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// How the source image is mapped into the target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeStrategy {
    /// Scale to cover the whole box and crop the overflow.
    /// Output is exactly `width x height`.
    #[default]
    Crop,
    /// Scale to fit inside the box, preserving aspect ratio.
    Fit,
}

/// Target dimensions plus resize strategy. Fixed pipeline policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetBox {
    pub width: u32,
    pub height: u32,
    pub strategy: ResizeStrategy,
}

impl Default for TargetBox {
    fn default() -> Self {
        Self {
            width: 100,
            height: 100,
            strategy: ResizeStrategy::Crop,
        }
    }
}

/// Output of a successful transform.
#[derive(Debug, Clone)]
pub struct Transformed {
    /// Encoded thumbnail
    pub image: Bytes,
    /// File extension including the leading dot, e.g. `.png`
    pub extension: String,
}

/// Pixel-level transform collaborator.
pub trait ImageTransformer: Send + Sync {
    /// Decode `image`, resize it into `target` and re-encode it.
    fn transform(&self, image: &[u8], target: TargetBox) -> Result<Transformed>;
}

/// [`ImageTransformer`] backed by the `image` crate.
#[derive(Debug, Clone)]
pub struct ImageResizer {
    filter: FilterType,
}

impl ImageResizer {
    pub fn new() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }
}

impl Default for ImageResizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageTransformer for ImageResizer {
    fn transform(&self, image: &[u8], target: TargetBox) -> Result<Transformed> {
        let format = image::guess_format(image).context("unrecognized image format")?;
        let decoded = image::load_from_memory_with_format(image, format)
            .with_context(|| format!("failed to decode {:?} image", format))?;

        let resized = match target.strategy {
            ResizeStrategy::Crop => decoded.resize_to_fill(target.width, target.height, self.filter),
            ResizeStrategy::Fit => decoded.resize(target.width, target.height, self.filter),
        };

        let (output_format, encodable) = match format {
            // The JPEG encoder rejects alpha channels
            ImageFormat::Jpeg => (ImageFormat::Jpeg, DynamicImage::ImageRgb8(resized.to_rgb8())),
            _ => (ImageFormat::Png, DynamicImage::ImageRgba8(resized.to_rgba8())),
        };

        let mut buf = Cursor::new(Vec::new());
        encodable
            .write_to(&mut buf, output_format)
            .with_context(|| format!("failed to encode {:?} thumbnail", output_format))?;

        Ok(Transformed {
            image: Bytes::from(buf.into_inner()),
            extension: extension_for(output_format),
        })
    }
}

fn extension_for(format: ImageFormat) -> String {
    let ext = format.extensions_str().first().copied().unwrap_or("bin");
    format!(".{}", ext)
}
