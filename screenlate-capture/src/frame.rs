//! Captured frames
//!
//! A `Frame` is an immutable snapshot of one capture region: the raw pixel
//! buffer plus the screen-space rectangle it came from. Frames are created by
//! the capture backend, owned by the pipeline for the duration of one tick
//! and never mutated.

use crate::geometry::Rect;
use crate::region::Region;
use crate::{CaptureError, Result};
use chrono::{DateTime, Utc};

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PixelFormat {
    /// 8-bit RGB, 3 bytes per pixel
    Rgb8,
    /// 8-bit RGBA, 4 bytes per pixel
    Rgba8,
    /// 8-bit grayscale, 1 byte per pixel
    Gray8,
}

impl PixelFormat {
    /// Bytes per pixel for this format
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Wire tag used by the subprocess transport
    pub fn dtype_tag(&self) -> &'static str {
        match self {
            PixelFormat::Rgb8 => "rgb8",
            PixelFormat::Rgba8 => "rgba8",
            PixelFormat::Gray8 => "gray8",
        }
    }

    /// Parse a wire tag back into a format
    pub fn from_dtype_tag(tag: &str) -> Option<Self> {
        match tag {
            "rgb8" => Some(PixelFormat::Rgb8),
            "rgba8" => Some(PixelFormat::Rgba8),
            "gray8" => Some(PixelFormat::Gray8),
            _ => None,
        }
    }
}

/// An immutable captured frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw pixel data, row-major, no padding
    pub pixels: Vec<u8>,

    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Pixel layout of `pixels`
    pub format: PixelFormat,

    /// Copy of the region this frame was captured from
    pub region: Region,

    /// Capture timestamp
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    /// Create a frame, validating that the buffer matches the dimensions
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        region: Region,
    ) -> Result<Self> {
        let expected = width as usize * height as usize * format.channels();
        if pixels.len() != expected {
            return Err(CaptureError::ImageProcessingError(format!(
                "buffer size {} does not match {}x{} {:?} (expected {})",
                pixels.len(),
                width,
                height,
                format,
                expected
            )));
        }
        Ok(Self {
            pixels,
            width,
            height,
            format,
            region,
            timestamp: Utc::now(),
        })
    }

    /// Screen-space rectangle this frame covers
    pub fn screen_rect(&self) -> Rect {
        self.region.rect
    }

    /// Whether the frame has no pixels
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.pixels.is_empty()
    }

    /// Size of the pixel buffer in bytes
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    /// Luminance of the pixel at (x, y), 0-255
    pub fn luminance_at(&self, x: u32, y: u32) -> u8 {
        let c = self.format.channels();
        let idx = (y as usize * self.width as usize + x as usize) * c;
        match self.format {
            PixelFormat::Gray8 => self.pixels[idx],
            PixelFormat::Rgb8 | PixelFormat::Rgba8 => {
                let r = self.pixels[idx] as f32;
                let g = self.pixels[idx + 1] as f32;
                let b = self.pixels[idx + 2] as f32;
                (0.299 * r + 0.587 * g + 0.114 * b) as u8
            }
        }
    }

    /// Luminance image of the whole frame
    pub fn to_gray_image(&self) -> image::GrayImage {
        let mut gray = image::GrayImage::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                gray.put_pixel(x, y, image::Luma([self.luminance_at(x, y)]));
            }
        }
        gray
    }

    /// Downsample to grayscale by an integer factor
    ///
    /// Nearest-neighbor sampling: deterministic for identical input, cheap
    /// for the similarity hash and motion grids. Returns the buffer and its
    /// dimensions; a factor larger than the frame collapses to one pixel.
    pub fn downsampled_gray(&self, factor: u32) -> (Vec<u8>, u32, u32) {
        if self.is_empty() {
            return (Vec::new(), 0, 0);
        }
        let factor = factor.max(1);
        let out_w = (self.width / factor).max(1);
        let out_h = (self.height / factor).max(1);
        let gray = self.to_gray_image();
        let resized =
            image::imageops::resize(&gray, out_w, out_h, image::imageops::FilterType::Nearest);
        (resized.into_raw(), out_w, out_h)
    }
}
