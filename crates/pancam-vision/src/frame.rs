//! Decoded camera frames.

use image::{imageops, GrayImage, ImageFormat};

use crate::error::VisionResult;
use crate::roi::Region;

/// One decoded frame, valid for a single tick.
///
/// Keeps the original JPEG bytes next to the grayscale raster so that the
/// motion controller can capture snapshots without re-encoding, and so the
/// OpenCV detectors can decode their own color representation.
#[derive(Debug, Clone)]
pub struct Frame {
    jpeg: Vec<u8>,
    gray: GrayImage,
}

impl Frame {
    /// Decode a JPEG blob.
    pub fn decode(jpeg: Vec<u8>) -> VisionResult<Self> {
        let gray = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)?.to_luma8();
        Ok(Self { jpeg, gray })
    }

    /// Wrap an already decoded grayscale raster.
    pub fn from_gray(gray: GrayImage) -> Self {
        Self {
            jpeg: Vec::new(),
            gray,
        }
    }

    pub fn width(&self) -> u32 {
        self.gray.width()
    }

    pub fn height(&self) -> u32 {
        self.gray.height()
    }

    pub fn size(&self) -> (u32, u32) {
        self.gray.dimensions()
    }

    pub fn gray(&self) -> &GrayImage {
        &self.gray
    }

    /// Original JPEG bytes; empty when built with [`Frame::from_gray`].
    pub fn jpeg(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn into_jpeg(self) -> Vec<u8> {
        self.jpeg
    }

    /// Grayscale pixels inside `region`, clamped to the frame.
    pub fn crop_gray(&self, region: &Region) -> GrayImage {
        let r = region.clamp_to(self.width(), self.height());
        imageops::crop_imm(&self.gray, r.x, r.y, r.width, r.height).to_image()
    }
}
