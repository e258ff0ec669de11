//! Captured camera frames.
//!
//! A `Frame` owns its RGB8 pixels and the UTC instant it was captured. Frames are
//! cheap to move through the pipeline; the window only clones one when a frame
//! becomes the new best candidate.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, Rgb, RgbImage};
use std::fmt;
use std::path::Path;

use crate::detect::{BoundingBox, Detection};

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: u32 = 2;

/// Byte length of a packed RGB24 buffer, or an error when it cannot be addressed.
pub fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions {}x{} overflow", width, height))
}

#[derive(Clone)]
pub struct Frame {
    image: RgbImage,
    captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: RgbImage, captured_at: DateTime<Utc>) -> Self {
        Self { image, captured_at }
    }

    /// Build a frame from packed RGB24 bytes.
    pub fn from_rgb(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: DateTime<Utc>,
    ) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("rgb buffer rejected for {}x{}", width, height))?;
        Ok(Self::new(image, captured_at))
    }

    /// Decode an encoded image (JPEG/PNG) into a frame.
    pub fn decode(bytes: &[u8], captured_at: DateTime<Utc>) -> Result<Self> {
        let image = image::load_from_memory(bytes)
            .context("decode image")?
            .into_rgb8();
        Ok(Self::new(image, captured_at))
    }

    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("open image {}", path.display()))?
            .into_rgb8();
        Ok(Self::new(image, Utc::now()))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Same pixels, new capture time. Used by replaying sources.
    pub fn restamped(&self, captured_at: DateTime<Utc>) -> Self {
        Self::new(self.image.clone(), captured_at)
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Downscale, keeping the aspect ratio, when the frame is wider than `max_width`.
    ///
    /// Returns `None` when no resize is needed.
    pub fn downscaled_to_width(&self, max_width: u32) -> Option<Frame> {
        if max_width == 0 || self.width() <= max_width {
            return None;
        }
        let ratio = max_width as f64 / self.width() as f64;
        let height = ((self.height() as f64 * ratio).round() as u32).max(1);
        let image = image::imageops::resize(&self.image, max_width, height, FilterType::Triangle);
        Some(Self::new(image, self.captured_at))
    }

    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
            encoder
                .encode(
                    self.image.as_raw(),
                    self.width(),
                    self.height(),
                    ExtendedColorType::Rgb8,
                )
                .context("jpeg encoding failed")?;
        }
        Ok(buffer)
    }

    /// Draw detection boxes as hollow rectangles.
    pub fn annotate(&mut self, detections: &[Detection]) {
        for detection in detections {
            self.draw_box(&detection.bbox);
        }
    }

    fn draw_box(&mut self, bbox: &BoundingBox) {
        let (width, height) = (self.width(), self.height());
        if width == 0 || height == 0 {
            return;
        }
        let clamped = bbox.clamp_to(width - 1, height - 1);
        let (x1, y1) = (clamped.x1 as u32, clamped.y1 as u32);
        let (x2, y2) = (clamped.x2 as u32, clamped.y2 as u32);
        for t in 0..BOX_THICKNESS {
            for x in x1..=x2 {
                self.put(x, y1.saturating_add(t).min(y2));
                self.put(x, y2.saturating_sub(t).max(y1));
            }
            for y in y1..=y2 {
                self.put(x1.saturating_add(t).min(x2), y);
                self.put(x2.saturating_sub(t).max(x1), y);
            }
        }
    }

    fn put(&mut self, x: u32, y: u32) {
        if x < self.width() && y < self.height() {
            self.image.put_pixel(x, y, BOX_COLOR);
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(width: u32, height: u32) -> Frame {
        Frame::from_rgb(vec![128; (width * height * 3) as usize], width, height, Utc::now())
            .unwrap()
    }

    #[test]
    fn rejects_short_buffers() {
        assert!(Frame::from_rgb(vec![0; 10], 4, 4, Utc::now()).is_err());
    }

    #[test]
    fn rgb_len_rejects_unaddressable_sizes() {
        assert_eq!(rgb_len(4, 2).unwrap(), 24);
        assert!(rgb_len(u32::MAX, u32::MAX).is_err());
    }

    #[test]
    fn downscale_keeps_aspect_ratio() {
        let frame = gray(1280, 720);
        let small = frame.downscaled_to_width(640).expect("resized");
        assert_eq!((small.width(), small.height()), (640, 360));
        assert!(gray(320, 240).downscaled_to_width(640).is_none());
    }

    #[test]
    fn jpeg_round_trip_preserves_dimensions() {
        let frame = gray(64, 48);
        let jpeg = frame.encode_jpeg(DEFAULT_JPEG_QUALITY).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = Frame::decode(&jpeg, Utc::now()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn annotate_paints_box_edges_only() {
        let mut frame = gray(32, 32);
        let detection = Detection::new("Aedes aegypti", 0.9, BoundingBox::new(4.0, 4.0, 20.0, 20.0));
        frame.annotate(&[detection]);
        assert_eq!(frame.image().get_pixel(4, 10), &BOX_COLOR);
        assert_eq!(frame.image().get_pixel(12, 20), &BOX_COLOR);
        assert_eq!(frame.image().get_pixel(12, 12), &Rgb([128, 128, 128]));
    }
}
