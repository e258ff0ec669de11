//! Camera frame sources.
//!
//! This module provides the sources the orchestrator reads frames from:
//! - `stub://` synthetic pattern source (development, tests)
//! - `file://<path>` still image replayed as a stream (bench testing)
//! - V4L2 devices such as `/dev/video0` (feature: ingest-v4l2)
//!
//! A source failure is fatal for the orchestrator loop, which then runs the
//! shutdown sequence. Sources never touch the network.

mod still;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::frame::Frame;

pub use still::StillImageSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Configuration shared by all camera sources.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// `stub://name`, `file:///path/to/image.jpg` or a V4L2 device path.
    pub url: String,
    /// Target frame rate (frames per second). Sources decimate to this rate.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: "/dev/video0".to_string(),
            target_fps: 30,
            width: 1280,
            height: 720,
        }
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Camera capability.
pub trait FrameSource: Send {
    fn name(&self) -> &'static str;

    /// Open the underlying device.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame. An error ends the capture loop.
    fn next_frame(&mut self) -> Result<Frame>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;

    /// Release the device. Must be idempotent; `next_frame` fails afterwards.
    fn close(&mut self) {}
}

/// Pick a source implementation from the configured URL.
pub fn open_camera(config: CameraConfig) -> Result<Box<dyn FrameSource>> {
    if config.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config)));
    }
    if let Some(path) = config.url.strip_prefix("file://") {
        let path = PathBuf::from(path);
        return Ok(Box::new(StillImageSource::new(path, config.target_fps)));
    }
    if config.url.contains("://") {
        return Err(anyhow!(
            "unsupported camera url '{}'; expected stub://, file:// or a device path",
            config.url
        ));
    }
    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(V4l2Source::new(config)))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(anyhow!(
            "camera device {} requires the ingest-v4l2 feature",
            config.url
        ))
    }
}

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

#[cfg(any(test, feature = "ingest-v4l2"))]
pub(crate) fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(base_ms.max(2_000) as u64)
}
