use anyhow::Result;
use chrono::Utc;
use std::time::Instant;

use super::{frame_interval, CameraConfig, FrameSource, SourceStats};
use crate::frame::{rgb_len, Frame};

/// Synthetic source (`stub://`). Produces a slowly changing gradient at the
/// configured rate.
pub struct SyntheticSource {
    config: CameraConfig,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            last_frame_at: None,
            scene_state: 0,
        }
    }

    fn generate_pixels(&mut self) -> Result<Vec<u8>> {
        let pixel_count = rgb_len(self.config.width, self.config.height)?;

        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        Ok(pixels)
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn connect(&mut self) -> Result<()> {
        log::info!("SyntheticSource: connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if let Some(last) = self.last_frame_at {
            let interval = frame_interval(self.config.target_fps);
            let since = last.elapsed();
            if since < interval {
                std::thread::sleep(interval - since);
            }
        }
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        let pixels = self.generate_pixels()?;
        Frame::from_rgb(pixels, self.config.width, self.config.height, Utc::now())
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.url.clone(),
        }
    }
}
