use anyhow::{anyhow, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::time::Instant;

use super::{frame_interval, FrameSource, SourceStats};
use crate::frame::Frame;

/// Replays one image file as a frame stream (`file://`).
///
/// Useful on the bench: point the trap at a known mosquito photo and watch the
/// whole detect/report path run without a camera attached.
pub struct StillImageSource {
    path: PathBuf,
    target_fps: u32,
    image: Option<Frame>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl StillImageSource {
    pub fn new(path: PathBuf, target_fps: u32) -> Self {
        Self {
            path,
            target_fps,
            image: None,
            frame_count: 0,
            last_frame_at: None,
        }
    }
}

impl FrameSource for StillImageSource {
    fn name(&self) -> &'static str {
        "still"
    }

    fn connect(&mut self) -> Result<()> {
        let frame = Frame::open(&self.path)?;
        log::info!(
            "StillImageSource: loaded {} ({}x{})",
            self.path.display(),
            frame.width(),
            frame.height()
        );
        self.image = Some(frame);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let image = self
            .image
            .as_ref()
            .ok_or_else(|| anyhow!("still image source not connected; call connect() first"))?;
        if let Some(last) = self.last_frame_at {
            let interval = frame_interval(self.target_fps);
            let since = last.elapsed();
            if since < interval {
                std::thread::sleep(interval - since);
            }
        }
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(image.restamped(Utc::now()))
    }

    fn is_healthy(&self) -> bool {
        self.image.is_some()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.path.display().to_string(),
        }
    }

    fn close(&mut self) {
        self.image = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_image_from_disk() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bench.jpg");
        let frame = Frame::from_rgb(vec![200; 16 * 8 * 3], 16, 8, Utc::now())?;
        std::fs::write(&path, frame.encode_jpeg(90)?)?;

        let mut source = StillImageSource::new(path, 0);
        assert!(source.next_frame().is_err());
        source.connect()?;
        let replayed = source.next_frame()?;
        assert_eq!((replayed.width(), replayed.height()), (16, 8));
        assert!(source.is_healthy());

        source.close();
        assert!(!source.is_healthy());
        assert!(source.next_frame().is_err());
        source.close();
        Ok(())
    }
}
