//! V4L2 camera source.
//!
//! Captures from a local device node (e.g. `/dev/video0`). RGB3 is requested; when
//! the driver insists on MJPG the frames are decoded in memory instead.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use ouroboros::self_referencing;
use std::time::Instant;

use super::{health_grace, CameraConfig, FrameSource, SourceStats};
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PixelLayout {
    Rgb24,
    Mjpeg,
}

pub struct V4l2Source {
    config: CameraConfig,
    state: Option<DeviceState>,
    layout: PixelLayout,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            layout: PixelLayout::Rgb24,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }
}

impl FrameSource for V4l2Source {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.url)
            .with_context(|| format!("open v4l2 device {}", self.config.url))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.url,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.layout = if format.fourcc == v4l::FourCC::new(b"RGB3") {
            PixelLayout::Rgb24
        } else if format.fourcc == v4l::FourCC::new(b"MJPG") {
            PixelLayout::Mjpeg
        } else {
            return Err(anyhow!(
                "v4l2 device {} negotiated unsupported format {}",
                self.config.url,
                format.fourcc
            ));
        };

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.url,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{}, {:?})",
            self.config.url,
            self.active_width,
            self.active_height,
            self.layout
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let (buf, meta) = state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context("capture v4l2 frame")
            })?;
        let used = (meta.bytesused as usize).min(buf.len());
        let bytes = if used > 0 { &buf[..used] } else { buf };

        let frame = match self.layout {
            PixelLayout::Rgb24 => Frame::from_rgb(
                bytes.to_vec(),
                self.active_width,
                self.active_height,
                Utc::now(),
            )?,
            PixelLayout::Mjpeg => Frame::decode(bytes, Utc::now())?,
        };

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(frame)
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= health_grace(self.config.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.url.clone(),
        }
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Source: released {}", self.config.url);
        }
    }
}
