//! The sensing loop.
//!
//! One sequential flow per iteration: read a frame, run inference, read the
//! position, feed the detection window, refresh the panel. Window expiry is a
//! time check made before each frame is observed. Nothing in here waits on the
//! network; finished windows are encoded and handed to the upload queue.
//!
//! Shutdown runs in a fixed order: release the camera and flush the open window,
//! close the location sources, drain the upload queue, then halt the display.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::TrapConfig;
use crate::detect::{Detection, InferenceBackend, TargetFilter};
use crate::display::{LiveStatus, Status, StatusDisplay, BRAND};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::location::LocationManager;
use crate::net::{Connectivity, DEFAULT_REFRESH};
use crate::upload::{UploadQueue, UploadSnapshot};
use crate::window::DetectionWindow;

const STOP_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub window: Duration,
    pub filter: TargetFilter,
    /// Run inference on every Nth frame.
    pub frame_stride: u32,
    /// Pause between processed frames; the panel shows `Sleeping` meanwhile.
    pub sample_interval: Duration,
    pub inference_width: u32,
    pub jpeg_quality: u8,
    pub annotate: bool,
    pub connectivity_refresh: Duration,
    /// Where `--dev` mirrors the latest annotated frame.
    pub dev_preview: Option<PathBuf>,
}

impl PipelineSettings {
    pub fn from_config(cfg: &TrapConfig, dev: bool) -> Self {
        Self {
            window: cfg.detection.window,
            filter: cfg.target_filter(),
            frame_stride: cfg.detection.frame_stride.max(1),
            sample_interval: cfg.detection.sample_interval,
            inference_width: cfg.camera.inference_width,
            jpeg_quality: cfg.camera.jpeg_quality,
            annotate: cfg.detection.annotate,
            connectivity_refresh: DEFAULT_REFRESH,
            dev_preview: dev.then(|| cfg.detection.dev_preview_path.clone()),
        }
    }
}

/// Outcome of one loop iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Processed { qualifying: usize },
    /// Frame read but not analysed (stride or inference failure).
    Skipped,
    /// The camera failed; the loop must end.
    SourceEnded,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_read: u64,
    pub frames_processed: u64,
    pub windows_emitted: u64,
    pub uploads: UploadSnapshot,
}

pub struct Orchestrator {
    settings: PipelineSettings,
    camera: Box<dyn FrameSource>,
    backend: Box<dyn InferenceBackend>,
    locations: LocationManager,
    uploads: UploadQueue,
    display: StatusDisplay,
    window: DetectionWindow,
    connectivity: Connectivity,
    frames_read: u64,
    frames_processed: u64,
    windows_emitted: u64,
}

impl Orchestrator {
    pub fn new(
        settings: PipelineSettings,
        camera: Box<dyn FrameSource>,
        backend: Box<dyn InferenceBackend>,
        locations: LocationManager,
        uploads: UploadQueue,
        display: StatusDisplay,
    ) -> Self {
        let window = DetectionWindow::new(Instant::now(), settings.window);
        let connectivity = Connectivity::new(settings.connectivity_refresh);
        Self {
            settings,
            camera,
            backend,
            locations,
            uploads,
            display,
            window,
            connectivity,
            frames_read: 0,
            frames_processed: 0,
            windows_emitted: 0,
        }
    }

    /// Loop until `stop` is raised or the camera fails, then shut down.
    pub fn run(mut self, stop: &AtomicBool) -> Result<RunSummary> {
        if let Err(err) = self.prepare() {
            self.shutdown("Camera error")?;
            return Err(err);
        }
        log::info!(
            "trap running: camera={} backend={} window={}s",
            self.camera.name(),
            self.backend.name(),
            self.settings.window.as_secs()
        );

        let mut reason = "Stopped";
        while !stop.load(Ordering::SeqCst) {
            match self.step() {
                Step::SourceEnded => {
                    reason = "Camera error";
                    break;
                }
                Step::Processed { .. } if !self.settings.sample_interval.is_zero() => {
                    // The live screen must reach the panel before the pause replaces it.
                    if !self.display.flush() {
                        log::debug!("live status not drawn before sleeping");
                    }
                    self.display.set(Status::Sleeping);
                    sleep_unless_stopped(self.settings.sample_interval, stop);
                }
                _ => {}
            }
        }
        self.shutdown(reason)
    }

    fn prepare(&mut self) -> Result<()> {
        self.camera.connect().context("connect camera")?;
        if !self.camera.is_healthy() {
            return Err(anyhow!("camera {} not ready after connect", self.camera.name()));
        }
        self.backend.warm_up().context("warm up inference backend")?;
        Ok(())
    }

    /// One iteration of the sensing loop.
    pub fn step(&mut self) -> Step {
        let frame = match self.camera.next_frame() {
            Ok(frame) => frame,
            Err(err) => {
                log::error!("camera read failed: {:#}", err);
                return Step::SourceEnded;
            }
        };
        self.frames_read += 1;
        if (self.frames_read - 1) % u64::from(self.settings.frame_stride) != 0 {
            return Step::Skipped;
        }

        let now = Instant::now();
        if self.window.is_expired(now) {
            self.rotate_window(now);
        }

        let (detections, fps) = match self.detect(&frame) {
            Ok(result) => result,
            Err(err) => {
                log::warn!("inference failed, skipping frame: {:#}", err);
                return Step::Skipped;
            }
        };
        let qualifying = self.settings.filter.select(&detections);
        for detection in &detections {
            log::debug!(
                "detected {} ({:.2}) at {:?}",
                detection.class,
                detection.confidence,
                detection.bbox.as_array()
            );
        }
        let count = qualifying.len();
        self.frames_processed += 1;

        if let Some(path) = &self.settings.dev_preview {
            write_preview(path, &frame, &qualifying, self.settings.jpeg_quality);
        }

        let location = self.locations.current_location();
        self.window.observe(frame, location, qualifying);

        let (wifi, ip) = self.connectivity.current(now);
        self.display.set(Status::Detecting(LiveStatus {
            count,
            fps,
            wifi,
            ip,
        }));
        Step::Processed { qualifying: count }
    }

    /// Run inference on a downscaled copy and map boxes back to the full frame.
    fn detect(&mut self, frame: &Frame) -> Result<(Vec<Detection>, f32)> {
        let small = frame.downscaled_to_width(self.settings.inference_width);
        let input = small.as_ref().unwrap_or(frame);
        let inference = self.backend.infer(input)?;
        let sx = frame.width() as f32 / input.width() as f32;
        let sy = frame.height() as f32 / input.height() as f32;
        let detections = inference
            .detections
            .iter()
            .map(|d| Detection {
                bbox: d.bbox.scale(sx, sy).clamp_to(frame.width(), frame.height()),
                ..d.clone()
            })
            .collect();
        Ok((detections, inference.fps()))
    }

    fn rotate_window(&mut self, now: Instant) {
        let expired = std::mem::replace(
            &mut self.window,
            DetectionWindow::new(now, self.settings.window),
        );
        self.emit(expired);
    }

    fn emit(&mut self, window: DetectionWindow) {
        let Some(report) = window.finish() else {
            log::info!("window closed without any processed frame; nothing to report");
            return;
        };
        let (detected, count, frames) =
            (report.detected, report.detection_count(), report.frames_seen);
        match report.into_job(self.settings.jpeg_quality, self.settings.annotate) {
            Ok(job) => {
                self.uploads.schedule(job);
                self.windows_emitted += 1;
                if detected {
                    log::info!("window closed: {} mosquitoes in best of {} frames", count, frames);
                } else {
                    log::info!("window closed: no detections in {} frames, heartbeat", frames);
                }
            }
            Err(err) => log::warn!("could not encode window report: {:#}", err),
        }
    }

    fn shutdown(mut self, reason: &str) -> Result<RunSummary> {
        log::info!("shutting down: {}", reason);
        self.camera.close();
        let camera = self.camera.stats();
        log::info!(
            "camera {} released after {} frames",
            camera.source,
            camera.frames_captured
        );

        let now = Instant::now();
        log::info!(
            "flushing open window {}s before expiry",
            self.window.remaining(now).as_secs()
        );
        let open = std::mem::replace(
            &mut self.window,
            DetectionWindow::new(now, self.settings.window),
        );
        self.emit(open);

        self.locations.close();
        self.uploads.wait_for_completion()?;
        let summary = RunSummary {
            frames_read: self.frames_read,
            frames_processed: self.frames_processed,
            windows_emitted: self.windows_emitted,
            uploads: self.uploads.stats(),
        };
        self.display.stop(format!("{}\n{}", BRAND, reason))?;
        log::info!(
            "trap stopped after {} frames, {} windows, {} uploads ({} dropped)",
            summary.frames_read,
            summary.windows_emitted,
            summary.uploads.uploaded,
            summary.uploads.dropped
        );
        Ok(summary)
    }
}

fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + total;
    while !stop.load(Ordering::SeqCst) {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break;
        }
        std::thread::sleep(left.min(STOP_POLL));
    }
}

fn write_preview(path: &Path, frame: &Frame, qualifying: &[Detection], quality: u8) {
    let mut preview = frame.clone();
    preview.annotate(qualifying);
    let result = preview
        .encode_jpeg(quality)
        .and_then(|jpeg| std::fs::write(path, jpeg).context("write preview"));
    if let Err(err) = result {
        log::debug!("preview {} not updated: {:#}", path.display(), err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, StubBackend};
    use crate::display::{DisplaySettings, LogSink};
    use crate::ingest::{CameraConfig, SyntheticSource};
    use crate::upload::{CloudStore, DeviceIdentity};
    use serde_json::Value;

    struct Refusing;

    impl CloudStore for Refusing {
        fn put_blob(&mut self, _path: &str, _jpeg: &[u8]) -> Result<()> {
            Err(anyhow!("offline"))
        }

        fn upsert_document(&mut self, _c: &str, _d: &str, _b: &Value) -> Result<()> {
            Err(anyhow!("offline"))
        }
    }

    fn settings(stride: u32) -> PipelineSettings {
        PipelineSettings {
            window: Duration::from_secs(3600),
            filter: TargetFilter::new(vec!["Aedes aegypti".into()], 0.5),
            frame_stride: stride,
            sample_interval: Duration::ZERO,
            inference_width: 32,
            jpeg_quality: 80,
            annotate: false,
            connectivity_refresh: Duration::from_secs(3600),
            dev_preview: None,
        }
    }

    fn orchestrator(stride: u32, script: Vec<Vec<Detection>>) -> Orchestrator {
        let camera = SyntheticSource::new(CameraConfig {
            url: "stub://test".into(),
            target_fps: 0,
            width: 64,
            height: 48,
        });
        let display = StatusDisplay::start(
            Box::new(LogSink::new()),
            DisplaySettings {
                render_interval: Duration::from_millis(10),
                stop_linger: Duration::ZERO,
            },
        )
        .unwrap();
        let uploads = UploadQueue::start(
            Box::new(Refusing),
            DeviceIdentity::new("00000", None).unwrap(),
            Some(display.clone()),
            Duration::from_millis(10),
        )
        .unwrap();
        Orchestrator::new(
            settings(stride),
            Box::new(camera),
            Box::new(StubBackend::scripted(script)),
            LocationManager::new(),
            uploads,
            display,
        )
    }

    #[test]
    fn boxes_are_rescaled_to_full_frame() {
        let hit = Detection::new("Aedes aegypti", 0.9, BoundingBox::new(4.0, 4.0, 8.0, 8.0));
        let mut orch = orchestrator(1, vec![vec![hit]]);
        orch.camera.connect().unwrap();
        assert_eq!(orch.step(), Step::Processed { qualifying: 1 });
        let frame = orch.camera.next_frame().unwrap();
        let (detections, _) = orch.detect(&frame).unwrap();
        assert_eq!(detections[0].bbox, BoundingBox::new(8.0, 8.0, 16.0, 16.0));
        orch.shutdown("test").unwrap();
    }

    #[test]
    fn stride_skips_frames_between_inferences() {
        let mut orch = orchestrator(3, vec![vec![]]);
        orch.camera.connect().unwrap();
        let steps: Vec<Step> = (0..4).map(|_| orch.step()).collect();
        assert_eq!(
            steps,
            vec![
                Step::Processed { qualifying: 0 },
                Step::Skipped,
                Step::Skipped,
                Step::Processed { qualifying: 0 },
            ]
        );
        let summary = orch.shutdown("test").unwrap();
        assert_eq!(summary.frames_read, 4);
        assert_eq!(summary.frames_processed, 2);
    }

    #[test]
    fn shutdown_flushes_open_window_even_when_uploads_fail() {
        let mut orch = orchestrator(1, vec![vec![]]);
        orch.camera.connect().unwrap();
        orch.step();
        let summary = orch.shutdown("test").unwrap();
        assert_eq!(summary.windows_emitted, 1);
        assert_eq!(summary.uploads.attempted, 1);
        assert_eq!(summary.uploads.dropped, 1);
    }
}
