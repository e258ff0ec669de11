//! Best-of-window selection.
//!
//! A `DetectionWindow` covers a fixed time span. Every observed frame becomes the
//! heartbeat candidate; a frame replaces the best candidate only when it carries
//! strictly more qualifying detections than the current best, so the earliest
//! frame wins ties. When the span is over the window is consumed by
//! [`DetectionWindow::finish`] and a fresh one takes its place, which makes
//! "at most one report per window" a property of the type.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use crate::detect::Detection;
use crate::frame::Frame;
use crate::location::Fix;
use crate::upload::UploadJob;

/// Default window span: 29 minutes.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(29 * 60);

/// A frame together with the metadata it would be reported with.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub frame: Frame,
    pub timestamp: DateTime<Utc>,
    pub location: Fix,
    pub detections: Vec<Detection>,
}

#[derive(Debug)]
pub struct DetectionWindow {
    start_time: Instant,
    duration: Duration,
    best_count: usize,
    best: Option<Candidate>,
    fallback: Option<Candidate>,
    frames_seen: u64,
}

impl DetectionWindow {
    pub fn new(start_time: Instant, duration: Duration) -> Self {
        Self {
            start_time,
            duration,
            best_count: 0,
            best: None,
            fallback: None,
            frames_seen: 0,
        }
    }

    /// Present one processed frame. `qualifying` holds only the detections that
    /// count toward the window (target species above threshold).
    pub fn observe(&mut self, frame: Frame, location: Fix, qualifying: Vec<Detection>) {
        self.frames_seen += 1;
        let timestamp = frame.captured_at();
        let count = qualifying.len();
        if count > self.best_count {
            self.best_count = count;
            self.best = Some(Candidate {
                frame: frame.clone(),
                timestamp,
                location,
                detections: qualifying,
            });
        }
        self.fallback = Some(Candidate {
            frame,
            timestamp,
            location,
            detections: Vec::new(),
        });
    }

    pub fn best_count(&self) -> usize {
        self.best_count
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.start_time) >= self.duration
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.duration
            .saturating_sub(now.saturating_duration_since(self.start_time))
    }

    /// Close the window and pick what to report: the best candidate when any
    /// target was seen, the latest heartbeat otherwise. `None` only when no frame
    /// was observed at all.
    pub fn finish(self) -> Option<WindowReport> {
        let frames_seen = self.frames_seen;
        if self.best_count > 0 {
            if let Some(candidate) = self.best {
                return Some(WindowReport {
                    candidate,
                    detected: true,
                    frames_seen,
                });
            }
        }
        self.fallback.map(|candidate| WindowReport {
            candidate,
            detected: false,
            frames_seen,
        })
    }
}

/// The single candidate a finished window hands to the uploader.
#[derive(Clone, Debug)]
pub struct WindowReport {
    pub candidate: Candidate,
    pub detected: bool,
    pub frames_seen: u64,
}

impl WindowReport {
    pub fn detection_count(&self) -> usize {
        self.candidate.detections.len()
    }

    /// Encode the frame and freeze the report into an upload job.
    pub fn into_job(self, jpeg_quality: u8, annotate: bool) -> Result<UploadJob> {
        let Candidate {
            mut frame,
            timestamp,
            location,
            detections,
        } = self.candidate;
        if annotate && self.detected {
            frame.annotate(&detections);
        }
        let image_jpeg = frame.encode_jpeg(jpeg_quality)?;
        Ok(if self.detected {
            UploadJob::detection(image_jpeg, timestamp, location, detections)
        } else {
            UploadJob::heartbeat(image_jpeg, timestamp, location)
        })
    }
}
