use anyhow::Result;
use std::time::{Duration, Instant};

use crate::detect::backend::InferenceBackend;
use crate::detect::result::{Detection, Inference};
use crate::frame::Frame;

/// Stub backend for development and tests.
///
/// Replays a fixed script of detection lists, one entry per frame, cycling when
/// the script runs out. An empty script never detects anything.
pub struct StubBackend {
    script: Vec<Vec<Detection>>,
    cursor: usize,
    reported_latency: Option<Duration>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn scripted(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script,
            cursor: 0,
            reported_latency: None,
        }
    }

    /// Report a fixed inference latency instead of the measured one.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.reported_latency = Some(latency);
        self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, _frame: &Frame) -> Result<Inference> {
        let start = Instant::now();
        let detections = if self.script.is_empty() {
            Vec::new()
        } else {
            let entry = self.script[self.cursor % self.script.len()].clone();
            self.cursor = self.cursor.wrapping_add(1);
            entry
        };
        Ok(Inference {
            detections,
            elapsed: self.reported_latency.unwrap_or_else(|| start.elapsed()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use chrono::Utc;

    #[test]
    fn stub_backend_cycles_script() {
        let frame = Frame::from_rgb(vec![0; 12], 2, 2, Utc::now()).unwrap();
        let hit = Detection::new("Aedes aegypti", 0.9, BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        let mut backend = StubBackend::scripted(vec![vec![hit.clone()], vec![]])
            .with_latency(Duration::from_millis(40));

        let r1 = backend.infer(&frame).unwrap();
        assert_eq!(r1.detections, vec![hit.clone()]);
        assert_eq!(r1.elapsed, Duration::from_millis(40));

        let r2 = backend.infer(&frame).unwrap();
        assert!(r2.detections.is_empty());

        let r3 = backend.infer(&frame).unwrap();
        assert_eq!(r3.detections, vec![hit]);
    }

    #[test]
    fn empty_script_detects_nothing() {
        let frame = Frame::from_rgb(vec![0; 12], 2, 2, Utc::now()).unwrap();
        let mut backend = StubBackend::default();
        assert!(backend.infer(&frame).unwrap().detections.is_empty());
    }
}
