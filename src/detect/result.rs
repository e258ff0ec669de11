use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Axis-aligned box in corner form `(x1, y1, x2, y2)`, pixel coordinates of the
/// frame the detection refers to.
///
/// Backends that produce other layouts convert at the boundary with
/// [`BoundingBox::from_xywh`] (top-left + size) or [`BoundingBox::from_center`]
/// (YOLO-style center + size).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn from_xywh(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self::new(x, y, x + w, y + h)
    }

    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Rescale from one frame resolution to another.
    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self::new(self.x1 * sx, self.y1 * sy, self.x2 * sx, self.y2 * sy)
    }

    /// Clamp to `[0, width] x [0, height]`.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self::new(
            self.x1.clamp(0.0, w),
            self.y1.clamp(0.0, h),
            self.x2.clamp(0.0, w),
            self.y2.clamp(0.0, h),
        )
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    pub fn as_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// One object reported by the inference capability.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class: class.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
        }
    }
}

/// Output of a single inference call.
#[derive(Clone, Debug, Default)]
pub struct Inference {
    pub detections: Vec<Detection>,
    pub elapsed: Duration,
}

impl Inference {
    /// Frames per second implied by the inference latency.
    pub fn fps(&self) -> f32 {
        let secs = self.elapsed.as_secs_f32();
        if secs > 0.0 {
            1.0 / secs
        } else {
            0.0
        }
    }
}

/// Which detections count toward a window's best candidate.
#[derive(Clone, Debug)]
pub struct TargetFilter {
    classes: Vec<String>,
    min_confidence: f32,
}

impl TargetFilter {
    pub fn new(classes: Vec<String>, min_confidence: f32) -> Self {
        Self {
            classes: classes
                .into_iter()
                .map(|class| class.trim().to_lowercase())
                .collect(),
            min_confidence,
        }
    }

    pub fn qualifies(&self, detection: &Detection) -> bool {
        detection.confidence >= self.min_confidence
            && self
                .classes
                .iter()
                .any(|class| class == &detection.class.trim().to_lowercase())
    }

    pub fn select(&self, detections: &[Detection]) -> Vec<Detection> {
        detections
            .iter()
            .filter(|detection| self.qualifies(detection))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_conversions_agree() {
        let corner = BoundingBox::new(10.0, 20.0, 50.0, 80.0);
        assert_eq!(BoundingBox::from_xywh(10.0, 20.0, 40.0, 60.0), corner);
        assert_eq!(BoundingBox::from_center(30.0, 50.0, 40.0, 60.0), corner);
        assert_eq!(BoundingBox::new(50.0, 80.0, 10.0, 20.0), corner);
    }

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        let half = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((a.iou(&half) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn target_filter_matches_class_case_insensitively() {
        let filter = TargetFilter::new(vec!["Aedes aegypti".into()], 0.5);
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        assert!(filter.qualifies(&Detection::new("AEDES AEGYPTI", 0.9, bbox)));
        assert!(!filter.qualifies(&Detection::new("Aedes aegypti", 0.4, bbox)));
        assert!(!filter.qualifies(&Detection::new("housefly", 0.99, bbox)));
    }

    #[test]
    fn fps_from_elapsed() {
        let inference = Inference {
            detections: vec![],
            elapsed: Duration::from_millis(50),
        };
        assert!((inference.fps() - 20.0).abs() < 1e-3);
        assert_eq!(Inference::default().fps(), 0.0);
    }
}
