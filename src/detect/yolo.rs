//! YOLO output decoding.
//!
//! Models exported for the trap emit one row per candidate:
//! `[cx, cy, w, h, objectness, class_score, class_id]`, with box coordinates in
//! model-input pixels. Decoding keeps rows whose objectness and combined score
//! clear the threshold, converts them to corner-form boxes in frame pixels and
//! applies class-agnostic greedy non-maximum suppression.

use crate::detect::result::{BoundingBox, Detection};

pub const ROW_LEN: usize = 7;
pub const DEFAULT_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_IOU: f32 = 0.4;

#[derive(Clone, Debug)]
pub struct YoloDecoder {
    labels: Vec<String>,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl YoloDecoder {
    pub fn new(labels: Vec<String>) -> Self {
        Self {
            labels,
            confidence_threshold: DEFAULT_CONFIDENCE,
            iou_threshold: DEFAULT_IOU,
        }
    }

    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    /// Decode a flat `[N, 7]` output buffer.
    ///
    /// `input` is the model input size and `frame` the size of the frame the
    /// detections should be expressed in, both as `(width, height)`.
    pub fn decode(&self, output: &[f32], input: (u32, u32), frame: (u32, u32)) -> Vec<Detection> {
        let sx = frame.0 as f32 / input.0.max(1) as f32;
        let sy = frame.1 as f32 / input.1.max(1) as f32;
        let candidates = output
            .chunks_exact(ROW_LEN)
            .filter_map(|row| {
                let objectness = row[4];
                if objectness < self.confidence_threshold {
                    return None;
                }
                let score = objectness * row[5];
                if score < self.confidence_threshold {
                    return None;
                }
                let bbox = BoundingBox::from_center(row[0], row[1], row[2], row[3])
                    .scale(sx, sy)
                    .clamp_to(frame.0, frame.1);
                Some(Detection::new(self.label(row[6]), score, bbox))
            })
            .collect();
        non_max_suppression(candidates, self.iou_threshold)
    }

    fn label(&self, raw_id: f32) -> String {
        let id = raw_id.max(0.0).round() as usize;
        self.labels
            .get(id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", id))
    }
}

/// Greedy NMS: keep the highest-scoring box, drop every box overlapping it by
/// more than `iou_threshold`, repeat.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if kept
            .iter()
            .all(|existing| existing.bbox.iou(&candidate.bbox) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<String> {
        vec!["Aedes aegypti".into(), "Aedes albopictus".into()]
    }

    #[test]
    fn decode_scales_boxes_to_frame() {
        let decoder = YoloDecoder::new(labels());
        let output = [320.0, 320.0, 64.0, 64.0, 0.9, 0.9, 1.0];
        let detections = decoder.decode(&output, (640, 640), (1280, 1280));
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class, "Aedes albopictus");
        assert!((detections[0].confidence - 0.81).abs() < 1e-5);
        assert_eq!(
            detections[0].bbox,
            BoundingBox::new(576.0, 576.0, 704.0, 704.0)
        );
    }

    #[test]
    fn decode_drops_low_scores() {
        let decoder = YoloDecoder::new(labels());
        let output = [
            100.0, 100.0, 10.0, 10.0, 0.3, 1.0, 0.0, // objectness too low
            200.0, 200.0, 10.0, 10.0, 0.8, 0.5, 0.0, // combined 0.4
        ];
        assert!(decoder.decode(&output, (640, 640), (640, 640)).is_empty());
    }

    #[test]
    fn nms_keeps_best_of_overlapping_boxes() {
        let a = Detection::new("a", 0.6, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        let b = Detection::new("a", 0.9, BoundingBox::new(1.0, 1.0, 11.0, 11.0));
        let c = Detection::new("a", 0.7, BoundingBox::new(50.0, 50.0, 60.0, 60.0));
        let kept = non_max_suppression(vec![a, b.clone(), c.clone()], DEFAULT_IOU);
        assert_eq!(kept, vec![b, c]);
    }

    #[test]
    fn unknown_class_ids_get_placeholder_label() {
        let decoder = YoloDecoder::new(labels());
        let output = [10.0, 10.0, 4.0, 4.0, 0.9, 0.9, 7.0];
        let detections = decoder.decode(&output, (64, 64), (64, 64));
        assert_eq!(detections[0].class, "class_7");
    }
}
