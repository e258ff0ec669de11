#![cfg(feature = "backend-tract")]

use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::InferenceBackend;
use crate::detect::result::Inference;
use crate::detect::yolo::YoloDecoder;
use crate::frame::{rgb_len, Frame};

/// Tract-based backend for YOLO ONNX models.
///
/// Loads a local model file once and runs it on the CPU. Frames are resized to the
/// model input, and detections come back in the pixel space of the frame passed in.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    decoder: YoloDecoder,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        width: u32,
        height: u32,
        labels: Vec<String>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            decoder: YoloDecoder::new(labels),
        })
    }

    /// Override the default confidence and IoU thresholds.
    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.decoder = self.decoder.with_thresholds(confidence, iou);
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let resized = image::imageops::resize(
            frame.image(),
            self.width,
            self.height,
            FilterType::Triangle,
        );
        let pixels = resized.as_raw();
        let width = self.width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );
        input.into_tensor()
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, frame: &Frame) -> Result<Inference> {
        let input = self.build_input(frame);
        let start = Instant::now();
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let elapsed = start.elapsed();

        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let rows: Vec<f32> = view.iter().copied().collect();
        let detections = self.decoder.decode(
            &rows,
            (self.width, self.height),
            (frame.width(), frame.height()),
        );

        Ok(Inference {
            detections,
            elapsed,
        })
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::from_rgb(
            vec![0; rgb_len(self.width, self.height)?],
            self.width,
            self.height,
            chrono::Utc::now(),
        )?;
        self.infer(&blank).map(|_| ())
    }
}
