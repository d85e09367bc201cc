#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::nms::non_max_suppression;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Grey used to pad the letterboxed input (Ultralytics convention).
const PAD_VALUE: f32 = 144.0 / 255.0;

/// Tract-based backend for YOLOv8 ONNX exports.
///
/// The model must take `[1, 3, H, W]` RGB input in 0..1 and produce `[1, 4 + nc, anchors]`
/// (centre x, centre y, width, height, then one score per class).
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    class_names: Vec<String>,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        width: u32,
        height: u32,
        class_names: Vec<String>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        if class_names.is_empty() {
            return Err(anyhow!("classifier needs at least one class name"));
        }
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
            class_names,
            confidence_threshold: 0.7,
            iou_threshold: 0.45,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Override the default NMS IoU threshold.
    pub fn with_iou(mut self, iou: f32) -> Self {
        self.iou_threshold = iou;
        self
    }

    /// Letterbox the frame into the model input. Returns the tensor and the scale ratio.
    fn build_input(&self, frame: &Frame) -> Result<(Tensor, f32)> {
        let img = frame.to_rgb_image()?;
        let (w0, h0) = img.dimensions();
        if w0 == 0 || h0 == 0 {
            return Err(anyhow!("cannot classify an empty frame"));
        }
        let ratio = (self.width as f32 / w0 as f32).min(self.height as f32 / h0 as f32);
        let w_new = ((w0 as f32 * ratio).round() as u32).clamp(1, self.width);
        let h_new = ((h0 as f32 * ratio).round() as u32).clamp(1, self.height);
        let resized =
            image::imageops::resize(&img, w_new, h_new, image::imageops::FilterType::Triangle);

        let mut input = tract_ndarray::Array4::from_elem(
            (1, 3, self.height as usize, self.width as usize),
            PAD_VALUE,
        );
        for (x, y, px) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for channel in 0..3 {
                input[[0, channel, y, x]] = px.0[channel] as f32 / 255.0;
            }
        }
        Ok((input.into_tensor(), ratio))
    }

    fn decode(&self, outputs: TVec<TValue>, ratio: f32, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = preds.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let preds = preds
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not three-dimensional")?;
        let rows = shape[1];
        let anchors = shape[2];
        let nc = rows
            .checked_sub(4)
            .filter(|nc| *nc == self.class_names.len())
            .ok_or_else(|| {
                anyhow!(
                    "model outputs {} rows, expected 4 + {} classes",
                    rows,
                    self.class_names.len()
                )
            })?;

        let max_x = frame.width as f32;
        let max_y = frame.height as f32;
        let mut candidates = Vec::new();
        for a in 0..anchors {
            let mut best = (0usize, f32::NEG_INFINITY);
            for c in 0..nc {
                let score = preds[[0, 4 + c, a]];
                if score > best.1 {
                    best = (c, score);
                }
            }
            if best.1 < self.confidence_threshold {
                continue;
            }
            let cx = preds[[0, 0, a]] / ratio;
            let cy = preds[[0, 1, a]] / ratio;
            let w = preds[[0, 2, a]] / ratio;
            let h = preds[[0, 3, a]] / ratio;
            let bbox = BoundingBox::new(
                (cx - w / 2.0).clamp(0.0, max_x),
                (cy - h / 2.0).clamp(0.0, max_y),
                (cx + w / 2.0).clamp(0.0, max_x),
                (cy + h / 2.0).clamp(0.0, max_y),
            );
            candidates.push(Detection::new(
                self.class_names[best.0].clone(),
                best.1.min(1.0),
                bbox,
            ));
        }
        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (input, ratio) = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, ratio, frame)
    }
}
