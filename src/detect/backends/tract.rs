#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::config::DetectorSettings;
use crate::detect::backend::{DetectionView, PatternDetector};
use crate::detect::result::Detection;
use crate::segment::BoundingBox;

/// Overlap above which the weaker of two boxes is suppressed.
const NMS_IOU: f64 = 0.45;
const ROW_LEN: usize = 5;

/// Single-class box regressor loaded from an ONNX file.
///
/// The model takes a `1x3xHxW` RGB tensor in 0..1 and emits rows of
/// `(cx, cy, w, h, score)` normalised to the input size.
pub struct TractDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
}

impl TractDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
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
        })
    }

    fn build_input(&self, rgb: &RgbImage) -> Tensor {
        let resized = imageops::resize(rgb, self.width, self.height, FilterType::Triangle);
        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        )
        .into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, view: &DetectionView<'_>, threshold: f32)
        -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let flat: Vec<f32> = values.iter().copied().collect();
        if flat.len() % ROW_LEN != 0 {
            return Err(anyhow!(
                "model output of {} values is not a multiple of {}",
                flat.len(),
                ROW_LEN
            ));
        }

        let (fw, fh) = (view.width() as f32, view.height() as f32);
        let detections = flat
            .chunks_exact(ROW_LEN)
            .filter(|row| row[4].is_finite() && row[4] >= threshold)
            .map(|row| {
                let (cx, cy, w, h) = (row[0] * fw, row[1] * fh, row[2] * fw, row[3] * fh);
                Detection::new(
                    BoundingBox::new(
                        (cx - w / 2.0).round() as i32,
                        (cy - h / 2.0).round() as i32,
                        w.max(0.0).round() as u32,
                        h.max(0.0).round() as u32,
                    ),
                    row[4],
                )
            })
            .collect();
        Ok(detections)
    }
}

impl PatternDetector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(
        &self,
        view: &DetectionView<'_>,
        settings: &DetectorSettings,
    ) -> Result<Vec<Detection>> {
        let input = self.build_input(view.rgb);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let raw = self.decode(outputs, view, settings.match_threshold)?;
        Ok(suppress(raw)
            .into_iter()
            .filter(|d| d.bbox.width >= settings.min_width && d.bbox.height >= settings.min_height)
            .collect())
    }
}

/// Greedy non-maximum suppression.
fn suppress(mut detections: Vec<Detection>) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Detection> = Vec::new();
    for det in detections {
        if kept
            .iter()
            .all(|k| k.bbox.intersection_over_union(&det.bbox) < NMS_IOU)
        {
            kept.push(det);
        }
    }
    kept
}
