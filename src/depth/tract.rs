use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use super::{DepthEstimator, DepthMap};

/// Monocular metric-depth model run with tract.
///
/// Input is a `1x3xHxW` RGB tensor in 0..1; the output's last two axes are
/// taken as the depth map in meters.
pub struct TractDepthEstimator {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
}

impl TractDepthEstimator {
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
}

impl DepthEstimator for TractDepthEstimator {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn estimate(&self, image: &RgbImage) -> Result<DepthMap> {
        let resized = imageops::resize(image, self.width, self.height, FilterType::Triangle);
        let input: Tensor = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        )
        .into_tensor();

        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape();
        if shape.len() < 2 {
            return Err(anyhow!("depth output has rank {}, expected at least 2", shape.len()));
        }
        let height = shape[shape.len() - 2];
        let width = shape[shape.len() - 1];
        let values: Vec<f32> = view.iter().take(width * height).copied().collect();
        DepthMap::new(width as u32, height as u32, values)
    }
}
