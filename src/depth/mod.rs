//! Optional metric-depth capability.
//!
//! Depth is only available when a model is configured and the crate is built
//! with `backend-tract`; otherwise the depth scale method is never attempted.

#[cfg(feature = "backend-tract")]
mod tract;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use image::{GrayImage, RgbImage};

use crate::config::DepthSettings;

#[cfg(feature = "backend-tract")]
pub use tract::TractDepthEstimator;

/// Per-pixel distance from the camera in meters, at the estimator's resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct DepthMap {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl DepthMap {
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("depth map has zero extent"));
        }
        if values.len() != width as usize * height as usize {
            return Err(anyhow!(
                "depth map {}x{} expects {} values, got {}",
                width,
                height,
                width as usize * height as usize,
                values.len()
            ));
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    pub fn uniform(width: u32, height: u32, depth_m: f32) -> Self {
        Self {
            width,
            height,
            values: vec![depth_m; width as usize * height as usize],
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Nearest sample for a pixel of a frame with a possibly different size.
    fn sample(&self, x: u32, y: u32, frame_w: u32, frame_h: u32) -> f32 {
        let dx = ((x as u64 * self.width as u64) / frame_w as u64).min(self.width as u64 - 1);
        let dy = ((y as u64 * self.height as u64) / frame_h as u64).min(self.height as u64 - 1);
        self.values[dy as usize * self.width as usize + dx as usize]
    }

    /// Mean depth over the nonzero pixels of `mask`, which is in frame coordinates.
    ///
    /// Non-finite and non-positive samples are ignored; `None` when nothing usable remains.
    pub fn mean_over(&self, mask: &GrayImage) -> Option<f64> {
        let (frame_w, frame_h) = mask.dimensions();
        let mut sum = 0.0;
        let mut count = 0u64;
        for (x, y, pixel) in mask.enumerate_pixels() {
            if pixel[0] == 0 {
                continue;
            }
            let depth = self.sample(x, y, frame_w, frame_h);
            if depth.is_finite() && depth > 0.0 {
                sum += depth as f64;
                count += 1;
            }
        }
        (count > 0).then(|| sum / count as f64)
    }
}

/// A model that predicts metric depth from a single RGB frame.
pub trait DepthEstimator: Send + Sync {
    fn name(&self) -> &'static str;

    fn estimate(&self, image: &RgbImage) -> Result<DepthMap>;
}

/// Every pixel at the same distance. Mostly useful for tests and for callers
/// that already know the range to the subject.
pub struct UniformDepth {
    depth_m: f32,
}

impl UniformDepth {
    pub fn new(depth_m: f32) -> Self {
        Self { depth_m }
    }
}

impl DepthEstimator for UniformDepth {
    fn name(&self) -> &'static str {
        "uniform"
    }

    fn estimate(&self, image: &RgbImage) -> Result<DepthMap> {
        Ok(DepthMap::uniform(
            image.width().max(1),
            image.height().max(1),
            self.depth_m,
        ))
    }
}

/// Load the configured depth model, if any.
pub fn load(settings: &DepthSettings) -> Option<Arc<dyn DepthEstimator>> {
    let path = settings.model_path.as_ref()?;

    #[cfg(feature = "backend-tract")]
    {
        match TractDepthEstimator::new(path, settings.input_width, settings.input_height) {
            Ok(estimator) => {
                log::info!("loaded depth model from {}", path.display());
                Some(Arc::new(estimator))
            }
            Err(err) => {
                log::warn!(
                    "depth model {} unavailable, depth scale disabled: {:#}",
                    path.display(),
                    err
                );
                None
            }
        }
    }

    #[cfg(not(feature = "backend-tract"))]
    {
        log::warn!(
            "depth model {} configured but this build lacks backend-tract; depth scale disabled",
            path.display()
        );
        None
    }
}
