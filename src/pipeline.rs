//! End-to-end measurement of one image, and of many in parallel.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;

use crate::config::MeasureConfig;
use crate::depth::{self, DepthEstimator};
use crate::detect::ReferenceDetector;
use crate::dimension::{resolve, DimensionResult, ResolveInput};
use crate::error::EstimateFailure;
use crate::frame::Frame;
use crate::metadata::{self, Metadata};
use crate::render::AuditRenderer;
use crate::scale::{ScaleContext, ScaleEstimator};
use crate::segment::{Segmentation, Segmenter};

/// Loaded models plus configuration. Immutable once built, so one instance
/// serves any number of threads.
pub struct TreeMeasurer {
    config: MeasureConfig,
    segmenter: Segmenter,
    references: ReferenceDetector,
    depth: Option<Arc<dyn DepthEstimator>>,
    scale: ScaleEstimator,
    renderer: AuditRenderer,
}

impl TreeMeasurer {
    /// Load detector assets, the optional depth model and the audit font.
    ///
    /// Fails only when `config` does not validate.
    pub fn new(config: MeasureConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let references = ReferenceDetector::load(&config.detector);
        let depth = depth::load(&config.depth);
        Self::with_components(config, references, depth)
    }

    pub fn with_components(
        config: MeasureConfig,
        references: ReferenceDetector,
        depth: Option<Arc<dyn DepthEstimator>>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        log::info!(
            "measurer ready: {} reference detector(s), depth {}",
            references.len(),
            match &depth {
                Some(estimator) => estimator.name(),
                None => "unavailable",
            }
        );
        Ok(Self {
            segmenter: Segmenter::new(config.segmentation.clone()),
            scale: ScaleEstimator::new(config.scale.clone()),
            renderer: AuditRenderer::new(config.render.clone()),
            references,
            depth,
            config,
        })
    }

    pub fn config(&self) -> &MeasureConfig {
        &self.config
    }

    /// Segment, detect, pick a scale and resolve meters. No side effects.
    pub fn estimate(
        &self,
        frame: &Frame,
        metadata: &Metadata,
    ) -> Result<DimensionResult, EstimateFailure> {
        let segmentation =
            self.segmenter
                .segment(frame)
                .ok_or_else(|| EstimateFailure::Segmentation {
                    identity: frame.identity().to_string(),
                })?;
        let tree_box = segmentation.bounding_box();
        let references = self.references.detect(frame);
        let tree_depth_m = self.tree_depth(frame, &segmentation);

        let ctx = ScaleContext {
            frame_width: frame.width(),
            frame_height: frame.height(),
            tree_box,
            metadata,
            references: &references,
            tree_depth_m,
        };
        let scale = self.scale.estimate(&ctx);

        let result = resolve(
            ResolveInput {
                identity: frame.identity(),
                image_digest: frame.digest_hex(),
                bbox: tree_box,
                segmentation: segmentation.strategy,
                scale,
                metadata,
            },
            &self.config.bounds,
        );
        log::info!(
            "{}: {:.2} m x {:.2} m via {} ({:.0}%)",
            frame.identity(),
            result.height_m,
            result.width_m,
            result.method,
            result.confidence * 100.0
        );
        Ok(result)
    }

    /// `estimate`, then write the audit image if rendering is enabled.
    pub fn measure_frame(
        &self,
        frame: &Frame,
        metadata: &Metadata,
    ) -> Result<DimensionResult, EstimateFailure> {
        let result = self.estimate(frame, metadata)?;
        self.renderer.render(frame, &result);
        Ok(result)
    }

    pub fn measure_path<P: AsRef<Path>>(&self, path: P) -> Result<DimensionResult, EstimateFailure> {
        let path = path.as_ref();
        let frame = Frame::open(path)?;
        let metadata = metadata::extract_from_path(path);
        self.measure_frame(&frame, &metadata)
    }

    /// Measure bytes fetched elsewhere; `identity` may be a URL.
    pub fn measure_bytes(
        &self,
        identity: &str,
        bytes: &[u8],
    ) -> Result<DimensionResult, EstimateFailure> {
        let frame = Frame::from_bytes(identity, bytes)?;
        let metadata = metadata::extract_from_bytes(identity, bytes);
        self.measure_frame(&frame, &metadata)
    }

    /// Measure independent images in parallel. Output order matches input order.
    pub fn measure_batch(
        &self,
        paths: &[PathBuf],
    ) -> Vec<(PathBuf, Result<DimensionResult, EstimateFailure>)> {
        paths
            .par_iter()
            .map(|path| (path.clone(), self.measure_path(path)))
            .collect()
    }

    fn tree_depth(&self, frame: &Frame, segmentation: &Segmentation) -> Option<f64> {
        let estimator = self.depth.as_ref()?;
        let map = match estimator.estimate(frame.image()) {
            Ok(map) => map,
            Err(err) => {
                log::warn!(
                    "{}: {} depth estimate failed: {:#}",
                    frame.identity(),
                    estimator.name(),
                    err
                );
                return None;
            }
        };
        let mask = segmentation
            .contour
            .rasterize(frame.width(), frame.height());
        map.mean_over(&mask)
    }
}
