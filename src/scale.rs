//! Pixel-to-meter scale derivation.
//!
//! Every applicable method produces a candidate; the one with the highest
//! confidence wins. The fallback has no preconditions, so a scale always exists.

use serde::{Serialize, Serializer};

use crate::config::ScaleSettings;
use crate::detect::{ReferenceKind, ReferenceObject};
use crate::metadata::Metadata;
use crate::segment::BoundingBox;

const CAMERA_AGREED_CONFIDENCE: f64 = 0.8;
const CAMERA_SINGLE_CONFIDENCE: f64 = 0.6;
const DEPTH_CONFIDENCE: f64 = 0.85;
const FALLBACK_CONFIDENCE: f64 = 0.4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScaleMethod {
    ReferenceObject(ReferenceKind),
    CameraGeometry,
    DepthEstimation,
    Fallback,
}

impl ScaleMethod {
    /// Lower wins when confidences tie.
    pub fn priority(&self) -> u8 {
        match self {
            ScaleMethod::ReferenceObject(_) => 0,
            ScaleMethod::DepthEstimation => 1,
            ScaleMethod::CameraGeometry => 2,
            ScaleMethod::Fallback => 3,
        }
    }
}

impl std::fmt::Display for ScaleMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleMethod::ReferenceObject(kind) => write!(f, "reference-object ({})", kind),
            ScaleMethod::CameraGeometry => write!(f, "camera-geometry"),
            ScaleMethod::DepthEstimation => write!(f, "depth-estimation"),
            ScaleMethod::Fallback => write!(f, "fallback"),
        }
    }
}

impl Serialize for ScaleMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ScaleEstimate {
    pub pixels_per_meter: f64,
    pub method: ScaleMethod,
    pub confidence: f64,
}

impl ScaleEstimate {
    fn is_usable(&self) -> bool {
        self.pixels_per_meter.is_finite() && self.pixels_per_meter > 0.0
    }
}

/// Everything the scale methods may draw on for one frame.
#[derive(Clone, Copy, Debug)]
pub struct ScaleContext<'a> {
    pub frame_width: u32,
    pub frame_height: u32,
    pub tree_box: BoundingBox,
    pub metadata: &'a Metadata,
    pub references: &'a [ReferenceObject],
    /// Mean metric depth over the tree mask, when a depth model ran.
    pub tree_depth_m: Option<f64>,
}

pub struct ScaleEstimator {
    settings: ScaleSettings,
}

impl ScaleEstimator {
    pub fn new(settings: ScaleSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ScaleSettings {
        &self.settings
    }

    /// Best candidate by confidence, then method priority, then order.
    pub fn estimate(&self, ctx: &ScaleContext<'_>) -> ScaleEstimate {
        let candidates = self.candidates(ctx);
        for candidate in &candidates {
            log::debug!(
                "scale candidate {}: {:.3} px/m at {:.2}",
                candidate.method,
                candidate.pixels_per_meter,
                candidate.confidence
            );
        }
        select_best(&candidates).unwrap_or_else(|| self.fallback(ctx.frame_height))
    }

    /// Usable candidates from every applicable method, in method order.
    pub fn candidates(&self, ctx: &ScaleContext<'_>) -> Vec<ScaleEstimate> {
        let mut all: Vec<ScaleEstimate> = ctx
            .references
            .iter()
            .map(|object| ScaleEstimate {
                pixels_per_meter: object.pixels_per_meter(),
                method: ScaleMethod::ReferenceObject(object.kind),
                confidence: object.kind.scale_confidence(),
            })
            .collect();
        all.extend(self.camera_geometry(ctx));
        all.extend(self.depth(ctx));
        all.push(self.fallback(ctx.frame_height));

        all.retain(|candidate| {
            let usable = candidate.is_usable();
            if !usable {
                log::debug!(
                    "ScaleDegenerate: discarding {} candidate ({} px/m)",
                    candidate.method,
                    candidate.pixels_per_meter
                );
            }
            usable
        });
        all
    }

    /// `image_width * focal_mm / sensor_mm`, using the default focal length
    /// only when `allow_default_focal` is set.
    pub fn focal_length_px(
        &self,
        image_width: u32,
        metadata: &Metadata,
        allow_default_focal: bool,
    ) -> Option<f64> {
        let focal_mm = match metadata.focal_length_mm {
            Some(focal) => focal,
            None if allow_default_focal => self.settings.default_focal_length_mm,
            None => return None,
        };
        let sensor_mm = metadata
            .sensor_width_mm
            .filter(|w| w.is_finite() && *w > 0.0)
            .unwrap_or(self.settings.default_sensor_width_mm);
        Some(image_width as f64 * focal_mm / sensor_mm)
    }

    /// Range from an assumed tree size, cross-checked against reference objects.
    fn camera_geometry(&self, ctx: &ScaleContext<'_>) -> Option<ScaleEstimate> {
        let focal_px = self.focal_length_px(ctx.frame_width, ctx.metadata, false)?;
        let tree_px = (ctx.tree_box.width as f64 + ctx.tree_box.height as f64) / 2.0;
        if tree_px <= 0.0 {
            return None;
        }
        let tree_distance = self.settings.assumed_tree_size_m * focal_px / tree_px;

        let mut distances = vec![tree_distance];
        distances.extend(ctx.references.iter().filter_map(|o| o.distance_m(focal_px)));

        let (distance, confidence) =
            if distances.len() >= 2 && agree(&distances, self.settings.agreement_tolerance) {
                let mean = distances.iter().sum::<f64>() / distances.len() as f64;
                (mean, CAMERA_AGREED_CONFIDENCE)
            } else {
                (tree_distance, CAMERA_SINGLE_CONFIDENCE)
            };

        Some(ScaleEstimate {
            pixels_per_meter: focal_px / distance,
            method: ScaleMethod::CameraGeometry,
            confidence,
        })
    }

    fn depth(&self, ctx: &ScaleContext<'_>) -> Option<ScaleEstimate> {
        let depth_m = ctx.tree_depth_m?;
        let focal_px = self.focal_length_px(ctx.frame_width, ctx.metadata, true)?;
        Some(ScaleEstimate {
            pixels_per_meter: focal_px / depth_m,
            method: ScaleMethod::DepthEstimation,
            confidence: DEPTH_CONFIDENCE,
        })
    }

    /// Frame height is taken to span a typical tree height.
    pub fn fallback(&self, frame_height: u32) -> ScaleEstimate {
        ScaleEstimate {
            pixels_per_meter: frame_height as f64 / self.settings.fallback_reference_height_m,
            method: ScaleMethod::Fallback,
            confidence: FALLBACK_CONFIDENCE,
        }
    }
}

/// Highest confidence; ties go to method priority, then to the earliest candidate.
pub fn select_best(candidates: &[ScaleEstimate]) -> Option<ScaleEstimate> {
    let mut best: Option<ScaleEstimate> = None;
    for candidate in candidates {
        let better = match &best {
            None => true,
            Some(current) => {
                candidate.confidence > current.confidence
                    || (candidate.confidence == current.confidence
                        && candidate.method.priority() < current.method.priority())
            }
        };
        if better {
            best = Some(*candidate);
        }
    }
    best
}

/// Spread relative to the mean stays within `tolerance`.
fn agree(distances: &[f64], tolerance: f64) -> bool {
    let max = distances.iter().copied().fold(f64::MIN, f64::max);
    let min = distances.iter().copied().fold(f64::MAX, f64::min);
    let mean = distances.iter().sum::<f64>() / distances.len() as f64;
    mean > 0.0 && (max - min) / mean <= tolerance
}
