//! Tree silhouette segmentation.
//!
//! Primary strategy thresholds a green hue band; when that mask holds no
//! region at all, a Canny edge map goes through the same cleanup and
//! contour selection, after thickening so thin edges survive the opening.
//! If both come back empty the image has no measurable tree.

mod contour;
mod hsv;

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::morphology::{close, dilate, erode, open};
use serde::Serialize;

use crate::config::SegmentationSettings;
use crate::frame::Frame;

pub use contour::{BoundingBox, Contour};
pub use hsv::{green_band_mask, rgb_to_hsv, Hsv};

/// Cap on the aspect-ratio distance that still earns a partial score.
const ASPECT_DISTANCE_CAP: f64 = 0.7;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentStrategy {
    HueBand,
    Edges,
}

impl std::fmt::Display for SegmentStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentStrategy::HueBand => write!(f, "hue-band"),
            SegmentStrategy::Edges => write!(f, "edges"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Segmentation {
    pub contour: Contour,
    pub strategy: SegmentStrategy,
}

impl Segmentation {
    pub fn bounding_box(&self) -> BoundingBox {
        self.contour.bounding_box()
    }
}

pub struct Segmenter {
    settings: SegmentationSettings,
}

impl Segmenter {
    pub fn new(settings: SegmentationSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SegmentationSettings {
        &self.settings
    }

    /// Best tree contour for the frame, or `None` when neither strategy finds one.
    pub fn segment(&self, frame: &Frame) -> Option<Segmentation> {
        let hue_mask = green_band_mask(frame.image(), &self.settings);
        if let Some(contour) = self.best_contour(&self.clean(&hue_mask)) {
            return Some(Segmentation {
                contour,
                strategy: SegmentStrategy::HueBand,
            });
        }

        log::debug!(
            "{}: green band empty, falling back to edge segmentation",
            frame.identity()
        );
        let edges = canny(&frame.gray(), self.settings.canny_low, self.settings.canny_high);
        self.best_contour(&self.edge_regions(&edges))
            .map(|contour| Segmentation {
                contour,
                strategy: SegmentStrategy::Edges,
            })
    }

    /// Turn a one-pixel edge map into solid regions.
    ///
    /// Edges are thickened so the opening does not erase them, cleaned, their
    /// outer outlines filled, and the thickening eroded away again.
    fn edge_regions(&self, edges: &GrayImage) -> GrayImage {
        let radius = self.settings.kernel_radius;
        let cleaned = self.clean(&dilate(edges, Norm::LInf, radius));
        let mut filled = GrayImage::new(cleaned.width(), cleaned.height());
        for contour in external_contours(&cleaned) {
            contour.fill_into(&mut filled);
        }
        erode(&filled, Norm::LInf, radius)
    }

    /// Closing fills small gaps, opening removes speckle.
    fn clean(&self, mask: &GrayImage) -> GrayImage {
        let radius = self.settings.kernel_radius;
        let mut cleaned = mask.clone();
        if self.settings.close_iterations > 0 {
            let k = scaled_radius(radius, self.settings.close_iterations);
            cleaned = close(&cleaned, Norm::LInf, k);
        }
        if self.settings.open_iterations > 0 {
            let k = scaled_radius(radius, self.settings.open_iterations);
            cleaned = open(&cleaned, Norm::LInf, k);
        }
        cleaned
    }

    fn best_contour(&self, mask: &GrayImage) -> Option<Contour> {
        let candidates: Vec<Contour> = external_contours(mask);
        if candidates.is_empty() {
            return None;
        }
        let max_area = candidates
            .iter()
            .map(Contour::area)
            .fold(0.0_f64, f64::max);

        let mut best: Option<(f64, Contour)> = None;
        for contour in candidates {
            let score = self.score(&contour, max_area);
            match &best {
                Some((best_score, _)) if score <= *best_score => {}
                _ => best = Some((score, contour)),
            }
        }
        best.map(|(_, contour)| contour)
    }

    /// Weighted sum of normalised area, closeness to the expected aspect, and solidity.
    pub fn score(&self, contour: &Contour, max_area: f64) -> f64 {
        let s = &self.settings;
        let area = if max_area > 0.0 {
            contour.area() / max_area
        } else {
            0.0
        };
        let aspect = contour.bounding_box().aspect_ratio();
        let aspect_fit = 1.0 - (aspect - s.expected_aspect).abs().min(ASPECT_DISTANCE_CAP);
        area * s.area_weight
            + aspect_fit * s.aspect_weight
            + contour.solidity() * s.solidity_weight
    }
}

/// Outer borders with no enclosing region.
fn external_contours(mask: &GrayImage) -> Vec<Contour> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| Contour::new(c.points))
        .collect()
}

/// Repeating a square structuring element n times equals one element n times wider.
fn scaled_radius(radius: u8, iterations: u32) -> u8 {
    (radius as u32 * iterations).min(u8::MAX as u32) as u8
}
