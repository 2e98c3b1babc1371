use serde::Serialize;

use crate::config::DimensionBounds;
use crate::metadata::{GpsCoordinates, Metadata};
use crate::scale::{ScaleEstimate, ScaleMethod};
use crate::segment::{BoundingBox, SegmentStrategy};

/// Final measurement for one image.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DimensionResult {
    pub identity: String,
    /// SHA-256 of the input bytes (or pixels for in-memory frames), hex.
    pub image_digest: String,
    pub height_m: f64,
    pub width_m: f64,
    pub method: ScaleMethod,
    pub confidence: f64,
    pub pixels_per_meter: f64,
    pub bounding_box: BoundingBox,
    pub segmentation: SegmentStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps: Option<GpsCoordinates>,
}

/// Fixed (height, width) multipliers for an EXIF orientation code.
pub fn perspective_correction(orientation: Option<u32>) -> (f64, f64) {
    match orientation {
        Some(3) => (0.95, 1.05),
        Some(6) | Some(8) => (1.1, 0.9),
        _ => (1.0, 1.0),
    }
}

/// Pixel box to meters: scale, orientation correction, then clamping.
///
/// Clamping is always the last step so the bounds hold for every result.
pub fn resolve_dimensions(
    bbox: &BoundingBox,
    scale: &ScaleEstimate,
    orientation: Option<u32>,
    bounds: &DimensionBounds,
) -> (f64, f64) {
    let height = bbox.height as f64 / scale.pixels_per_meter;
    let width = bbox.width as f64 / scale.pixels_per_meter;
    let (height_factor, width_factor) = perspective_correction(orientation);
    (
        bounds.clamp_height(height * height_factor),
        bounds.clamp_width(width * width_factor),
    )
}

pub struct ResolveInput<'a> {
    pub identity: &'a str,
    pub image_digest: String,
    pub bbox: BoundingBox,
    pub segmentation: SegmentStrategy,
    pub scale: ScaleEstimate,
    pub metadata: &'a Metadata,
}

pub fn resolve(input: ResolveInput<'_>, bounds: &DimensionBounds) -> DimensionResult {
    let (height_m, width_m) =
        resolve_dimensions(&input.bbox, &input.scale, input.metadata.orientation, bounds);
    DimensionResult {
        identity: input.identity.to_string(),
        image_digest: input.image_digest,
        height_m,
        width_m,
        method: input.scale.method,
        confidence: input.scale.confidence,
        pixels_per_meter: input.scale.pixels_per_meter,
        bounding_box: input.bbox,
        segmentation: input.segmentation,
        gps: input.metadata.gps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale(ppm: f64) -> ScaleEstimate {
        ScaleEstimate {
            pixels_per_meter: ppm,
            method: ScaleMethod::Fallback,
            confidence: 0.4,
        }
    }

    #[test]
    fn orientation_corrections() {
        assert_eq!(perspective_correction(Some(1)), (1.0, 1.0));
        assert_eq!(perspective_correction(Some(3)), (0.95, 1.05));
        assert_eq!(perspective_correction(Some(6)), (1.1, 0.9));
        assert_eq!(perspective_correction(Some(8)), (1.1, 0.9));
        assert_eq!(perspective_correction(Some(5)), (1.0, 1.0));
        assert_eq!(perspective_correction(None), (1.0, 1.0));
    }

    #[test]
    fn rotated_frame_is_corrected() {
        let bbox = BoundingBox::new(0, 0, 50, 100);
        let (h, w) = resolve_dimensions(&bbox, &scale(10.0), Some(6), &DimensionBounds::default());
        assert!((h - 11.0).abs() < 1e-9);
        assert!((w - 4.5).abs() < 1e-9);
    }

    #[test]
    fn results_are_clamped() {
        let bounds = DimensionBounds::default();
        let huge = BoundingBox::new(0, 0, 5000, 5000);
        assert_eq!(resolve_dimensions(&huge, &scale(1.0), None, &bounds), (60.0, 15.0));
        let tiny = BoundingBox::new(0, 0, 1, 1);
        assert_eq!(resolve_dimensions(&tiny, &scale(100.0), None, &bounds), (1.0, 0.3));
    }

    #[test]
    fn gps_is_carried_through() {
        let metadata = Metadata {
            gps: Some(GpsCoordinates {
                latitude: 51.5,
                longitude: -0.12,
                altitude: None,
            }),
            ..Metadata::default()
        };
        let result = resolve(
            ResolveInput {
                identity: "oak.jpg",
                image_digest: "00".into(),
                bbox: BoundingBox::new(0, 0, 40, 120),
                segmentation: SegmentStrategy::HueBand,
                scale: scale(10.0),
                metadata: &metadata,
            },
            &DimensionBounds::default(),
        );
        assert_eq!(result.height_m, 12.0);
        assert_eq!(result.width_m, 4.0);
        assert_eq!(result.gps, metadata.gps);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["method"], "fallback");
        assert_eq!(json["gps"]["longitude"], -0.12);
    }
}
