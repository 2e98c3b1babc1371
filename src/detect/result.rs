use serde::{Deserialize, Serialize};

use crate::segment::BoundingBox;

/// Object types with a known real-world size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Car,
    Person,
    Bicycle,
    Bench,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Car => "car",
            ReferenceKind::Person => "person",
            ReferenceKind::Bicycle => "bicycle",
            ReferenceKind::Bench => "bench",
        }
    }

    /// Calibration constant for scales anchored on this kind.
    ///
    /// Cars and people have tight size distributions; bicycles and benches vary.
    pub fn scale_confidence(&self) -> f64 {
        match self {
            ReferenceKind::Car | ReferenceKind::Person => 0.9,
            ReferenceKind::Bicycle | ReferenceKind::Bench => 0.7,
        }
    }
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the reference table: what to look for and how big it really is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSpec {
    pub kind: ReferenceKind,
    /// File stem of the detector asset, e.g. `car` for `car.png` / `car.onnx`.
    pub asset: String,
    pub width_m: f64,
    pub height_m: f64,
}

impl ReferenceSpec {
    pub fn new(kind: ReferenceKind, asset: &str, width_m: f64, height_m: f64) -> Self {
        Self {
            kind,
            asset: asset.to_string(),
            width_m,
            height_m,
        }
    }

    pub fn expected_aspect(&self) -> f64 {
        self.width_m / self.height_m
    }
}

/// Canonical sizes, in meters.
pub fn default_reference_table() -> Vec<ReferenceSpec> {
    vec![
        ReferenceSpec::new(ReferenceKind::Car, "car", 1.8, 1.5),
        ReferenceSpec::new(ReferenceKind::Person, "fullbody", 0.5, 1.7),
        ReferenceSpec::new(ReferenceKind::Bicycle, "bicycle", 0.6, 1.1),
        ReferenceSpec::new(ReferenceKind::Bench, "bench", 1.5, 0.9),
    ]
}

/// Raw detector hit in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub score: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, score: f32) -> Self {
        Self { bbox, score }
    }
}

/// A validated detection paired with the real-world size of its kind.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReferenceObject {
    pub kind: ReferenceKind,
    pub bbox: BoundingBox,
    pub real_width_m: f64,
    pub real_height_m: f64,
    /// Detector score, kept for diagnostics only.
    pub score: f32,
}

impl ReferenceObject {
    pub fn from_detection(spec: &ReferenceSpec, detection: &Detection) -> Self {
        Self {
            kind: spec.kind,
            bbox: detection.bbox,
            real_width_m: spec.width_m,
            real_height_m: spec.height_m,
            score: detection.score,
        }
    }

    /// Mean of the scales implied by the width and by the height.
    pub fn pixels_per_meter(&self) -> f64 {
        let by_height = self.bbox.height as f64 / self.real_height_m;
        let by_width = self.bbox.width as f64 / self.real_width_m;
        (by_height + by_width) / 2.0
    }

    /// Pinhole range to the object given a focal length in pixels.
    pub fn distance_m(&self, focal_px: f64) -> Option<f64> {
        if self.bbox.height == 0 {
            return None;
        }
        Some(self.real_height_m * focal_px / self.bbox.height as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn car_scale_averages_width_and_height() {
        let spec = ReferenceSpec::new(ReferenceKind::Car, "car", 1.8, 1.5);
        let det = Detection::new(BoundingBox::new(10, 10, 200, 160), 0.95);
        let car = ReferenceObject::from_detection(&spec, &det);
        let expected = (160.0 / 1.5 + 200.0 / 1.8) / 2.0;
        assert!((car.pixels_per_meter() - expected).abs() < 1e-9);
        assert!((car.pixels_per_meter() - 108.89).abs() < 0.01);
    }

    #[test]
    fn confidence_depends_on_kind() {
        assert_eq!(ReferenceKind::Car.scale_confidence(), 0.9);
        assert_eq!(ReferenceKind::Person.scale_confidence(), 0.9);
        assert_eq!(ReferenceKind::Bicycle.scale_confidence(), 0.7);
        assert_eq!(ReferenceKind::Bench.scale_confidence(), 0.7);
    }

    #[test]
    fn distance_follows_pinhole_model() {
        let spec = ReferenceSpec::new(ReferenceKind::Person, "fullbody", 0.5, 1.7);
        let det = Detection::new(BoundingBox::new(0, 0, 50, 170), 1.0);
        let person = ReferenceObject::from_detection(&spec, &det);
        assert!((person.distance_m(1000.0).unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn kinds_deserialize_lowercase() {
        let spec: ReferenceSpec = toml::from_str(
            r#"
            kind = "bench"
            asset = "park_bench"
            width_m = 1.6
            height_m = 0.8
            "#,
        )
        .unwrap();
        assert_eq!(spec.kind, ReferenceKind::Bench);
        assert_eq!(spec.expected_aspect(), 2.0);
    }
}
