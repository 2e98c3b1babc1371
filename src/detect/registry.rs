use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::DetectorSettings;
use crate::detect::backend::{DetectionView, PatternDetector};
use crate::detect::backends::TemplateDetector;
use crate::detect::result::{ReferenceObject, ReferenceSpec};
use crate::frame::Frame;
use crate::segment::BoundingBox;

/// Extensions tried for each asset stem, in order.
#[cfg(feature = "backend-tract")]
const ASSET_EXTENSIONS: &[&str] = &["onnx", "png", "pgm"];
#[cfg(not(feature = "backend-tract"))]
const ASSET_EXTENSIONS: &[&str] = &["png", "pgm"];

#[cfg(feature = "backend-tract")]
const ONNX_INPUT_SIDE: u32 = 320;

struct Entry {
    spec: ReferenceSpec,
    detector: Arc<dyn PatternDetector>,
}

/// Loaded pattern detectors, one per available reference kind.
///
/// Loading happens once; the registry is immutable afterwards and shared
/// between threads. A kind whose asset is missing is simply absent.
pub struct ReferenceDetector {
    entries: Vec<Entry>,
    settings: DetectorSettings,
}

impl ReferenceDetector {
    /// Resolve and load every asset named in `settings.references`.
    pub fn load(settings: &DetectorSettings) -> Self {
        let mut registry = Self::empty(settings.clone());
        for spec in &settings.references {
            let Some(path) = find_asset(&settings.search_paths, &spec.asset) else {
                log::warn!(
                    "DetectorUnavailable: no asset '{}' for {} in {:?}; {} references disabled",
                    spec.asset,
                    spec.kind,
                    settings.search_paths,
                    spec.kind
                );
                continue;
            };
            match load_detector(&path) {
                Ok(detector) => {
                    log::info!(
                        "loaded {} detector for {} from {}",
                        detector.name(),
                        spec.kind,
                        path.display()
                    );
                    registry.register(spec.clone(), detector);
                }
                Err(err) => log::warn!(
                    "DetectorUnavailable: {} asset {} failed to load: {:#}",
                    spec.kind,
                    path.display(),
                    err
                ),
            }
        }
        registry
    }

    pub fn empty(settings: DetectorSettings) -> Self {
        Self {
            entries: Vec::new(),
            settings,
        }
    }

    /// Build from already-constructed detectors.
    pub fn with_detectors(
        settings: DetectorSettings,
        detectors: Vec<(ReferenceSpec, Arc<dyn PatternDetector>)>,
    ) -> Self {
        let mut registry = Self::empty(settings);
        for (spec, detector) in detectors {
            registry.register(spec, detector);
        }
        registry
    }

    pub fn register(&mut self, spec: ReferenceSpec, detector: Arc<dyn PatternDetector>) {
        self.entries.push(Entry { spec, detector });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn specs(&self) -> impl Iterator<Item = &ReferenceSpec> {
        self.entries.iter().map(|e| &e.spec)
    }

    /// Run every detector and keep hits whose shape fits their kind.
    ///
    /// Output is ordered by registration, then by detector order. A failing
    /// detector is logged and contributes nothing.
    pub fn detect(&self, frame: &Frame) -> Vec<ReferenceObject> {
        if self.entries.is_empty() {
            return Vec::new();
        }
        let gray = frame.gray();
        let view = DetectionView {
            rgb: frame.image(),
            gray: &gray,
        };

        let mut objects = Vec::new();
        for entry in &self.entries {
            let detections = match entry.detector.detect(&view, &self.settings) {
                Ok(detections) => detections,
                Err(err) => {
                    log::warn!(
                        "{}: {} detector failed: {:#}",
                        frame.identity(),
                        entry.spec.kind,
                        err
                    );
                    continue;
                }
            };
            for detection in detections {
                if !aspect_matches(&detection.bbox, &entry.spec, self.settings.aspect_tolerance) {
                    log::debug!(
                        "{}: dropping {} candidate {:?}, aspect {:.2} vs expected {:.2}",
                        frame.identity(),
                        entry.spec.kind,
                        detection.bbox,
                        detection.bbox.aspect_ratio(),
                        entry.spec.expected_aspect()
                    );
                    continue;
                }
                objects.push(ReferenceObject::from_detection(&entry.spec, &detection));
            }
        }
        objects
    }
}

/// Strictly within `tolerance` of the expected width/height ratio.
pub fn aspect_matches(bbox: &BoundingBox, spec: &ReferenceSpec, tolerance: f64) -> bool {
    if bbox.width == 0 || bbox.height == 0 {
        return false;
    }
    let expected = spec.expected_aspect();
    let actual = bbox.aspect_ratio();
    actual > expected * (1.0 - tolerance) && actual < expected * (1.0 + tolerance)
}

fn find_asset(search_paths: &[PathBuf], stem: &str) -> Option<PathBuf> {
    search_paths.iter().find_map(|dir| {
        ASSET_EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{}.{}", stem, ext)))
            .find(|candidate| candidate.is_file())
    })
}

fn load_detector(path: &Path) -> anyhow::Result<Arc<dyn PatternDetector>> {
    #[cfg(feature = "backend-tract")]
    if path.extension().and_then(|e| e.to_str()) == Some("onnx") {
        let detector =
            crate::detect::backends::TractDetector::new(path, ONNX_INPUT_SIDE, ONNX_INPUT_SIDE)?;
        return Ok(Arc::new(detector));
    }
    Ok(Arc::new(TemplateDetector::from_path(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::FixedDetector;
    use crate::detect::result::{default_reference_table, Detection, ReferenceKind};
    use image::RgbImage;

    fn car_spec() -> ReferenceSpec {
        default_reference_table()
            .into_iter()
            .find(|s| s.kind == ReferenceKind::Car)
            .unwrap()
    }

    #[test]
    fn aspect_filter_is_strict() {
        let car = car_spec();
        // Expected 1.2, window (0.84, 1.56).
        assert!(aspect_matches(&BoundingBox::new(0, 0, 120, 100), &car, 0.3));
        assert!(!aspect_matches(&BoundingBox::new(0, 0, 80, 100), &car, 0.3));
        assert!(!aspect_matches(&BoundingBox::new(0, 0, 300, 100), &car, 0.3));
        assert!(!aspect_matches(&BoundingBox::new(0, 0, 0, 100), &car, 0.3));
    }

    #[test]
    fn missing_assets_leave_registry_empty() {
        let dir = tempfile::tempdir().unwrap();
        let settings = DetectorSettings {
            search_paths: vec![dir.path().to_path_buf()],
            ..DetectorSettings::default()
        };
        let registry = ReferenceDetector::load(&settings);
        assert!(registry.is_empty());

        let frame = Frame::from_image("empty", RgbImage::new(32, 32));
        assert!(registry.detect(&frame).is_empty());
    }

    #[test]
    fn template_asset_is_picked_up_from_search_path() {
        let dir = tempfile::tempdir().unwrap();
        let template = image::GrayImage::from_fn(36, 30, |x, _| image::Luma([(x * 7) as u8]));
        template.save(dir.path().join("car.png")).unwrap();
        let settings = DetectorSettings {
            search_paths: vec![dir.path().join("missing"), dir.path().to_path_buf()],
            ..DetectorSettings::default()
        };
        let registry = ReferenceDetector::load(&settings);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.specs().next().unwrap().kind, ReferenceKind::Car);
    }

    #[test]
    fn detect_drops_misshapen_boxes() {
        let fixed = FixedDetector::new(vec![
            Detection::new(BoundingBox::new(10, 10, 200, 160), 0.9),
            Detection::new(BoundingBox::new(10, 10, 100, 160), 0.9),
        ]);
        let registry = ReferenceDetector::with_detectors(
            DetectorSettings::default(),
            vec![(car_spec(), Arc::new(fixed) as Arc<dyn PatternDetector>)],
        );
        let frame = Frame::from_image("street", RgbImage::new(400, 300));
        let objects = registry.detect(&frame);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].kind, ReferenceKind::Car);
        assert_eq!(objects[0].bbox, BoundingBox::new(10, 10, 200, 160));
    }
}
