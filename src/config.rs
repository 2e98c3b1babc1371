use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::{default_reference_table, ReferenceSpec};

const DEFAULT_HUE_MIN_DEG: f32 = 70.0;
const DEFAULT_HUE_MAX_DEG: f32 = 170.0;
const DEFAULT_SATURATION_MIN: u8 = 40;
const DEFAULT_VALUE_MIN: u8 = 40;
const DEFAULT_KERNEL_RADIUS: u8 = 2;
const DEFAULT_CLOSE_ITERATIONS: u32 = 2;
const DEFAULT_OPEN_ITERATIONS: u32 = 1;
const DEFAULT_AREA_WEIGHT: f64 = 0.5;
const DEFAULT_ASPECT_WEIGHT: f64 = 0.3;
const DEFAULT_SOLIDITY_WEIGHT: f64 = 0.2;
const DEFAULT_EXPECTED_ASPECT: f64 = 0.3;
const DEFAULT_CANNY_LOW: f32 = 50.0;
const DEFAULT_CANNY_HIGH: f32 = 150.0;

const DEFAULT_DETECTOR_PATHS: &[&str] = &[
    "detectors",
    ".",
    "/usr/local/share/tree-measure/detectors",
    "/usr/share/tree-measure/detectors",
];
const DEFAULT_SCALE_FACTOR: f64 = 1.05;
const DEFAULT_MIN_NEIGHBORS: u32 = 5;
const DEFAULT_MIN_OBJECT_SIDE: u32 = 30;
const DEFAULT_MATCH_THRESHOLD: f32 = 0.8;
const DEFAULT_ASPECT_TOLERANCE: f64 = 0.3;
const DEFAULT_WORKING_MAX_SIDE: u32 = 320;

const DEFAULT_SENSOR_WIDTH_MM: f64 = 6.17;
const DEFAULT_FOCAL_LENGTH_MM: f64 = 4.2;
const DEFAULT_ASSUMED_TREE_SIZE_M: f64 = 15.0;
const DEFAULT_FALLBACK_HEIGHT_M: f64 = 15.0;
const DEFAULT_AGREEMENT_TOLERANCE: f64 = 0.25;

const DEFAULT_MIN_HEIGHT_M: f64 = 1.0;
const DEFAULT_MAX_HEIGHT_M: f64 = 60.0;
const DEFAULT_MIN_WIDTH_M: f64 = 0.3;
const DEFAULT_MAX_WIDTH_M: f64 = 15.0;

const DEFAULT_DEPTH_INPUT_SIDE: u32 = 256;

const DEFAULT_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

// ----------------------------------------------------------------------------
// On-disk shape (every field optional)
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct MeasureConfigFile {
    segmentation: Option<SegmentationConfigFile>,
    detector: Option<DetectorConfigFile>,
    scale: Option<ScaleConfigFile>,
    bounds: Option<BoundsConfigFile>,
    depth: Option<DepthConfigFile>,
    render: Option<RenderConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SegmentationConfigFile {
    hue_min_deg: Option<f32>,
    hue_max_deg: Option<f32>,
    saturation_min: Option<u8>,
    value_min: Option<u8>,
    kernel_radius: Option<u8>,
    close_iterations: Option<u32>,
    open_iterations: Option<u32>,
    area_weight: Option<f64>,
    aspect_weight: Option<f64>,
    solidity_weight: Option<f64>,
    expected_aspect: Option<f64>,
    canny_low: Option<f32>,
    canny_high: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    search_paths: Option<Vec<PathBuf>>,
    references: Option<Vec<ReferenceSpec>>,
    scale_factor: Option<f64>,
    min_neighbors: Option<u32>,
    min_width: Option<u32>,
    min_height: Option<u32>,
    match_threshold: Option<f32>,
    aspect_tolerance: Option<f64>,
    working_max_side: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ScaleConfigFile {
    default_sensor_width_mm: Option<f64>,
    default_focal_length_mm: Option<f64>,
    assumed_tree_size_m: Option<f64>,
    fallback_reference_height_m: Option<f64>,
    agreement_tolerance: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct BoundsConfigFile {
    min_height_m: Option<f64>,
    max_height_m: Option<f64>,
    min_width_m: Option<f64>,
    max_width_m: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct DepthConfigFile {
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RenderConfigFile {
    enabled: Option<bool>,
    output_dir: Option<PathBuf>,
    font_paths: Option<Vec<PathBuf>>,
}

// ----------------------------------------------------------------------------
// Resolved settings
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MeasureConfig {
    pub segmentation: SegmentationSettings,
    pub detector: DetectorSettings,
    pub scale: ScaleSettings,
    pub bounds: DimensionBounds,
    pub depth: DepthSettings,
    pub render: RenderSettings,
}

/// Green-band thresholds and contour scoring weights.
///
/// Hue is in degrees (0..360); saturation and value are 0..255.
#[derive(Debug, Clone)]
pub struct SegmentationSettings {
    pub hue_min_deg: f32,
    pub hue_max_deg: f32,
    pub saturation_min: u8,
    pub value_min: u8,
    /// Chebyshev radius of the square structuring element (2 => 5x5).
    pub kernel_radius: u8,
    pub close_iterations: u32,
    pub open_iterations: u32,
    pub area_weight: f64,
    pub aspect_weight: f64,
    pub solidity_weight: f64,
    /// Width / height of a typical tree silhouette.
    pub expected_aspect: f64,
    pub canny_low: f32,
    pub canny_high: f32,
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        Self {
            hue_min_deg: DEFAULT_HUE_MIN_DEG,
            hue_max_deg: DEFAULT_HUE_MAX_DEG,
            saturation_min: DEFAULT_SATURATION_MIN,
            value_min: DEFAULT_VALUE_MIN,
            kernel_radius: DEFAULT_KERNEL_RADIUS,
            close_iterations: DEFAULT_CLOSE_ITERATIONS,
            open_iterations: DEFAULT_OPEN_ITERATIONS,
            area_weight: DEFAULT_AREA_WEIGHT,
            aspect_weight: DEFAULT_ASPECT_WEIGHT,
            solidity_weight: DEFAULT_SOLIDITY_WEIGHT,
            expected_aspect: DEFAULT_EXPECTED_ASPECT,
            canny_low: DEFAULT_CANNY_LOW,
            canny_high: DEFAULT_CANNY_HIGH,
        }
    }
}

/// Reference-object detection. Parameters lean towards precision: a false
/// positive corrupts the scale, a miss only lowers confidence.
#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub search_paths: Vec<PathBuf>,
    pub references: Vec<ReferenceSpec>,
    /// Step between successive pattern sizes.
    pub scale_factor: f64,
    /// Overlapping raw hits required before a detection is reported.
    pub min_neighbors: u32,
    pub min_width: u32,
    pub min_height: u32,
    pub match_threshold: f32,
    /// Allowed relative deviation from the reference aspect ratio.
    pub aspect_tolerance: f64,
    /// Longest side of the downscaled frame patterns are matched against.
    pub working_max_side: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            search_paths: DEFAULT_DETECTOR_PATHS.iter().map(PathBuf::from).collect(),
            references: default_reference_table(),
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_width: DEFAULT_MIN_OBJECT_SIDE,
            min_height: DEFAULT_MIN_OBJECT_SIDE,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            aspect_tolerance: DEFAULT_ASPECT_TOLERANCE,
            working_max_side: DEFAULT_WORKING_MAX_SIDE,
        }
    }
}

/// Calibration constants for the scale methods.
#[derive(Debug, Clone)]
pub struct ScaleSettings {
    pub default_sensor_width_mm: f64,
    pub default_focal_length_mm: f64,
    /// Absolute tree size assumed when ranging from the silhouette.
    pub assumed_tree_size_m: f64,
    /// Fallback: the frame height is taken to span this many meters.
    pub fallback_reference_height_m: f64,
    /// Max spread (relative to the mean) for distance estimates to agree.
    pub agreement_tolerance: f64,
}

impl Default for ScaleSettings {
    fn default() -> Self {
        Self {
            default_sensor_width_mm: DEFAULT_SENSOR_WIDTH_MM,
            default_focal_length_mm: DEFAULT_FOCAL_LENGTH_MM,
            assumed_tree_size_m: DEFAULT_ASSUMED_TREE_SIZE_M,
            fallback_reference_height_m: DEFAULT_FALLBACK_HEIGHT_M,
            agreement_tolerance: DEFAULT_AGREEMENT_TOLERANCE,
        }
    }
}

/// Hard clamps applied to every reported dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionBounds {
    pub min_height_m: f64,
    pub max_height_m: f64,
    pub min_width_m: f64,
    pub max_width_m: f64,
}

impl Default for DimensionBounds {
    fn default() -> Self {
        Self {
            min_height_m: DEFAULT_MIN_HEIGHT_M,
            max_height_m: DEFAULT_MAX_HEIGHT_M,
            min_width_m: DEFAULT_MIN_WIDTH_M,
            max_width_m: DEFAULT_MAX_WIDTH_M,
        }
    }
}

impl DimensionBounds {
    pub fn clamp_height(&self, height_m: f64) -> f64 {
        height_m.clamp(self.min_height_m, self.max_height_m)
    }

    pub fn clamp_width(&self, width_m: f64) -> f64 {
        width_m.clamp(self.min_width_m, self.max_width_m)
    }
}

#[derive(Debug, Clone)]
pub struct DepthSettings {
    pub model_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
}

impl Default for DepthSettings {
    fn default() -> Self {
        Self {
            model_path: None,
            input_width: DEFAULT_DEPTH_INPUT_SIDE,
            input_height: DEFAULT_DEPTH_INPUT_SIDE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub enabled: bool,
    pub output_dir: Option<PathBuf>,
    pub font_paths: Vec<PathBuf>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: None,
            font_paths: DEFAULT_FONT_PATHS.iter().map(PathBuf::from).collect(),
        }
    }
}

// ----------------------------------------------------------------------------
// Loading
// ----------------------------------------------------------------------------

impl MeasureConfig {
    /// File named by `TREE_MEASURE_CONFIG` (if any), then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TREE_MEASURE_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like `load`, but with an explicit config file that wins over the env var.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MeasureConfigFile) -> Self {
        let mut cfg = Self::default();

        if let Some(seg) = file.segmentation {
            let s = &mut cfg.segmentation;
            if let Some(v) = seg.hue_min_deg {
                s.hue_min_deg = v;
            }
            if let Some(v) = seg.hue_max_deg {
                s.hue_max_deg = v;
            }
            if let Some(v) = seg.saturation_min {
                s.saturation_min = v;
            }
            if let Some(v) = seg.value_min {
                s.value_min = v;
            }
            if let Some(v) = seg.kernel_radius {
                s.kernel_radius = v;
            }
            if let Some(v) = seg.close_iterations {
                s.close_iterations = v;
            }
            if let Some(v) = seg.open_iterations {
                s.open_iterations = v;
            }
            if let Some(v) = seg.area_weight {
                s.area_weight = v;
            }
            if let Some(v) = seg.aspect_weight {
                s.aspect_weight = v;
            }
            if let Some(v) = seg.solidity_weight {
                s.solidity_weight = v;
            }
            if let Some(v) = seg.expected_aspect {
                s.expected_aspect = v;
            }
            if let Some(v) = seg.canny_low {
                s.canny_low = v;
            }
            if let Some(v) = seg.canny_high {
                s.canny_high = v;
            }
        }

        if let Some(det) = file.detector {
            let d = &mut cfg.detector;
            if let Some(v) = det.search_paths {
                d.search_paths = v;
            }
            if let Some(v) = det.references {
                d.references = v;
            }
            if let Some(v) = det.scale_factor {
                d.scale_factor = v;
            }
            if let Some(v) = det.min_neighbors {
                d.min_neighbors = v;
            }
            if let Some(v) = det.min_width {
                d.min_width = v;
            }
            if let Some(v) = det.min_height {
                d.min_height = v;
            }
            if let Some(v) = det.match_threshold {
                d.match_threshold = v;
            }
            if let Some(v) = det.aspect_tolerance {
                d.aspect_tolerance = v;
            }
            if let Some(v) = det.working_max_side {
                d.working_max_side = v;
            }
        }

        if let Some(scale) = file.scale {
            let s = &mut cfg.scale;
            if let Some(v) = scale.default_sensor_width_mm {
                s.default_sensor_width_mm = v;
            }
            if let Some(v) = scale.default_focal_length_mm {
                s.default_focal_length_mm = v;
            }
            if let Some(v) = scale.assumed_tree_size_m {
                s.assumed_tree_size_m = v;
            }
            if let Some(v) = scale.fallback_reference_height_m {
                s.fallback_reference_height_m = v;
            }
            if let Some(v) = scale.agreement_tolerance {
                s.agreement_tolerance = v;
            }
        }

        if let Some(bounds) = file.bounds {
            let b = &mut cfg.bounds;
            if let Some(v) = bounds.min_height_m {
                b.min_height_m = v;
            }
            if let Some(v) = bounds.max_height_m {
                b.max_height_m = v;
            }
            if let Some(v) = bounds.min_width_m {
                b.min_width_m = v;
            }
            if let Some(v) = bounds.max_width_m {
                b.max_width_m = v;
            }
        }

        if let Some(depth) = file.depth {
            cfg.depth.model_path = depth.model_path;
            if let Some(v) = depth.input_width {
                cfg.depth.input_width = v;
            }
            if let Some(v) = depth.input_height {
                cfg.depth.input_height = v;
            }
        }

        if let Some(render) = file.render {
            if let Some(v) = render.enabled {
                cfg.render.enabled = v;
            }
            cfg.render.output_dir = render.output_dir;
            if let Some(v) = render.font_paths {
                cfg.render.font_paths = v;
            }
        }

        cfg
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(paths) = std::env::var("TREE_MEASURE_DETECTOR_PATHS") {
            let parsed = split_csv(&paths);
            if !parsed.is_empty() {
                self.detector.search_paths = parsed.into_iter().map(PathBuf::from).collect();
            }
        }
        if let Ok(path) = std::env::var("TREE_MEASURE_DEPTH_MODEL") {
            if !path.trim().is_empty() {
                self.depth.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(dir) = std::env::var("TREE_MEASURE_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.render.output_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(font) = std::env::var("TREE_MEASURE_FONT") {
            if !font.trim().is_empty() {
                self.render.font_paths.insert(0, PathBuf::from(font));
            }
        }
        if let Ok(enabled) = std::env::var("TREE_MEASURE_RENDER") {
            self.render.enabled = enabled
                .trim()
                .parse()
                .map_err(|_| anyhow!("TREE_MEASURE_RENDER must be true or false"))?;
        }
        if let Ok(max) = std::env::var("TREE_MEASURE_MAX_HEIGHT_M") {
            self.bounds.max_height_m = max
                .trim()
                .parse()
                .map_err(|_| anyhow!("TREE_MEASURE_MAX_HEIGHT_M must be a number of meters"))?;
        }
        if let Ok(max) = std::env::var("TREE_MEASURE_MAX_WIDTH_M") {
            self.bounds.max_width_m = max
                .trim()
                .parse()
                .map_err(|_| anyhow!("TREE_MEASURE_MAX_WIDTH_M must be a number of meters"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let seg = &self.segmentation;
        if !(0.0..=360.0).contains(&seg.hue_min_deg)
            || !(0.0..=360.0).contains(&seg.hue_max_deg)
            || seg.hue_min_deg >= seg.hue_max_deg
        {
            return Err(anyhow!(
                "segmentation hue band must satisfy 0 <= min < max <= 360"
            ));
        }
        if seg.kernel_radius == 0 {
            return Err(anyhow!("segmentation kernel_radius must be at least 1"));
        }
        if seg.expected_aspect <= 0.0 {
            return Err(anyhow!("segmentation expected_aspect must be positive"));
        }
        if seg.canny_low > seg.canny_high {
            return Err(anyhow!("canny_low must not exceed canny_high"));
        }

        let det = &self.detector;
        if det.scale_factor <= 1.0 {
            return Err(anyhow!("detector scale_factor must be greater than 1"));
        }
        if det.min_width == 0 || det.min_height == 0 {
            return Err(anyhow!("detector minimum size must be non-zero"));
        }
        if !(0.0..1.0).contains(&det.aspect_tolerance) {
            return Err(anyhow!("detector aspect_tolerance must be in [0, 1)"));
        }
        if det.working_max_side < det.min_width.max(det.min_height) {
            return Err(anyhow!(
                "detector working_max_side must be at least the minimum object size"
            ));
        }
        for spec in &det.references {
            if spec.width_m <= 0.0 || spec.height_m <= 0.0 {
                return Err(anyhow!(
                    "reference '{}' must have positive real-world size",
                    spec.kind
                ));
            }
        }

        let scale = &self.scale;
        for (name, value) in [
            ("default_sensor_width_mm", scale.default_sensor_width_mm),
            ("default_focal_length_mm", scale.default_focal_length_mm),
            ("assumed_tree_size_m", scale.assumed_tree_size_m),
            ("fallback_reference_height_m", scale.fallback_reference_height_m),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(anyhow!("scale {} must be positive", name));
            }
        }
        if scale.agreement_tolerance < 0.0 {
            return Err(anyhow!("scale agreement_tolerance must not be negative"));
        }

        let b = &self.bounds;
        if !(b.min_height_m > 0.0 && b.min_height_m < b.max_height_m) {
            return Err(anyhow!("height bounds must satisfy 0 < min < max"));
        }
        if !(b.min_width_m > 0.0 && b.min_width_m < b.max_width_m) {
            return Err(anyhow!("width bounds must satisfy 0 < min < max"));
        }

        if self.depth.input_width == 0 || self.depth.input_height == 0 {
            return Err(anyhow!("depth input size must be non-zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<MeasureConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = MeasureConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.bounds.max_height_m, 60.0);
        assert_eq!(cfg.bounds.min_width_m, 0.3);
        assert_eq!(cfg.scale.default_sensor_width_mm, 6.17);
        assert_eq!(cfg.detector.references.len(), 4);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let file: MeasureConfigFile = toml::from_str(
            r#"
            [bounds]
            max_width_m = 12.0

            [scale]
            fallback_reference_height_m = 20.0
            "#,
        )
        .unwrap();
        let cfg = MeasureConfig::from_file(file);
        assert_eq!(cfg.bounds.max_width_m, 12.0);
        assert_eq!(cfg.bounds.max_height_m, 60.0);
        assert_eq!(cfg.scale.fallback_reference_height_m, 20.0);
        assert_eq!(cfg.scale.assumed_tree_size_m, 15.0);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let mut cfg = MeasureConfig::default();
        cfg.bounds.min_height_m = 70.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn csv_split_drops_blanks() {
        assert_eq!(split_csv(" a, ,b ,"), vec!["a", "b"]);
    }
}
