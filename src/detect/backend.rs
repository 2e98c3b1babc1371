use anyhow::Result;
use image::{GrayImage, RgbImage};

use crate::config::DetectorSettings;
use crate::detect::result::Detection;

/// Read-only pixel views handed to every pattern detector for one frame.
///
/// The luma plane is computed once per frame and shared by all detectors.
pub struct DetectionView<'a> {
    pub rgb: &'a RgbImage,
    pub gray: &'a GrayImage,
}

impl<'a> DetectionView<'a> {
    pub fn width(&self) -> u32 {
        self.rgb.width()
    }

    pub fn height(&self) -> u32 {
        self.rgb.height()
    }
}

/// One loaded pattern classifier for a single reference kind.
///
/// Detectors are loaded once and shared across threads, so `detect` takes
/// `&self` and must not keep state between calls.
pub trait PatternDetector: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Candidate boxes in frame pixel coordinates. Aspect validation is the
    /// caller's job; backends only enforce score and minimum size.
    fn detect(&self, view: &DetectionView<'_>, settings: &DetectorSettings)
        -> Result<Vec<Detection>>;
}
