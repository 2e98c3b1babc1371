use anyhow::Result;

use crate::config::DetectorSettings;
use crate::detect::backend::{DetectionView, PatternDetector};
use crate::detect::result::Detection;

/// Replays a fixed list of detections for every frame.
///
/// Used in tests, and by callers that run detection out of process and only
/// want the scale logic applied to the boxes they already have.
pub struct FixedDetector {
    detections: Vec<Detection>,
}

impl FixedDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl PatternDetector for FixedDetector {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn detect(
        &self,
        _view: &DetectionView<'_>,
        _settings: &DetectorSettings,
    ) -> Result<Vec<Detection>> {
        Ok(self.detections.clone())
    }
}
