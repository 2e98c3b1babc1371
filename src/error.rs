/// Terminal per-image outcomes.
///
/// Everything else the pipeline runs into (unreadable EXIF, a missing
/// detector asset, a degenerate scale candidate, a failed audit render) is
/// recovered locally and only shows up as a log entry or a lower confidence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EstimateFailure {
    /// The image could not be read or decoded.
    Load { identity: String, reason: String },
    /// Neither the hue band nor the edge fallback produced a tree contour.
    Segmentation { identity: String },
}

impl EstimateFailure {
    pub fn code(&self) -> &'static str {
        match self {
            EstimateFailure::Load { .. } => "LOAD_FAILURE",
            EstimateFailure::Segmentation { .. } => "SEGMENTATION_FAILURE",
        }
    }

    pub fn identity(&self) -> &str {
        match self {
            EstimateFailure::Load { identity, .. } => identity,
            EstimateFailure::Segmentation { identity } => identity,
        }
    }
}

impl std::fmt::Display for EstimateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EstimateFailure::Load { identity, reason } => {
                write!(f, "{}: cannot load {}: {}", self.code(), identity, reason)
            }
            EstimateFailure::Segmentation { identity } => {
                write!(f, "{}: no tree contour found in {}", self.code(), identity)
            }
        }
    }
}

impl std::error::Error for EstimateFailure {}
