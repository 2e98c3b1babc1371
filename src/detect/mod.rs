//! Reference-object detection.
//!
//! Each reference kind (car, person, bicycle, bench) has its own pattern
//! detector loaded from an asset file. Hits are validated against the kind's
//! expected aspect ratio before they are allowed to anchor a scale.

mod backend;
mod backends;
mod registry;
mod result;

pub use backend::{DetectionView, PatternDetector};
pub use backends::{FixedDetector, TemplateDetector};
pub use registry::{aspect_matches, ReferenceDetector};
pub use result::{default_reference_table, Detection, ReferenceKind, ReferenceObject, ReferenceSpec};

#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;
