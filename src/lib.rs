//! Tree dimension estimation from a single uncalibrated photograph.
//!
//! Given one RGB frame and whatever EXIF it carries, the crate segments the
//! tree, derives a pixel-to-meter scale from the best signal available, and
//! reports height and width in meters with a confidence score.
//!
//! # Architecture
//!
//! Scale sources, in order of preference when confidences tie:
//!
//! 1. **Reference objects**: cars, people, bicycles and benches of known size.
//! 2. **Depth model**: mean metric depth over the tree mask (optional).
//! 3. **Camera geometry**: EXIF focal length plus an assumed tree size.
//! 4. **Fallback**: the frame height is taken to span a typical tree.
//!
//! The fallback has no preconditions, so any frame that segments yields a
//! result. Reported dimensions are always clamped to plausible bounds.
//!
//! # Module Structure
//!
//! - `frame`: decoded image plus identity and content digest
//! - `metadata`: EXIF focal length, sensor width, orientation and GPS
//! - `segment`: tree silhouette (green hue band, edge fallback)
//! - `detect`: reference-object detectors and their registry
//! - `depth`: optional metric-depth capability
//! - `scale`: candidate scales and selection
//! - `dimension`: meters, orientation correction and clamping
//! - `render`: annotated audit copies
//! - `pipeline`: `TreeMeasurer`, one image or a parallel batch

pub mod config;
pub mod depth;
pub mod detect;
pub mod dimension;
pub mod error;
pub mod frame;
pub mod metadata;
pub mod pipeline;
pub mod render;
pub mod scale;
pub mod segment;

pub use config::MeasureConfig;
pub use dimension::DimensionResult;
pub use error::EstimateFailure;
pub use frame::Frame;
pub use metadata::{GpsCoordinates, Metadata};
pub use pipeline::TreeMeasurer;
pub use scale::{ScaleEstimate, ScaleMethod};
