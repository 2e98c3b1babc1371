pub mod stub;
pub mod template;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::FixedDetector;
pub use template::TemplateDetector;

#[cfg(feature = "backend-tract")]
pub use tract::TractDetector;
