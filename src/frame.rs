//! Decoded input frames.
//!
//! A `Frame` is one RGB raster plus the identity (path or URL) it came from.
//! Frames are immutable after construction; every stage of the pipeline
//! borrows them read-only, so one frame can be measured from several threads.

use image::{DynamicImage, GrayImage, ImageDecoder, ImageReader, ImageResult, RgbImage};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::error::EstimateFailure;

/// Suffix appended to the file stem of audit images.
pub const AUDIT_SUFFIX: &str = "_analyzed";

const DEFAULT_AUDIT_EXT: &str = "jpg";

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

pub struct Frame {
    identity: String,
    image: RgbImage,
    digest: [u8; 32],
}

impl Frame {
    /// Decode a local image file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EstimateFailure> {
        let path = path.as_ref();
        let identity = path.display().to_string();
        let bytes = std::fs::read(path).map_err(|e| EstimateFailure::Load {
            identity: identity.clone(),
            reason: e.to_string(),
        })?;
        Self::from_bytes(identity, &bytes)
    }

    /// Decode bytes that a collaborator already fetched.
    ///
    /// `identity` is kept verbatim as the provenance key; it may be a URL.
    /// The EXIF orientation is applied, so the raster is always upright.
    pub fn from_bytes(identity: impl Into<String>, bytes: &[u8]) -> Result<Self, EstimateFailure> {
        let identity = identity.into();
        let decoded = decode_upright(bytes).map_err(|e| EstimateFailure::Load {
            identity: identity.clone(),
            reason: e.to_string(),
        })?;
        let image = decoded.to_rgb8();
        if image.width() == 0 || image.height() == 0 {
            return Err(EstimateFailure::Load {
                identity,
                reason: "image has zero extent".to_string(),
            });
        }
        Ok(Self {
            identity,
            image,
            digest: Sha256::digest(bytes).into(),
        })
    }

    /// Wrap an already-decoded raster. The digest covers the raw pixels.
    pub fn from_image(identity: impl Into<String>, image: RgbImage) -> Self {
        let digest = Sha256::digest(image.as_raw()).into();
        Self {
            identity: identity.into(),
            image,
            digest,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Luma view used by the detectors and the edge fallback.
    pub fn gray(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }

    pub fn digest(&self) -> [u8; 32] {
        self.digest
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }

    /// True when the identity names a remote resource rather than a local file.
    pub fn is_remote(&self) -> bool {
        self.identity.contains("://")
    }

    /// Where the annotated copy of this frame goes: `<stem>_analyzed.<ext>`.
    ///
    /// Lands beside the source unless `output_dir` is given. Remote identities
    /// without an output directory resolve against the working directory.
    pub fn audit_path(&self, output_dir: Option<&Path>) -> PathBuf {
        let source = if self.is_remote() {
            let tail = self
                .identity
                .rsplit('/')
                .find(|segment| !segment.is_empty())
                .unwrap_or("frame");
            PathBuf::from(tail.split(['?', '#']).next().unwrap_or(tail))
        } else {
            PathBuf::from(&self.identity)
        };

        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "frame".to_string());
        let ext = source
            .extension()
            .map(|s| s.to_string_lossy().to_lowercase())
            .filter(|ext| is_supported_extension(ext))
            .unwrap_or_else(|| DEFAULT_AUDIT_EXT.to_string());
        let file_name = format!("{}{}.{}", stem, AUDIT_SUFFIX, ext);

        match output_dir {
            Some(dir) => dir.join(file_name),
            None if self.is_remote() => PathBuf::from(file_name),
            None => source
                .parent()
                .map(|parent| parent.join(&file_name))
                .unwrap_or_else(|| PathBuf::from(&file_name)),
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("identity", &self.identity)
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish()
    }
}

fn decode_upright(bytes: &[u8]) -> ImageResult<DynamicImage> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}

/// Extensions the frame loader and the audit writer both understand.
pub fn is_supported_extension(ext: &str) -> bool {
    matches!(ext.to_lowercase().as_str(), "jpg" | "jpeg" | "png" | "bmp")
}

/// True for files this crate wrote itself; those are never measured again.
pub fn is_audit_output(path: &Path) -> bool {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().ends_with(AUDIT_SUFFIX))
        .unwrap_or(false)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
