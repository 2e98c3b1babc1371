//! Audit images: the measured box and the numbers behind it, drawn on a copy.
//!
//! Rendering is best effort. Failures are logged and never change the result.

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::config::RenderSettings;
use crate::dimension::DimensionResult;
use crate::frame::Frame;
use crate::segment::BoundingBox;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BACKDROP_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: i32 = 2;
const MARGIN: i32 = 10;
const MIN_TEXT_PX: f32 = 16.0;

pub struct AuditRenderer {
    settings: RenderSettings,
    font: Option<FontVec>,
}

impl AuditRenderer {
    pub fn new(settings: RenderSettings) -> Self {
        let font = if settings.enabled {
            load_font(&settings.font_paths)
        } else {
            None
        };
        if settings.enabled && font.is_none() {
            log::warn!(
                "no usable font in {:?}; audit images will carry the box only",
                settings.font_paths
            );
        }
        Self { settings, font }
    }

    pub fn enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Annotate a copy of the frame and write it to the audit path.
    ///
    /// Returns the written path, or `None` when disabled or on any failure.
    pub fn render(&self, frame: &Frame, result: &DimensionResult) -> Option<PathBuf> {
        if !self.settings.enabled {
            return None;
        }
        let dest = frame.audit_path(self.settings.output_dir.as_deref());
        if dest == Path::new(frame.identity()) {
            log::warn!(
                "{}: audit path equals the input, not rendering",
                frame.identity()
            );
            return None;
        }
        if let Some(dir) = &self.settings.output_dir {
            if let Err(err) = std::fs::create_dir_all(dir) {
                log::warn!(
                    "{}: cannot create output dir {}: {}",
                    frame.identity(),
                    dir.display(),
                    err
                );
                return None;
            }
        }

        let annotated = self.annotate(frame, result);
        match annotated.save(&dest) {
            Ok(()) => {
                log::info!("{}: audit image written to {}", frame.identity(), dest.display());
                Some(dest)
            }
            Err(err) => {
                log::warn!(
                    "{}: failed to write audit image {}: {}",
                    frame.identity(),
                    dest.display(),
                    err
                );
                None
            }
        }
    }

    pub fn annotate(&self, frame: &Frame, result: &DimensionResult) -> RgbImage {
        let mut canvas = frame.image().clone();
        draw_box(&mut canvas, &result.bounding_box);

        if let Some(font) = &self.font {
            let px = (canvas.height() as f32 / 40.0).max(MIN_TEXT_PX);
            let scale = PxScale::from(px);
            let line_height = (px * 1.25).ceil() as i32;
            for (i, line) in caption(result).iter().enumerate() {
                let y = MARGIN + i as i32 * line_height;
                let (w, h) = text_size(scale, font, line);
                if w > 0 && h > 0 {
                    draw_filled_rect_mut(
                        &mut canvas,
                        Rect::at(MARGIN - 2, y - 2).of_size(w + 4, h + 4),
                        BACKDROP_COLOR,
                    );
                }
                draw_text_mut(&mut canvas, TEXT_COLOR, MARGIN, y, scale, font, line);
            }
        }
        canvas
    }
}

/// Text lines printed on the audit image.
pub fn caption(result: &DimensionResult) -> Vec<String> {
    let mut lines = vec![
        format!("Height: {:.2} m", result.height_m),
        format!("Width: {:.2} m", result.width_m),
        format!("Method: {}", result.method),
        format!("Confidence: {:.0}%", result.confidence * 100.0),
    ];
    if let Some(gps) = &result.gps {
        lines.push(format!("GPS: {:.6}, {:.6}", gps.latitude, gps.longitude));
    }
    lines
}

fn draw_box(canvas: &mut RgbImage, bbox: &BoundingBox) {
    for inset in 0..BOX_THICKNESS {
        let w = bbox.width as i32 - 2 * inset;
        let h = bbox.height as i32 - 2 * inset;
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(bbox.x + inset, bbox.y + inset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(canvas, rect, BOX_COLOR);
    }
}

fn load_font(paths: &[PathBuf]) -> Option<FontVec> {
    paths.iter().find_map(|path| {
        let bytes = std::fs::read(path).ok()?;
        match FontVec::try_from_vec(bytes) {
            Ok(font) => {
                log::debug!("using font {}", path.display());
                Some(font)
            }
            Err(err) => {
                log::debug!("skipping font {}: {}", path.display(), err);
                None
            }
        }
    })
}
