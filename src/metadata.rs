//! Camera metadata pulled from EXIF.
//!
//! Extraction never fails: unreadable or missing EXIF yields an empty
//! `Metadata` and a warning. Absent fields stay `None` and the consumers
//! apply their own defaults.

use anyhow::{Context, Result};
use exif::{Exif, In, Tag, Value};
use serde::Serialize;
use std::io::{BufReader, Cursor};
use std::path::Path;

const MM_PER_INCH: f64 = 25.4;
const MM_PER_CM: f64 = 10.0;
const FULL_FRAME_WIDTH_MM: f64 = 36.0;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Metadata {
    pub focal_length_mm: Option<f64>,
    pub sensor_width_mm: Option<f64>,
    /// Raw EXIF orientation code (1, 3, 6, 8 are the ones we act on).
    pub orientation: Option<u32>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub gps: Option<GpsCoordinates>,
}

/// Signed decimal degrees; south and west are negative.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GpsCoordinates {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        *self == Metadata::default()
    }
}

/// Read metadata from a local image file.
pub fn extract_from_path<P: AsRef<Path>>(path: P) -> Metadata {
    let path = path.as_ref();
    let parsed = std::fs::File::open(path)
        .with_context(|| format!("open {}", path.display()))
        .and_then(|file| read_exif(&mut BufReader::new(file)));
    finish(parsed, &path.display().to_string())
}

/// Read metadata from encoded image bytes.
pub fn extract_from_bytes(identity: &str, bytes: &[u8]) -> Metadata {
    finish(read_exif(&mut Cursor::new(bytes)), identity)
}

fn read_exif<R: std::io::BufRead + std::io::Seek>(reader: &mut R) -> Result<Exif> {
    exif::Reader::new()
        .read_from_container(reader)
        .context("parse EXIF container")
}

fn finish(parsed: Result<Exif>, identity: &str) -> Metadata {
    match parsed {
        Ok(exif) => from_exif(&exif),
        Err(e) => {
            log::warn!("metadata unavailable for {}: {:#}", identity, e);
            Metadata::default()
        }
    }
}

fn from_exif(exif: &Exif) -> Metadata {
    let focal_length_mm = real(exif, Tag::FocalLength).filter(|f| *f > 0.0);
    let sensor_width_mm =
        sensor_from_focal_plane(exif).or_else(|| sensor_from_35mm(exif, focal_length_mm));

    Metadata {
        focal_length_mm,
        sensor_width_mm,
        orientation: uint(exif, Tag::Orientation),
        camera_make: text(exif, Tag::Make),
        camera_model: text(exif, Tag::Model),
        gps: gps(exif),
    }
}

/// Sensor width from the focal-plane resolution tags.
fn sensor_from_focal_plane(exif: &Exif) -> Option<f64> {
    let x_res = real(exif, Tag::FocalPlaneXResolution).filter(|r| *r > 0.0)?;
    let pixels = uint(exif, Tag::PixelXDimension).filter(|p| *p > 0)? as f64;
    let unit_mm = match uint(exif, Tag::FocalPlaneResolutionUnit).unwrap_or(2) {
        3 => MM_PER_CM,
        _ => MM_PER_INCH,
    };
    Some(pixels / x_res * unit_mm)
}

/// Sensor width from the 35 mm equivalent focal length.
fn sensor_from_35mm(exif: &Exif, focal_length_mm: Option<f64>) -> Option<f64> {
    let focal = focal_length_mm?;
    let equivalent = uint(exif, Tag::FocalLengthIn35mmFilm).filter(|f| *f > 0)? as f64;
    Some(FULL_FRAME_WIDTH_MM * focal / equivalent)
}

fn gps(exif: &Exif) -> Option<GpsCoordinates> {
    let lat = dms(exif, Tag::GPSLatitude)?;
    let lon = dms(exif, Tag::GPSLongitude)?;
    let lat_ref = text(exif, Tag::GPSLatitudeRef);
    let lon_ref = text(exif, Tag::GPSLongitudeRef);

    let altitude = real(exif, Tag::GPSAltitude).map(|alt| {
        if uint(exif, Tag::GPSAltitudeRef) == Some(1) {
            -alt
        } else {
            alt
        }
    });

    Some(GpsCoordinates {
        latitude: dms_to_decimal(lat, lat_ref.as_deref()),
        longitude: dms_to_decimal(lon, lon_ref.as_deref()),
        altitude,
    })
}

/// `d + m/60 + s/3600`, negated for the southern and western hemispheres.
pub fn dms_to_decimal((d, m, s): (f64, f64, f64), hemisphere: Option<&str>) -> f64 {
    let degrees = d + m / 60.0 + s / 3600.0;
    match hemisphere.map(|h| h.trim().to_ascii_uppercase()) {
        Some(h) if h.starts_with('S') || h.starts_with('W') => -degrees,
        _ => degrees,
    }
}

fn dms(exif: &Exif, tag: Tag) -> Option<(f64, f64, f64)> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    Some((
        real_at(&field.value, 0)?,
        real_at(&field.value, 1)?,
        real_at(&field.value, 2)?,
    ))
}

fn real(exif: &Exif, tag: Tag) -> Option<f64> {
    exif.get_field(tag, In::PRIMARY)
        .and_then(|field| real_at(&field.value, 0))
}

fn real_at(value: &Value, index: usize) -> Option<f64> {
    let number = match value {
        Value::Rational(values) => values.get(index).map(|r| r.to_f64()),
        Value::SRational(values) => values.get(index).map(|r| r.to_f64()),
        Value::Float(values) => values.get(index).map(|v| *v as f64),
        Value::Double(values) => values.get(index).copied(),
        other => other.get_uint(index).map(f64::from),
    }?;
    number.is_finite().then_some(number)
}

fn uint(exif: &Exif, tag: Tag) -> Option<u32> {
    exif.get_field(tag, In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
}

fn text(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(parts) => parts
            .first()
            .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}
