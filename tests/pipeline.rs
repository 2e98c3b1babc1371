use std::path::PathBuf;
use std::sync::Arc;

use image::{ImageFormat, Rgb, RgbImage};

use tree_measure::config::MeasureConfig;
use tree_measure::depth::{DepthEstimator, UniformDepth};
use tree_measure::detect::{
    default_reference_table, Detection, FixedDetector, PatternDetector, ReferenceDetector,
    ReferenceKind, ReferenceSpec,
};
use tree_measure::segment::BoundingBox;
use tree_measure::{EstimateFailure, Frame, Metadata, ScaleMethod, TreeMeasurer};

const SKY: Rgb<u8> = Rgb([200, 210, 220]);
const LEAF: Rgb<u8> = Rgb([40, 150, 50]);

/// 600x400 frame with a 60x300 canopy at (250, 50).
fn tree_scene() -> RgbImage {
    let mut image = RgbImage::from_pixel(600, 400, SKY);
    for y in 50..350 {
        for x in 250..310 {
            image.put_pixel(x, y, LEAF);
        }
    }
    image
}

fn quiet_config() -> MeasureConfig {
    let mut config = MeasureConfig::default();
    config.render.enabled = false;
    config
}

fn spec(kind: ReferenceKind) -> ReferenceSpec {
    default_reference_table()
        .into_iter()
        .find(|s| s.kind == kind)
        .unwrap()
}

fn measurer_with(
    config: MeasureConfig,
    references: Vec<(ReferenceKind, Vec<BoundingBox>)>,
    depth: Option<Arc<dyn DepthEstimator>>,
) -> TreeMeasurer {
    let detectors = references
        .into_iter()
        .map(|(kind, boxes)| {
            let hits = boxes.into_iter().map(|b| Detection::new(b, 0.9)).collect();
            (
                spec(kind),
                Arc::new(FixedDetector::new(hits)) as Arc<dyn PatternDetector>,
            )
        })
        .collect();
    let registry = ReferenceDetector::with_detectors(config.detector.clone(), detectors);
    TreeMeasurer::with_components(config, registry, depth).unwrap()
}

fn png_bytes(image: &RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// JPEG whose APP1 segment carries an EXIF orientation tag.
fn jpeg_with_orientation(image: &RgbImage, orientation: u16) -> Vec<u8> {
    let mut jpeg = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .unwrap();

    let field = exif::Field {
        tag: exif::Tag::Orientation,
        ifd_num: exif::In::PRIMARY,
        value: exif::Value::Short(vec![orientation]),
    };
    let mut writer = exif::experimental::Writer::new();
    writer.push_field(&field);
    let mut tiff = std::io::Cursor::new(Vec::new());
    writer.write(&mut tiff, false).unwrap();

    let mut app1 = b"Exif\0\0".to_vec();
    app1.extend_from_slice(tiff.get_ref());
    let mut out = vec![0xFF, 0xD8, 0xFF, 0xE1];
    out.extend_from_slice(&((app1.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(&app1);
    out.extend_from_slice(&jpeg[2..]);
    out
}

fn approx(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {}, got {}",
        expected,
        actual
    );
}

#[test]
fn car_reference_sets_the_scale() {
    let measurer = measurer_with(
        quiet_config(),
        vec![(ReferenceKind::Car, vec![BoundingBox::new(20, 220, 200, 160)])],
        None,
    );
    let frame = Frame::from_image("street.png", tree_scene());
    let result = measurer.estimate(&frame, &Metadata::default()).unwrap();

    let ppm = (160.0 / 1.5 + 200.0 / 1.8) / 2.0;
    assert_eq!(result.method, ScaleMethod::ReferenceObject(ReferenceKind::Car));
    assert_eq!(result.confidence, 0.9);
    approx(result.pixels_per_meter, ppm);
    assert_eq!(result.bounding_box, BoundingBox::new(250, 50, 60, 300));
    approx(result.height_m, (300.0 / ppm).max(1.0));
    approx(result.width_m, 60.0 / ppm);
    assert_eq!(result.image_digest, frame.digest_hex());
}

#[test]
fn portrait_frame_with_car_and_no_focal_length() {
    let mut image = RgbImage::from_pixel(1000, 1500, SKY);
    for y in 200..1100 {
        for x in 450..700 {
            image.put_pixel(x, y, LEAF);
        }
    }
    let measurer = measurer_with(
        quiet_config(),
        vec![(ReferenceKind::Car, vec![BoundingBox::new(100, 1250, 200, 160)])],
        None,
    );
    let result = measurer
        .estimate(&Frame::from_image("portrait.jpg", image), &Metadata::default())
        .unwrap();
    assert_eq!(result.method.to_string(), "reference-object (car)");
    assert_eq!(result.confidence, 0.9);
    // Mean of 160 px / 1.5 m and 200 px / 1.8 m, about 108.9.
    approx(result.pixels_per_meter, (160.0 / 1.5 + 200.0 / 1.8) / 2.0);
}

#[test]
fn misshapen_reference_is_ignored() {
    let measurer = measurer_with(
        quiet_config(),
        vec![(ReferenceKind::Car, vec![BoundingBox::new(20, 220, 100, 160)])],
        None,
    );
    let frame = Frame::from_image("street.png", tree_scene());
    let result = measurer.estimate(&frame, &Metadata::default()).unwrap();
    assert_eq!(result.method, ScaleMethod::Fallback);
}

#[test]
fn nothing_known_falls_back_to_frame_height() {
    let measurer = measurer_with(quiet_config(), Vec::new(), None);
    let frame = Frame::from_image("park.png", tree_scene());
    let result = measurer.estimate(&frame, &Metadata::default()).unwrap();

    assert_eq!(result.method, ScaleMethod::Fallback);
    assert_eq!(result.confidence, 0.4);
    approx(result.pixels_per_meter, 400.0 / 15.0);
    approx(result.height_m, 11.25);
    approx(result.width_m, 2.25);
}

#[test]
fn rotated_capture_is_corrected() {
    let measurer = measurer_with(quiet_config(), Vec::new(), None);
    let frame = Frame::from_image("park.png", tree_scene());
    let metadata = Metadata {
        orientation: Some(6),
        ..Metadata::default()
    };
    let result = measurer.estimate(&frame, &metadata).unwrap();
    approx(result.height_m, 11.25 * 1.1);
    approx(result.width_m, 2.25 * 0.9);
}

#[test]
fn tiny_reference_results_are_clamped() {
    let measurer = measurer_with(
        quiet_config(),
        vec![(ReferenceKind::Person, vec![BoundingBox::new(5, 5, 1, 3)])],
        None,
    );
    let frame = Frame::from_image("far.png", tree_scene());
    let result = measurer.estimate(&frame, &Metadata::default()).unwrap();
    assert_eq!(result.method, ScaleMethod::ReferenceObject(ReferenceKind::Person));
    assert_eq!(result.height_m, 60.0);
    assert_eq!(result.width_m, 15.0);
}

#[test]
fn depth_model_outranks_weak_references() {
    let measurer = measurer_with(
        quiet_config(),
        vec![(ReferenceKind::Bench, vec![BoundingBox::new(400, 300, 150, 90)])],
        Some(Arc::new(UniformDepth::new(20.0))),
    );
    let frame = Frame::from_image("bench.png", tree_scene());
    let result = measurer.estimate(&frame, &Metadata::default()).unwrap();

    assert_eq!(result.method, ScaleMethod::DepthEstimation);
    assert_eq!(result.confidence, 0.85);
    approx(result.pixels_per_meter, 600.0 * 4.2 / 6.17 / 20.0);
}

#[test]
fn exif_focal_length_enables_camera_geometry() {
    let measurer = measurer_with(quiet_config(), Vec::new(), None);
    let frame = Frame::from_image("phone.png", tree_scene());
    let metadata = Metadata {
        focal_length_mm: Some(4.2),
        ..Metadata::default()
    };
    let result = measurer.estimate(&frame, &metadata).unwrap();
    assert_eq!(result.method, ScaleMethod::CameraGeometry);
    assert_eq!(result.confidence, 0.6);
    // 15 m assumed across the mean of 60 and 300 px.
    approx(result.pixels_per_meter, 180.0 / 15.0);
}

#[test]
fn rotated_phone_photo_is_measured_upright() {
    // Upright 400x600 portrait with a 60x300 canopy, stored a quarter turn
    // counter-clockwise and tagged orientation 6.
    let mut upright = RgbImage::from_pixel(400, 600, SKY);
    for y in 150..450 {
        for x in 170..230 {
            upright.put_pixel(x, y, LEAF);
        }
    }
    let stored = image::imageops::rotate270(&upright);
    assert_eq!(stored.dimensions(), (600, 400));
    let bytes = jpeg_with_orientation(&stored, 6);

    let measurer = measurer_with(quiet_config(), Vec::new(), None);
    let result = measurer.measure_bytes("portrait.jpg", &bytes).unwrap();

    assert!(result.bounding_box.height > result.bounding_box.width);
    assert_eq!(result.method, ScaleMethod::Fallback);
    approx(result.pixels_per_meter, 600.0 / 15.0);
    // 300 px / 40 px/m * 1.1 and 60 px / 40 px/m * 0.9, give or take JPEG edges.
    assert!((result.height_m - 8.25).abs() < 0.1, "{}", result.height_m);
    assert!((result.width_m - 1.35).abs() < 0.1, "{}", result.width_m);
}

#[test]
fn invalid_config_is_rejected_at_construction() {
    let mut config = quiet_config();
    config.bounds.min_height_m = 70.0;
    let registry = ReferenceDetector::empty(config.detector.clone());
    let err = TreeMeasurer::with_components(config.clone(), registry, None)
        .err()
        .unwrap();
    assert!(err.to_string().contains("height bounds"), "{}", err);
    assert!(TreeMeasurer::new(config).is_err());
}

#[test]
fn estimates_are_deterministic() {
    let measurer = measurer_with(
        quiet_config(),
        vec![(ReferenceKind::Car, vec![BoundingBox::new(20, 220, 200, 160)])],
        None,
    );
    let frame = Frame::from_image("street.png", tree_scene());
    let first = measurer.estimate(&frame, &Metadata::default()).unwrap();
    let second = measurer.estimate(&frame, &Metadata::default()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn featureless_frame_fails_segmentation() {
    let measurer = measurer_with(quiet_config(), Vec::new(), None);
    let frame = Frame::from_image("fog.png", RgbImage::from_pixel(120, 90, Rgb([128, 128, 128])));
    let err = measurer.estimate(&frame, &Metadata::default()).unwrap_err();
    assert_eq!(
        err,
        EstimateFailure::Segmentation {
            identity: "fog.png".to_string()
        }
    );
    assert_eq!(err.code(), "SEGMENTATION_FAILURE");
}

#[test]
fn unreadable_input_is_a_load_failure() {
    let measurer = measurer_with(quiet_config(), Vec::new(), None);
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.jpg");
    let err = measurer.measure_path(&missing).unwrap_err();
    assert_eq!(err.code(), "LOAD_FAILURE");

    let err = measurer.measure_bytes("https://example.org/x.jpg", b"not an image").unwrap_err();
    assert_eq!(err.identity(), "https://example.org/x.jpg");
}

#[test]
fn remote_bytes_render_into_output_dir() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = MeasureConfig::default();
    config.render.output_dir = Some(dir.path().to_path_buf());
    config.render.font_paths = Vec::new();
    let measurer = measurer_with(config, Vec::new(), None);

    let identity = "https://trees.example.org/photos/oak.png?size=full";
    let result = measurer
        .measure_bytes(identity, &png_bytes(&tree_scene()))
        .unwrap();
    assert_eq!(result.identity, identity);
    assert!(dir.path().join("oak_analyzed.png").is_file());
}

#[test]
fn batch_preserves_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("a.png");
    let blank = dir.path().join("b.png");
    let also_good = dir.path().join("c.png");
    tree_scene().save(&good).unwrap();
    RgbImage::from_pixel(50, 50, Rgb([128, 128, 128]))
        .save(&blank)
        .unwrap();
    tree_scene().save(&also_good).unwrap();

    let measurer = measurer_with(quiet_config(), Vec::new(), None);
    let paths: Vec<PathBuf> = vec![good.clone(), blank.clone(), also_good.clone()];
    let results = measurer.measure_batch(&paths);

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].0, good);
    assert_eq!(results[1].0, blank);
    assert_eq!(results[2].0, also_good);
    assert!(results[0].1.is_ok());
    assert!(matches!(
        results[1].1,
        Err(EstimateFailure::Segmentation { .. })
    ));
    let (a, c) = (
        results[0].1.as_ref().unwrap(),
        results[2].1.as_ref().unwrap(),
    );
    assert_eq!(a.height_m, c.height_m);
    assert_eq!(a.image_digest, c.image_digest);
    // Rendering was off, so nothing new appeared.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
}

#[test]
fn result_serializes_for_collaborators() {
    let measurer = measurer_with(quiet_config(), Vec::new(), None);
    let frame = Frame::from_image("park.png", tree_scene());
    let result = measurer.estimate(&frame, &Metadata::default()).unwrap();
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["method"], "fallback");
    assert_eq!(json["segmentation"], "hue-band");
    assert_eq!(json["bounding_box"]["height"], 300);
    assert!(json.get("gps").is_none());
}
