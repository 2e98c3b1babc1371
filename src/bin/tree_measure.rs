//! tree_measure - measure tree height and width in a batch of photographs
//!
//! Prints one JSON object per image to stdout. Per-image failures are
//! reported inline; only configuration errors end the run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;

use tree_measure::frame::{is_audit_output, is_supported_extension};
use tree_measure::{MeasureConfig, TreeMeasurer};

const ENV_HELP: &str = "\
Environment:
  TREE_MEASURE_CONFIG          TOML config file
  TREE_MEASURE_DETECTOR_PATHS  comma-separated reference asset directories
  TREE_MEASURE_DEPTH_MODEL     metric depth ONNX model (backend-tract builds)
  TREE_MEASURE_OUTPUT_DIR      audit image directory
  TREE_MEASURE_FONT            TrueType font for audit captions
  TREE_MEASURE_RENDER          true/false
  TREE_MEASURE_MAX_HEIGHT_M    height clamp
  TREE_MEASURE_MAX_WIDTH_M     width clamp

Without a readable font, audit images carry the bounding box but no caption.";

#[derive(Parser, Debug)]
#[command(author, version, about, after_help = ENV_HELP)]
struct Args {
    /// Image files or directories of images.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// TOML config file (overrides TREE_MEASURE_CONFIG).
    #[arg(long, env = "TREE_MEASURE_CONFIG")]
    config: Option<PathBuf>,
    /// Skip writing annotated audit images.
    #[arg(long)]
    no_render: bool,
    /// Write audit images here instead of beside each source.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// TrueType font for audit captions, tried before the configured ones.
    #[arg(long)]
    font: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = MeasureConfig::load_from(args.config.as_deref())?;
    if args.no_render {
        config.render.enabled = false;
    }
    if let Some(dir) = args.output_dir {
        config.render.output_dir = Some(dir);
    }
    if let Some(font) = args.font {
        config.render.font_paths.insert(0, font);
    }

    let paths = collect_images(&args.inputs)?;
    if paths.is_empty() {
        log::warn!("no images to measure");
        return Ok(());
    }
    log::info!("measuring {} image(s)", paths.len());

    let measurer = TreeMeasurer::new(config)?;
    let mut failures = 0usize;
    for (path, outcome) in measurer.measure_batch(&paths) {
        let line = match outcome {
            Ok(result) => json!({
                "identity": path.display().to_string(),
                "result": result,
            }),
            Err(err) => {
                failures += 1;
                log::warn!("{}", err);
                json!({
                    "identity": err.identity(),
                    "error": { "code": err.code(), "message": err.to_string() },
                })
            }
        };
        println!("{}", line);
    }
    log::info!(
        "done: {} measured, {} failed",
        paths.len() - failures,
        failures
    );
    Ok(())
}

/// Expand directories (one level, sorted) and drop files we wrote ourselves.
fn collect_images(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("failed to list {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file() && has_image_extension(path))
                .collect();
            entries.sort();
            paths.extend(entries);
        } else {
            // Unreadable files surface as per-image load failures.
            paths.push(input.clone());
        }
    }
    paths.retain(|path| {
        let skip = is_audit_output(path);
        if skip {
            log::debug!("skipping audit output {}", path.display());
        }
        !skip
    });
    Ok(paths)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(is_supported_extension)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn arguments_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn help_names_the_font_variable() {
        let help = Args::command().render_help().to_string();
        assert!(help.contains("TREE_MEASURE_FONT"));
        assert!(help.contains("--font"));
    }

    #[test]
    fn font_flag_is_parsed() {
        let args = Args::try_parse_from(["tree_measure", "--font", "/fonts/a.ttf", "oak.jpg"]).unwrap();
        assert_eq!(args.font, Some(PathBuf::from("/fonts/a.ttf")));
        assert_eq!(args.inputs, vec![PathBuf::from("oak.jpg")]);
    }

    #[test]
    fn directories_expand_to_supported_images() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.bmp", "a.jpg", "a_analyzed.jpg", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let paths = collect_images(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(
            paths,
            vec![dir.path().join("a.jpg"), dir.path().join("b.bmp")]
        );
    }
}
