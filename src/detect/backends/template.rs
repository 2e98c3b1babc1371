use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::template_matching::{match_template_parallel, MatchTemplateMethod};

use crate::config::DetectorSettings;
use crate::detect::backend::{DetectionView, PatternDetector};
use crate::detect::result::Detection;
use crate::segment::BoundingBox;

/// Raw hits overlapping a group's anchor by at least this much join the group.
const GROUP_IOU: f64 = 0.5;
const MAX_SCALES: usize = 48;
const MIN_PATTERN_SIDE: u32 = 4;

/// Multi-scale pattern matcher over a grayscale template.
///
/// Each scale is scored with zero-mean normalized cross-correlation so
/// matches are invariant to brightness and contrast. Raw hits are grouped by
/// overlap and a group only counts as a detection when enough hits vote for it.
pub struct TemplateDetector {
    template: GrayImage,
}

impl TemplateDetector {
    pub fn new(template: GrayImage) -> Result<Self> {
        let (w, h) = template.dimensions();
        if w < MIN_PATTERN_SIDE || h < MIN_PATTERN_SIDE {
            return Err(anyhow!("pattern template {}x{} is too small", w, h));
        }
        Ok(Self { template })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let template = image::open(path)
            .with_context(|| format!("failed to read pattern template {}", path.display()))?
            .to_luma8();
        Self::new(template)
    }

    pub fn template(&self) -> &GrayImage {
        &self.template
    }
}

impl PatternDetector for TemplateDetector {
    fn name(&self) -> &'static str {
        "template"
    }

    fn detect(
        &self,
        view: &DetectionView<'_>,
        settings: &DetectorSettings,
    ) -> Result<Vec<Detection>> {
        let (frame_w, frame_h) = view.gray.dimensions();
        let longest = frame_w.max(frame_h);
        let ratio = if settings.working_max_side > 0 && longest > settings.working_max_side {
            settings.working_max_side as f64 / longest as f64
        } else {
            1.0
        };
        let work = if ratio < 1.0 {
            let w = ((frame_w as f64 * ratio).round() as u32).max(1);
            let h = ((frame_h as f64 * ratio).round() as u32).max(1);
            imageops::resize(view.gray, w, h, FilterType::Triangle)
        } else {
            view.gray.clone()
        };
        let table = SummedArea::new(&work);

        let (tw, th) = self.template.dimensions();
        let min_w = (settings.min_width as f64 * ratio).max(MIN_PATTERN_SIDE as f64);
        let min_h = (settings.min_height as f64 * ratio).max(MIN_PATTERN_SIDE as f64);
        let mut scale = (min_w / tw as f64).max(min_h / th as f64);

        let mut hits = Vec::new();
        for _ in 0..MAX_SCALES {
            let w = (tw as f64 * scale).round() as u32;
            let h = (th as f64 * scale).round() as u32;
            if w > work.width() || h > work.height() {
                break;
            }
            let pattern = imageops::resize(&self.template, w, h, FilterType::Triangle);
            hits.extend(scan(&work, &table, &pattern, settings.match_threshold));
            scale *= settings.scale_factor;
        }

        let detections = group_hits(hits, settings.min_neighbors)
            .into_iter()
            .map(|d| Detection::new(upscale(&d.bbox, ratio), d.score))
            .filter(|d| d.bbox.width >= settings.min_width && d.bbox.height >= settings.min_height)
            .collect();
        Ok(detections)
    }
}

fn upscale(bbox: &BoundingBox, ratio: f64) -> BoundingBox {
    if ratio >= 1.0 {
        return *bbox;
    }
    BoundingBox::new(
        (bbox.x as f64 / ratio).round() as i32,
        (bbox.y as f64 / ratio).round() as i32,
        (bbox.width as f64 / ratio).round() as u32,
        (bbox.height as f64 / ratio).round() as u32,
    )
}

/// All windows scoring at least `threshold`.
fn scan(work: &GrayImage, table: &SummedArea, pattern: &GrayImage, threshold: f32) -> Vec<Detection> {
    let (pw, ph) = pattern.dimensions();
    let n = (pw * ph) as f64;
    let (t_sum, t_sq) = pattern.pixels().fold((0.0, 0.0), |(s, sq), p| {
        let v = p[0] as f64;
        (s + v, sq + v * v)
    });
    let t_mean = t_sum / n;
    let t_var = t_sq - t_sum * t_mean;
    if t_var <= f64::EPSILON {
        return Vec::new();
    }

    // Sum(I * T); the mean terms are removed with the summed-area tables.
    let cross = match_template_parallel(work, pattern, MatchTemplateMethod::CrossCorrelation);
    let mut hits = Vec::new();
    for (x, y, value) in cross.enumerate_pixels() {
        let (i_sum, i_sq) = table.window(x, y, pw, ph);
        let i_var = i_sq - i_sum * i_sum / n;
        if i_var <= f64::EPSILON {
            continue;
        }
        let ncc = (value[0] as f64 - t_mean * i_sum) / (i_var * t_var).sqrt();
        if ncc >= threshold as f64 {
            hits.push(Detection::new(
                BoundingBox::new(x as i32, y as i32, pw, ph),
                ncc as f32,
            ));
        }
    }
    hits
}

struct Group {
    anchor: BoundingBox,
    members: u32,
    sum: [f64; 4],
    best: f32,
}

impl Group {
    fn new(hit: Detection) -> Self {
        let mut group = Self {
            anchor: hit.bbox,
            members: 0,
            sum: [0.0; 4],
            best: hit.score,
        };
        group.add(&hit);
        group
    }

    fn add(&mut self, hit: &Detection) {
        self.members += 1;
        self.sum[0] += hit.bbox.x as f64;
        self.sum[1] += hit.bbox.y as f64;
        self.sum[2] += hit.bbox.width as f64;
        self.sum[3] += hit.bbox.height as f64;
        self.best = self.best.max(hit.score);
    }

    fn merged(&self) -> Detection {
        let n = self.members as f64;
        Detection::new(
            BoundingBox::new(
                (self.sum[0] / n).round() as i32,
                (self.sum[1] / n).round() as i32,
                (self.sum[2] / n).round() as u32,
                (self.sum[3] / n).round() as u32,
            ),
            self.best,
        )
    }
}

/// Neighbour voting: cluster hits around the strongest ones and keep
/// clusters with at least `min_neighbors` members, averaged.
fn group_hits(mut hits: Vec<Detection>, min_neighbors: u32) -> Vec<Detection> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut groups: Vec<Group> = Vec::new();
    for hit in hits {
        match groups
            .iter_mut()
            .find(|g| g.anchor.intersection_over_union(&hit.bbox) >= GROUP_IOU)
        {
            Some(group) => group.add(&hit),
            None => groups.push(Group::new(hit)),
        }
    }
    groups
        .iter()
        .filter(|g| g.members >= min_neighbors.max(1))
        .map(Group::merged)
        .collect()
}

/// Summed-area tables of pixel values and squared values.
struct SummedArea {
    stride: usize,
    sum: Vec<u64>,
    sq: Vec<u64>,
}

impl SummedArea {
    fn new(image: &GrayImage) -> Self {
        let (w, h) = image.dimensions();
        let stride = w as usize + 1;
        let mut sum = vec![0u64; stride * (h as usize + 1)];
        let mut sq = vec![0u64; stride * (h as usize + 1)];
        for y in 0..h as usize {
            let mut row_sum = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w as usize {
                let v = image.get_pixel(x as u32, y as u32)[0] as u64;
                row_sum += v;
                row_sq += v * v;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row_sum;
                sq[idx] = sq[idx - stride] + row_sq;
            }
        }
        Self { stride, sum, sq }
    }

    fn window(&self, x: u32, y: u32, w: u32, h: u32) -> (f64, f64) {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let at = |table: &[u64], x: usize, y: usize| table[y * self.stride + x];
        let rect = |table: &[u64]| {
            (at(table, x1, y1) + at(table, x0, y0)) - (at(table, x0, y1) + at(table, x1, y0))
        };
        (rect(&self.sum) as f64, rect(&self.sq) as f64)
    }
}
