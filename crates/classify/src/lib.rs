//! Heuristic image classification: line art vs colored reference.
//!
//! A comic scan folder mixes pages to colorize with colored style
//! references. Three cheap signals separate them: mean color saturation,
//! unique color count, and edge density. Line art is mostly desaturated,
//! uses few colors, and is dense with edges.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use image::DynamicImage;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Mean saturation below this suggests line art.
pub const DEFAULT_SATURATION_THRESHOLD: f64 = 0.15;
/// Fewer unique colors than this suggests line art.
pub const DEFAULT_COLOR_COUNT_THRESHOLD: usize = 1000;
/// Edge density above this suggests line art.
pub const DEFAULT_EDGE_RATIO_THRESHOLD: f64 = 0.3;

/// Unique colors are counted on a thumbnail no larger than this.
const COLOR_COUNT_MAX_SIZE: u32 = 256;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    /// A page to colorize.
    LineArt,
    /// A colored image usable as a style reference.
    Colored,
}

/// Raw signal values behind a classification, kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub saturation: f64,
    pub color_count: usize,
    pub edge_density: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub kind: ImageKind,
    /// Confidence in `0.0..=1.0`, derived from how many signals agreed.
    pub confidence: f64,
    pub metrics: ClassificationMetrics,
}

/// Scanned files split by classification, ready to become jobs and
/// reference images.
#[derive(Debug, Default, Clone)]
pub struct Partition {
    pub line_art: Vec<PathBuf>,
    pub colored: Vec<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("failed to open image {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Classifies images with a per-instance result cache keyed by canonical
/// path, so repeated lookups within one batch session decode each file
/// once.
pub struct Classifier {
    saturation_threshold: f64,
    color_count_threshold: usize,
    edge_ratio_threshold: f64,
    cache: HashMap<PathBuf, Classification>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    pub fn new() -> Self {
        Self::with_thresholds(
            DEFAULT_SATURATION_THRESHOLD,
            DEFAULT_COLOR_COUNT_THRESHOLD,
            DEFAULT_EDGE_RATIO_THRESHOLD,
        )
    }

    pub fn with_thresholds(
        saturation_threshold: f64,
        color_count_threshold: usize,
        edge_ratio_threshold: f64,
    ) -> Self {
        tracing::info!(
            saturation_threshold,
            color_count_threshold,
            edge_ratio_threshold,
            "image classifier ready",
        );
        Self {
            saturation_threshold,
            color_count_threshold,
            edge_ratio_threshold,
            cache: HashMap::new(),
        }
    }

    /// Classify one image file, decoding it at most once per session.
    pub fn classify(&mut self, path: &Path) -> Result<Classification, ClassifyError> {
        let cache_key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if let Some(cached) = self.cache.get(&cache_key) {
            tracing::debug!(path = %path.display(), "using cached classification");
            return Ok(cached.clone());
        }

        let image = image::open(path).map_err(|source| ClassifyError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let result = self.classify_image(&image);
        tracing::info!(
            path = %path.display(),
            kind = ?result.kind,
            confidence = result.confidence,
            "image classified",
        );
        self.cache.insert(cache_key, result.clone());
        Ok(result)
    }

    /// Classify an already-decoded image.
    ///
    /// Scoring: each of low saturation, low unique-color count, and high
    /// edge density counts one point toward line art. Very low saturation
    /// is decisive on its own; otherwise two of three points are required.
    pub fn classify_image(&self, image: &DynamicImage) -> Classification {
        let saturation = mean_saturation(image);
        let color_count = unique_colors(image);
        let edge = edge_density(image);
        let metrics = ClassificationMetrics {
            saturation,
            color_count,
            edge_density: edge,
        };

        let has_low_saturation = saturation < self.saturation_threshold;
        let has_low_colors = color_count < self.color_count_threshold;
        let has_high_edges = edge > self.edge_ratio_threshold;
        let score = u32::from(has_low_saturation)
            + u32::from(has_low_colors)
            + u32::from(has_high_edges);
        tracing::debug!(
            saturation,
            color_count,
            edge_density = edge,
            score,
            "classification signals",
        );

        if (has_low_saturation && score >= 1) || score >= 2 {
            Classification {
                kind: ImageKind::LineArt,
                confidence: f64::from(score) / 3.0,
                metrics,
            }
        } else {
            let mut confidence = 1.0 - f64::from(score) / 3.0;
            if has_low_saturation {
                // Desaturated but otherwise colored-looking; hedge.
                confidence *= 0.7;
            }
            Classification {
                kind: ImageKind::Colored,
                confidence,
                metrics,
            }
        }
    }

    /// Classify many files. Unreadable files are skipped with a warning.
    pub fn classify_batch(&mut self, paths: &[PathBuf]) -> HashMap<PathBuf, Classification> {
        tracing::info!(count = paths.len(), "starting batch classification");
        let mut results = HashMap::new();
        for path in paths {
            match self.classify(path) {
                Ok(result) => {
                    results.insert(path.clone(), result);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable image");
                }
            }
        }
        let line_art = results
            .values()
            .filter(|r| r.kind == ImageKind::LineArt)
            .count();
        tracing::info!(
            line_art,
            colored = results.len() - line_art,
            "batch classification complete",
        );
        results
    }

    /// Classify many files and split them into pages and references.
    pub fn partition(&mut self, paths: &[PathBuf]) -> Partition {
        let results = self.classify_batch(paths);
        let mut partition = Partition::default();
        // Preserve the caller's ordering.
        for path in paths {
            match results.get(path) {
                Some(r) if r.kind == ImageKind::LineArt => partition.line_art.push(path.clone()),
                Some(_) => partition.colored.push(path.clone()),
                None => {}
            }
        }
        partition
    }

    pub fn clear_cache(&mut self) {
        tracing::debug!(entries = self.cache.len(), "clearing classification cache");
        self.cache.clear();
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Mean HSV saturation over all pixels, in `0.0..=1.0`. Grayscale images
/// read as zero without conversion.
pub fn mean_saturation(image: &DynamicImage) -> f64 {
    if !image.color().has_color() {
        return 0.0;
    }
    let rgb = image.to_rgb8();
    let (w, h) = rgb.dimensions();
    if w == 0 || h == 0 {
        return 0.0;
    }

    let mut total = 0.0f64;
    for pixel in rgb.pixels() {
        let [r, g, b] = pixel.0;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        if max > 0 {
            total += f64::from(max - min) / f64::from(max);
        }
    }
    total / (u64::from(w) * u64::from(h)) as f64
}

/// Number of distinct RGB colors, counted on a thumbnail of at most
/// 256x256 to bound the cost on large pages.
pub fn unique_colors(image: &DynamicImage) -> usize {
    let rgb = if image.width() > COLOR_COUNT_MAX_SIZE || image.height() > COLOR_COUNT_MAX_SIZE {
        image
            .thumbnail(COLOR_COUNT_MAX_SIZE, COLOR_COUNT_MAX_SIZE)
            .to_rgb8()
    } else {
        image.to_rgb8()
    };

    let mut colors: HashSet<[u8; 3]> = HashSet::new();
    for pixel in rgb.pixels() {
        colors.insert(pixel.0);
    }
    colors.len()
}

/// Fraction of pixels on a strong edge, in `0.0..=1.0`.
///
/// Sobel gradient magnitude against a threshold adapted to the image's
/// median luminance, so bright pages and dark pages are judged on the
/// same footing.
pub fn edge_density(image: &DynamicImage) -> f64 {
    let gray = image.to_luma8();
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let median = median_luminance(&gray);
    let high = (1.3 * f64::from(median)).min(255.0);

    let luma = |x: u32, y: u32| i32::from(gray.get_pixel(x, y)[0]);
    let mut edge_pixels = 0u64;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = (luma(x + 1, y - 1) + 2 * luma(x + 1, y) + luma(x + 1, y + 1))
                - (luma(x - 1, y - 1) + 2 * luma(x - 1, y) + luma(x - 1, y + 1));
            let gy = (luma(x - 1, y + 1) + 2 * luma(x, y + 1) + luma(x + 1, y + 1))
                - (luma(x - 1, y - 1) + 2 * luma(x, y - 1) + luma(x + 1, y - 1));
            if f64::from(gx.abs() + gy.abs()) > high {
                edge_pixels += 1;
            }
        }
    }
    edge_pixels as f64 / (u64::from(w) * u64::from(h)) as f64
}

fn median_luminance(gray: &image::GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel[0] as usize] += 1;
    }
    let total: u64 = histogram.iter().sum();
    let mut seen = 0u64;
    for (value, count) in histogram.iter().enumerate() {
        seen += count;
        if seen * 2 >= total {
            return value as u8;
        }
    }
    255
}
