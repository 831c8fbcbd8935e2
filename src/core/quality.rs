use crate::config::Config;
use crate::error::ScoreError;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use rayon::prelude::*;
use std::cell::OnceCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Laplacian variance at which the blur penalty drops to one half.
const SHARPNESS_REF: f64 = 100.0;
/// Normalized luminance standard deviation treated as full contrast.
const CONTRAST_REF: f64 = 0.25;

const BLUR_WEIGHT: f64 = 0.60;
const EXPOSURE_WEIGHT: f64 = 0.25;
const CONTRAST_WEIGHT: f64 = 0.15;

/// A perceptual-quality metric. Lower scores mean better images.
pub trait QualityScorer {
    fn name(&self) -> &str;
    fn score(&self, image: &DynamicImage) -> Result<f64, ScoreError>;
}

/// Scores image files; what the quality gate and the selector depend on.
pub trait QualityAssessor {
    fn assess(&self, path: &Path) -> Result<f64, ScoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputePath {
    Accelerated,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LumaStats {
    /// Mean luminance in `[0, 1]`.
    pub mean: f64,
    /// Luminance standard deviation in `[0, 1]`.
    pub std_dev: f64,
    /// Variance of the 4-neighbour Laplacian, in 8-bit units.
    pub laplacian_variance: f64,
}

/// No-reference quality metric in `[0, 100]` combining blur, exposure and
/// contrast penalties.
pub struct NaturalnessScorer {
    path: ComputePath,
    budget_bytes: usize,
}

impl NaturalnessScorer {
    /// Parallel scorer that may hold at most `budget_bytes` of working memory.
    pub fn accelerated(budget_bytes: usize) -> Self {
        Self {
            path: ComputePath::Accelerated,
            budget_bytes,
        }
    }

    pub fn fallback() -> Self {
        Self {
            path: ComputePath::Fallback,
            budget_bytes: 0,
        }
    }

    pub fn stats(&self, image: &DynamicImage) -> Result<LumaStats, ScoreError> {
        let gray = image.to_luma8();
        if gray.width() == 0 || gray.height() == 0 {
            return Err(ScoreError::Failed {
                message: "image has no pixels".to_string(),
            });
        }
        match self.path {
            ComputePath::Accelerated => stats_accelerated(&gray, self.budget_bytes),
            ComputePath::Fallback => Ok(stats_sequential(&gray)),
        }
    }
}

impl QualityScorer for NaturalnessScorer {
    fn name(&self) -> &str {
        match self.path {
            ComputePath::Accelerated => "naturalness (accelerated)",
            ComputePath::Fallback => "naturalness (fallback)",
        }
    }

    fn score(&self, image: &DynamicImage) -> Result<f64, ScoreError> {
        self.stats(image).map(|stats| naturalness_score(&stats))
    }
}

pub fn naturalness_score(stats: &LumaStats) -> f64 {
    let blur = 1.0 / (1.0 + stats.laplacian_variance / SHARPNESS_REF);
    let exposure = ((stats.mean - 0.5).abs() * 2.0).min(1.0);
    let contrast = (1.0 - stats.std_dev / CONTRAST_REF).clamp(0.0, 1.0);
    100.0 * (BLUR_WEIGHT * blur + EXPOSURE_WEIGHT * exposure + CONTRAST_WEIGHT * contrast)
}

fn stats_sequential(gray: &GrayImage) -> LumaStats {
    let (width, height) = gray.dimensions();
    let (mut sum, mut sum_sq) = (0.0f64, 0.0f64);
    for pixel in gray.pixels() {
        let v = pixel[0] as f64;
        sum += v;
        sum_sq += v * v;
    }

    let (mut lap_sum, mut lap_sq) = (0.0f64, 0.0f64);
    if width >= 3 && height >= 3 {
        for y in 1..height - 1 {
            for x in 1..width - 1 {
                let center = gray.get_pixel(x, y)[0] as i32;
                let top = gray.get_pixel(x, y - 1)[0] as i32;
                let bottom = gray.get_pixel(x, y + 1)[0] as i32;
                let left = gray.get_pixel(x - 1, y)[0] as i32;
                let right = gray.get_pixel(x + 1, y)[0] as i32;

                let laplacian = (top + bottom + left + right - 4 * center) as f64;
                lap_sum += laplacian;
                lap_sq += laplacian * laplacian;
            }
        }
    }

    finish_stats(width, height, sum, sum_sq, lap_sum, lap_sq)
}

fn stats_accelerated(gray: &GrayImage, budget_bytes: usize) -> Result<LumaStats, ScoreError> {
    let (width, height) = gray.dimensions();
    let (w, h) = (width as usize, height as usize);
    let len = w * h;
    let needed = len * std::mem::size_of::<f32>();
    if needed > budget_bytes {
        return Err(ScoreError::ResourceExhausted {
            reason: format!("{} bytes needed, budget is {}", needed, budget_bytes),
        });
    }

    let mut plane: Vec<f32> = Vec::new();
    plane
        .try_reserve_exact(len)
        .map_err(|err| ScoreError::ResourceExhausted {
            reason: err.to_string(),
        })?;
    plane.extend(gray.as_raw().iter().map(|&v| v as f32));

    let (sum, sum_sq) = plane
        .par_chunks(w)
        .map(|row| {
            row.iter().fold((0.0f64, 0.0f64), |(s, q), &v| {
                let v = v as f64;
                (s + v, q + v * v)
            })
        })
        .reduce(|| (0.0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1));

    let (lap_sum, lap_sq) = if w >= 3 && h >= 3 {
        (1..h - 1)
            .into_par_iter()
            .map(|y| {
                let above = &plane[(y - 1) * w..y * w];
                let row = &plane[y * w..(y + 1) * w];
                let below = &plane[(y + 1) * w..(y + 2) * w];
                (1..w - 1).fold((0.0f64, 0.0f64), |(s, q), x| {
                    let laplacian =
                        (above[x] + below[x] + row[x - 1] + row[x + 1] - 4.0 * row[x]) as f64;
                    (s + laplacian, q + laplacian * laplacian)
                })
            })
            .reduce(|| (0.0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1))
    } else {
        (0.0, 0.0)
    };

    Ok(finish_stats(width, height, sum, sum_sq, lap_sum, lap_sq))
}

fn finish_stats(
    width: u32,
    height: u32,
    sum: f64,
    sum_sq: f64,
    lap_sum: f64,
    lap_sq: f64,
) -> LumaStats {
    let n = width as f64 * height as f64;
    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);

    let laplacian_variance = if width >= 3 && height >= 3 {
        let count = (width - 2) as f64 * (height - 2) as f64;
        let lap_mean = lap_sum / count;
        (lap_sq / count - lap_mean * lap_mean).max(0.0)
    } else {
        0.0
    };

    LumaStats {
        mean: mean / 255.0,
        std_dev: variance.sqrt() / 255.0,
        laplacian_variance,
    }
}

/// Loads, shrinks and scores image files, switching to a fallback scorer
/// when the primary one runs out of resources.
pub struct QualityModel {
    primary: Box<dyn QualityScorer>,
    make_fallback: Box<dyn Fn() -> Box<dyn QualityScorer>>,
    fallback: OnceCell<Box<dyn QualityScorer>>,
    thumbnail_size: u32,
}

impl QualityModel {
    pub fn new<F>(primary: Box<dyn QualityScorer>, make_fallback: F, thumbnail_size: u32) -> Self
    where
        F: Fn() -> Box<dyn QualityScorer> + 'static,
    {
        Self {
            primary,
            make_fallback: Box::new(make_fallback),
            fallback: OnceCell::new(),
            thumbnail_size,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Box::new(NaturalnessScorer::accelerated(config.accelerated_budget_bytes)),
            || Box::new(NaturalnessScorer::fallback()),
            config.thumbnail_size,
        )
    }

    /// Whether the fallback scorer has been constructed.
    pub fn fallback_loaded(&self) -> bool {
        self.fallback.get().is_some()
    }

    pub fn score_image(&self, image: &DynamicImage, path: &Path) -> Result<f64, ScoreError> {
        match self.primary.score(image) {
            Err(ScoreError::ResourceExhausted { reason }) => {
                log::warn!(
                    "{} ran out of resources on {} ({}), retrying on the fallback path",
                    self.primary.name(),
                    path.display(),
                    reason
                );
                let fallback = self.fallback.get_or_init(|| {
                    log::info!("Initializing fallback quality scorer");
                    (self.make_fallback)()
                });
                fallback.score(image)
            }
            other => other,
        }
    }
}

impl QualityAssessor for QualityModel {
    fn assess(&self, path: &Path) -> Result<f64, ScoreError> {
        let image = image::open(path).map_err(|source| ScoreError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        let image = shrink_to_fit(image, self.thumbnail_size);
        let score = self.score_image(&image, path)?;
        log::info!("{} → quality score: {:.2}", path.display(), score);
        Ok(score)
    }
}

/// Convert to RGB and shrink so that neither side exceeds `max_side`.
/// Smaller images are left at their original size.
pub fn shrink_to_fit(image: DynamicImage, max_side: u32) -> DynamicImage {
    let image = DynamicImage::ImageRgb8(image.to_rgb8());
    if image.width() <= max_side && image.height() <= max_side {
        image
    } else {
        image.resize(max_side, max_side, FilterType::Lanczos3)
    }
}

/// Per-run memo of quality scores keyed by path.
#[derive(Debug, Default)]
pub struct ScoreCache {
    scores: HashMap<PathBuf, f64>,
}

impl ScoreCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score `path`, or return the memoized score. Files that cannot be
    /// scored are remembered as `f64::INFINITY`.
    pub fn score(&mut self, path: &Path, assessor: &dyn QualityAssessor) -> f64 {
        if let Some(&score) = self.scores.get(path) {
            log::debug!("Cached quality score for {}: {:.2}", path.display(), score);
            return score;
        }

        let score = match assessor.assess(path) {
            Ok(score) if score.is_nan() => {
                log::warn!("Quality score for {} is NaN", path.display());
                f64::INFINITY
            }
            Ok(score) => score,
            Err(err) => {
                log::warn!("Failed to evaluate quality of {}: {}", path.display(), err);
                f64::INFINITY
            }
        };
        self.scores.insert(path.to_path_buf(), score);
        score
    }

    pub fn get(&self, path: &Path) -> Option<f64> {
        self.scores.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Accepts images whose quality score does not exceed the threshold.
#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    threshold: f64,
}

impl QualityGate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn accepts(
        &self,
        path: &Path,
        assessor: &dyn QualityAssessor,
        cache: &mut ScoreCache,
    ) -> bool {
        let score = cache.score(path, assessor);
        score.is_finite() && score <= self.threshold
    }
}
