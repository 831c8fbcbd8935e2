use crate::error::ConfigError;
use crate::progress::ProgressMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.406;
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 70.30;
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 512;
pub const DEFAULT_ACCELERATED_BUDGET: usize = 256 * 1024 * 1024;

/// Settings for one deduplication run.
///
/// Every field has a default, so a settings file only needs the keys it
/// wants to change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
    /// Members must be strictly more similar than this to their group anchor.
    pub similarity_threshold: f32,
    /// Upper bound on the quality score; lower scores are better.
    pub quality_threshold: f64,
    /// Longest side images are shrunk to before scoring.
    pub thumbnail_size: u32,
    /// Memory the accelerated scoring path may use for one image.
    pub accelerated_budget_bytes: usize,
    pub dry_run: bool,
    pub progress: ProgressMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("images"),
            dest_dir: PathBuf::from("filtered"),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
            accelerated_budget_bytes: DEFAULT_ACCELERATED_BUDGET,
            dry_run: false,
            progress: ProgressMode::default(),
        }
    }
}

impl Config {
    /// Load settings from `explicit`, or from the per-user settings file when
    /// it exists, or fall back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match default_settings_path() {
                Some(path) if path.is_file() => {
                    log::debug!("Using settings from {}", path.display());
                    Self::from_file(&path)
                }
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Similarity(self.similarity_threshold));
        }
        if !self.quality_threshold.is_finite() || self.quality_threshold < 0.0 {
            return Err(ConfigError::Quality(self.quality_threshold));
        }
        if self.thumbnail_size < 3 {
            return Err(ConfigError::Thumbnail(self.thumbnail_size));
        }
        Ok(())
    }
}

/// `<config_dir>/keepbest/config.json`, if the platform has a config dir.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("keepbest").join("config.json"))
}
