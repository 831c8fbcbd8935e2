use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("Failed to load {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The preferred compute path could not get the memory it needs.
    #[error("Resource exhausted: {reason}")]
    ResourceExhausted { reason: String },

    #[error("Scoring failed: {message}")]
    Failed { message: String },
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Failed to load {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("{model} extraction failed: {message}")]
    Extractor { model: String, message: String },

    #[error("Embedding has zero or non-finite norm")]
    Degenerate,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Similarity threshold must be within [-1, 1], got {0}")]
    Similarity(f32),

    #[error("Quality threshold must be a non-negative number, got {0}")]
    Quality(f64),

    #[error("Thumbnail size must be at least 3 pixels, got {0}")]
    Thumbnail(u32),

    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Source directory not found: {path}")]
    SourceMissing { path: PathBuf },

    #[error("Failed to copy {from} → {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write history {path}: {source}")]
    History {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
