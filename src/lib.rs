pub mod config;
pub mod core;
pub mod error;
pub mod history;
pub mod pipeline;
pub mod progress;
pub mod scanner;

pub use config::Config;
pub use error::{ConfigError, EmbedError, PipelineError, ScoreError};
pub use pipeline::{Pipeline, RunSummary};
