pub mod embedding;
pub mod grouping;
pub mod quality;
pub mod selection;

pub use embedding::{DualEmbedder, EmbeddedImage, Embedder, Embedding};
pub use grouping::{Group, group_by_anchor};
pub use quality::{QualityAssessor, QualityGate, QualityModel, ScoreCache};
pub use selection::{CopyOutcome, Selection, copy_selected, select_best};
