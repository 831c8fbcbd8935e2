use crate::core::selection::CopyOutcome;
use crate::error::PipelineError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub const HISTORY_FILE: &str = ".keepbest-history.jsonl";

/// One kept group of a run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub timestamp: String,
    pub retained: String,
    /// `None` when the retained image could not be scored.
    pub retained_score: Option<f64>,
    pub duplicates: Vec<String>,
    pub action: CopyOutcome,
}

impl HistoryRecord {
    pub fn new(retained: &Path, score: f64, duplicates: &[&Path], action: CopyOutcome) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            retained: retained.to_string_lossy().into_owned(),
            retained_score: score.is_finite().then_some(score),
            duplicates: duplicates
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
            action,
        }
    }
}

pub fn history_path(dest_dir: &Path) -> PathBuf {
    dest_dir.join(HISTORY_FILE)
}

/// Appends records to the history file of a destination directory.
pub struct HistoryWriter {
    path: PathBuf,
    out: File,
}

impl HistoryWriter {
    pub fn open(dest_dir: &Path) -> Result<Self, PipelineError> {
        let path = history_path(dest_dir);
        let out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| PipelineError::History {
                path: path.clone(),
                source,
            })?;
        Ok(Self { path, out })
    }

    pub fn append(&mut self, record: &HistoryRecord) -> Result<(), PipelineError> {
        let line = serde_json::to_string(record).map_err(io::Error::other);
        line.and_then(|line| writeln!(self.out, "{}", line))
            .map_err(|source| PipelineError::History {
                path: self.path.clone(),
                source,
            })
    }
}

/// Read every well-formed record; malformed lines are skipped.
pub fn read_history(dest_dir: &Path) -> Result<Vec<HistoryRecord>, PipelineError> {
    let path = history_path(dest_dir);
    let history_error = |source| PipelineError::History {
        path: path.clone(),
        source,
    };
    let reader = BufReader::new(File::open(&path).map_err(history_error)?);

    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(history_error)?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryRecord>(&line) {
            Ok(record) => records.push(record),
            Err(err) => log::warn!("Skipping malformed history entry {}: {}", i, err),
        }
    }
    Ok(records)
}
