use crate::core::grouping::Group;
use crate::core::quality::{QualityAssessor, ScoreCache};
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub path: PathBuf,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyOutcome {
    Copied,
    /// The destination already held identical bytes.
    Unchanged,
}

/// Pick the group member with the lowest quality score. The first of equally
/// scored members wins; NaN counts as the worst possible score.
pub fn select_best(
    group: &Group,
    assessor: &dyn QualityAssessor,
    cache: &mut ScoreCache,
) -> Selection {
    let mut best = Selection {
        path: group.anchor().to_path_buf(),
        score: sanitize(cache.score(group.anchor(), assessor)),
    };
    for path in group.paths().skip(1) {
        let score = sanitize(cache.score(path, assessor));
        if score < best.score {
            best = Selection {
                path: path.to_path_buf(),
                score,
            };
        }
    }
    best
}

fn sanitize(score: f64) -> f64 {
    if score.is_nan() { f64::INFINITY } else { score }
}

/// Copy `source` into `dest_dir` under its original file name. An existing
/// file with that name is overwritten unless it already has the same content.
pub fn copy_selected(source: &Path, dest_dir: &Path) -> Result<CopyOutcome, PipelineError> {
    let file_name = source.file_name().ok_or_else(|| PipelineError::Copy {
        from: source.to_path_buf(),
        to: dest_dir.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
    })?;
    let target = dest_dir.join(file_name);
    if target.is_file() {
        let identical = same_content(source, &target).map_err(|err| PipelineError::Copy {
            from: source.to_path_buf(),
            to: target.clone(),
            source: err,
        })?;
        if identical {
            log::debug!("{} already up to date", target.display());
            return Ok(CopyOutcome::Unchanged);
        }
    }

    fs::copy(source, &target).map_err(|err| PipelineError::Copy {
        from: source.to_path_buf(),
        to: target.clone(),
        source: err,
    })?;
    log::debug!("Copied {} → {}", source.display(), target.display());
    Ok(CopyOutcome::Copied)
}

fn same_content(a: &Path, b: &Path) -> io::Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    Ok(content_hash(a)? == content_hash(b)?)
}

fn content_hash(path: &Path) -> io::Result<blake3::Hash> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize())
}
