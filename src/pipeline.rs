use crate::config::Config;
use crate::core::embedding::{EmbeddedImage, Embedder};
use crate::core::grouping::{Group, group_by_anchor};
use crate::core::quality::{QualityAssessor, QualityGate, ScoreCache};
use crate::core::selection::{CopyOutcome, Selection, copy_selected, select_best};
use crate::error::PipelineError;
use crate::history::{HistoryRecord, HistoryWriter};
use crate::progress::Progress;
use crate::scanner;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct GroupOutcome {
    pub group: Group,
    pub selection: Selection,
    /// `None` until the selection has been copied.
    pub copy: Option<CopyOutcome>,
}

#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub found: usize,
    pub passed_quality: usize,
    pub embedded: usize,
    pub groups: Vec<GroupOutcome>,
    pub copied: usize,
    pub unchanged: usize,
}

impl RunSummary {
    /// File names of the images kept, one per group.
    pub fn kept_names(&self) -> Vec<String> {
        self.groups
            .iter()
            .filter_map(|g| g.selection.path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect()
    }
}

/// Quality gate, embedding, grouping and best-of-group selection over one
/// source directory.
pub struct Pipeline<'a> {
    config: &'a Config,
    assessor: &'a dyn QualityAssessor,
    embedder: &'a dyn Embedder,
    progress: Progress,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        assessor: &'a dyn QualityAssessor,
        embedder: &'a dyn Embedder,
    ) -> Self {
        Self {
            config,
            assessor,
            embedder,
            progress: Progress::new(config.progress),
        }
    }

    /// Report progress through `progress` instead of the configured mode on
    /// stdout.
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Work out the groups and their best members without touching the
    /// destination.
    pub fn plan(&self) -> Result<RunSummary, PipelineError> {
        self.config.validate()?;
        let source = &self.config.source_dir;
        log::info!("Similarity threshold: {}", self.config.similarity_threshold);
        log::info!("Quality threshold: {}", self.config.quality_threshold);

        let images = scanner::list_images(source)?;
        log::info!("{} images found in '{}'", images.len(), source.display());

        let mut cache = ScoreCache::new();
        let passed = self.filter_quality(&images, &mut cache);
        log::info!("{} images passed the quality check", passed.len());

        let embedded = self.embed_all(&passed);
        let groups = group_by_anchor(&embedded, self.config.similarity_threshold);
        log::info!(
            "{} embedded images form {} groups",
            embedded.len(),
            groups.len()
        );

        let groups = groups
            .into_iter()
            .map(|group| {
                let selection = select_best(&group, self.assessor, &mut cache);
                GroupOutcome {
                    group,
                    selection,
                    copy: None,
                }
            })
            .collect();

        Ok(RunSummary {
            found: images.len(),
            passed_quality: passed.len(),
            embedded: embedded.len(),
            groups,
            ..RunSummary::default()
        })
    }

    /// Plan, then copy each group's best image into the destination and
    /// record it in the history file. Dry runs stop after planning.
    pub fn run(&self) -> Result<RunSummary, PipelineError> {
        let mut summary = self.plan()?;
        if self.config.dry_run {
            log::info!("Dry run, nothing copied");
            return Ok(summary);
        }

        let dest = &self.config.dest_dir;
        fs::create_dir_all(dest)?;
        let mut history = HistoryWriter::open(dest)?;

        for outcome in summary.groups.iter_mut() {
            let selected = outcome.selection.path.clone();
            let copy = copy_selected(&selected, dest)?;
            match copy {
                CopyOutcome::Copied => summary.copied += 1,
                CopyOutcome::Unchanged => summary.unchanged += 1,
            }
            outcome.copy = Some(copy);

            let duplicates: Vec<&Path> = outcome
                .group
                .paths()
                .filter(|p| *p != selected.as_path())
                .collect();
            history.append(&HistoryRecord::new(
                &selected,
                outcome.selection.score,
                &duplicates,
                copy,
            ))?;
        }

        log::info!(
            "Done. {} images kept in '{}'",
            summary.groups.len(),
            dest.display()
        );
        Ok(summary)
    }

    fn filter_quality(&self, images: &[PathBuf], cache: &mut ScoreCache) -> Vec<PathBuf> {
        let gate = QualityGate::new(self.config.quality_threshold);
        let total = images.len();
        let mut passed = Vec::new();
        for (idx, path) in images.iter().enumerate() {
            if gate.accepts(path, self.assessor, cache) {
                passed.push(path.clone());
            } else {
                log::debug!("{} rejected by the quality gate", path.display());
            }
            self.progress.quality_checked(idx + 1, total);
        }
        passed
    }

    fn embed_all(&self, paths: &[PathBuf]) -> Vec<EmbeddedImage> {
        let mut stage = self.progress.embedding(paths.len());
        let mut embedded = Vec::with_capacity(paths.len());
        for path in paths {
            match self.embedder.embed(path) {
                Ok(embedding) => embedded.push(EmbeddedImage {
                    path: path.clone(),
                    embedding,
                }),
                Err(err) => {
                    log::warn!("Failed to generate embedding for {}: {}", path.display(), err)
                }
            }
            stage.inc();
        }
        stage.finish();
        embedded
    }
}
