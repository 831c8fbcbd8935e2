use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use env_logger::Env;
use keepbest::config::Config;
use keepbest::core::{DualEmbedder, QualityAssessor, QualityModel};
use keepbest::history::{history_path, read_history};
use keepbest::pipeline::{Pipeline, RunSummary};
use keepbest::progress::ProgressMode;
use keepbest::scanner;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(
    name = "keepbest",
    version,
    about = "Keep the best-quality image of each group of near-duplicates"
)]
struct Cli {
    /// Settings file (JSON); defaults to the per-user settings file when present
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Copy the best image of every similar group into DEST
    Run {
        /// Directory with the images to deduplicate [default: images]
        source: Option<PathBuf>,
        /// Directory the kept images are copied into [default: filtered]
        dest: Option<PathBuf>,
        /// Cosine similarity above which images are grouped [default: 0.406]
        #[arg(allow_negative_numbers = true)]
        similarity: Option<f32>,
        /// Highest acceptable quality score, lower is better [default: 70.30]
        quality: Option<f64>,
        /// Only show what would be copied
        #[arg(long)]
        dry_run: bool,
        /// How to report progress
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
        /// Do not ask before writing into a destination that already has images
        #[arg(short, long)]
        yes: bool,
    },

    /// List similar groups and the image that would be kept
    Scan {
        /// Directory to scan [default: images]
        source: Option<PathBuf>,
        #[arg(allow_negative_numbers = true)]
        similarity: Option<f32>,
        quality: Option<f64>,
    },

    /// Print the quality score of each file
    Score {
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },

    /// List the records of previous runs into a destination
    History {
        /// Destination directory [default: filtered]
        dest: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("Run failed: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load settings")?;

    match cli.command {
        Commands::Run {
            source,
            dest,
            similarity,
            quality,
            dry_run,
            progress,
            yes,
        } => {
            override_thresholds(&mut config, source, similarity, quality);
            if let Some(dest) = dest {
                config.dest_dir = dest;
            }
            if let Some(progress) = progress {
                config.progress = progress;
            }
            config.dry_run |= dry_run;
            config.validate()?;

            if !yes && !config.dry_run && !confirm_destination(&config.dest_dir)? {
                println!("Aborted; nothing was copied.");
                return Ok(());
            }

            println!(
                "▶ Deduplicating {} → {}",
                config.source_dir.display(),
                config.dest_dir.display()
            );
            let model = QualityModel::from_config(&config);
            let embedder = DualEmbedder::standard();
            let summary = benchmark("processing", || {
                Pipeline::new(&config, &model, &embedder).run()
            })?;

            if config.dry_run {
                print_groups(&summary);
                println!("\n⚠️  Dry-run only; no files were copied.");
            } else {
                println!(
                    "\n✅ Kept {} of {} images in {} ({} copied, {} unchanged)",
                    summary.groups.len(),
                    summary.found,
                    config.dest_dir.display(),
                    summary.copied,
                    summary.unchanged
                );
                println!(
                    "   History recorded in {}",
                    history_path(&config.dest_dir).display()
                );
            }
        }

        Commands::Scan {
            source,
            similarity,
            quality,
        } => {
            override_thresholds(&mut config, source, similarity, quality);
            config.dry_run = true;
            println!("▶ Scanning for similar images in: {}", config.source_dir.display());

            let model = QualityModel::from_config(&config);
            let embedder = DualEmbedder::standard();
            let summary = benchmark("scanning", || {
                Pipeline::new(&config, &model, &embedder).plan()
            })?;
            print_groups(&summary);
        }

        Commands::Score { files } => {
            let model = QualityModel::from_config(&config);
            for file in &files {
                match model.assess(file) {
                    Ok(score) => {
                        let verdict = if score <= config.quality_threshold {
                            "ok"
                        } else {
                            "rejected"
                        };
                        println!("{:>8.2}  {:<8}  {}", score, verdict, file.display());
                    }
                    Err(err) => println!("{:>8}  {:<8}  {}: {}", "-", "failed", file.display(), err),
                }
            }
        }

        Commands::History { dest } => {
            let dest = dest.unwrap_or(config.dest_dir);
            let records = read_history(&dest)
                .with_context(|| format!("Could not read history of {}", dest.display()))?;

            println!("🗂️  Run history:");
            for (i, rec) in records.iter().enumerate() {
                let score = rec
                    .retained_score
                    .map(|s| format!("{:.2}", s))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "[{}] {}\n     kept: {} (score {})\n     duplicates: {:?}\n     action: {:?}\n",
                    i, rec.timestamp, rec.retained, score, rec.duplicates, rec.action
                );
            }
        }
    }

    Ok(())
}

fn override_thresholds(
    config: &mut Config,
    source: Option<PathBuf>,
    similarity: Option<f32>,
    quality: Option<f64>,
) {
    if let Some(source) = source {
        config.source_dir = source;
    }
    if let Some(similarity) = similarity {
        config.similarity_threshold = similarity;
    }
    if let Some(quality) = quality {
        config.quality_threshold = quality;
    }
}

/// Ask before copying into a destination that already holds images, when
/// someone is there to answer.
fn confirm_destination(dest: &Path) -> Result<bool> {
    let occupied = scanner::list_images(dest)
        .map(|images| !images.is_empty())
        .unwrap_or(false);
    if !occupied || !std::io::stdin().is_terminal() {
        return Ok(true);
    }
    let proceed = Confirm::new()
        .with_prompt(format!(
            "{} already contains images; files with the same name will be replaced. Continue?",
            dest.display()
        ))
        .default(true)
        .interact()?;
    Ok(proceed)
}

fn print_groups(summary: &RunSummary) {
    println!(
        "{} images, {} passed the quality check, {} group(s):",
        summary.found,
        summary.passed_quality,
        summary.groups.len()
    );
    for (i, outcome) in summary.groups.iter().enumerate() {
        println!("\n✨ Group {}:", i + 1);
        println!(
            "   🏆 Keeping → {} (score {:.2})",
            outcome.selection.path.display(),
            outcome.selection.score
        );
        for member in outcome.group.members() {
            if member.path != outcome.selection.path {
                println!(
                    "   ▶ {} (similarity {:.3})",
                    member.path.display(),
                    member.similarity
                );
            }
        }
    }
}

/// Run `f()`, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
