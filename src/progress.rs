use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::io::{self, Write};

/// How run progress is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProgressMode {
    /// Interactive progress bar on stderr.
    #[default]
    Bar,
    /// One plain line per update on stdout, for a host GUI to parse.
    Lines,
    Off,
}

/// Where `lines` mode output goes.
pub type LineSink = Box<dyn Write>;

/// Reports quality-gate and embedding progress.
pub struct Progress {
    mode: ProgressMode,
    out: RefCell<LineSink>,
}

impl Progress {
    /// Progress lines go to stdout.
    pub fn new(mode: ProgressMode) -> Self {
        Self::with_writer(mode, Box::new(io::stdout()))
    }

    pub fn with_writer(mode: ProgressMode, out: LineSink) -> Self {
        Self {
            mode,
            out: RefCell::new(out),
        }
    }

    /// Called after the `idx`-th (1-based) image of `total` went through the
    /// quality gate.
    pub fn quality_checked(&self, idx: usize, total: usize) {
        if total == 0 || !is_quality_report_step(idx, total) {
            return;
        }
        let line = quality_line(idx, total);
        match self.mode {
            ProgressMode::Bar => log::info!("{}", line),
            ProgressMode::Lines => self.emit(&line),
            ProgressMode::Off => {}
        }
    }

    pub fn embedding(&self, total: usize) -> StageProgress<'_> {
        let bar = match self.mode {
            ProgressMode::Bar => {
                let bar = ProgressBar::new(total as u64);
                if let Ok(style) = ProgressStyle::with_template(
                    "{msg} {bar:40.cyan/blue} {pos}/{len} ({percent}%) [{elapsed_precise}]",
                ) {
                    bar.set_style(style);
                }
                bar.set_message("Generating embeddings");
                Some(bar)
            }
            _ => None,
        };
        StageProgress {
            progress: self,
            bar,
            total,
            done: 0,
            last_percent: None,
        }
    }

    fn emit(&self, line: &str) {
        let mut out = self.out.borrow_mut();
        if let Err(err) = writeln!(out, "{}", line).and_then(|()| out.flush()) {
            log::debug!("Could not write progress line: {}", err);
        }
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress").field("mode", &self.mode).finish()
    }
}

/// Progress of one stage with a known number of items.
pub struct StageProgress<'a> {
    progress: &'a Progress,
    bar: Option<ProgressBar>,
    total: usize,
    done: usize,
    last_percent: Option<usize>,
}

impl StageProgress<'_> {
    pub fn inc(&mut self) {
        self.done += 1;
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
        if self.progress.mode == ProgressMode::Lines {
            let percent = percent_done(self.done, self.total);
            if self.last_percent != Some(percent) {
                self.last_percent = Some(percent);
                self.progress.emit(&embedding_line(percent));
            }
        }
    }

    pub fn finish(self) {
        if let Some(bar) = self.bar {
            bar.finish_with_message("Embeddings complete");
        }
    }
}

fn is_quality_report_step(idx: usize, total: usize) -> bool {
    idx % (total / 100).max(1) == 0 || idx == total
}

pub fn quality_line(idx: usize, total: usize) -> String {
    let percent = idx as f64 / total as f64 * 100.0;
    format!("Quality check: {}/{} images ({:.1}%)", idx, total, percent)
}

pub fn embedding_line(percent: usize) -> String {
    format!("Embedding: {}%", percent)
}

fn percent_done(done: usize, total: usize) -> usize {
    if total == 0 {
        100
    } else {
        done * 100 / total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Captured(Rc<RefCell<Vec<u8>>>);

    impl Captured {
        fn lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.borrow())
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(mode: ProgressMode) -> (Progress, Captured) {
        let captured = Captured::default();
        (Progress::with_writer(mode, Box::new(captured.clone())), captured)
    }

    fn run_gate(progress: &Progress, total: usize) {
        for idx in 1..=total {
            progress.quality_checked(idx, total);
        }
    }

    fn run_embedding(progress: &Progress, total: usize) {
        let mut stage = progress.embedding(total);
        for _ in 0..total {
            stage.inc();
        }
        stage.finish();
    }

    #[test]
    fn quality_line_format() {
        assert_eq!(quality_line(3, 8), "Quality check: 3/8 images (37.5%)");
        assert_eq!(quality_line(10, 10), "Quality check: 10/10 images (100.0%)");
    }

    #[test]
    fn embedding_line_format() {
        assert_eq!(embedding_line(42), "Embedding: 42%");
    }

    #[test]
    fn small_runs_report_every_image() {
        assert!((1..=7).all(|idx| is_quality_report_step(idx, 7)));
    }

    #[test]
    fn large_runs_report_each_percent_and_the_end() {
        let steps: Vec<usize> = (1..=250)
            .filter(|&idx| is_quality_report_step(idx, 250))
            .collect();
        assert_eq!(steps.len(), 125);
        assert_eq!(steps.first(), Some(&2));
        assert_eq!(steps.last(), Some(&250));
    }

    #[test]
    fn percent_done_is_whole_percent() {
        assert_eq!(percent_done(1, 3), 33);
        assert_eq!(percent_done(3, 3), 100);
        assert_eq!(percent_done(0, 0), 100);
    }

    #[test]
    fn lines_mode_writes_a_gate_line_per_image_for_small_runs() {
        let (progress, captured) = capture(ProgressMode::Lines);
        run_gate(&progress, 4);
        assert_eq!(
            captured.lines(),
            vec![
                "Quality check: 1/4 images (25.0%)",
                "Quality check: 2/4 images (50.0%)",
                "Quality check: 3/4 images (75.0%)",
                "Quality check: 4/4 images (100.0%)",
            ]
        );
    }

    #[test]
    fn lines_mode_thins_gate_lines_for_large_runs() {
        let (progress, captured) = capture(ProgressMode::Lines);
        run_gate(&progress, 250);
        let lines = captured.lines();
        assert_eq!(lines.len(), 125);
        assert_eq!(lines[0], "Quality check: 2/250 images (0.8%)");
        assert_eq!(lines[124], "Quality check: 250/250 images (100.0%)");
    }

    #[test]
    fn embedding_lines_repeat_no_percent_and_end_at_100() {
        let (progress, captured) = capture(ProgressMode::Lines);
        run_embedding(&progress, 3);
        assert_eq!(
            captured.lines(),
            vec!["Embedding: 33%", "Embedding: 66%", "Embedding: 100%"]
        );

        let (progress, captured) = capture(ProgressMode::Lines);
        run_embedding(&progress, 250);
        let lines = captured.lines();
        let expected: Vec<String> = (0..=100).map(embedding_line).collect();
        assert_eq!(lines, expected);
    }

    #[test]
    fn other_modes_write_no_lines() {
        for mode in [ProgressMode::Bar, ProgressMode::Off] {
            let (progress, captured) = capture(mode);
            run_gate(&progress, 5);
            run_embedding(&progress, 5);
            assert!(captured.lines().is_empty(), "{:?} wrote lines", mode);
        }
    }
}
