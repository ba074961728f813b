//! Progress bar for apply runs

use converge::{ProgressCallback, TaskKey, TaskOutcome};
use indicatif::{ProgressBar, ProgressStyle};

use crate::ui;

/// Draws a bar while tasks run and prints a line per finished task
pub struct BarProgress {
    bar: Option<ProgressBar>,
    /// Also print converged-without-change tasks
    verbose: bool,
}

impl BarProgress {
    pub fn new(verbose: bool) -> Self {
        Self { bar: None, verbose }
    }
}

impl ProgressCallback for BarProgress {
    fn on_run_start(&mut self, total: usize) {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        self.bar = Some(bar);
    }

    fn on_task_start(&mut self, key: &TaskKey) {
        if let Some(bar) = &self.bar {
            bar.set_message(key.to_string());
        }
    }

    fn on_task_complete(&mut self, key: &TaskKey, outcome: &TaskOutcome) {
        let quiet = matches!(
            outcome,
            TaskOutcome::Converged(converge::ApplyResult::NoChange | converge::ApplyResult::Ignored)
        );
        if let Some(bar) = &self.bar {
            if !quiet || self.verbose {
                bar.println(ui::outcome_line(key, outcome));
            }
            bar.inc(1);
        }
    }

    fn on_run_complete(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}
