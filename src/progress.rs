//! Console progress for plan execution
//!
//! One spinner per running action under an overall bar. Finished actions
//! either stay on screen with a ✓ or disappear, depending on the
//! [`Visibility`] the run was started with; failures always stay.

use colored::Colorize;
use compose::{Action, BackendError, ExecuteSummary, ProgressCallback, Visibility};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("  {spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(TICKS)
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

fn line_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("  {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Progress renderer for the terminal
pub struct ConsoleProgress {
    multi: MultiProgress,
    overall: Option<ProgressBar>,
    running: HashMap<usize, ProgressBar>,
    visibility: Visibility,
    dry_run: bool,
}

impl ConsoleProgress {
    pub fn new(quiet: bool, dry_run: bool) -> Self {
        let target = if quiet {
            ProgressDrawTarget::hidden()
        } else {
            ProgressDrawTarget::stderr()
        };
        Self {
            multi: MultiProgress::with_draw_target(target),
            overall: None,
            running: HashMap::new(),
            visibility: Visibility::default(),
            dry_run,
        }
    }

    fn finish(&mut self, index: usize, message: String, keep: bool) {
        let bar = self
            .running
            .remove(&index)
            .unwrap_or_else(|| self.multi.add(ProgressBar::new_spinner()));
        if keep {
            bar.set_style(line_style());
            bar.finish_with_message(message);
        } else {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
        if let Some(overall) = &self.overall {
            overall.inc(1);
        }
    }
}

impl ProgressCallback for ConsoleProgress {
    fn on_run_start(&mut self, total: usize, visibility: Visibility) {
        self.visibility = visibility;
        if self.dry_run {
            return;
        }
        let overall = self.multi.add(ProgressBar::new(total as u64));
        overall.set_style(bar_style());
        overall.enable_steady_tick(Duration::from_millis(100));
        self.overall = Some(overall);
    }

    fn on_action_start(&mut self, index: usize, action: &Action) {
        if self.dry_run {
            // println through the multi so it never tears a bar
            let _ = self
                .multi
                .println(format!("  {} would {}", "→".cyan(), action.describe()));
            return;
        }

        let spinner = match &self.overall {
            Some(overall) => self.multi.insert_before(overall, ProgressBar::new_spinner()),
            None => self.multi.add(ProgressBar::new_spinner()),
        };
        spinner.set_style(spinner_style());
        spinner.set_message(action.describe());
        spinner.enable_steady_tick(Duration::from_millis(80));
        self.running.insert(index, spinner);
    }

    fn on_action_success(&mut self, index: usize, action: &Action) {
        let keep = self.visibility == Visibility::Retain;
        let message = format!("{} {}", "✓".green(), action.describe());
        self.finish(index, message, keep);
    }

    fn on_action_failure(&mut self, index: usize, action: &Action, error: &BackendError) {
        let message = format!(
            "{} {}: {}",
            "✗".red(),
            action.describe(),
            error.to_string().red()
        );
        self.finish(index, message, true);
    }

    fn on_run_complete(&mut self, summary: &ExecuteSummary) {
        for (_, bar) in self.running.drain() {
            bar.finish_and_clear();
        }
        if let Some(overall) = self.overall.take() {
            overall.finish_and_clear();
            self.multi.remove(&overall);
        }
        log::debug!("run complete: {:?}", summary);
    }
}

/// Spinner for work that is not a plan, e.g. reading an inventory
pub fn spinner(message: &str, quiet: bool) -> ProgressBar {
    let spinner = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(spinner_style());
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

#[cfg(test)]
mod tests {
    use super::*;
    use compose::{ActionKind, MachineSpec, Target};

    fn action(name: &str) -> Action {
        Action {
            kind: ActionKind::StartMachine,
            target: Target::Machine(MachineSpec::new(name, "img")),
            depends_on: Vec::new(),
        }
    }

    #[test]
    fn test_hidden_progress_tracks_running_actions() {
        let mut progress = ConsoleProgress::new(true, false);
        progress.on_run_start(2, Visibility::Clear);
        progress.on_action_start(0, &action("a"));
        progress.on_action_start(1, &action("b"));
        assert_eq!(progress.running.len(), 2);

        progress.on_action_success(0, &action("a"));
        progress.on_action_failure(
            1,
            &action("b"),
            &BackendError::Failed("boom".to_string()),
        );
        assert!(progress.running.is_empty());
        assert_eq!(progress.overall.as_ref().map(ProgressBar::position), Some(2));

        progress.on_run_complete(&ExecuteSummary::default());
        assert!(progress.overall.is_none());
    }

    #[test]
    fn test_dry_run_creates_no_bars() {
        let mut progress = ConsoleProgress::new(true, true);
        progress.on_run_start(1, Visibility::Retain);
        progress.on_action_start(0, &action("a"));
        assert!(progress.running.is_empty());
        assert!(progress.overall.is_none());
    }
}
