//! Terminal progress for apply/destroy runs

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use provision::{Action, ExecuteSummary, Outcome, ProgressCallback, ProviderError};
use std::time::Duration;

use crate::ui;

const TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Progress bar that prints one line per finished change
pub struct RunProgress {
    bar: ProgressBar,
    in_flight: Vec<String>,
    quiet: bool,
}

impl RunProgress {
    pub fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        if let Ok(style) = ProgressStyle::with_template(TEMPLATE) {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        Self {
            bar,
            in_flight: Vec::new(),
            quiet,
        }
    }

    fn refresh_message(&self) {
        self.bar.set_message(self.in_flight.join(", "));
    }

    fn print(&self, line: String) {
        if !self.quiet {
            self.bar.suspend(|| println!("{line}"));
        }
    }
}

impl ProgressCallback for RunProgress {
    fn on_run_start(&mut self, count: usize) {
        self.bar.set_length(count as u64);
    }

    fn on_change_start(&mut self, id: &str, action: Action) {
        log::debug!("{action} {id}: started");
        self.in_flight.push(id.to_string());
        self.refresh_message();
    }

    fn on_retry(&mut self, id: &str, attempt: u32, error: &ProviderError, delay: Duration) {
        self.print(format!(
            "  {} {} attempt {} failed, retrying in {:.1}s ({})",
            "↻".yellow(),
            id,
            attempt,
            delay.as_secs_f64(),
            error
        ));
    }

    fn on_change_complete(&mut self, id: &str, action: Action, outcome: &Outcome) {
        self.in_flight.retain(|i| i != id);
        self.refresh_message();
        if matches!(outcome, Outcome::Noop) {
            return;
        }
        self.bar.inc(1);

        let detail = match outcome {
            Outcome::Succeeded { attempts } if *attempts > 1 => {
                format!(" ({attempts} attempts)").dimmed().to_string()
            }
            Outcome::Failed { error, attempts } => {
                format!(" {error} after {}", ui::plural(*attempts as usize, "attempt"))
                    .red()
                    .to_string()
            }
            Outcome::Blocked { reason } => format!(" blocked: {reason}").yellow().to_string(),
            _ => String::new(),
        };
        self.print(format!(
            "  {} {} {}{}",
            ui::outcome_marker(outcome),
            action.to_string().dimmed(),
            id,
            detail
        ));
    }

    fn on_run_complete(&mut self, summary: &ExecuteSummary) {
        self.bar.finish_and_clear();
        log::debug!(
            "Run complete: {} succeeded, {} failed, {} blocked",
            summary.succeeded,
            summary.failed,
            summary.blocked
        );
    }
}
