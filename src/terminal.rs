//! A minimal terminal front end for sessions, useful for debugging data
//! sources without the desktop UI.

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::engine::{ChangeCause, Progress, Update};

/// Prints [`Update`]s to stderr and shows a spinner while the session
/// reports work in progress.
#[derive(Default)]
pub struct TerminalRenderer {
    spinner: Option<ProgressBar>,
}

impl TerminalRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, update: &Update) {
        match update {
            Update::Progress(Progress::Show) => {
                let spinner = ProgressBar::new_spinner().with_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.green} [{elapsed}] {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                spinner.set_message("Refreshing choices...");
                spinner.enable_steady_tick(Duration::from_millis(100));
                self.spinner = Some(spinner);
            }
            Update::Progress(Progress::Hide) => {
                if let Some(spinner) = self.spinner.take() {
                    spinner.finish_and_clear();
                }
            }
            Update::Choices {
                control,
                choices,
                truncated,
            } => {
                let mut line = format!(
                    "{} {} [{}]",
                    style(control).cyan().bold(),
                    style("choices").dim(),
                    choices.join(", ")
                );
                if let Some(truncated) = truncated {
                    line.push_str(&format!(
                        " {}",
                        style(format!(
                            "(showing {} of {})",
                            truncated.limit, truncated.produced
                        ))
                        .yellow()
                    ));
                }
                self.println(line);
            }
            Update::ValueChanged {
                control,
                value,
                cause,
            } => {
                let verb = match cause {
                    ChangeCause::Cleared => "cleared",
                    ChangeCause::AutoSelected => "selected",
                };
                let line = format!(
                    "{} {} {}",
                    style(control).cyan().bold(),
                    style(verb).yellow(),
                    value.as_deref().unwrap_or("")
                );
                self.println(line);
            }
            Update::Failed { control, error } => {
                let line = format!(
                    "{} {} {}",
                    style(control).cyan().bold(),
                    style("failed").red(),
                    error.message
                );
                self.println(line);
            }
            Update::Settled {
                origin,
                generation,
                state,
            } => {
                let line = format!(
                    "{} #{generation} from {} {:?}",
                    style("settled").dim(),
                    origin.as_deref().unwrap_or("<initial>"),
                    state
                );
                self.println(line);
            }
        }
    }

    fn println(&self, line: String) {
        match &self.spinner {
            Some(spinner) => spinner.println(line),
            None => eprintln!("{line}"),
        }
    }
}
