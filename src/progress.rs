//! Progress bar utilities for batch generation runs
//!
//! Provides visual feedback while a bounded run writes its output file,
//! using the indicatif crate.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress bar for bounded generation loops
pub struct GenerationProgress {
    pub progress: ProgressBar,
}

impl GenerationProgress {
    /// Create a new generation progress bar over a known tick count
    pub fn new(total_ticks: u64) -> Self {
        let progress = ProgressBar::new(total_ticks);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})\n{msg}")
                .unwrap()
                .progress_chars("#>-"),
        );

        Self { progress }
    }

    /// Advance by one tick
    pub fn tick(&self, rows_written: u64) {
        self.progress.inc(1);
        self.progress
            .set_message(format!("📊 {} rows written", rows_written));
    }

    /// Mark the run as complete
    pub fn finish(&self, rows_written: u64) {
        self.progress
            .finish_with_message(format!("✅ Generation complete! {} rows written", rows_written));
    }
}

/// Spinner for setup phases without a known length
pub struct SetupSpinner {
    pub spinner: ProgressBar,
}

impl SetupSpinner {
    pub fn new(message: &str) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner.set_message(message.to_string());

        Self { spinner }
    }

    pub fn finish(&self, message: &str) {
        self.spinner.finish_with_message(format!("✅ {}", message));
    }

    pub fn finish_with_error(&self, message: &str) {
        self.spinner.finish_with_message(format!("❌ {}", message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_progress() {
        let progress = GenerationProgress::new(100);
        progress.tick(1);
        progress.finish(1);
    }

    #[test]
    fn test_setup_spinner() {
        let spinner = SetupSpinner::new("Warming up...");
        std::thread::sleep(Duration::from_millis(50));
        spinner.finish("Warmed up");
    }
}
