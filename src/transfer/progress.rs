//! Terminal progress bar for command-line transfers

use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {pos} documents {msg}";

/// Progress bar for CLI exports and imports
///
/// Tracks documents processed and shows speed; disabled trackers are no-ops.
pub struct ProgressTracker {
    start_time: Instant,
    bar: Option<ProgressBar>,
}

impl ProgressTracker {
    /// Create a new progress tracker
    ///
    /// # Arguments
    /// * `total` - Total number of documents if known (None for unknown)
    /// * `enable_bar` - Whether to display a progress bar
    pub fn new(total: Option<u64>, enable_bar: bool) -> Self {
        let bar = enable_bar.then(|| match total {
            Some(n) => {
                let bar = ProgressBar::new(n);
                if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
                    bar.set_style(style.progress_chars("#>-"));
                }
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                if let Ok(style) = ProgressStyle::default_spinner().template(SPINNER_TEMPLATE) {
                    bar.set_style(style);
                }
                bar
            }
        });

        Self {
            start_time: Instant::now(),
            bar,
        }
    }

    /// Disabled tracker
    pub fn hidden() -> Self {
        Self::new(None, false)
    }

    /// Set the total once it becomes known
    pub fn set_total(&self, total: u64) {
        if let Some(ref bar) = self.bar {
            bar.set_length(total);
        }
    }

    /// Update progress with the running count
    pub fn update(&self, count: u64, collection: &str) {
        if let Some(ref bar) = self.bar {
            bar.set_position(count);

            let elapsed = self.start_time.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                let speed = count as f64 / elapsed;
                bar.set_message(format!("{} ({:.0} docs/sec)", collection, speed));
            }
        }
    }

    /// Finish and clear the progress bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_tracker_is_noop() {
        let tracker = ProgressTracker::hidden();
        tracker.set_total(10);
        tracker.update(5, "users");
        tracker.finish();
    }

    #[test]
    fn test_tracker_with_total() {
        let tracker = ProgressTracker::new(Some(1000), false);
        tracker.update(500, "users");
    }
}
