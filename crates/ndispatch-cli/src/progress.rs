//! Progress bar utilities.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress bar style presets.
pub struct ProgressStyles;

impl ProgressStyles {
    /// Standard progress bar.
    pub fn standard() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix:>18.bold} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-")
    }
}

/// Create a standard progress bar, hidden when `visible` is false.
pub fn create_progress_bar(total: u64, prefix: &str, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(ProgressStyles::standard());
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_bar_still_counts() {
        let pb = create_progress_bar(10, "addr", false);
        pb.inc(3);
        assert_eq!(pb.position(), 3);
        assert!(pb.is_hidden());
    }
}
