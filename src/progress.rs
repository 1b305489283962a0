//! Progress bar helpers.
//!
//! Bars and spinners share one style, with a log-only mode that hides them
//! for tail-friendly output when the harvester runs in the background.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Global flag for log-only mode (set from args in main)
pub static LOG_ONLY: AtomicBool = AtomicBool::new(false);

pub fn set_log_only(value: bool) {
    LOG_ONLY.store(value, Ordering::Relaxed);
}

pub fn is_log_only() -> bool {
    LOG_ONLY.load(Ordering::Relaxed)
}

/// Format duration in human-readable form for the run summary.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}

/// Create a progress bar with consistent styling.
/// In log-only mode, the progress bar is hidden.
pub fn create_progress_bar(len: u64, msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if is_log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, ETA: {eta})")
                .unwrap()
                .progress_chars("=> "),
        );
    }
    pb.set_message(msg.to_string());
    pb
}

/// Create a spinner for indeterminate phases (directory scans).
/// In log-only mode, the spinner is hidden.
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if is_log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{msg} {spinner} [{elapsed_precise}]")
                .unwrap(),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
    }
    pb.set_message(msg.to_string());
    pb
}
