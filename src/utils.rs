//! Utility functions for the line pipeline

use std::time::Duration;

/// Format a duration as fractional minutes, e.g. `2.50 minutes`
pub fn format_minutes(duration: Duration) -> String {
    format!("{:.2} minutes", duration.as_secs_f64() / 60.0)
}

/// Format a duration in seconds to MM:SS.SS format
pub fn format_duration(duration_secs: f64) -> String {
    let minutes = (duration_secs / 60.0) as u32;
    let seconds = duration_secs % 60.0;
    format!("{:02}:{:05.2}", minutes, seconds)
}
