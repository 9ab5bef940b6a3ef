//! Monotonic stopwatch used to time codec phases.

use std::time::Instant;

/// Stopwatch started at construction.
///
/// Timers are independent, so a sub-phase can be measured with its own timer
/// while an outer timer keeps running.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Seconds elapsed since construction.
    #[must_use]
    pub fn seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a duration in seconds for humans (`"850.0ms"`, `"2.50s"`, `"1m05s"`).
#[must_use]
pub fn format_seconds(seconds: f64) -> String {
    // Pick the unit from the rounded value so 59.996 never prints as "60.00s".
    let millis = (seconds * 10_000.0).round() / 10.0;
    if millis < 1000.0 {
        return format!("{millis:.1}ms");
    }
    let hundredths = (seconds * 100.0).round() / 100.0;
    if hundredths < 60.0 {
        return format!("{hundredths:.2}s");
    }
    let whole = seconds.round() as u64;
    if whole < 3600 {
        format!("{}m{:02}s", whole / 60, whole % 60)
    } else {
        format!("{}h{:02}m", whole / 3600, whole % 3600 / 60)
    }
}
