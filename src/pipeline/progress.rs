//! Periodic progress logging for long-running stages

use std::time::Instant;
use tracing::info;

/// Counts processed items and logs every `every` items.
///
/// Owned by the stage that drives it; nothing is shared.
#[derive(Debug)]
pub struct ProgressCounter {
    label: &'static str,
    every: u64,
    count: u64,
    start_time: Instant,
}

impl ProgressCounter {
    pub fn new(label: &'static str, every: u64) -> Self {
        Self {
            label,
            every: every.max(1),
            count: 0,
            start_time: Instant::now(),
        }
    }

    /// Count one item; returns `true` when a progress line was logged
    pub fn tick(&mut self) -> bool {
        self.count += 1;
        if self.count % self.every != 0 {
            return false;
        }

        info!(
            "Processed {} {} ({:.1}/s)",
            self.count,
            self.label,
            self.rate()
        );
        true
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Items per second since creation
    pub fn rate(&self) -> f64 {
        let elapsed = self.elapsed_seconds();
        if elapsed > 0.0 {
            self.count as f64 / elapsed
        } else {
            0.0
        }
    }
}
