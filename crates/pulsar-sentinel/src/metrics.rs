//! Sentinel Metrics
//!
//! Statistics for a single sweep.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepStats {
    /// Running campaigns moved to Expired
    pub expired: usize,

    /// Closed campaigns dropped from the live store
    pub archived: usize,

    /// Campaigns still running after the sweep
    pub running: usize,

    /// Time taken to complete the sweep
    pub duration: Option<Duration>,
}

impl SweepStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the sweep changed anything
    pub fn had_effect(&self) -> bool {
        self.expired > 0 || self.archived > 0
    }

    /// Format a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Sweep: {} expired | {} archived | {} running | {:?}",
            self.expired,
            self.archived,
            self.running,
            self.duration.unwrap_or_default()
        )
    }
}

/// Accumulates stats while a sweep is in progress
#[derive(Debug, Clone)]
pub struct SweepStatsBuilder {
    stats: SweepStats,
    start_time: Instant,
}

impl SweepStatsBuilder {
    pub fn new() -> Self {
        Self {
            stats: SweepStats::new(),
            start_time: Instant::now(),
        }
    }

    pub fn record_expired(&mut self, count: usize) {
        self.stats.expired += count;
    }

    pub fn record_archived(&mut self, count: usize) {
        self.stats.archived += count;
    }

    pub fn set_running(&mut self, count: usize) {
        self.stats.running = count;
    }

    /// Finalize and return the stats
    pub fn finish(mut self) -> SweepStats {
        self.stats.duration = Some(self.start_time.elapsed());
        self.stats
    }
}

impl Default for SweepStatsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
