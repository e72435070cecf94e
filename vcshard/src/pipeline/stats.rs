//! Run statistics
//!
//! Counters shared by every shard task of a run, logged as a summary when the
//! run ends.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Shard execution statistics
#[derive(Debug, Default)]
pub struct RunStats {
    /// Shards whose outputs were published
    pub shards_completed: AtomicU64,

    /// Shards that failed or were cancelled
    pub shards_failed: AtomicU64,

    /// Caller wall time summed over finished shards (milliseconds)
    pub total_tool_time_ms: AtomicU64,

    /// Shards currently running
    pub active_shards: AtomicU64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, tool_time_ms: u64) {
        self.shards_completed.fetch_add(1, Ordering::Relaxed);
        self.total_tool_time_ms
            .fetch_add(tool_time_ms, Ordering::Relaxed);
    }

    pub fn record_failure(&self, tool_time_ms: u64) {
        self.shards_failed.fetch_add(1, Ordering::Relaxed);
        self.total_tool_time_ms
            .fetch_add(tool_time_ms, Ordering::Relaxed);
    }

    /// Count a shard as active until the returned guard drops
    pub fn start_shard(&self) -> ActiveShard<'_> {
        self.active_shards.fetch_add(1, Ordering::Relaxed);
        ActiveShard { stats: self }
    }

    /// Shards finished either way
    pub fn total_shards(&self) -> u64 {
        self.shards_completed.load(Ordering::Relaxed) + self.shards_failed.load(Ordering::Relaxed)
    }

    pub fn avg_tool_time_ms(&self) -> f64 {
        let total = self.total_shards();
        if total == 0 {
            return 0.0;
        }
        self.total_tool_time_ms.load(Ordering::Relaxed) as f64 / total as f64
    }

    /// Fraction of finished shards that succeeded (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        let total = self.total_shards();
        if total == 0 {
            return 0.0;
        }
        self.shards_completed.load(Ordering::Relaxed) as f64 / total as f64
    }

    pub fn active_shards(&self) -> u64 {
        self.active_shards.load(Ordering::Relaxed)
    }

    pub fn print_summary(&self) {
        info!(
            total_shards = self.total_shards(),
            completed = self.shards_completed.load(Ordering::Relaxed),
            failed = self.shards_failed.load(Ordering::Relaxed),
            active = self.active_shards(),
            avg_tool_time_ms = format!("{:.0}", self.avg_tool_time_ms()),
            success_rate = format!("{:.1}%", self.success_rate() * 100.0),
            "Shard statistics"
        );
    }
}

/// Active-shard marker; also released when a shard task is aborted
pub struct ActiveShard<'a> {
    stats: &'a RunStats,
}

impl Drop for ActiveShard<'_> {
    fn drop(&mut self) {
        self.stats.active_shards.fetch_sub(1, Ordering::Relaxed);
    }
}
