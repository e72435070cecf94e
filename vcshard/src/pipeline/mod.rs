//! Run orchestration: shard fan-out, merge gate and run statistics

pub mod coordinator;
pub mod stats;

pub use coordinator::{run_single_shard, RunCoordinator, RunOptions, CANCELLED};
pub use stats::RunStats;
