//! Chromosome sharding
//!
//! Splits a reference genome into contiguous chromosome groups, one per
//! parallel caller task, and tracks each task's outcome.
//!
//! ## Key Concepts
//!
//! - **Universe**: ordered contig list the run covers (GRCh38 or a `.fai`)
//! - **Shard**: contiguous, non-empty slice of the universe
//! - **Plan**: the full index → slice mapping, computed once and persisted
//!
//! ## Architecture
//!
//! ```text
//! ChromosomeUniverse ──► ShardPlanner ──► ShardPlan (plan.json)
//!                                            │
//!                     ┌──────────────────────┼──────────────────────┐
//!                     ▼                      ▼                      ▼
//!                 shard 0 task           shard 1 task    ...    shard k-1 task
//!                     └────────► ShardRegistry (status/{label}.json) ◄──┘
//! ```

pub mod chromosome;
pub mod planner;
pub mod registry;
pub mod shard;

pub use chromosome::{is_primary_contig, Chromosome, ChromosomeUniverse};
pub use planner::{PartitionPolicy, ShardPlanner};
pub use registry::{ShardRegistry, ShardResult, ShardStatus};
pub use shard::{ShardAssignment, ShardPlan};
