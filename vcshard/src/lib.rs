//! Chromosome-sharded variant calling
//!
//! Splits a sample's variant calling by chromosome into independent shard
//! tasks, runs an external caller (DeepVariant or GATK) per shard, and merges
//! the per-shard VCFs into one indexed, per-sample VCF once every shard has
//! succeeded.

pub mod config;
pub mod errors;
pub mod executor;
pub mod merge;
pub mod observability;
pub mod pipeline;
pub mod sharding;
pub mod storage;
pub mod vcf;

pub use config::PipelineConfig;
pub use errors::{PipelineError, Result};
pub use executor::{
    CallerBackend, ModelType, ProcessRunner, ShardExecutor, ShardInputs, ShardOutputs,
    ToolInvocation, ToolOutput, ToolRunner,
};
pub use merge::{MergedArtifact, ShardMerger};
pub use observability::{init_production_logging, init_simple_logging};
pub use pipeline::{run_single_shard, RunCoordinator, RunOptions, RunStats};
pub use sharding::{
    ChromosomeUniverse, PartitionPolicy, ShardAssignment, ShardPlan, ShardPlanner, ShardRegistry,
    ShardResult, ShardStatus,
};
pub use storage::StorageLayout;
