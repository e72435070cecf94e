//! Shard execution
//!
//! - `runner`: the [`ToolRunner`] seam and the local process implementation
//! - `caller`: DeepVariant / GATK command lines for one shard
//! - `shard_executor`: staging, timeout and atomic publish around a caller run
//!
//! The merge tool goes through the same [`ToolRunner`], so a single fake
//! covers both the callers and `bcftools` in tests.

pub mod caller;
pub mod runner;
pub mod shard_executor;
pub mod types;

pub use caller::{build_invocations, CallerBackend, ModelType, ShardInputs, ShardOutputs};
pub use runner::{run_with_timeout, ProcessRunner, ToolInvocation, ToolOutput, ToolRunner};
pub use shard_executor::ShardExecutor;
pub use types::{ExecutorError, ExecutorResult};
