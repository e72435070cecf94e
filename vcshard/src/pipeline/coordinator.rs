//! Local run orchestration
//!
//! ## Flow
//!
//! ```text
//! plan ──► plan.json + status/*.json (all Pending)
//!   │
//!   ├──► shard 0 ─┐
//!   ├──► shard 1 ─┤  JoinSet, at most `max_parallel_shards` at once
//!   └──► shard k ─┘
//!                 │
//!        every shard Succeeded? ── no ──► ShardExecutionFailure
//!                 │ yes
//!                 ▼
//!               merge ──► MergedArtifact
//! ```
//!
//! The merge is the only synchronization point. It never starts while any
//! shard is pending, running or failed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::errors::{PipelineError, Result};
use crate::executor::{ShardExecutor, ShardOutputs, ToolRunner};
use crate::merge::{MergedArtifact, ShardMerger};
use crate::sharding::{ShardAssignment, ShardPlan, ShardRegistry};

use super::stats::RunStats;

/// Error recorded for shards aborted after a sibling failed
pub const CANCELLED: &str = "cancelled";

/// Scheduling options for a local run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Concurrent shard tasks (at least 1)
    pub max_parallel_shards: usize,
    /// Abort sibling shards after the first failure
    pub cancel_on_failure: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_parallel_shards: 4,
            cancel_on_failure: true,
        }
    }
}

/// Executes one shard and records the outcome in the registry.
///
/// The shard must already be registered. This is the whole job of a batch
/// scheduler task; the local coordinator calls it once per shard.
#[instrument(skip_all, fields(shard = assignment.index))]
pub async fn run_single_shard(
    executor: &ShardExecutor,
    registry: &ShardRegistry,
    stats: &RunStats,
    assignment: &ShardAssignment,
) -> Result<ShardOutputs> {
    registry.mark_running(assignment.index).await?;
    let _active = stats.start_shard();
    let start = Instant::now();

    match executor.execute(assignment).await {
        Ok(outputs) => {
            stats.record_success(start.elapsed().as_millis() as u64);
            registry
                .mark_succeeded(assignment.index, outputs.record_count)
                .await?;
            Ok(outputs)
        }
        Err(e) => {
            stats.record_failure(start.elapsed().as_millis() as u64);
            registry.mark_failed(assignment.index, e.to_string()).await?;
            Err(e)
        }
    }
}

/// Runs a whole sample locally: every shard in parallel, then the merge
pub struct RunCoordinator {
    executor: Arc<ShardExecutor>,
    merger: ShardMerger,
    registry: Arc<ShardRegistry>,
    stats: Arc<RunStats>,
    options: RunOptions,
}

impl RunCoordinator {
    pub fn new(
        executor: Arc<ShardExecutor>,
        merger: ShardMerger,
        registry: Arc<ShardRegistry>,
        options: RunOptions,
    ) -> Self {
        Self {
            executor,
            merger,
            registry,
            stats: Arc::new(RunStats::new()),
            options,
        }
    }

    /// Wire executor, merger and registry from a pipeline configuration
    pub fn from_config(config: &PipelineConfig, runner: Arc<dyn ToolRunner>) -> Result<Self> {
        let layout = config.layout();
        layout.ensure_dirs()?;

        let executor = Arc::new(ShardExecutor::new(
            runner.clone(),
            config.caller.clone(),
            config.shard_inputs(),
            layout.clone(),
        ));
        let merger = ShardMerger::new(runner, config.merge.clone(), layout.clone());
        let registry = Arc::new(ShardRegistry::for_layout(&layout)?);

        Ok(Self::new(
            executor,
            merger,
            registry,
            RunOptions {
                max_parallel_shards: config.max_parallel_shards(),
                cancel_on_failure: config.execution.cancel_on_failure,
            },
        ))
    }

    pub fn registry(&self) -> &ShardRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn executor(&self) -> &ShardExecutor {
        &self.executor
    }

    pub fn merger(&self) -> &ShardMerger {
        &self.merger
    }

    /// Persist the plan, call every shard, and merge once all succeeded
    #[instrument(skip_all, fields(shards = plan.shard_count()))]
    pub async fn run(&self, plan: &ShardPlan) -> Result<MergedArtifact> {
        let layout = self.executor.layout();
        plan.save(&layout.plan_path())?;
        self.registry.register_plan(plan).await?;

        let shard_result = self.run_shards(plan).await;
        self.stats.print_summary();
        shard_result?;

        self.ensure_all_succeeded(plan).await?;
        self.merger.merge(plan).await
    }

    /// Call every registered shard of `plan`, returning the first failure
    pub async fn run_shards(&self, plan: &ShardPlan) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.options.max_parallel_shards.max(1)));
        let mut tasks = JoinSet::new();
        let mut shard_of_task = HashMap::with_capacity(plan.assignments().len());

        for assignment in plan.assignments().iter().cloned() {
            let executor = self.executor.clone();
            let registry = self.registry.clone();
            let stats = self.stats.clone();
            let semaphore = semaphore.clone();
            let index = assignment.index;

            let handle = tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        run_single_shard(&executor, &registry, &stats, &assignment)
                            .await
                            .map(|_| ())
                    }
                    Err(_) => Err(PipelineError::shard_failure(index, "scheduler closed")),
                };
                (index, result)
            });
            shard_of_task.insert(handle.id(), index);
        }

        info!(
            shards = plan.shard_count(),
            max_parallel = self.options.max_parallel_shards,
            "Dispatched shard tasks"
        );

        let mut first_failure: Option<PipelineError> = None;
        while let Some(joined) = tasks.join_next_with_id().await {
            let failure = match joined {
                Ok((_, (index, Ok(())))) => {
                    info!(shard = index, "Shard succeeded");
                    continue;
                }
                Ok((_, (index, Err(e)))) => {
                    error!(shard = index, error = %e, "Shard failed");
                    e
                }
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    let Some(&index) = shard_of_task.get(&e.id()) else {
                        error!(error = %e, "Unknown shard task panicked");
                        continue;
                    };
                    let reason = format!("panicked: {}", e);
                    error!(shard = index, error = %e, "Shard task panicked");
                    self.stats.record_failure(0);
                    self.registry.mark_failed(index, reason.as_str()).await?;
                    PipelineError::shard_failure(index, reason)
                }
            };

            if first_failure.is_none() {
                if self.options.cancel_on_failure {
                    warn!("Cancelling remaining shards");
                    tasks.abort_all();
                }
                first_failure = Some(failure);
            }
        }

        // Aborted tasks never reached a terminal state
        for index in self.registry.unfinished().await {
            self.stats.record_failure(0);
            self.registry.mark_failed(index, CANCELLED).await?;
            warn!(shard = index, "Shard cancelled");
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Merge gate: every shard of the plan must have succeeded
    pub async fn ensure_all_succeeded(&self, plan: &ShardPlan) -> Result<()> {
        match self.registry.first_unsuccessful(plan).await {
            None => Ok(()),
            Some((index, result)) => {
                let reason = match result {
                    Some(r) => r
                        .error
                        .unwrap_or_else(|| format!("shard is {}", r.status)),
                    None => "shard was never registered".to_string(),
                };
                Err(PipelineError::shard_failure(index, reason))
            }
        }
    }
}
