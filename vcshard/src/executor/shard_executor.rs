//! Per-shard caller execution
//!
//! ## Output contract
//!
//! ```text
//! check inputs ──► clear old outputs ──► run caller into .staging/{label}/
//!                                              │
//!                    exit 0, both outputs non-empty, VCF readable?
//!                          │ yes                         │ no
//!                          ▼                             ▼
//!            rename into shards/{label}.(g.)vcf.gz   drop staging dir,
//!                                                ShardExecutionFailure
//! ```
//!
//! A shard's final paths therefore either hold a complete caller result or
//! nothing at all.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::CallerConfig;
use crate::errors::{PipelineError, Result};
use crate::sharding::ShardAssignment;
use crate::storage::{
    is_non_empty_file, remove_dir_if_exists, remove_if_exists, with_suffix, StorageLayout,
};
use crate::vcf;

use super::caller::{
    build_invocations, staged_gvcf_path, staged_vcf_path, ShardInputs, ShardOutputs,
};
use super::runner::{ToolInvocation, ToolRunner};
use super::types::{ExecutorError, ExecutorResult};

/// Runs the variant caller for one shard
pub struct ShardExecutor {
    runner: Arc<dyn ToolRunner>,
    caller: CallerConfig,
    inputs: ShardInputs,
    layout: StorageLayout,
}

impl ShardExecutor {
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        caller: CallerConfig,
        inputs: ShardInputs,
        layout: StorageLayout,
    ) -> Self {
        Self {
            runner,
            caller,
            inputs,
            layout,
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Invocations `execute` would run for this shard, for dry runs
    pub fn invocations(&self, assignment: &ShardAssignment) -> Vec<ToolInvocation> {
        build_invocations(
            &self.caller,
            &self.inputs,
            assignment,
            &self.layout.staging_dir(assignment),
        )
    }

    /// Call one shard and publish its outputs
    ///
    /// No retries. Every failure is reported as `ShardExecutionFailure` for
    /// this shard's index, with staging and final outputs removed.
    #[instrument(skip(self, assignment), fields(shard = assignment.index, regions = %assignment.regions_arg()))]
    pub async fn execute(&self, assignment: &ShardAssignment) -> Result<ShardOutputs> {
        let staging = self.layout.staging_dir(assignment);
        let guard = StagingGuard::new(staging.clone());
        let start = Instant::now();

        match self.try_execute(assignment, &staging).await {
            Ok(outputs) => {
                drop(guard);
                info!(
                    records = outputs.record_count,
                    elapsed_secs = start.elapsed().as_secs(),
                    "Shard outputs published"
                );
                Ok(outputs)
            }
            Err(e) => {
                warn!(error = %e, "Shard failed");
                self.remove_final_outputs(assignment);
                drop(guard);
                Err(PipelineError::shard_failure(assignment.index, e.to_string()))
            }
        }
    }

    async fn try_execute(
        &self,
        assignment: &ShardAssignment,
        staging: &Path,
    ) -> ExecutorResult<ShardOutputs> {
        self.inputs.check()?;

        // A previous attempt may have left outputs behind
        self.remove_final_outputs(assignment);
        remove_dir_if_exists(staging)?;
        std::fs::create_dir_all(staging)?;
        std::fs::create_dir_all(self.layout.shards_dir())?;

        let invocations = build_invocations(&self.caller, &self.inputs, assignment, staging);
        let limit = self.caller.timeout();
        let run_all = async {
            for invocation in &invocations {
                debug!(command = %invocation.command_line(), "Running caller step");
                self.runner
                    .run(invocation)
                    .await?
                    .ensure_success(&invocation.program)?;
            }
            Ok::<(), ExecutorError>(())
        };
        match tokio::time::timeout(limit, run_all).await {
            Ok(result) => result?,
            Err(_) => return Err(ExecutorError::Timeout(limit.as_secs())),
        }

        let staged_vcf = staged_vcf_path(staging, assignment);
        let staged_gvcf = staged_gvcf_path(staging, assignment);
        for output in [&staged_vcf, &staged_gvcf] {
            if !is_non_empty_file(output) {
                return Err(ExecutorError::MissingOutput(output.clone()));
            }
        }

        let summary = vcf::scan_vcf(&staged_vcf)?;
        if let Some(stray) = summary
            .contigs()
            .into_iter()
            .find(|c| !assignment.contains(c))
        {
            return Err(ExecutorError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("caller emitted records on {} outside the shard regions", stray),
            )));
        }

        let variant_file = self.layout.shard_vcf_path(assignment);
        let genomic_variant_file = self.layout.shard_gvcf_path(assignment);

        // gVCF first: the merger treats the VCF as the shard's completion marker
        publish(&staged_gvcf, &genomic_variant_file)?;
        publish(&staged_vcf, &variant_file)?;

        Ok(ShardOutputs {
            variant_file,
            genomic_variant_file,
            record_count: summary.records,
        })
    }

    fn remove_final_outputs(&self, assignment: &ShardAssignment) {
        let vcf = self.layout.shard_vcf_path(assignment);
        let gvcf = self.layout.shard_gvcf_path(assignment);
        for path in [
            with_suffix(&vcf, ".tbi"),
            vcf,
            with_suffix(&gvcf, ".tbi"),
            gvcf,
        ] {
            if let Err(e) = remove_if_exists(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove shard output");
            }
        }
    }
}

/// Rename a staged file (and its tabix index, if the caller wrote one)
fn publish(staged: &Path, target: &Path) -> std::io::Result<()> {
    let staged_index = with_suffix(staged, ".tbi");
    if staged_index.exists() {
        std::fs::rename(&staged_index, with_suffix(target, ".tbi"))?;
    }
    std::fs::rename(staged, target)
}

/// Removes the staging directory when dropped, including when the shard
/// task is aborted mid-run.
struct StagingGuard {
    dir: PathBuf,
}

impl StagingGuard {
    fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if let Err(e) = remove_dir_if_exists(&self.dir) {
            warn!(path = %self.dir.display(), error = %e, "Failed to remove staging directory");
        }
    }
}
