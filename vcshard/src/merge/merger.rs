//! Shard merge
//!
//! Concatenates per-shard VCFs in plan order into one bgzipped, tabix-indexed
//! VCF. The result is written beside the final path and only renamed into
//! place after the merged record count and record order check out, so a
//! failed merge never replaces an earlier good output.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::MergeConfig;
use crate::errors::{PipelineError, Result};
use crate::executor::{run_with_timeout, ToolInvocation, ToolRunner};
use crate::sharding::ShardPlan;
use crate::storage::{
    is_non_empty_file, remove_if_exists, with_suffix, write_atomic, StorageLayout,
};
use crate::vcf;

/// The merged output of a fully succeeded run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedArtifact {
    run_id: Uuid,
    sample_id: String,
    /// Consumed shards, in plan order
    shard_indices: Vec<u32>,
    shard_files: Vec<PathBuf>,
    output_file: PathBuf,
    output_index: PathBuf,
    record_count: u64,
    /// Unix seconds
    created_at: u64,
}

impl MergedArtifact {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn sample_id(&self) -> &str {
        &self.sample_id
    }

    pub fn shard_indices(&self) -> &[u32] {
        &self.shard_indices
    }

    pub fn shard_files(&self) -> &[PathBuf] {
        &self.shard_files
    }

    pub fn output_file(&self) -> &Path {
        &self.output_file
    }

    pub fn output_index(&self) -> &Path {
        &self.output_index
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Read a manifest written by a previous merge
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

/// Shard VCF checked before concatenation
struct ShardInput {
    index: u32,
    path: PathBuf,
    records: u64,
}

/// Merges shard outputs with `bcftools`
pub struct ShardMerger {
    runner: Arc<dyn ToolRunner>,
    settings: MergeConfig,
    layout: StorageLayout,
}

impl ShardMerger {
    pub fn new(runner: Arc<dyn ToolRunner>, settings: MergeConfig, layout: StorageLayout) -> Self {
        Self {
            runner,
            settings,
            layout,
        }
    }

    /// `bcftools concat` over the plan's shard VCFs, in plan order
    pub fn concat_invocation(&self, plan: &ShardPlan) -> ToolInvocation {
        ToolInvocation::new(&self.settings.bcftools, "bcftools concat")
            .arg("concat")
            .args(["--threads".to_string(), self.settings.threads.to_string()])
            .args(["-O", "z"])
            .args([
                "-o".to_string(),
                self.layout.partial_vcf_path().display().to_string(),
            ])
            .args(
                plan.assignments()
                    .iter()
                    .map(|a| self.layout.shard_vcf_path(a).display().to_string()),
            )
    }

    /// `bcftools index -t` over the concatenated file
    pub fn index_invocation(&self) -> ToolInvocation {
        ToolInvocation::new(&self.settings.bcftools, "bcftools index")
            .arg("index")
            .args(["--threads".to_string(), self.settings.threads.to_string()])
            .args(["-t", "-f"])
            .arg(self.layout.partial_vcf_path().display().to_string())
    }

    /// Merge every shard of `plan` into the sample's final VCF
    ///
    /// Fails with `MissingShard` for the lowest shard index without a VCF,
    /// before any output is written. Concatenation, indexing and validation
    /// failures discard the partial output and return `MergeFailure`.
    #[instrument(skip(self, plan), fields(sample = %self.layout.sample_id(), shards = plan.shard_count()))]
    pub async fn merge(&self, plan: &ShardPlan) -> Result<MergedArtifact> {
        let inputs = self.collect_inputs(plan)?;
        let expected: u64 = inputs.iter().map(|s| s.records).sum();
        info!(expected_records = expected, "All shard outputs present, merging");

        std::fs::create_dir_all(self.layout.merged_dir())?;
        self.remove_partial_files();

        if let Err(e) = self.concat_and_validate(plan, expected).await {
            warn!(error = %e, "Merge failed, discarding partial output");
            self.remove_partial_files();
            return Err(e);
        }

        let artifact = MergedArtifact {
            run_id: Uuid::new_v4(),
            sample_id: self.layout.sample_id().to_string(),
            shard_indices: inputs.iter().map(|s| s.index).collect(),
            shard_files: inputs.into_iter().map(|s| s.path).collect(),
            output_file: self.layout.merged_vcf_path(),
            output_index: self.layout.merged_index_path(),
            record_count: expected,
            created_at: unix_now(),
        };

        if let Err(e) = self.publish(&artifact) {
            warn!(error = %e, "Publishing merged output failed, previous output kept");
            self.remove_partial_files();
            return Err(e);
        }

        info!(
            output = %artifact.output_file.display(),
            records = artifact.record_count,
            run_id = %artifact.run_id,
            "Merged VCF published"
        );
        Ok(artifact)
    }

    /// Gate on every shard VCF, then count its records
    fn collect_inputs(&self, plan: &ShardPlan) -> Result<Vec<ShardInput>> {
        if let Some(assignment) = plan
            .assignments()
            .iter()
            .find(|a| !is_non_empty_file(&self.layout.shard_vcf_path(a)))
        {
            let path = self.layout.shard_vcf_path(assignment);
            warn!(shard = assignment.index, path = %path.display(), "Shard output missing");
            return Err(PipelineError::MissingShard {
                index: assignment.index,
                path,
            });
        }

        let mut inputs = Vec::with_capacity(plan.assignments().len());
        for assignment in plan.assignments() {
            let path = self.layout.shard_vcf_path(assignment);
            let summary = vcf::scan_vcf(&path).map_err(|e| {
                PipelineError::MergeFailure(format!(
                    "shard {} output {} is unreadable: {}",
                    assignment.index,
                    path.display(),
                    e
                ))
            })?;

            if let Some(stray) = summary
                .contigs()
                .into_iter()
                .find(|c| !assignment.contains(c))
            {
                return Err(PipelineError::MergeFailure(format!(
                    "shard {} has records on {} outside its assignment",
                    assignment.index, stray
                )));
            }

            debug!(shard = assignment.index, records = summary.records, "Shard output scanned");
            inputs.push(ShardInput {
                index: assignment.index,
                path,
                records: summary.records,
            });
        }

        Ok(inputs)
    }

    async fn concat_and_validate(&self, plan: &ShardPlan, expected: u64) -> Result<()> {
        let limit = self.settings.timeout();

        for invocation in [self.concat_invocation(plan), self.index_invocation()] {
            run_with_timeout(self.runner.as_ref(), &invocation, limit)
                .await
                .and_then(|output| output.ensure_success(&invocation.program))
                .map_err(|e| {
                    PipelineError::MergeFailure(format!("{}: {}", invocation.description, e))
                })?;
        }

        let partial = self.layout.partial_vcf_path();
        if !is_non_empty_file(&partial) {
            return Err(PipelineError::MergeFailure(
                "bcftools concat produced no output".to_string(),
            ));
        }
        if !is_non_empty_file(&self.layout.partial_index_path()) {
            return Err(PipelineError::MergeFailure(
                "bcftools index produced no index".to_string(),
            ));
        }

        let summary = vcf::scan_vcf(&partial).map_err(|e| {
            PipelineError::MergeFailure(format!("merged output is unreadable: {}", e))
        })?;
        if summary.records != expected {
            return Err(PipelineError::MergeFailure(format!(
                "merged VCF has {} records, shards hold {}",
                summary.records, expected
            )));
        }
        vcf::check_record_order(&summary, plan.universe()).map_err(|e| {
            PipelineError::MergeFailure(format!("merged VCF out of plan order: {}", e))
        })?;

        Ok(())
    }

    /// Move the validated partial outputs into place
    ///
    /// The VCF rename is the commit point. The index and manifest are swapped
    /// in first with their predecessors set aside, and are put back if the VCF
    /// cannot be published.
    fn publish(&self, artifact: &MergedArtifact) -> Result<()> {
        let manifest = serde_json::to_string_pretty(artifact)?;
        write_atomic(&self.layout.partial_manifest_path(), manifest.as_bytes())?;

        let mut swapped: Vec<Swapped> = Vec::with_capacity(2);
        for (partial, target) in [
            (self.layout.partial_index_path(), self.layout.merged_index_path()),
            (self.layout.partial_manifest_path(), self.layout.manifest_path()),
        ] {
            match Swapped::install(&partial, &target) {
                Ok(s) => swapped.push(s),
                Err(e) => {
                    swapped.into_iter().rev().for_each(Swapped::roll_back);
                    return Err(PipelineError::MergeFailure(format!(
                        "failed to publish {}: {}",
                        target.display(),
                        e
                    )));
                }
            }
        }

        if let Err(e) = std::fs::rename(self.layout.partial_vcf_path(), &artifact.output_file) {
            swapped.into_iter().rev().for_each(Swapped::roll_back);
            return Err(PipelineError::MergeFailure(format!(
                "failed to publish merged VCF: {}",
                e
            )));
        }

        swapped.into_iter().for_each(Swapped::commit);
        Ok(())
    }

    fn remove_partial_files(&self) {
        for path in [
            self.layout.partial_index_path(),
            self.layout.partial_vcf_path(),
            self.layout.partial_manifest_path(),
        ] {
            if let Err(e) = remove_if_exists(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove partial merge output");
            }
        }
    }
}

/// A file renamed into place, with the file it replaced set aside
struct Swapped {
    target: PathBuf,
    previous: Option<PathBuf>,
}

impl Swapped {
    fn install(partial: &Path, target: &Path) -> std::io::Result<Self> {
        let previous = if target.exists() {
            let aside = with_suffix(target, ".previous");
            std::fs::rename(target, &aside)?;
            Some(aside)
        } else {
            None
        };

        if let Err(e) = std::fs::rename(partial, target) {
            if let Some(aside) = &previous {
                let _ = std::fs::rename(aside, target);
            }
            return Err(e);
        }

        Ok(Self {
            target: target.to_path_buf(),
            previous,
        })
    }

    /// Restore the replaced file (or remove the new one if nothing was replaced)
    fn roll_back(self) {
        let restored = match &self.previous {
            Some(aside) => std::fs::rename(aside, &self.target),
            None => remove_if_exists(&self.target),
        };
        if let Err(e) = restored {
            warn!(path = %self.target.display(), error = %e, "Failed to restore previous merged output");
        }
    }

    fn commit(self) {
        if let Some(aside) = &self.previous {
            if let Err(e) = remove_if_exists(aside) {
                warn!(path = %aside.display(), error = %e, "Failed to remove replaced merged output");
            }
        }
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
