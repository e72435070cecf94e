//! Shard registry for tracking per-shard execution state
//!
//! Each shard's [`ShardResult`] is persisted to its own status file
//! (`{base}/status/{label}.json`), so independent shard tasks on different
//! machines never write the same file. Loading the registry reads whatever
//! status files are present.

use crate::errors::{PipelineError, Result};
use crate::storage::{write_atomic, StorageLayout};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::shard::{ShardAssignment, ShardPlan};

/// Status of a shard in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    /// Shard is planned but not dispatched
    Pending,
    /// Caller is running for this shard
    Running,
    /// Caller exited cleanly and both outputs were published
    Succeeded,
    /// Caller, inputs or outputs failed, or the shard was cancelled
    Failed,
}

impl ShardStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Allowed lifecycle edges. `Pending → Failed` covers shards cancelled
    /// before they started.
    pub fn can_transition_to(self, next: ShardStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}

impl std::fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome record for one shard of the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardResult {
    pub shard_index: u32,
    pub label: String,
    pub variant_file: PathBuf,
    pub genomic_variant_file: PathBuf,
    pub status: ShardStatus,
    pub error: Option<String>,
    /// Unix seconds
    pub started_at: Option<u64>,
    /// Unix seconds
    pub finished_at: Option<u64>,
    /// Data lines in the shard VCF, once the shard succeeded
    pub record_count: Option<u64>,
}

impl ShardResult {
    /// Fresh `Pending` record for a plan entry
    pub fn pending(assignment: &ShardAssignment, layout: &StorageLayout) -> Self {
        Self {
            shard_index: assignment.index,
            label: assignment.label(),
            variant_file: layout.shard_vcf_path(assignment),
            genomic_variant_file: layout.shard_gvcf_path(assignment),
            status: ShardStatus::Pending,
            error: None,
            started_at: None,
            finished_at: None,
            record_count: None,
        }
    }

    /// Move to `next`, rejecting edges outside the lifecycle
    fn transition(&mut self, next: ShardStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(PipelineError::Registry(format!(
                "shard {} cannot move from {} to {}",
                self.shard_index, self.status, next
            )));
        }
        self.status = next;
        match next {
            ShardStatus::Running => self.started_at = Some(unix_now()),
            ShardStatus::Succeeded | ShardStatus::Failed => self.finished_at = Some(unix_now()),
            ShardStatus::Pending => {}
        }
        Ok(())
    }

    /// Wall-clock seconds between start and finish
    pub fn duration_secs(&self) -> Option<u64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }
}

/// Registry of shard results for the current run
pub struct ShardRegistry {
    /// Run layout; one status file per shard under its status directory
    layout: StorageLayout,

    /// Results by shard index
    results: RwLock<BTreeMap<u32, ShardResult>>,
}

impl ShardRegistry {
    /// Create a new shard registry for a run layout
    pub fn new(layout: StorageLayout) -> Result<Self> {
        std::fs::create_dir_all(layout.status_dir())?;

        Ok(Self {
            layout,
            results: RwLock::new(BTreeMap::new()),
        })
    }

    /// Create for a borrowed run layout
    pub fn for_layout(layout: &StorageLayout) -> Result<Self> {
        Self::new(layout.clone())
    }

    /// Load every status file in the status directory
    pub async fn load(&self) -> Result<()> {
        let mut loaded = BTreeMap::new();

        for entry in std::fs::read_dir(self.layout.status_dir())? {
            let path = entry?.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            let data = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<ShardResult>(&data) {
                Ok(result) => {
                    loaded.insert(result.shard_index, result);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable status file");
                }
            }
        }

        let mut results = self.results.write().await;
        *results = loaded;

        info!(count = results.len(), "Loaded shard registry");
        Ok(())
    }

    /// Reset the registry to `Pending` for every shard of a plan
    pub async fn register_plan(&self, plan: &ShardPlan) -> Result<()> {
        // Status files from an earlier plan may use other labels
        for entry in std::fs::read_dir(self.layout.status_dir())? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                std::fs::remove_file(&path)?;
            }
        }

        let mut results = self.results.write().await;
        results.clear();
        for assignment in plan.assignments() {
            let result = ShardResult::pending(assignment, &self.layout);
            self.persist(&result)?;
            results.insert(assignment.index, result);
        }

        info!(shards = plan.shard_count(), "Registered shard plan");
        Ok(())
    }

    /// Register (or reset) a single shard as `Pending`
    pub async fn register_shard(&self, assignment: &ShardAssignment) -> Result<()> {
        let result = ShardResult::pending(assignment, &self.layout);
        self.persist(&result)?;

        let mut results = self.results.write().await;
        results.insert(assignment.index, result);

        debug!(shard = assignment.index, label = %assignment.label(), "Registered shard");
        Ok(())
    }

    /// Mark a shard as dispatched
    pub async fn mark_running(&self, index: u32) -> Result<ShardResult> {
        self.update(index, |result| result.transition(ShardStatus::Running))
            .await
    }

    /// Mark a shard as succeeded with its VCF record count
    pub async fn mark_succeeded(&self, index: u32, record_count: u64) -> Result<ShardResult> {
        self.update(index, |result| {
            result.transition(ShardStatus::Succeeded)?;
            result.record_count = Some(record_count);
            Ok(())
        })
        .await
    }

    /// Mark a shard as failed with the reason
    pub async fn mark_failed(&self, index: u32, error: impl Into<String>) -> Result<ShardResult> {
        let error = error.into();
        self.update(index, move |result| {
            result.transition(ShardStatus::Failed)?;
            result.error = Some(error);
            Ok(())
        })
        .await
    }

    /// Get a shard's result
    pub async fn get(&self, index: u32) -> Option<ShardResult> {
        let results = self.results.read().await;
        results.get(&index).cloned()
    }

    /// Get shard status
    pub async fn status(&self, index: u32) -> Option<ShardStatus> {
        let results = self.results.read().await;
        results.get(&index).map(|r| r.status)
    }

    /// All results, in shard order
    pub async fn list(&self) -> Vec<ShardResult> {
        let results = self.results.read().await;
        results.values().cloned().collect()
    }

    /// Shards that have not reached a terminal state
    pub async fn unfinished(&self) -> Vec<u32> {
        let results = self.results.read().await;
        results
            .values()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.shard_index)
            .collect()
    }

    /// Whether every shard of the plan succeeded
    pub async fn all_succeeded(&self, plan: &ShardPlan) -> bool {
        let results = self.results.read().await;
        plan.assignments().iter().all(|a| {
            results
                .get(&a.index)
                .map(|r| r.status == ShardStatus::Succeeded)
                .unwrap_or(false)
        })
    }

    /// First shard in plan order that has not succeeded, with its status
    pub async fn first_unsuccessful(&self, plan: &ShardPlan) -> Option<(u32, Option<ShardResult>)> {
        let results = self.results.read().await;
        plan.assignments().iter().find_map(|a| match results.get(&a.index) {
            Some(r) if r.status == ShardStatus::Succeeded => None,
            other => Some((a.index, other.cloned())),
        })
    }

    async fn update<F>(&self, index: u32, apply: F) -> Result<ShardResult>
    where
        F: FnOnce(&mut ShardResult) -> Result<()>,
    {
        let mut results = self.results.write().await;

        let entry = results.get_mut(&index).ok_or_else(|| {
            PipelineError::Registry(format!("shard {} is not registered", index))
        })?;

        let mut updated = entry.clone();
        apply(&mut updated)?;
        self.persist(&updated)?;
        *entry = updated.clone();

        debug!(shard = index, status = %updated.status, "Updated shard status");
        Ok(updated)
    }

    fn persist(&self, result: &ShardResult) -> Result<()> {
        let path = self.layout.status_path(&result.label);
        let data = serde_json::to_string_pretty(result)?;
        write_atomic(&path, data.as_bytes())?;
        Ok(())
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
