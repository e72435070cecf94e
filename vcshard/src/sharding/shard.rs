//! Shard assignment and plan types
//!
//! A [`ShardPlan`] is computed once per run and handed, unchanged, to every
//! shard task and to the merger. Tasks never derive their chromosome subset
//! from a raw task index on their own.

use crate::errors::{PipelineError, Result};
use crate::storage::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::chromosome::ChromosomeUniverse;
use super::planner::PartitionPolicy;

/// Chromosomes assigned to one shard task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardAssignment {
    /// Shard position in the plan (0-indexed)
    pub index: u32,

    /// Contiguous, ordered slice of the chromosome universe
    pub chromosomes: Vec<String>,

    /// Total length of the assigned chromosomes, when known
    pub length_bp: Option<u64>,
}

impl ShardAssignment {
    pub fn new(index: u32, chromosomes: Vec<String>, length_bp: Option<u64>) -> Self {
        Self {
            index,
            chromosomes,
            length_bp,
        }
    }

    /// Number of chromosomes in this shard
    pub fn num_chromosomes(&self) -> usize {
        self.chromosomes.len()
    }

    /// Check if a chromosome is in this shard
    pub fn contains(&self, chromosome: &str) -> bool {
        self.chromosomes.iter().any(|c| c == chromosome)
    }

    /// Comma-separated region restriction passed to the caller
    pub fn regions_arg(&self) -> String {
        self.chromosomes.join(",")
    }

    /// File-name-safe label, unique within a plan and sorting in plan order.
    ///
    /// `00_chr1-chr5` for multi-chromosome shards, `03_chrX` for singletons.
    pub fn label(&self) -> String {
        let span = match (self.chromosomes.first(), self.chromosomes.last()) {
            (Some(first), Some(last)) if first != last => format!("{}-{}", first, last),
            (Some(first), _) => first.clone(),
            _ => "empty".to_string(),
        };
        let safe: String = span
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{:02}_{}", self.index, safe)
    }
}

/// Deterministic mapping from shard index to chromosome subset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardPlan {
    shard_count: u32,
    policy: PartitionPolicy,
    universe: ChromosomeUniverse,
    assignments: Vec<ShardAssignment>,
}

impl ShardPlan {
    /// Assemble and validate a plan. Used by the planner; external callers go
    /// through [`super::ShardPlanner::plan`] or [`ShardPlan::load`].
    pub(crate) fn from_parts(
        shard_count: u32,
        policy: PartitionPolicy,
        universe: ChromosomeUniverse,
        assignments: Vec<ShardAssignment>,
    ) -> Result<Self> {
        let plan = Self {
            shard_count,
            policy,
            universe,
            assignments,
        };
        plan.validate()?;
        Ok(plan)
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn policy(&self) -> PartitionPolicy {
        self.policy
    }

    pub fn universe(&self) -> &ChromosomeUniverse {
        &self.universe
    }

    /// Assignments in shard-index order
    pub fn assignments(&self) -> &[ShardAssignment] {
        &self.assignments
    }

    /// Assignment for a shard index
    pub fn assignment(&self, index: u32) -> Result<&ShardAssignment> {
        self.assignments.get(index as usize).ok_or_else(|| {
            PipelineError::invalid_config(format!(
                "shard index {} out of range (plan has {} shards)",
                index, self.shard_count
            ))
        })
    }

    /// All shards' chromosomes concatenated in shard order
    pub fn concatenated(&self) -> Vec<String> {
        self.assignments
            .iter()
            .flat_map(|a| a.chromosomes.iter().cloned())
            .collect()
    }

    /// Shard that owns a chromosome
    pub fn shard_for(&self, chromosome: &str) -> Option<&ShardAssignment> {
        self.assignments.iter().find(|a| a.contains(chromosome))
    }

    /// Check the plan invariants: the universe is duplicate-free, indices are
    /// 0..k-1 in order, no shard is empty, and shard-order concatenation
    /// reproduces the universe exactly.
    pub fn validate(&self) -> Result<()> {
        self.universe.validate()?;
        if self.shard_count == 0 {
            return Err(PipelineError::invalid_config("plan has zero shards"));
        }
        if self.assignments.len() != self.shard_count as usize {
            return Err(PipelineError::invalid_config(format!(
                "plan declares {} shards but has {} assignments",
                self.shard_count,
                self.assignments.len()
            )));
        }

        for (position, assignment) in self.assignments.iter().enumerate() {
            if assignment.index as usize != position {
                return Err(PipelineError::invalid_config(format!(
                    "assignment at position {} has index {}",
                    position, assignment.index
                )));
            }
            if assignment.chromosomes.is_empty() {
                return Err(PipelineError::invalid_config(format!(
                    "shard {} has no chromosomes",
                    assignment.index
                )));
            }
        }

        if self.concatenated() != self.universe.names() {
            return Err(PipelineError::invalid_config(
                "shard chromosomes do not reproduce the chromosome universe in order",
            ));
        }

        Ok(())
    }

    /// Persist to JSON (atomic write)
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, json.as_bytes())?;
        tracing::info!(path = %path.display(), shards = self.shard_count, "Shard plan saved");
        Ok(())
    }

    /// Load a persisted plan and re-check its invariants
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to read shard plan");
            e
        })?;
        let plan: ShardPlan = serde_json::from_str(&data)?;
        plan.validate()?;
        Ok(plan)
    }
}
