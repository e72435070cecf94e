//! Shard planner: partition the chromosome universe into contiguous groups
//!
//! ## Policies
//!
//! - **RemainderLast**: equal chromosome counts, remainder to the final shard.
//!   Trailing sex chromosomes are pinned to the final shard when enabled, so
//!   GRCh38 with 4 shards splits the 22 autosomes 5/5/5/7 and the last shard
//!   also takes chrX and chrY:
//!
//! ```text
//! ┌──────────┬───────────┬────────────┬──────────────────────────┐
//! │ shard 0  │ shard 1   │ shard 2    │ shard 3                  │
//! │ chr1-5   │ chr6-10   │ chr11-15   │ chr16-22, chrX, chrY     │
//! └──────────┴───────────┴────────────┴──────────────────────────┘
//! ```
//!
//! - **LengthBalanced**: contiguous groups whose base-pair totals track the
//!   remaining average, so each task gets a similar amount of sequence.
//!
//! Both are pure functions of (universe, shard count, options).

use crate::errors::{PipelineError, Result};
use serde::{Deserialize, Serialize};

use super::chromosome::ChromosomeUniverse;
use super::shard::{ShardAssignment, ShardPlan};

/// How chromosomes are distributed across shards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionPolicy {
    /// Equal chromosome counts, remainder (and pinned sex chromosomes) to the last shard
    #[default]
    RemainderLast,
    /// Contiguous groups balanced by total base pairs
    LengthBalanced,
}

/// Computes [`ShardPlan`]s
#[derive(Debug, Clone)]
pub struct ShardPlanner {
    policy: PartitionPolicy,
    pin_sex_chromosomes: bool,
}

impl Default for ShardPlanner {
    fn default() -> Self {
        Self {
            policy: PartitionPolicy::RemainderLast,
            pin_sex_chromosomes: true,
        }
    }
}

impl ShardPlanner {
    pub fn new(policy: PartitionPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    /// Pin trailing chrX/chrY to the final shard (RemainderLast only)
    pub fn with_sex_chromosome_pinning(mut self, enabled: bool) -> Self {
        self.pin_sex_chromosomes = enabled;
        self
    }

    pub fn policy(&self) -> PartitionPolicy {
        self.policy
    }

    /// Partition `universe` into `shard_count` shards.
    ///
    /// Fails with `InvalidConfiguration` when `shard_count` is zero or larger
    /// than the number of chromosomes.
    pub fn plan(&self, universe: &ChromosomeUniverse, shard_count: u32) -> Result<ShardPlan> {
        let n = universe.len();
        let k = shard_count as usize;

        if k == 0 {
            return Err(PipelineError::invalid_config(
                "shard_count must be positive",
            ));
        }
        if k > n {
            return Err(PipelineError::invalid_config(format!(
                "shard_count {} exceeds the {} chromosomes available; some shards would be empty",
                shard_count, n
            )));
        }

        let sizes = match self.policy {
            PartitionPolicy::RemainderLast => {
                let tail = if self.pin_sex_chromosomes {
                    universe.sex_chromosome_tail_len()
                } else {
                    0
                };
                remainder_last_sizes(n, tail, k)
            }
            PartitionPolicy::LengthBalanced => {
                let lengths = universe.lengths().ok_or_else(|| {
                    PipelineError::invalid_config(
                        "length-balanced sharding needs a length for every chromosome",
                    )
                })?;
                length_balanced_sizes(&lengths, k)
            }
        };

        let chromosomes = universe.chromosomes();
        let mut assignments = Vec::with_capacity(k);
        let mut start = 0;
        for (index, size) in sizes.into_iter().enumerate() {
            let slice = &chromosomes[start..start + size];
            let length_bp = slice.iter().map(|c| c.length).sum::<Option<u64>>();
            assignments.push(ShardAssignment::new(
                index as u32,
                slice.iter().map(|c| c.name.clone()).collect(),
                length_bp,
            ));
            start += size;
        }

        let plan = ShardPlan::from_parts(shard_count, self.policy, universe.clone(), assignments)?;

        tracing::debug!(
            shards = shard_count,
            chromosomes = n,
            policy = ?self.policy,
            "Computed shard plan"
        );

        Ok(plan)
    }
}

/// Shard sizes for the remainder-last policy.
///
/// `tail` trailing chromosomes always go to the final shard. Pinning is only
/// honoured when the remaining body still gives every shard one chromosome.
fn remainder_last_sizes(n: usize, tail: usize, k: usize) -> Vec<usize> {
    let (body, tail) = if tail > 0 && n - tail >= k {
        (n - tail, tail)
    } else {
        (n, 0)
    };

    let base = body / k;
    let mut sizes = vec![base; k];
    sizes[k - 1] += body - base * k + tail;
    sizes
}

/// Shard sizes for the length-balanced policy.
///
/// Walks left to right; each shard takes chromosomes until it reaches the
/// average of what is left, including the crossing chromosome only when that
/// lands closer to the target. Every later shard keeps at least one contig.
fn length_balanced_sizes(lengths: &[u64], k: usize) -> Vec<usize> {
    let n = lengths.len();
    let mut sizes = Vec::with_capacity(k);
    let mut start = 0;
    let mut remaining: u64 = lengths.iter().sum();

    for shard in 0..k {
        let shards_left = k - shard;
        if shards_left == 1 {
            sizes.push(n - start);
            break;
        }

        let target = remaining / shards_left as u64;
        let max_end = n - (shards_left - 1);
        let mut end = start + 1;
        let mut acc = lengths[start];

        while end < max_end {
            let next = acc + lengths[end];
            if next > target {
                if next - target < target.saturating_sub(acc) {
                    acc = next;
                    end += 1;
                }
                break;
            }
            acc = next;
            end += 1;
        }

        sizes.push(end - start);
        remaining -= acc;
        start = end;
    }

    sizes
}
