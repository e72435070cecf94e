//! Merging shard outputs into the per-sample VCF
//!
//! ```text
//! shards/00_*.vcf.gz ─┐
//! shards/01_*.vcf.gz ─┼─► bcftools concat ─► bcftools index -t ─► validate ─► merged/{sample}.vcf.gz
//! shards/..          ─┘      (.partial)          (.partial.tbi)     counts,
//!                                                                  order
//! ```

pub mod merger;

pub use merger::{MergedArtifact, ShardMerger};
