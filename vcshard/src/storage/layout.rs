use std::path::{Path, PathBuf};

use crate::sharding::ShardAssignment;

use super::with_suffix;

/// Path conventions for one sample's run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    base: PathBuf,
    sample_id: String,
}

impl StorageLayout {
    pub fn new(base: impl Into<PathBuf>, sample_id: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            sample_id: sample_id.into(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn sample_id(&self) -> &str {
        &self.sample_id
    }

    /// Create the directory skeleton
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.shards_dir())?;
        std::fs::create_dir_all(self.status_dir())?;
        std::fs::create_dir_all(self.merged_dir())?;
        Ok(())
    }

    pub fn plan_path(&self) -> PathBuf {
        self.base.join("plan.json")
    }

    pub fn status_dir(&self) -> PathBuf {
        self.base.join("status")
    }

    /// Status file for the shard with `label`
    pub fn status_path(&self, label: &str) -> PathBuf {
        self.status_dir().join(format!("{}.json", label))
    }

    pub fn shards_dir(&self) -> PathBuf {
        self.base.join("shards")
    }

    /// Region-restricted VCF for a shard
    pub fn shard_vcf_path(&self, assignment: &ShardAssignment) -> PathBuf {
        self.shards_dir()
            .join(format!("{}.vcf.gz", assignment.label()))
    }

    /// All-sites gVCF for a shard
    pub fn shard_gvcf_path(&self, assignment: &ShardAssignment) -> PathBuf {
        self.shards_dir()
            .join(format!("{}.g.vcf.gz", assignment.label()))
    }

    /// Private scratch directory a shard's caller writes into
    pub fn staging_dir(&self, assignment: &ShardAssignment) -> PathBuf {
        self.shards_dir().join(".staging").join(assignment.label())
    }

    pub fn merged_dir(&self) -> PathBuf {
        self.base.join("merged")
    }

    pub fn merged_vcf_path(&self) -> PathBuf {
        self.merged_dir().join(format!("{}.vcf.gz", self.sample_id))
    }

    pub fn merged_index_path(&self) -> PathBuf {
        with_suffix(&self.merged_vcf_path(), ".tbi")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.merged_dir()
            .join(format!("{}.manifest.json", self.sample_id))
    }

    /// Where the merge tool writes before the result is published
    pub fn partial_vcf_path(&self) -> PathBuf {
        self.merged_dir()
            .join(format!(".{}.vcf.gz.partial", self.sample_id))
    }

    /// Index the indexer writes next to the partial VCF
    pub fn partial_index_path(&self) -> PathBuf {
        with_suffix(&self.partial_vcf_path(), ".tbi")
    }

    /// Manifest staged alongside the partial VCF
    pub fn partial_manifest_path(&self) -> PathBuf {
        self.merged_dir()
            .join(format!(".{}.manifest.json.partial", self.sample_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard() -> ShardAssignment {
        ShardAssignment::new(
            2,
            vec!["chr11".into(), "chr12".into(), "chr13".into()],
            None,
        )
    }

    #[test]
    fn test_shard_paths_keyed_by_label() {
        let layout = StorageLayout::new("/data/run", "HG00119");
        assert_eq!(
            layout.shard_vcf_path(&shard()),
            PathBuf::from("/data/run/shards/02_chr11-chr13.vcf.gz")
        );
        assert_eq!(
            layout.shard_gvcf_path(&shard()),
            PathBuf::from("/data/run/shards/02_chr11-chr13.g.vcf.gz")
        );
        assert_eq!(
            layout.staging_dir(&shard()),
            PathBuf::from("/data/run/shards/.staging/02_chr11-chr13")
        );
        assert_eq!(
            layout.status_path(&shard().label()),
            PathBuf::from("/data/run/status/02_chr11-chr13.json")
        );
    }

    #[test]
    fn test_merged_paths_distinct_from_shards() {
        let layout = StorageLayout::new("/data/run", "HG00119");
        assert_eq!(
            layout.merged_vcf_path(),
            PathBuf::from("/data/run/merged/HG00119.vcf.gz")
        );
        assert_eq!(
            layout.merged_index_path(),
            PathBuf::from("/data/run/merged/HG00119.vcf.gz.tbi")
        );
        assert_eq!(
            layout.partial_index_path(),
            PathBuf::from("/data/run/merged/.HG00119.vcf.gz.partial.tbi")
        );
        assert!(!layout.merged_vcf_path().starts_with(layout.shards_dir()));
    }
}
