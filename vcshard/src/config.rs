//! Pipeline configuration
//!
//! Everything a run needs (input paths, shard count, tool binaries, timeouts)
//! comes from this TOML file, saved at `~/.vcshard/pipeline.toml` by default.
//! Nothing is looked up from the ambient environment.
//!
//! ```toml
//! [run]
//! sample_id = "HG00119"
//! base_path = "/mnt/results/HG00119"
//!
//! [inputs]
//! alignment = "/mnt/inputs/HG00119.bam"
//! reference = "/mnt/ref/Homo_sapiens_assembly38.fasta"
//!
//! [sharding]
//! shard_count = 4
//! policy = "remainder_last"
//!
//! [caller]
//! backend = "deep_variant"
//! model_type = "WGS"
//! ```

use crate::errors::{PipelineError, Result};
use crate::executor::{CallerBackend, ModelType, ShardInputs};
use crate::sharding::{ChromosomeUniverse, PartitionPolicy, ShardPlanner};
use crate::storage::{write_atomic, StorageLayout};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Full configuration for a sharded calling run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub run: RunConfig,
    pub inputs: InputsConfig,
    pub sharding: ShardingConfig,
    pub caller: CallerConfig,
    pub merge: MergeConfig,
    pub execution: ExecutionConfig,
    pub logging: LoggingConfig,
}

/// Sample identity and output location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub sample_id: String,
    pub base_path: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            sample_id: "sample".to_string(),
            base_path: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".vcshard")
                .join("runs"),
        }
    }
}

/// Staged input files shared by every shard
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputsConfig {
    /// BAM or CRAM
    pub alignment: PathBuf,
    /// Defaults to `{alignment}.bai` / `{alignment}.crai`
    pub alignment_index: Option<PathBuf>,
    /// FASTA
    pub reference: PathBuf,
    /// Defaults to `{reference}.fai`
    pub reference_index: Option<PathBuf>,
}

/// Sharding parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardingConfig {
    pub shard_count: u32,
    pub policy: PartitionPolicy,
    /// Keep trailing chrX/chrY in the final shard
    pub pin_sex_chromosomes: bool,
    /// Explicit chromosome list; empty means "derive"
    pub chromosomes: Vec<String>,
    /// Derive the universe from the reference `.fai` instead of GRCh38
    pub chromosomes_from_index: bool,
    /// With `chromosomes_from_index`, keep only autosomes and sex chromosomes
    pub primary_only: bool,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            shard_count: 4,
            policy: PartitionPolicy::RemainderLast,
            pin_sex_chromosomes: true,
            chromosomes: Vec::new(),
            chromosomes_from_index: false,
            primary_only: true,
        }
    }
}

/// Variant caller invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallerConfig {
    pub backend: CallerBackend,
    /// Caller executable; defaults to the backend's own tool
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    pub model_type: ModelType,
    /// Intra-task parallelism passed to the caller (`--num_shards`)
    pub num_shards: u32,
    /// Wall-clock limit for one shard, all caller steps included
    pub timeout_secs: u64,
    /// Appended verbatim to the caller command line
    pub extra_args: Vec<String>,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            backend: CallerBackend::DeepVariant,
            binary: None,
            model_type: ModelType::Wgs,
            num_shards: 16,
            timeout_secs: 6 * 60 * 60,
            extra_args: Vec::new(),
        }
    }
}

impl CallerConfig {
    /// Configured executable, or the backend default
    pub fn binary(&self) -> &str {
        self.binary
            .as_deref()
            .unwrap_or_else(|| self.backend.default_binary())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Merge tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub bcftools: String,
    pub threads: u32,
    pub timeout_secs: u64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            bcftools: "bcftools".to_string(),
            threads: 4,
            timeout_secs: 2 * 60 * 60,
        }
    }
}

impl MergeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Local orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Concurrent shard tasks; 0 means one per shard
    pub max_parallel_shards: usize,
    /// Abort sibling shards after the first failure
    pub cancel_on_failure: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_parallel_shards: 0,
            cancel_on_failure: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Rolling log directory for long runs; defaults to `~/.vcshard/logs`
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Get default configuration file path: `~/.vcshard/pipeline.toml`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| {
            PipelineError::invalid_config("Could not determine home directory")
        })?;

        Ok(home.join(".vcshard").join("pipeline.toml"))
    }

    /// Load configuration from file and validate it
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to read config file");
            e
        })?;

        let config: PipelineConfig = toml::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to file (temp file + rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        write_atomic(path, toml_string.as_bytes())?;

        tracing::info!(path = %path.display(), "Pipeline configuration saved");
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.run.sample_id.trim().is_empty() {
            return Err(PipelineError::invalid_config("run.sample_id must not be empty"));
        }
        if self
            .run
            .sample_id
            .contains(|c: char| c == '/' || c == '\\' || c.is_whitespace())
        {
            return Err(PipelineError::invalid_config(
                "run.sample_id must not contain path separators or whitespace",
            ));
        }

        if self.sharding.shard_count == 0 {
            return Err(PipelineError::invalid_config(
                "sharding.shard_count must be positive",
            ));
        }
        if self.sharding.chromosomes_from_index && !self.sharding.chromosomes.is_empty() {
            return Err(PipelineError::invalid_config(
                "set either sharding.chromosomes or sharding.chromosomes_from_index, not both",
            ));
        }

        if self.caller.binary().trim().is_empty() {
            return Err(PipelineError::invalid_config("caller.binary must not be empty"));
        }
        if self.caller.backend.is_foreign_binary(self.caller.binary()) {
            return Err(PipelineError::invalid_config(format!(
                "caller.binary {} does not match caller.backend {:?}",
                self.caller.binary(),
                self.caller.backend
            )));
        }
        if self.caller.num_shards == 0 {
            return Err(PipelineError::invalid_config(
                "caller.num_shards must be at least 1",
            ));
        }
        if self.caller.timeout_secs == 0 {
            return Err(PipelineError::invalid_config(
                "caller.timeout_secs must be positive",
            ));
        }
        if self.merge.timeout_secs == 0 {
            return Err(PipelineError::invalid_config(
                "merge.timeout_secs must be positive",
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(PipelineError::invalid_config(
                    "logging.level must be one of: trace, debug, info, warn, error",
                ))
            }
        }

        Ok(())
    }

    /// Storage layout for this run
    pub fn layout(&self) -> StorageLayout {
        StorageLayout::new(&self.run.base_path, &self.run.sample_id)
    }

    /// Input files as seen by the executor
    pub fn shard_inputs(&self) -> ShardInputs {
        ShardInputs::new(&self.inputs.alignment, &self.inputs.reference)
            .with_alignment_index(self.inputs.alignment_index.clone())
            .with_reference_index(self.inputs.reference_index.clone())
    }

    /// Chromosome universe to shard over
    pub fn universe(&self) -> Result<ChromosomeUniverse> {
        if !self.sharding.chromosomes.is_empty() {
            return ChromosomeUniverse::from_names(self.sharding.chromosomes.iter().cloned());
        }
        if self.sharding.chromosomes_from_index {
            let fai = self.shard_inputs().reference_index();
            return ChromosomeUniverse::from_fai(&fai, self.sharding.primary_only);
        }
        Ok(ChromosomeUniverse::grch38())
    }

    /// Planner configured from the `[sharding]` section
    pub fn planner(&self) -> ShardPlanner {
        ShardPlanner::new(self.sharding.policy)
            .with_sex_chromosome_pinning(self.sharding.pin_sex_chromosomes)
    }

    /// Effective shard-task concurrency
    pub fn max_parallel_shards(&self) -> usize {
        match self.execution.max_parallel_shards {
            0 => self.sharding.shard_count as usize,
            n => n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sharding.shard_count, 4);
        assert_eq!(config.max_parallel_shards(), 4);
        assert_eq!(config.caller.timeout(), Duration::from_secs(21_600));
    }

    #[test]
    fn test_caller_binary_follows_backend() {
        let mut config = PipelineConfig::default();
        assert_eq!(config.caller.binary(), "/opt/deepvariant/bin/run_deepvariant");

        config.caller.backend = CallerBackend::Gatk;
        config.validate().unwrap();
        assert_eq!(config.caller.binary(), "gatk");

        config.caller.binary = Some("/opt/deepvariant/bin/run_deepvariant".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("does not match caller.backend"));

        config.caller.backend = CallerBackend::DeepVariant;
        config.validate().unwrap();
        config.caller.binary = Some("/usr/local/bin/gatk".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pipeline.toml");

        let mut config = PipelineConfig::default();
        config.run.sample_id = "HG00119".to_string();
        config.run.base_path = temp_dir.path().join("run");
        config.sharding.shard_count = 6;
        config.sharding.policy = PartitionPolicy::LengthBalanced;
        config.caller.model_type = ModelType::Wes;
        config.save(&path).unwrap();

        let loaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(loaded.run.sample_id, "HG00119");
        assert_eq!(loaded.sharding.shard_count, 6);
        assert_eq!(loaded.sharding.policy, PartitionPolicy::LengthBalanced);
        assert_eq!(loaded.caller.model_type, ModelType::Wes);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [run]
            sample_id = "NA12878"
            base_path = "/mnt/results"

            [sharding]
            shard_count = 8

            [caller]
            backend = "gatk"
            binary = "gatk"
            model_type = "WES"
            "#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.sharding.shard_count, 8);
        assert!(config.sharding.pin_sex_chromosomes);
        assert_eq!(config.caller.backend, CallerBackend::Gatk);
        assert_eq!(config.merge.bcftools, "bcftools");
        assert_eq!(
            config.layout().merged_vcf_path(),
            PathBuf::from("/mnt/results/merged/NA12878.vcf.gz")
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.sharding.shard_count = 0;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfiguration(_))
        ));

        let mut config = PipelineConfig::default();
        config.run.sample_id = "bad/name".to_string();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.sharding.chromosomes = vec!["chr1".into()];
        config.sharding.chromosomes_from_index = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_universe_sources() {
        let temp_dir = TempDir::new().unwrap();

        let config = PipelineConfig::default();
        assert_eq!(config.universe().unwrap().len(), 24);

        let mut config = PipelineConfig::default();
        config.sharding.chromosomes = vec!["1".into(), "2".into(), "X".into()];
        assert_eq!(config.universe().unwrap().names(), vec!["1", "2", "X"]);

        let reference = temp_dir.path().join("ref.fasta");
        std::fs::write(
            temp_dir.path().join("ref.fasta.fai"),
            "chr1\t1000\t6\t60\t61\nchr2\t800\t1030\t60\t61\nchrM\t100\t1900\t60\t61\n",
        )
        .unwrap();
        let mut config = PipelineConfig::default();
        config.inputs.reference = reference;
        config.sharding.chromosomes_from_index = true;
        let universe = config.universe().unwrap();
        assert_eq!(universe.names(), vec!["chr1", "chr2"]);
        assert_eq!(universe.lengths(), Some(vec![1000, 800]));
    }
}
