//! Variant caller command construction
//!
//! Turns a shard assignment plus the run's inputs into the exact tool
//! invocations that produce `{label}.vcf.gz` and `{label}.g.vcf.gz` in the
//! shard's staging directory.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::CallerConfig;
use crate::sharding::ShardAssignment;
use crate::storage::{is_non_empty_file, with_suffix};

use super::runner::ToolInvocation;
use super::types::{ExecutorError, ExecutorResult};

/// DeepVariant model selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModelType {
    /// Illumina whole genome
    #[default]
    #[serde(rename = "WGS")]
    Wgs,
    /// Illumina exome
    #[serde(rename = "WES")]
    Wes,
    /// PacBio HiFi
    #[serde(rename = "PACBIO")]
    Pacbio,
    /// Oxford Nanopore R10.4
    #[serde(rename = "ONT_R104")]
    OntR104,
    #[serde(rename = "HYBRID_PACBIO_ILLUMINA")]
    HybridPacbioIllumina,
}

impl ModelType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wgs => "WGS",
            Self::Wes => "WES",
            Self::Pacbio => "PACBIO",
            Self::OntR104 => "ONT_R104",
            Self::HybridPacbioIllumina => "HYBRID_PACBIO_ILLUMINA",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which caller produces the shard outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerBackend {
    /// `run_deepvariant`, one invocation writing both outputs
    #[default]
    DeepVariant,
    /// `gatk HaplotypeCaller -ERC GVCF` followed by `gatk GenotypeGVCFs`
    Gatk,
}

impl CallerBackend {
    /// Executable used when `caller.binary` is not set
    pub fn default_binary(&self) -> &'static str {
        match self {
            Self::DeepVariant => "/opt/deepvariant/bin/run_deepvariant",
            Self::Gatk => "gatk",
        }
    }

    /// Whether an executable path names the other backend's tool
    pub fn is_foreign_binary(&self, binary: &str) -> bool {
        let name = Path::new(binary)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(binary);
        match self {
            Self::DeepVariant => name == "gatk",
            Self::Gatk => name == "run_deepvariant",
        }
    }
}

/// Shared input files for every shard of a sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInputs {
    alignment: PathBuf,
    alignment_index: Option<PathBuf>,
    reference: PathBuf,
    reference_index: Option<PathBuf>,
}

impl ShardInputs {
    pub fn new(alignment: impl Into<PathBuf>, reference: impl Into<PathBuf>) -> Self {
        Self {
            alignment: alignment.into(),
            alignment_index: None,
            reference: reference.into(),
            reference_index: None,
        }
    }

    pub fn with_alignment_index(mut self, index: Option<PathBuf>) -> Self {
        self.alignment_index = index;
        self
    }

    pub fn with_reference_index(mut self, index: Option<PathBuf>) -> Self {
        self.reference_index = index;
        self
    }

    pub fn alignment(&self) -> &Path {
        &self.alignment
    }

    pub fn reference(&self) -> &Path {
        &self.reference
    }

    /// Explicit index, or `{alignment}.crai` for CRAM and `{alignment}.bai` otherwise
    pub fn alignment_index(&self) -> PathBuf {
        if let Some(index) = &self.alignment_index {
            return index.clone();
        }
        let is_cram = self
            .alignment
            .extension()
            .map(|e| e.eq_ignore_ascii_case("cram"))
            .unwrap_or(false);
        with_suffix(&self.alignment, if is_cram { ".crai" } else { ".bai" })
    }

    /// Explicit index, or `{reference}.fai`
    pub fn reference_index(&self) -> PathBuf {
        self.reference_index
            .clone()
            .unwrap_or_else(|| with_suffix(&self.reference, ".fai"))
    }

    /// Fail with the first input that is absent or empty
    pub fn check(&self) -> ExecutorResult<()> {
        let required = [
            self.alignment.clone(),
            self.alignment_index(),
            self.reference.clone(),
            self.reference_index(),
        ];
        match required.into_iter().find(|p| !is_non_empty_file(p)) {
            Some(missing) => Err(ExecutorError::MissingInput(missing)),
            None => Ok(()),
        }
    }
}

/// Published outputs of a succeeded shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardOutputs {
    pub variant_file: PathBuf,
    pub genomic_variant_file: PathBuf,
    /// Data lines in the VCF
    pub record_count: u64,
}

/// Caller VCF inside the staging directory
pub fn staged_vcf_path(staging: &Path, assignment: &ShardAssignment) -> PathBuf {
    staging.join(format!("{}.vcf.gz", assignment.label()))
}

/// Caller gVCF inside the staging directory
pub fn staged_gvcf_path(staging: &Path, assignment: &ShardAssignment) -> PathBuf {
    staging.join(format!("{}.g.vcf.gz", assignment.label()))
}

/// Tool invocations that call one shard into `staging`, in execution order
pub fn build_invocations(
    caller: &CallerConfig,
    inputs: &ShardInputs,
    assignment: &ShardAssignment,
    staging: &Path,
) -> Vec<ToolInvocation> {
    let vcf = staged_vcf_path(staging, assignment);
    let gvcf = staged_gvcf_path(staging, assignment);
    let label = assignment.label();

    match caller.backend {
        CallerBackend::DeepVariant => {
            let invocation = ToolInvocation::new(caller.binary(), format!("deepvariant {}", label))
                .arg(format!("--model_type={}", caller.model_type))
                .arg(format!("--ref={}", inputs.reference().display()))
                .arg(format!("--reads={}", inputs.alignment().display()))
                .arg(format!("--regions={}", assignment.regions_arg()))
                .arg(format!("--output_vcf={}", vcf.display()))
                .arg(format!("--output_gvcf={}", gvcf.display()))
                .arg(format!("--num_shards={}", caller.num_shards))
                .arg(format!(
                    "--intermediate_results_dir={}",
                    staging.join("intermediate").display()
                ))
                .args(caller.extra_args.iter().cloned())
                .current_dir(staging);
            vec![invocation]
        }
        CallerBackend::Gatk => {
            let intervals: Vec<String> = assignment
                .chromosomes
                .iter()
                .flat_map(|c| ["-L".to_string(), c.clone()])
                .collect();

            let haplotype_caller =
                ToolInvocation::new(caller.binary(), format!("HaplotypeCaller {}", label))
                    .arg("HaplotypeCaller")
                    .args(["-R".to_string(), inputs.reference().display().to_string()])
                    .args(["-I".to_string(), inputs.alignment().display().to_string()])
                    .args(["-O".to_string(), gvcf.display().to_string()])
                    .args(["-ERC", "GVCF"])
                    .args(intervals.iter().cloned())
                    .args([
                        "--native-pair-hmm-threads".to_string(),
                        caller.num_shards.to_string(),
                    ])
                    .args(caller.extra_args.iter().cloned())
                    .current_dir(staging);

            let genotype = ToolInvocation::new(caller.binary(), format!("GenotypeGVCFs {}", label))
                .arg("GenotypeGVCFs")
                .args(["-R".to_string(), inputs.reference().display().to_string()])
                .args(["-V".to_string(), gvcf.display().to_string()])
                .args(["-O".to_string(), vcf.display().to_string()])
                .args(intervals)
                .current_dir(staging);

            vec![haplotype_caller, genotype]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard() -> ShardAssignment {
        ShardAssignment::new(1, vec!["chr6".into(), "chr7".into()], None)
    }

    #[test]
    fn test_model_type_serde_names() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            model: ModelType,
        }

        let toml = toml::to_string(&Wrapper {
            model: ModelType::OntR104,
        })
        .unwrap();
        assert_eq!(toml.trim(), r#"model = "ONT_R104""#);

        let parsed: Wrapper = toml::from_str(r#"model = "HYBRID_PACBIO_ILLUMINA""#).unwrap();
        assert_eq!(parsed.model, ModelType::HybridPacbioIllumina);
        assert_eq!(ModelType::Wes.to_string(), "WES");
    }

    #[test]
    fn test_derived_index_paths() {
        let bam = ShardInputs::new("/in/s.bam", "/ref/hg38.fasta");
        assert_eq!(bam.alignment_index(), PathBuf::from("/in/s.bam.bai"));
        assert_eq!(bam.reference_index(), PathBuf::from("/ref/hg38.fasta.fai"));

        let cram = ShardInputs::new("/in/s.cram", "/ref/hg38.fasta")
            .with_reference_index(Some("/ref/custom.fai".into()));
        assert_eq!(cram.alignment_index(), PathBuf::from("/in/s.cram.crai"));
        assert_eq!(cram.reference_index(), PathBuf::from("/ref/custom.fai"));
    }

    #[test]
    fn test_check_reports_first_missing_input() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let bam = temp_dir.path().join("s.bam");
        let reference = temp_dir.path().join("ref.fa");
        std::fs::write(&bam, "BAM").unwrap();
        std::fs::write(&reference, ">chr1\nACGT\n").unwrap();
        std::fs::write(temp_dir.path().join("ref.fa.fai"), "chr1\t4\t6\t4\t5\n").unwrap();

        let inputs = ShardInputs::new(&bam, &reference);
        match inputs.check() {
            Err(ExecutorError::MissingInput(path)) => {
                assert_eq!(path, temp_dir.path().join("s.bam.bai"))
            }
            other => panic!("expected MissingInput, got {:?}", other),
        }

        std::fs::write(temp_dir.path().join("s.bam.bai"), "BAI").unwrap();
        inputs.check().unwrap();
    }

    #[test]
    fn test_deepvariant_invocation() {
        let caller = CallerConfig::default();
        let inputs = ShardInputs::new("/in/s.bam", "/ref/hg38.fasta");
        let staging = Path::new("/run/shards/.staging/01_chr6-chr7");

        let invocations = build_invocations(&caller, &inputs, &shard(), staging);
        assert_eq!(invocations.len(), 1);

        let args = &invocations[0].args;
        assert_eq!(invocations[0].program, "/opt/deepvariant/bin/run_deepvariant");
        assert!(args.contains(&"--model_type=WGS".to_string()));
        assert!(args.contains(&"--regions=chr6,chr7".to_string()));
        assert!(args.contains(&"--reads=/in/s.bam".to_string()));
        assert!(args.contains(&format!(
            "--output_vcf={}",
            staging.join("01_chr6-chr7.vcf.gz").display()
        )));
        assert!(args.contains(&format!(
            "--output_gvcf={}",
            staging.join("01_chr6-chr7.g.vcf.gz").display()
        )));
        assert!(args.contains(&"--num_shards=16".to_string()));
    }

    #[test]
    fn test_gatk_invocations() {
        let caller = CallerConfig {
            backend: CallerBackend::Gatk,
            ..CallerConfig::default()
        };
        let inputs = ShardInputs::new("/in/s.bam", "/ref/hg38.fasta");
        let staging = Path::new("/stage");

        let invocations = build_invocations(&caller, &inputs, &shard(), staging);
        assert_eq!(invocations.len(), 2);
        assert_eq!(invocations[0].args[0], "HaplotypeCaller");
        assert_eq!(invocations[1].args[0], "GenotypeGVCFs");

        let line = invocations[0].command_line();
        assert!(line.contains("-ERC GVCF"));
        assert!(line.contains("-L chr6 -L chr7"));
        assert!(line.contains("-O /stage/01_chr6-chr7.g.vcf.gz"));
        assert!(invocations[1]
            .command_line()
            .contains("-O /stage/01_chr6-chr7.vcf.gz"));
    }
}
