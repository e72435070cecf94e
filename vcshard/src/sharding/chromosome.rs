//! Chromosome universe: the ordered contig list a run is sharded over
//!
//! The universe is either the built-in GRCh38 primary assembly or the contig
//! list of a samtools `.fai` index. Order is significant: it is the order the
//! merged VCF must follow.

use crate::errors::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// GRCh38 primary assembly lengths (bp), in karyotype order
pub const GRCH38_PRIMARY: [(&str, u64); 24] = [
    ("chr1", 248_956_422),
    ("chr2", 242_193_529),
    ("chr3", 198_295_559),
    ("chr4", 190_214_555),
    ("chr5", 181_538_259),
    ("chr6", 170_805_979),
    ("chr7", 159_345_973),
    ("chr8", 145_138_636),
    ("chr9", 138_394_717),
    ("chr10", 133_797_422),
    ("chr11", 135_086_622),
    ("chr12", 133_275_309),
    ("chr13", 114_364_328),
    ("chr14", 107_043_718),
    ("chr15", 101_991_189),
    ("chr16", 90_338_345),
    ("chr17", 83_257_441),
    ("chr18", 80_373_285),
    ("chr19", 58_617_616),
    ("chr20", 64_444_167),
    ("chr21", 46_709_983),
    ("chr22", 50_818_468),
    ("chrX", 156_040_895),
    ("chrY", 57_227_415),
];

/// A single contig of the reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chromosome {
    /// Contig name exactly as it appears in the reference and alignment headers
    pub name: String,

    /// Length in base pairs, when known
    pub length: Option<u64>,
}

impl Chromosome {
    pub fn new(name: impl Into<String>, length: Option<u64>) -> Self {
        Self {
            name: name.into(),
            length,
        }
    }

    /// Whether this is an X or Y contig (with or without the `chr` prefix)
    pub fn is_sex_chromosome(&self) -> bool {
        matches!(self.name.as_str(), "chrX" | "chrY" | "X" | "Y")
    }
}

/// Ordered, duplicate-free list of chromosomes covering the genome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChromosomeUniverse {
    chromosomes: Vec<Chromosome>,
}

impl ChromosomeUniverse {
    /// Build a universe from bare names (lengths unknown)
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            names
                .into_iter()
                .map(|name| Chromosome::new(name, None))
                .collect(),
        )
    }

    /// Build a universe, rejecting empty lists, blank names and duplicates
    pub fn new(chromosomes: Vec<Chromosome>) -> Result<Self> {
        let universe = Self { chromosomes };
        universe.validate()?;
        Ok(universe)
    }

    /// Re-check the universe invariants (deserialized universes bypass [`Self::new`])
    pub fn validate(&self) -> Result<()> {
        if self.chromosomes.is_empty() {
            return Err(PipelineError::invalid_config(
                "chromosome universe is empty",
            ));
        }

        let mut seen = HashSet::with_capacity(self.chromosomes.len());
        for chrom in &self.chromosomes {
            if chrom.name.trim().is_empty() {
                return Err(PipelineError::invalid_config(
                    "chromosome universe contains a blank name",
                ));
            }
            if !seen.insert(chrom.name.as_str()) {
                return Err(PipelineError::invalid_config(format!(
                    "chromosome {} appears more than once",
                    chrom.name
                )));
            }
        }

        Ok(())
    }

    /// GRCh38 primary assembly: chr1..chr22, chrX, chrY
    pub fn grch38() -> Self {
        Self {
            chromosomes: GRCH38_PRIMARY
                .iter()
                .map(|(name, len)| Chromosome::new(*name, Some(*len)))
                .collect(),
        }
    }

    /// Read contig names and lengths from a samtools `.fai` index.
    ///
    /// With `primary_only`, alt/random/unplaced/decoy/mitochondrial contigs are
    /// dropped so the universe matches what a WGS run is sharded over.
    pub fn from_fai(path: &Path, primary_only: bool) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to read reference index");
            e
        })?;
        Self::parse_fai(&content, primary_only)
    }

    /// Parse `.fai` content (tab-separated: name, length, offset, linebases, linewidth)
    pub fn parse_fai(content: &str, primary_only: bool) -> Result<Self> {
        let mut chromosomes = Vec::new();

        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let mut fields = line.split('\t');
            let name = fields.next().unwrap_or_default();
            let length = fields
                .next()
                .and_then(|l| l.trim().parse::<u64>().ok())
                .ok_or_else(|| {
                    PipelineError::invalid_config(format!(
                        "malformed .fai line {}: {:?}",
                        line_no + 1,
                        line
                    ))
                })?;

            if primary_only && !is_primary_contig(name) {
                continue;
            }
            chromosomes.push(Chromosome::new(name, Some(length)));
        }

        Self::new(chromosomes)
    }

    pub fn len(&self) -> usize {
        self.chromosomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chromosomes.is_empty()
    }

    pub fn chromosomes(&self) -> &[Chromosome] {
        &self.chromosomes
    }

    /// Names in universe order
    pub fn names(&self) -> Vec<String> {
        self.chromosomes.iter().map(|c| c.name.clone()).collect()
    }

    /// Position of a contig in the universe
    pub fn position(&self, name: &str) -> Option<usize> {
        self.chromosomes.iter().position(|c| c.name == name)
    }

    /// Lengths for every contig, or `None` if any is unknown
    pub fn lengths(&self) -> Option<Vec<u64>> {
        self.chromosomes.iter().map(|c| c.length).collect()
    }

    /// Number of trailing sex chromosomes (0, 1 or 2)
    pub fn sex_chromosome_tail_len(&self) -> usize {
        self.chromosomes
            .iter()
            .rev()
            .take_while(|c| c.is_sex_chromosome())
            .count()
    }
}

/// Whether a contig belongs to the primary assembly (autosomes and sex chromosomes)
pub fn is_primary_contig(name: &str) -> bool {
    let bare = name.strip_prefix("chr").unwrap_or(name);
    if bare == "X" || bare == "Y" {
        return true;
    }
    matches!(bare.parse::<u32>(), Ok(n) if (1..=22).contains(&n))
}
