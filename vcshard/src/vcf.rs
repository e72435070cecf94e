//! Minimal VCF scanning
//!
//! Only what the pipeline checks itself: how many data records a file holds,
//! which contigs they fall on, and whether positions ever step backwards. Plain and (b)gzip-compressed
//! files are both accepted; bgzip is a series of gzip members, so
//! decompression goes through `MultiGzDecoder`.

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::sharding::ChromosomeUniverse;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Record count and contig runs of one VCF
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VcfSummary {
    /// Data lines (everything that is not a `#` header line)
    pub records: u64,
    /// Contig of each run of consecutive records, in file order
    pub contig_runs: Vec<String>,
    /// First record whose POS is below the previous record's on the same contig
    pub position_regression: Option<PositionRegression>,
}

/// Two consecutive same-contig records in decreasing position order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionRegression {
    pub contig: String,
    pub previous: u64,
    pub position: u64,
}

impl VcfSummary {
    /// Distinct contigs in first-appearance order
    pub fn contigs(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for contig in &self.contig_runs {
            if !seen.contains(&contig.as_str()) {
                seen.push(contig);
            }
        }
        seen
    }
}

/// Open a VCF, transparently decompressing gzip/bgzip input
pub fn open_vcf(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let mut reader = BufReader::new(File::open(path)?);
    let is_gzip = reader.fill_buf()?.starts_with(&GZIP_MAGIC);

    if is_gzip {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

/// Count records and collect contig runs
pub fn scan_vcf(path: &Path) -> io::Result<VcfSummary> {
    summarize(open_vcf(path)?)
}

fn summarize<R: BufRead>(mut reader: R) -> io::Result<VcfSummary> {
    let mut summary = VcfSummary::default();
    let mut line = String::new();
    let mut last_position: Option<u64> = None;

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let record = line.trim_end_matches(['\n', '\r']);
        if record.is_empty() || record.starts_with('#') {
            continue;
        }

        let mut fields = record.split('\t');
        let contig = fields.next().unwrap_or_default();
        let position = fields.next().and_then(|p| p.parse::<u64>().ok());

        if summary.contig_runs.last().map(String::as_str) != Some(contig) {
            summary.contig_runs.push(contig.to_string());
            last_position = None;
        }
        if let (Some(previous), Some(current)) = (last_position, position) {
            if current < previous && summary.position_regression.is_none() {
                summary.position_regression = Some(PositionRegression {
                    contig: contig.to_string(),
                    previous,
                    position: current,
                });
            }
        }
        if position.is_some() {
            last_position = position;
        }
        summary.records += 1;
    }

    Ok(summary)
}

/// Check that records follow genomic order: every contig is known, once
/// records move past a contig they never return to it or an earlier one, and
/// positions never decrease within a contig.
pub fn check_record_order(
    summary: &VcfSummary,
    universe: &ChromosomeUniverse,
) -> Result<(), String> {
    let mut previous: Option<(usize, &str)> = None;

    for contig in &summary.contig_runs {
        let position = universe
            .position(contig)
            .ok_or_else(|| format!("record on contig {} outside the chromosome universe", contig))?;

        if let Some((prev_position, prev_contig)) = previous {
            if position <= prev_position {
                return Err(format!(
                    "records on {} appear after records on {}",
                    contig, prev_contig
                ));
            }
        }
        previous = Some((position, contig.as_str()));
    }

    if let Some(regression) = &summary.position_regression {
        return Err(format!(
            "{}:{} appears after {}:{}",
            regression.contig, regression.position, regression.contig, regression.previous
        ));
    }

    Ok(())
}
