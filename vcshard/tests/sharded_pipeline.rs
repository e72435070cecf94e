//! Integration tests for the sharded calling pipeline
//!
//! A fake `ToolRunner` stands in for both the variant caller and bcftools.
//! It writes bgzip-style (multi-member gzip) VCFs, so the pipeline's own
//! record counting and ordering checks run against compressed files the way
//! they would against real caller output.

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashSet;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use vcshard::executor::ExecutorResult;
use vcshard::sharding::ShardPlanner;
use vcshard::vcf::{check_record_order, open_vcf, scan_vcf};
use vcshard::{
    run_single_shard, ChromosomeUniverse, PartitionPolicy, PipelineConfig, PipelineError,
    RunCoordinator, RunStats, ShardPlan, ShardRegistry, ShardStatus, ToolInvocation, ToolOutput,
    ToolRunner,
};

const HEADER: &str = "##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tSAMPLE\n";

/// Records the fake caller emits for a contig (varies per contig)
fn records_for(contig: &str) -> u64 {
    (contig.len() as u64 % 3) + 1
}

fn bgzip(text: &str) -> Vec<u8> {
    // One gzip member per line, like bgzip's independent blocks
    let mut out = Vec::new();
    for chunk in text.split_inclusive('\n') {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(chunk.as_bytes()).unwrap();
        out.extend(encoder.finish().unwrap());
    }
    out
}

fn ok(exit_code: i32) -> ToolOutput {
    ToolOutput {
        exit_code: Some(exit_code),
        stdout: String::new(),
        stderr: if exit_code == 0 {
            String::new()
        } else {
            "simulated failure".to_string()
        },
        elapsed: Duration::from_millis(1),
    }
}

fn flag<'a>(invocation: &'a ToolInvocation, name: &str) -> Option<&'a str> {
    let prefix = format!("--{}=", name);
    invocation
        .args
        .iter()
        .find_map(|a| a.strip_prefix(prefix.as_str()))
}

/// DeepVariant + bcftools stand-in
#[derive(Default)]
struct FakeGenomics {
    /// `--regions` values whose caller run fails
    fail_regions: HashSet<String>,
    /// Caller runtime for shards that do not fail
    caller_delay: Duration,
    /// Every invocation seen, in order
    calls: Mutex<Vec<ToolInvocation>>,
}

impl FakeGenomics {
    fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().unwrap().clone()
    }

    fn call_variants(&self, invocation: &ToolInvocation) -> ExecutorResult<ToolOutput> {
        let regions = flag(invocation, "regions").unwrap_or_default();
        if self.fail_regions.contains(regions) {
            return Ok(ok(1));
        }

        let mut text = HEADER.to_string();
        for contig in regions.split(',') {
            for i in 0..records_for(contig) {
                text.push_str(&format!(
                    "{}\t{}\t.\tA\tG\t40\tPASS\t.\tGT\t0/1\n",
                    contig,
                    1000 * (i + 1)
                ));
            }
        }
        let data = bgzip(&text);

        for name in ["output_vcf", "output_gvcf"] {
            if let Some(path) = flag(invocation, name) {
                std::fs::write(path, &data)?;
            }
        }
        Ok(ok(0))
    }

    fn concat(&self, args: &[String]) -> ExecutorResult<ToolOutput> {
        let o = args.iter().position(|a| a == "-o").unwrap();
        let mut text = HEADER.to_string();
        for input in &args[o + 2..] {
            for line in open_vcf(Path::new(input))?.lines() {
                let line = line?;
                if !line.starts_with('#') {
                    text.push_str(&line);
                    text.push('\n');
                }
            }
        }
        std::fs::write(&args[o + 1], bgzip(&text))?;
        Ok(ok(0))
    }

    fn index(&self, args: &[String]) -> ExecutorResult<ToolOutput> {
        let target = args.last().unwrap();
        std::fs::write(format!("{}.tbi", target), b"TBI\x01")?;
        Ok(ok(0))
    }
}

#[async_trait]
impl ToolRunner for FakeGenomics {
    async fn run(&self, invocation: &ToolInvocation) -> ExecutorResult<ToolOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        match invocation.args.first().map(String::as_str) {
            Some("concat") => self.concat(&invocation.args),
            Some("index") => self.index(&invocation.args),
            _ => {
                let failing = flag(invocation, "regions")
                    .map(|r| self.fail_regions.contains(r))
                    .unwrap_or(false);
                if !failing {
                    tokio::time::sleep(self.caller_delay).await;
                }
                self.call_variants(invocation)
            }
        }
    }
}

/// Config with staged inputs under a temp dir
fn test_config(temp: &TempDir) -> PipelineConfig {
    let inputs = temp.path().join("inputs");
    std::fs::create_dir_all(&inputs).unwrap();
    for name in ["HG00119.bam", "HG00119.bam.bai", "hg38.fa", "hg38.fa.fai"] {
        std::fs::write(inputs.join(name), "staged").unwrap();
    }

    let mut config = PipelineConfig::default();
    config.run.sample_id = "HG00119".to_string();
    config.run.base_path = temp.path().join("results");
    config.inputs.alignment = inputs.join("HG00119.bam");
    config.inputs.reference = inputs.join("hg38.fa");
    config
}

fn grch38_plan(config: &PipelineConfig) -> ShardPlan {
    config
        .planner()
        .plan(&config.universe().unwrap(), config.sharding.shard_count)
        .unwrap()
}

fn expected_records(plan: &ShardPlan) -> u64 {
    plan.concatenated().iter().map(|c| records_for(c)).sum()
}

// ============================================================================
// Planning
// ============================================================================

#[test]
fn test_grch38_four_shards_scenario() {
    let plan = ShardPlanner::default()
        .plan(&ChromosomeUniverse::grch38(), 4)
        .unwrap();

    let sizes: Vec<usize> = plan.assignments().iter().map(|a| a.num_chromosomes()).collect();
    assert_eq!(sizes, vec![5, 5, 5, 9]);
    assert_eq!(
        plan.assignments()[3].chromosomes,
        vec!["chr16", "chr17", "chr18", "chr19", "chr20", "chr21", "chr22", "chrX", "chrY"]
    );
}

#[test]
fn test_plans_cover_universe_in_order() {
    for policy in [PartitionPolicy::RemainderLast, PartitionPolicy::LengthBalanced] {
        for pin in [true, false] {
            let planner = ShardPlanner::new(policy).with_sex_chromosome_pinning(pin);
            let universe = ChromosomeUniverse::grch38();

            for k in 1..=24u32 {
                let plan = planner.plan(&universe, k).unwrap();
                assert_eq!(plan.assignments().len(), k as usize);
                assert!(plan.assignments().iter().all(|a| a.num_chromosomes() > 0));
                assert_eq!(plan.concatenated(), universe.names(), "{:?} k={}", policy, k);
                assert_eq!(plan, planner.plan(&universe, k).unwrap());
            }
        }
    }
}

#[test]
fn test_plan_rejects_impossible_shard_counts() {
    let universe = ChromosomeUniverse::grch38();
    for k in [0, 25, 100] {
        let err = ShardPlanner::default().plan(&universe, k).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfiguration(_)));
    }
}

// ============================================================================
// Local runs
// ============================================================================

#[tokio::test]
async fn test_local_run_merges_every_record_in_plan_order() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let plan = grch38_plan(&config);
    let tools = Arc::new(FakeGenomics::default());

    let coordinator = RunCoordinator::from_config(&config, tools.clone()).unwrap();
    let artifact = coordinator.run(&plan).await.unwrap();

    assert_eq!(artifact.shard_indices(), &[0, 1, 2, 3]);
    assert_eq!(artifact.record_count(), expected_records(&plan));
    assert_eq!(artifact.output_file(), config.layout().merged_vcf_path());

    let merged = scan_vcf(artifact.output_file()).unwrap();
    assert_eq!(merged.records, expected_records(&plan));
    assert_eq!(merged.contigs(), ChromosomeUniverse::grch38().names());
    check_record_order(&merged, plan.universe()).unwrap();
    assert!(artifact.output_index().exists());

    // Shard inputs were handed to bcftools in plan order
    let concat = tools
        .calls()
        .into_iter()
        .find(|c| c.args.first().map(String::as_str) == Some("concat"))
        .unwrap();
    let shard_files: Vec<PathBuf> = plan
        .assignments()
        .iter()
        .map(|a| config.layout().shard_vcf_path(a))
        .collect();
    let tail: Vec<PathBuf> = concat.args[concat.args.len() - 4..]
        .iter()
        .map(PathBuf::from)
        .collect();
    assert_eq!(tail, shard_files);
}

#[tokio::test]
async fn test_each_shard_called_with_exactly_its_regions() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let plan = grch38_plan(&config);
    let tools = Arc::new(FakeGenomics::default());

    RunCoordinator::from_config(&config, tools.clone())
        .unwrap()
        .run(&plan)
        .await
        .unwrap();

    let mut regions: Vec<String> = tools
        .calls()
        .iter()
        .filter_map(|c| flag(c, "regions").map(str::to_string))
        .collect();
    regions.sort();
    let mut expected: Vec<String> = plan.assignments().iter().map(|a| a.regions_arg()).collect();
    expected.sort();
    assert_eq!(regions, expected);
}

#[tokio::test]
async fn test_failed_shard_blocks_merge_and_cancels_siblings() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let plan = grch38_plan(&config);
    let tools = Arc::new(FakeGenomics {
        fail_regions: [plan.assignments()[2].regions_arg()].into_iter().collect(),
        caller_delay: Duration::from_secs(30),
        ..Default::default()
    });

    let coordinator = RunCoordinator::from_config(&config, tools.clone()).unwrap();
    let err = coordinator.run(&plan).await.unwrap_err();

    assert_eq!(err.shard_index(), Some(2));
    assert!(matches!(err, PipelineError::ShardExecutionFailure { .. }));
    assert!(!config.layout().merged_vcf_path().exists());
    assert!(!tools
        .calls()
        .iter()
        .any(|c| c.args.first().map(String::as_str) == Some("concat")));

    for result in coordinator.registry().list().await {
        assert_eq!(result.status, ShardStatus::Failed);
        assert!(!result.variant_file.exists());
    }
}

// ============================================================================
// Distributed runs (one task per shard, then a merge task)
// ============================================================================

/// What `vcshard run-shard --index N` does inside one batch task
async fn run_task(config: &PipelineConfig, tools: Arc<FakeGenomics>, index: u32) -> vcshard::Result<u64> {
    let layout = config.layout();
    let plan = ShardPlan::load(&layout.plan_path())?;
    let assignment = plan.assignment(index)?.clone();

    let coordinator = RunCoordinator::from_config(config, tools)?;
    let registry = coordinator.registry();
    registry.load().await?;
    registry.register_shard(&assignment).await?;

    let outputs =
        run_single_shard(coordinator.executor(), registry, &RunStats::new(), &assignment).await?;
    Ok(outputs.record_count)
}

async fn prepare_plan(config: &PipelineConfig) -> ShardPlan {
    let plan = grch38_plan(config);
    let layout = config.layout();
    layout.ensure_dirs().unwrap();
    plan.save(&layout.plan_path()).unwrap();
    ShardRegistry::for_layout(&layout)
        .unwrap()
        .register_plan(&plan)
        .await
        .unwrap();
    plan
}

#[tokio::test]
async fn test_independent_shard_tasks_then_merge() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let plan = prepare_plan(&config).await;
    let tools = Arc::new(FakeGenomics::default());

    // Tasks run in arbitrary order, each with its own registry instance
    let mut total = 0;
    for index in [3, 0, 2, 1] {
        total += run_task(&config, tools.clone(), index).await.unwrap();
    }
    assert_eq!(total, expected_records(&plan));

    let merge_task = RunCoordinator::from_config(&config, tools.clone()).unwrap();
    merge_task.registry().load().await.unwrap();
    merge_task.ensure_all_succeeded(&plan).await.unwrap();
    let artifact = merge_task.merger().merge(&plan).await.unwrap();

    assert_eq!(artifact.record_count(), total);
    assert_eq!(scan_vcf(artifact.output_file()).unwrap().records, total);
}

#[tokio::test]
async fn test_merged_count_tracks_edited_shard() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let plan = prepare_plan(&config).await;
    let tools = Arc::new(FakeGenomics::default());

    for index in 0..4 {
        run_task(&config, tools.clone(), index).await.unwrap();
    }

    // Duplicate one record in shard 1
    let shard = config.layout().shard_vcf_path(&plan.assignments()[1]);
    let mut lines: Vec<String> = open_vcf(&shard)
        .unwrap()
        .lines()
        .map(|l| l.unwrap())
        .collect();
    let first_record = lines.iter().position(|l| !l.starts_with('#')).unwrap();
    lines.insert(first_record, lines[first_record].clone());
    std::fs::write(&shard, bgzip(&(lines.join("\n") + "\n"))).unwrap();

    let merge_task = RunCoordinator::from_config(&config, tools.clone()).unwrap();
    let artifact = merge_task.merger().merge(&plan).await.unwrap();
    assert_eq!(artifact.record_count(), expected_records(&plan) + 1);
    assert_eq!(
        scan_vcf(artifact.output_file()).unwrap().records,
        expected_records(&plan) + 1
    );
}

#[tokio::test]
async fn test_merge_with_missing_shard_names_it_and_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let plan = prepare_plan(&config).await;
    let tools = Arc::new(FakeGenomics::default());

    for index in [0, 2, 3] {
        run_task(&config, tools.clone(), index).await.unwrap();
    }

    let merge_task = RunCoordinator::from_config(&config, tools.clone()).unwrap();
    let err = merge_task.merger().merge(&plan).await.unwrap_err();
    match err {
        PipelineError::MissingShard { index, path } => {
            assert_eq!(index, 1);
            assert_eq!(path, config.layout().shard_vcf_path(&plan.assignments()[1]));
        }
        other => panic!("expected MissingShard, got {:?}", other),
    }

    let layout = config.layout();
    assert!(!layout.merged_vcf_path().exists());
    assert!(!layout.merged_index_path().exists());
    assert!(!layout.partial_vcf_path().exists());
}

#[tokio::test]
async fn test_retried_task_replaces_failed_attempt() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let plan = prepare_plan(&config).await;

    let flaky = Arc::new(FakeGenomics {
        fail_regions: [plan.assignments()[1].regions_arg()].into_iter().collect(),
        ..Default::default()
    });
    let err = run_task(&config, flaky, 1).await.unwrap_err();
    assert_eq!(err.shard_index(), Some(1));

    let registry = ShardRegistry::for_layout(&config.layout()).unwrap();
    registry.load().await.unwrap();
    assert_eq!(registry.status(1).await, Some(ShardStatus::Failed));
    assert!(!config.layout().shard_vcf_path(&plan.assignments()[1]).exists());

    run_task(&config, Arc::new(FakeGenomics::default()), 1)
        .await
        .unwrap();
    registry.load().await.unwrap();
    assert_eq!(registry.status(1).await, Some(ShardStatus::Succeeded));
}

#[tokio::test]
async fn test_failed_merge_keeps_previous_merged_output() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let plan = prepare_plan(&config).await;
    let tools = Arc::new(FakeGenomics::default());

    for index in 0..4 {
        run_task(&config, tools.clone(), index).await.unwrap();
    }
    let merger_task = RunCoordinator::from_config(&config, tools.clone()).unwrap();
    let first = merger_task.merger().merge(&plan).await.unwrap();
    let published = std::fs::read(first.output_file()).unwrap();

    // Corrupt one shard so the next merge fails validation
    let shard = config.layout().shard_vcf_path(&plan.assignments()[0]);
    std::fs::write(&shard, bgzip(&format!("{}chr9\t1\t.\tA\tG\t40\tPASS\t.\tGT\t0/1\n", HEADER)))
        .unwrap();

    let err = merger_task.merger().merge(&plan).await.unwrap_err();
    assert!(matches!(err, PipelineError::MergeFailure(_)));
    assert_eq!(std::fs::read(first.output_file()).unwrap(), published);
    assert!(!config.layout().partial_vcf_path().exists());
}

#[test]
fn test_merged_output_is_readable_gzip() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("x.vcf.gz");
    std::fs::write(&path, bgzip(&format!("{}chr1\t5\t.\tA\tG\t40\tPASS\t.\tGT\t0/1\n", HEADER)))
        .unwrap();

    let lines: Vec<String> = open_vcf(&path).unwrap().lines().map(|l| l.unwrap()).collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[2].starts_with("chr1\t5"));
}
