//! vcshard - Command Line Interface
//!
//! Chromosome-sharded variant calling for one sample.
//!
//! ## Commands
//!
//! ### Setup
//! - `init-config` - Write a default pipeline configuration
//! - `plan` - Compute and persist the shard plan
//!
//! ### Execution
//! - `run-shard` - Call one shard of the persisted plan (batch task entry point)
//! - `merge` - Merge all shard outputs into the per-sample VCF
//! - `run` - Plan, call every shard locally in parallel, then merge
//!
//! ### Inspection
//! - `status` - Show the plan, per-shard status and merged output

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vcshard::{
    init_production_logging, init_simple_logging, run_single_shard, MergedArtifact,
    PartitionPolicy, PipelineConfig, ProcessRunner, RunCoordinator, RunStats, ShardPlan,
    ShardRegistry, ShardStatus, ToolRunner,
};

/// vcshard - chromosome-sharded variant calling
#[derive(Parser, Debug)]
#[command(name = "vcshard")]
#[command(about = "Plan, run and merge chromosome-sharded variant calling", long_about = None)]
#[command(version)]
struct Cli {
    /// Pipeline configuration file (default: ~/.vcshard/pipeline.toml)
    #[arg(short, long, global = true, env = "VCSHARD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default pipeline configuration
    InitConfig {
        /// Sample identifier used for the merged output name
        #[arg(long)]
        sample_id: Option<String>,

        /// Directory for plan, shard outputs and merged output
        #[arg(long)]
        base_path: Option<PathBuf>,

        /// Aligned reads (BAM or CRAM)
        #[arg(long)]
        alignment: Option<PathBuf>,

        /// Reference FASTA
        #[arg(long)]
        reference: Option<PathBuf>,

        /// Number of shards
        #[arg(long)]
        shard_count: Option<u32>,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Compute and persist the shard plan
    Plan {
        /// Override `sharding.shard_count`
        #[arg(long)]
        shard_count: Option<u32>,

        /// Override `sharding.policy` (remainder-last, length-balanced)
        #[arg(long, value_parser = parse_policy)]
        policy: Option<PartitionPolicy>,
    },

    /// Call one shard of the persisted plan
    RunShard {
        /// Shard index (a batch scheduler's task index)
        #[arg(short, long, env = "BATCH_TASK_INDEX")]
        index: u32,

        /// Print the caller invocation instead of running it
        #[arg(long)]
        dry_run: bool,

        /// Log level
        #[arg(long)]
        log_level: Option<String>,
    },

    /// Merge all shard outputs into the per-sample VCF
    Merge {
        /// Print the merge invocations instead of running them
        #[arg(long)]
        dry_run: bool,

        /// Log level
        #[arg(long)]
        log_level: Option<String>,
    },

    /// Plan, call every shard locally, then merge
    Run {
        /// Override `sharding.shard_count`
        #[arg(long)]
        shard_count: Option<u32>,

        /// Override `execution.max_parallel_shards`
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Print every invocation instead of running them
        #[arg(long)]
        dry_run: bool,

        /// Log level
        #[arg(long)]
        log_level: Option<String>,

        /// Rolling log directory (default: ~/.vcshard/logs)
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Show the plan, per-shard status and merged output
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => PipelineConfig::default_path()?,
    };

    match cli.command {
        Commands::InitConfig {
            sample_id,
            base_path,
            alignment,
            reference,
            shard_count,
            force,
        } => {
            init_simple_logging("warn")?;
            let mut config = PipelineConfig::default();
            if let Some(sample_id) = sample_id {
                config.run.sample_id = sample_id;
            }
            if let Some(base_path) = base_path {
                config.run.base_path = base_path;
            }
            if let Some(alignment) = alignment {
                config.inputs.alignment = alignment;
            }
            if let Some(reference) = reference {
                config.inputs.reference = reference;
            }
            if let Some(shard_count) = shard_count {
                config.sharding.shard_count = shard_count;
            }
            cmd_init_config(&config_path, config, force)?;
        }

        Commands::Plan {
            shard_count,
            policy,
        } => {
            let mut config = load_config(&config_path)?;
            init_simple_logging(&config.logging.level)?;
            if let Some(shard_count) = shard_count {
                config.sharding.shard_count = shard_count;
            }
            if let Some(policy) = policy {
                config.sharding.policy = policy;
            }
            cmd_plan(&config).await?;
        }

        Commands::RunShard {
            index,
            dry_run,
            log_level,
        } => {
            let config = load_config(&config_path)?;
            init_simple_logging(log_level.as_deref().unwrap_or(&config.logging.level))?;
            cmd_run_shard(&config, index, dry_run).await?;
        }

        Commands::Merge { dry_run, log_level } => {
            let config = load_config(&config_path)?;
            init_simple_logging(log_level.as_deref().unwrap_or(&config.logging.level))?;
            cmd_merge(&config, dry_run).await?;
        }

        Commands::Run {
            shard_count,
            max_parallel,
            dry_run,
            log_level,
            log_dir,
        } => {
            let mut config = load_config(&config_path)?;
            if let Some(shard_count) = shard_count {
                config.sharding.shard_count = shard_count;
            }
            if let Some(max_parallel) = max_parallel {
                config.execution.max_parallel_shards = max_parallel;
            }
            config.validate()?;

            let level = log_level.unwrap_or_else(|| config.logging.level.clone());
            if dry_run {
                init_simple_logging(&level)?;
            } else {
                let log_dir = log_dir.or_else(|| config.logging.log_dir.clone());
                init_production_logging(&level, log_dir.as_deref())?;
            }
            cmd_run(&config, dry_run).await?;
        }

        Commands::Status => {
            // No logging for status (pure display)
            let config = load_config(&config_path)?;
            cmd_status(&config).await?;
        }
    }

    Ok(())
}

fn parse_policy(value: &str) -> std::result::Result<PartitionPolicy, String> {
    match value.replace('_', "-").as_str() {
        "remainder-last" => Ok(PartitionPolicy::RemainderLast),
        "length-balanced" => Ok(PartitionPolicy::LengthBalanced),
        other => Err(format!(
            "unknown policy '{}' (expected remainder-last or length-balanced)",
            other
        )),
    }
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    PipelineConfig::load(path).with_context(|| {
        format!(
            "Failed to load configuration from {} (create one with `vcshard init-config`)",
            path.display()
        )
    })
}

fn load_plan(config: &PipelineConfig) -> Result<ShardPlan> {
    let path = config.layout().plan_path();
    ShardPlan::load(&path).with_context(|| {
        format!(
            "Failed to load shard plan from {} (create one with `vcshard plan`)",
            path.display()
        )
    })
}

fn cmd_init_config(path: &Path, config: PipelineConfig, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Configuration already exists at {} (use --force to overwrite)",
            path.display()
        );
    }

    config.validate()?;
    config
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("{} Configuration written to {}", "✓".green(), path.display());
    println!("\nNext steps:");
    println!("  1. Set [inputs] alignment and reference in the file");
    println!("  2. Compute the plan:   vcshard plan");
    println!("  3. Run locally:        vcshard run");
    Ok(())
}

async fn cmd_plan(config: &PipelineConfig) -> Result<()> {
    let universe = config.universe().context("Failed to build chromosome universe")?;
    let plan = config
        .planner()
        .plan(&universe, config.sharding.shard_count)?;

    let layout = config.layout();
    layout.ensure_dirs()?;
    plan.save(&layout.plan_path())?;

    let registry = ShardRegistry::for_layout(&layout)?;
    registry.register_plan(&plan).await?;

    print_plan(&plan);
    println!(
        "\n{} Plan saved to {}",
        "✓".green(),
        layout.plan_path().display()
    );
    Ok(())
}

async fn cmd_run_shard(config: &PipelineConfig, index: u32, dry_run: bool) -> Result<()> {
    let plan = load_plan(config)?;
    let assignment = plan.assignment(index)?.clone();
    let coordinator = RunCoordinator::from_config(config, runner())?;
    let executor = coordinator.executor();

    if dry_run {
        println!("{} shard {} ({})", "Dry run:".bold(), index, assignment.regions_arg());
        for invocation in executor.invocations(&assignment) {
            println!("  {}", invocation.command_line());
        }
        return Ok(());
    }

    let registry = coordinator.registry();
    registry.load().await?;
    // A scheduler retry re-runs the whole task; start from Pending
    registry.register_shard(&assignment).await?;

    let stats = RunStats::new();
    let outputs = run_single_shard(executor, registry, &stats, &assignment)
        .await
        .with_context(|| format!("Shard {} failed", index))?;

    println!(
        "{} shard {} ({}): {} records",
        "✓".green(),
        index,
        assignment.label(),
        outputs.record_count
    );
    println!("  VCF:  {}", outputs.variant_file.display());
    println!("  gVCF: {}", outputs.genomic_variant_file.display());
    Ok(())
}

async fn cmd_merge(config: &PipelineConfig, dry_run: bool) -> Result<()> {
    let plan = load_plan(config)?;
    let coordinator = RunCoordinator::from_config(config, runner())?;
    let merger = coordinator.merger();

    if dry_run {
        println!("{}", "Dry run: merge".bold());
        println!("  {}", merger.concat_invocation(&plan).command_line());
        println!("  {}", merger.index_invocation().command_line());
        return Ok(());
    }

    coordinator.registry().load().await?;
    coordinator
        .ensure_all_succeeded(&plan)
        .await
        .context("Refusing to merge")?;

    let artifact = merger.merge(&plan).await?;
    print_artifact(&artifact);
    Ok(())
}

async fn cmd_run(config: &PipelineConfig, dry_run: bool) -> Result<()> {
    let universe = config.universe().context("Failed to build chromosome universe")?;
    let plan = config
        .planner()
        .plan(&universe, config.sharding.shard_count)?;
    let coordinator = RunCoordinator::from_config(config, runner())?;

    if dry_run {
        print_plan(&plan);
        println!();
        for assignment in plan.assignments() {
            println!("{} shard {}", "Dry run:".bold(), assignment.index);
            for invocation in coordinator.executor().invocations(assignment) {
                println!("  {}", invocation.command_line());
            }
        }
        println!("{}", "Dry run: merge".bold());
        println!(
            "  {}",
            coordinator.merger().concat_invocation(&plan).command_line()
        );
        println!("  {}", coordinator.merger().index_invocation().command_line());
        return Ok(());
    }

    let artifact = coordinator.run(&plan).await?;
    print_artifact(&artifact);
    Ok(())
}

async fn cmd_status(config: &PipelineConfig) -> Result<()> {
    let layout = config.layout();
    println!("{}", format!("Sample {}", config.run.sample_id).bold());
    println!("  Base path: {}", layout.base().display());

    let plan = match ShardPlan::load(&layout.plan_path()) {
        Ok(plan) => plan,
        Err(_) => {
            println!("  {}", "No shard plan yet. Run `vcshard plan`.".yellow());
            return Ok(());
        }
    };

    let registry = ShardRegistry::for_layout(&layout)?;
    registry.load().await?;

    println!(
        "\n{} ({} shards, {:?})",
        "Shards:".bold(),
        plan.shard_count(),
        plan.policy()
    );
    for assignment in plan.assignments() {
        let result = registry.get(assignment.index).await;
        let status = match result.as_ref().map(|r| r.status) {
            Some(ShardStatus::Succeeded) => "SUCCEEDED".green().to_string(),
            Some(ShardStatus::Failed) => "FAILED".red().to_string(),
            Some(ShardStatus::Running) => "RUNNING".yellow().to_string(),
            Some(ShardStatus::Pending) => "PENDING".dimmed().to_string(),
            None => "UNKNOWN".dimmed().to_string(),
        };

        let mut line = format!("  [{}] {:<22} {}", assignment.index, assignment.label(), status);
        if let Some(result) = &result {
            if let Some(records) = result.record_count {
                line.push_str(&format!("  {} records", records));
            }
            if let Some(secs) = result.duration_secs() {
                line.push_str(&format!("  {}s", secs));
            }
        }
        println!("{}", line);

        if let Some(error) = result.as_ref().and_then(|r| r.error.as_ref()) {
            println!("      {}", error.red());
        }
    }

    let manifest = layout.manifest_path();
    if manifest.exists() {
        let artifact = MergedArtifact::load(&manifest)?;
        println!();
        print_artifact(&artifact);
    } else if registry.all_succeeded(&plan).await {
        println!("\n  {}", "All shards succeeded. Run `vcshard merge`.".yellow());
    }

    Ok(())
}

fn runner() -> Arc<dyn ToolRunner> {
    Arc::new(ProcessRunner::new())
}

fn print_plan(plan: &ShardPlan) {
    println!(
        "{} {} shards over {} chromosomes ({:?})",
        "Shard plan:".bold(),
        plan.shard_count(),
        plan.universe().len(),
        plan.policy()
    );
    for assignment in plan.assignments() {
        let length = assignment
            .length_bp
            .map(|bp| format!("{:.1} Mbp", bp as f64 / 1_000_000.0))
            .unwrap_or_default();
        println!(
            "  [{}] {:>2} chromosomes {:>10}  {}",
            assignment.index,
            assignment.num_chromosomes(),
            length,
            assignment.regions_arg()
        );
    }
}

fn print_artifact(artifact: &MergedArtifact) {
    println!("{} Merged VCF published", "✓".green());
    println!("  Output:  {}", artifact.output_file().display());
    println!("  Index:   {}", artifact.output_index().display());
    println!("  Records: {}", artifact.record_count());
    println!("  Shards:  {:?}", artifact.shard_indices());
    println!("  Run ID:  {}", artifact.run_id());
}
