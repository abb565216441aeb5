//! polyplan CLI: validate, explain, and run YAML pipelines.

use clap::{Parser, Subcommand};
use polyplan_core::config::EngineConfig;
use polyplan_core::operator::ExecutionContext;
use polyplan_estimator::{InMemorySpecSource, LoadProfileEstimator};
use polyplan_exec::{load_lineage, Driver, JsonLineageSink};
use polyplan_operators::{default_registry, default_specs};
use polyplan_planner::{parse_yaml_pipeline, ParsedPipeline, PlanCompiler};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "polyplan")]
#[command(about = "Cross-platform plan compiler: map, optimize, execute, record lineage", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every command that compiles a plan.
#[derive(clap::Args, Debug, Clone, Default)]
struct PlanArgs {
    /// Path to the pipeline YAML file
    #[arg(short, long)]
    pipeline: PathBuf,

    /// Cost specification YAML merged over the built-in one
    #[arg(long)]
    spec: Option<PathBuf>,

    /// Comma-separated platform priority, e.g. "local,distributed"
    #[arg(long)]
    platform_priority: Option<String>,

    /// Candidate count above which the greedy optimizer is used
    #[arg(long)]
    exhaustive_limit: Option<usize>,

    /// Partitions used by the distributed platform
    #[arg(long)]
    parallelism: Option<usize>,

    /// Lineage files from earlier runs to calibrate against
    #[arg(long = "calibrate")]
    calibrate: Vec<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and check a pipeline YAML file
    Validate {
        /// Path to the pipeline YAML file
        #[arg(short, long)]
        pipeline: PathBuf,
    },

    /// Compile a pipeline and print the chosen execution plan
    Explain {
        #[command(flatten)]
        plan: PlanArgs,

        /// Print the epoch-free plan structure as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compile and execute a pipeline
    Run {
        #[command(flatten)]
        plan: PlanArgs,

        /// Directory for the run's lineage graph (overrides config)
        #[arg(long)]
        lineage_out: Option<PathBuf>,

        /// Print `memory://` results as JSON lines
        #[arg(long)]
        print_results: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { pipeline } => {
            if let Err(e) = validate_pipeline(&pipeline) {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
            println!("✓ Pipeline is valid");
        }
        Commands::Explain { plan, json } => {
            if let Err(e) = explain_pipeline(&plan, json) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Run {
            plan,
            lineage_out,
            print_results,
        } => {
            if let Err(e) = run_pipeline(&plan, lineage_out, print_results) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn validate_pipeline(pipeline_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let yaml_content = fs::read_to_string(pipeline_path)?;
    let parsed = parse_yaml_pipeline(&yaml_content)?;
    let mut config = EngineConfig::default();
    parsed.config.apply(&mut config)?;
    config.validate()?;
    Ok(())
}

fn explain_pipeline(args: &PlanArgs, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (parsed, compiler) = prepare(args)?;
    let exec = compiler.compile(&parsed.plan, &parsed.hints)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&exec.structure())?);
        return Ok(());
    }

    println!("Pipeline Execution Plan");
    println!("=======================");
    println!();
    println!("Operators: {}", parsed.plan.len());
    let (_, candidates) = compiler.candidates(&parsed.plan, &parsed.hints, exec.epoch())?;
    println!("Candidates considered: {}", candidates.len());
    println!("Plan fingerprint: {}", exec.fingerprint()?.short());
    println!();
    print!("{}", exec);
    Ok(())
}

fn run_pipeline(
    args: &PlanArgs,
    lineage_out: Option<PathBuf>,
    print_results: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (parsed, compiler) = prepare(args)?;
    let exec = compiler.compile(&parsed.plan, &parsed.hints)?;

    let mut config = compiler.config().clone();
    if let Some(dir) = lineage_out {
        config.lineage_dir = Some(dir.to_string_lossy().into_owned());
    }
    let sink_dir = config.lineage_dir.clone();
    let mut driver = Driver::new(ExecutionContext::new(config));
    if let Some(dir) = sink_dir {
        driver = driver.with_sink(Box::new(JsonLineageSink::new(dir)));
    }
    let lineage = driver.execute(&exec)?;

    println!("✓ Pipeline executed successfully");
    println!(
        "  Duration: {}ms",
        lineage.finished_ms().saturating_sub(lineage.started_ms())
    );
    println!("  Run id: {}", lineage.run_id());
    println!("  Plan fingerprint: {}", lineage.plan_fingerprint());
    println!("  Lineage nodes: {}", lineage.len());
    println!("  Channels created: {}", driver.created_channels().len());

    for name in driver.results().names() {
        let rows = driver.results().get(&name).unwrap_or_default();
        println!("  memory://{}: {} record(s)", name, rows.len());
        if print_results {
            for r in &rows {
                println!("{}", r.to_json());
            }
        }
    }
    Ok(())
}

/// Parse the pipeline, layer env, pipeline, and CLI config, and build a
/// compiler calibrated from any supplied lineage files.
fn prepare(args: &PlanArgs) -> Result<(ParsedPipeline, PlanCompiler), Box<dyn std::error::Error>> {
    let yaml_content = fs::read_to_string(&args.pipeline)?;
    let parsed = parse_yaml_pipeline(&yaml_content)?;

    let mut config = EngineConfig::from_env();
    parsed.config.apply(&mut config)?;
    apply_cli_overrides(&mut config, args)?;
    config.validate()?;

    let mut specs = default_specs()?;
    if let Some(path) = &args.spec {
        specs = specs.merge(InMemorySpecSource::from_yaml_str(&fs::read_to_string(path)?)?);
    }
    let estimator = LoadProfileEstimator::new(Arc::new(specs), config.estimator.clone());
    let mut compiler = PlanCompiler::new(Arc::new(default_registry()?), estimator, config);

    for path in &args.calibrate {
        let graph = load_lineage(path)?;
        let used = compiler.calibrate(&graph);
        info!(path = %path.display(), observations = used, "calibrated");
    }
    Ok((parsed, compiler))
}

fn apply_cli_overrides(cfg: &mut EngineConfig, args: &PlanArgs) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(list) = &args.platform_priority {
        cfg.optimizer.platform_priority = polyplan_core::config::parse_platform_list(list)?;
    }
    if let Some(limit) = args.exhaustive_limit {
        cfg.optimizer.exhaustive_candidate_limit = limit;
    }
    if let Some(p) = args.parallelism {
        cfg.distributed_parallelism = p;
    }
    Ok(())
}
