//! twinkle-eval - LLM multiple-choice evaluation CLI
//!
//! ## Commands
//!
//! - `run`: evaluate the configured datasets (one rank of a distributed run,
//!   or a whole single-process run)
//! - `finalize`: merge distributed shards of a timestamp into the final report
//! - `init`: write a starter config file

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use twinkle_core::{
    DirectoryPublisher, Distribution, EvalConfig, EvaluationRunner, FileExporter, FinalizeOutcome,
    Finalizer, FsShardStore, LogFormat, OpenAiCompatClient, ResultPublisher, CONFIG_TEMPLATE,
};

#[derive(Parser)]
#[command(name = "twinkle-eval")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multiple-choice LLM evaluation with distributed result merging", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate the datasets listed in a config file
    Run {
        /// Config file
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,

        /// Directory for shard logs and reports
        #[arg(long, default_value = "results")]
        results_dir: PathBuf,

        /// Shared timestamp so that cooperating ranks agree (generated if omitted)
        #[arg(long, env = "TWINKLE_TIMESTAMP")]
        timestamp: Option<String>,

        /// Node index of this process
        #[arg(long, env = "SLURM_NODEID", default_value_t = 0)]
        node: u32,

        /// Rank of this process
        #[arg(long, env = "SLURM_PROCID", default_value_t = 0)]
        rank: u32,

        /// Number of cooperating ranks
        #[arg(long, env = "SLURM_NTASKS", default_value_t = 1)]
        world_size: u32,

        /// API key, overriding the config file
        #[arg(long, env = "TWINKLE_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Report formats for single-process runs
        #[arg(long, value_delimiter = ',', default_value = "json")]
        export: Vec<String>,

        /// Seed for option shuffling
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Merge the shards of one timestamp into results_{timestamp}.json
    Finalize {
        /// Timestamp of the evaluation to merge
        timestamp: String,

        /// Directory holding shard logs and summaries
        #[arg(long, default_value = "results")]
        results_dir: PathBuf,

        /// Copy the final results into this directory
        #[arg(long)]
        publish_dir: Option<PathBuf>,

        /// Variant name under the publish directory
        #[arg(long, default_value = "default")]
        variant: String,
    },

    /// Write a starter config file
    Init {
        /// Where to write the config
        #[arg(default_value = "config.yaml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    twinkle_core::init_tracing(LogFormat::from_json_flag(cli.json), level);

    match cli.command {
        Commands::Run {
            config,
            results_dir,
            timestamp,
            node,
            rank,
            world_size,
            api_key,
            export,
            seed,
        } => {
            let distribution = Distribution {
                node,
                rank,
                world_size,
            };
            cmd_run(&config, results_dir, timestamp, distribution, api_key, export, seed).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Finalize {
            timestamp,
            results_dir,
            publish_dir,
            variant,
        } => cmd_finalize(&timestamp, &results_dir, publish_dir, &variant),
        Commands::Init { path, force } => {
            cmd_init(&path, force)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn cmd_run(
    config_path: &Path,
    results_dir: PathBuf,
    timestamp: Option<String>,
    distribution: Distribution,
    api_key: Option<String>,
    formats: Vec<String>,
    seed: Option<u64>,
) -> Result<()> {
    if distribution.world_size == 0 || distribution.rank >= distribution.world_size {
        bail!(
            "rank {} is outside world size {}",
            distribution.rank,
            distribution.world_size
        );
    }
    if distribution.world_size > 1 && timestamp.is_none() {
        bail!("distributed runs need a shared --timestamp (or TWINKLE_TIMESTAMP)");
    }

    let config = EvalConfig::load(config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    let client = OpenAiCompatClient::new(&config.llm_api, &config.model)
        .context("Failed to build model client")?
        .with_api_key(api_key);

    let mut runner = EvaluationRunner::new(config, Arc::new(client))?
        .with_results_dir(results_dir)
        .with_distribution(distribution)
        .with_formats(formats);
    if let Some(seed) = seed {
        runner = runner.with_seed(seed);
    }

    let summary = runner.run(timestamp).await.context("Evaluation failed")?;
    for path in &summary.written {
        println!("{}", path.display());
    }
    if distribution.world_size > 1 {
        info!(
            timestamp = %summary.timestamp,
            "rank finished; run `twinkle-eval finalize {}` once all ranks are done",
            summary.timestamp
        );
    } else {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary.report.dataset_results)
                .context("Failed to render results")?
        );
    }
    Ok(())
}

fn cmd_finalize(
    timestamp: &str,
    results_dir: &Path,
    publish_dir: Option<PathBuf>,
    variant: &str,
) -> Result<ExitCode> {
    let publisher = publish_dir.map(|dir| DirectoryPublisher::new(dir, Some(variant)));
    let finalizer = Finalizer {
        results_dir,
        store: &FsShardStore,
        exporter: &FileExporter,
        publisher: publisher.as_ref().map(|p| p as &dyn ResultPublisher),
    };

    match finalizer.finalize(timestamp).context("Finalize failed")? {
        FinalizeOutcome::Merged { exported, .. } => {
            for path in exported {
                println!("{}", path.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        FinalizeOutcome::AlreadyFinal { report_path } => {
            println!("{} is already final", report_path.display());
            Ok(ExitCode::SUCCESS)
        }
        FinalizeOutcome::NotFound => {
            eprintln!("no shards or final result found for timestamp {timestamp}");
            Ok(ExitCode::from(1))
        }
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::write(path, CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}
