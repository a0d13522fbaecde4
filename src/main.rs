use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use neurograph::{Pipeline, PipelineConfig};

#[derive(Parser)]
#[command(name = "neurograph")]
#[command(about = "Connectivity matrices, graph thresholding and graph statistics for ROI time series")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose (debug-level) logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Number of worker threads (overrides the configuration; defaults to all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,
}

#[derive(Subcommand)]
enum Command {
    /// Compute connectivity, graphs, statistics and feature tables for a store
    Run {
        /// Path to the JSON pipeline configuration
        #[arg(long)]
        config: PathBuf,
    },

    /// Compile feature tables from statistics records already on disk
    Aggregate {
        /// Path to the JSON pipeline configuration
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Serialize)]
struct AggregateOutput {
    tables: Vec<PathBuf>,
}

fn load_config(path: &PathBuf, threads: Option<usize>) -> Result<PipelineConfig> {
    let mut cfg = PipelineConfig::from_file(path)
        .with_context(|| format!("failed to read configuration {}", path.display()))?;
    if threads.is_some() {
        cfg.threads = threads;
    }
    cfg.validate().context("invalid configuration")?;
    Ok(cfg)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.verbose, cli.quiet) {
        (true, _) => "debug",
        (_, true) => "error",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Run { config } => {
            let cfg = load_config(&config, cli.threads)?;
            info!(ts_dir = %cfg.ts_dir.display(), out_dir = %cfg.out_dir.display(), "starting run");
            let summary = Pipeline::new(cfg).run().context("pipeline run failed")?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Aggregate { config } => {
            let cfg = load_config(&config, cli.threads)?;
            let tables = Pipeline::new(cfg).aggregate().context("aggregation failed")?;
            println!("{}", serde_json::to_string_pretty(&AggregateOutput { tables })?);
        }
    }

    Ok(())
}
