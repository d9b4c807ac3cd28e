//! trajprep - trajectory controller data preparation
//!
//! # Usage
//!
//! ```bash
//! # Merge data/data_ins_*.npz into data/merged_rows.npz
//! trajprep merge
//!
//! # Write the feature row of sample 0 to input.txt
//! trajprep build-input --dataset data/test_data.npz --sample 0
//!
//! # Fit normalizers, then export their parameters for the runtime
//! trajprep fit-scalers --dataset data/merged_rows.npz
//! trajprep export-scalers
//! ```
//!
//! # Environment Variables
//!
//! - `TRAJPREP_CONFIG`: Path to a `trajprep.toml` (default: `./trajprep.toml`)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use trajprep::config::PipelineConfig;
use trajprep::merge::{MergeOutcome, SessionMerger};
use trajprep::{pipeline, scaler};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "trajprep")]
#[command(about = "Data preparation for a learned trajectory controller")]
#[command(version)]
struct CliArgs {
    /// Configuration file. Overrides $TRAJPREP_CONFIG and ./trajprep.toml
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Concatenate session recordings into one dataset
    Merge {
        /// Directory holding the session files
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Merged dataset path (default: <data-dir>/merged_rows.npz)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Read session files in parallel
        #[arg(long, conflicts_with = "sequential")]
        parallel: bool,
        /// Read session files one at a time
        #[arg(long)]
        sequential: bool,
    },

    /// Write the feature row of one sample as text
    BuildInput {
        /// Dataset holding current states and reference paths
        #[arg(long)]
        dataset: Option<PathBuf>,
        /// Row index of the sample
        #[arg(long)]
        sample: Option<usize>,
        /// Feature file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check which flatten order anchors reference paths at the current position
    CheckLayout {
        /// Dataset to inspect (default: the merged dataset)
        #[arg(long)]
        dataset: Option<PathBuf>,
    },

    /// Fit input and output normalizers on a dataset
    FitScalers {
        /// Training dataset (default: the merged dataset)
        #[arg(long)]
        dataset: Option<PathBuf>,
        #[arg(long)]
        scaler_x: Option<PathBuf>,
        #[arg(long)]
        scaler_y: Option<PathBuf>,
    },

    /// Export fitted normalizer parameters as JSON for the inference runtime
    ExportScalers {
        #[arg(long)]
        scaler_x: Option<PathBuf>,
        #[arg(long)]
        scaler_y: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(PipelineConfig::load()),
    }
}

// ============================================================================
// Subcommands
// ============================================================================

fn run_merge(
    config: &PipelineConfig,
    data_dir: Option<PathBuf>,
    output: Option<PathBuf>,
    parallel: bool,
    sequential: bool,
) -> Result<()> {
    let dataset = &config.dataset;
    let data_dir = data_dir.unwrap_or_else(|| dataset.data_dir.clone());
    let output = output.unwrap_or_else(|| data_dir.join(&dataset.merged_file));
    let parallel_reads = (dataset.parallel_reads || parallel) && !sequential;

    let merger = SessionMerger::from_config(dataset).with_parallel_reads(parallel_reads);
    let outcome = merger
        .merge_directory(&data_dir, &dataset.session_prefix, &dataset.session_suffix, &output)
        .context("Merge failed")?;

    match outcome {
        MergeOutcome::Written(summary) => {
            for (key, (rows, cols)) in &summary.shapes {
                info!("  {key}: {rows} x {cols}");
            }
            for key in &summary.omitted {
                info!("  {key}: no data, omitted");
            }
            let skipped = summary.skipped().count();
            info!(
                "Merged {} session(s), skipped {} -> {}",
                summary.sources.len(),
                skipped,
                summary.output.display()
            );
        }
        MergeOutcome::NothingToMerge { files } => {
            info!("Nothing to merge ({} file(s) examined)", files.len());
        }
    }
    Ok(())
}

fn run_build_input(
    config: &PipelineConfig,
    dataset: Option<PathBuf>,
    sample: Option<usize>,
    output: Option<PathBuf>,
) -> Result<()> {
    let dataset = dataset.unwrap_or_else(|| config.input.dataset.clone());
    let sample = sample.unwrap_or(config.input.sample_index);
    let output = output.unwrap_or_else(|| config.input.output.clone());

    let row = pipeline::build_input_file(config, &dataset, sample, &output)
        .with_context(|| format!("Failed to build input from {}", dataset.display()))?;
    info!("Saved sample {} ({} values) to {}", sample, row.len(), output.display());
    Ok(())
}

fn run_check_layout(config: &PipelineConfig, dataset: Option<PathBuf>) -> Result<()> {
    let dataset = dataset.unwrap_or_else(|| config.merged_path());
    let diagnosis = pipeline::check_layout(config, &dataset)
        .with_context(|| format!("Failed to inspect {}", dataset.display()))?;
    info!(
        "Samples: {} | channel_major residual: {:.6} | time_major residual: {:.6}",
        diagnosis.samples, diagnosis.channel_major_residual, diagnosis.time_major_residual
    );
    Ok(())
}

fn run_fit_scalers(
    config: &PipelineConfig,
    dataset: Option<PathBuf>,
    scaler_x: Option<PathBuf>,
    scaler_y: Option<PathBuf>,
) -> Result<()> {
    let dataset = dataset.unwrap_or_else(|| config.merged_path());
    let scaler_x = scaler_x.unwrap_or_else(|| config.scalers.scaler_x.clone());
    let scaler_y = scaler_y.unwrap_or_else(|| config.scalers.scaler_y.clone());

    pipeline::fit_scalers(config, &dataset, &scaler_x, &scaler_y)
        .with_context(|| format!("Failed to fit normalizers on {}", dataset.display()))?;
    Ok(())
}

fn run_export_scalers(
    config: &PipelineConfig,
    scaler_x: Option<PathBuf>,
    scaler_y: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let scaler_x = scaler_x.unwrap_or_else(|| config.scalers.scaler_x.clone());
    let scaler_y = scaler_y.unwrap_or_else(|| config.scalers.scaler_y.clone());
    let output = output.unwrap_or_else(|| config.scalers.output.clone());

    scaler::export_scalers(&scaler_x, &scaler_y, &output).context("Scaler export failed")?;
    info!("Scaler parameters saved to {}", output.display());
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let config = load_config(args.config.as_ref())?;

    match args.command {
        SubCommand::Merge {
            data_dir,
            output,
            parallel,
            sequential,
        } => run_merge(&config, data_dir, output, parallel, sequential),
        SubCommand::BuildInput {
            dataset,
            sample,
            output,
        } => run_build_input(&config, dataset, sample, output),
        SubCommand::CheckLayout { dataset } => run_check_layout(&config, dataset),
        SubCommand::FitScalers {
            dataset,
            scaler_x,
            scaler_y,
        } => run_fit_scalers(&config, dataset, scaler_x, scaler_y),
        SubCommand::ExportScalers {
            scaler_x,
            scaler_y,
            output,
        } => run_export_scalers(&config, scaler_x, scaler_y, output),
    }
}
