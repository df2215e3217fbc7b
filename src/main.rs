//! Lesion Trainer CLI
//!
//! Entry point for training the HAM10000 skin-lesion classifier and for
//! inspecting the dataset (channel statistics, split and balance summary).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use lesion_trainer::backend::{backend_name, DeviceCapabilities, DeviceKind};
use lesion_trainer::config::TrainingConfig;
use lesion_trainer::dataset::MetadataTable;
use lesion_trainer::training::{compute_and_save_stats, prepare_data, TrainingReport};
use lesion_trainer::utils::format_duration;
use lesion_trainer::utils::logging::{init_logging, LogConfig, LogLevel};
use lesion_trainer::VERSION;

/// Skin-lesion classification training with Burn
#[derive(Parser, Debug)]
#[command(name = "lesion_trainer")]
#[command(version)]
#[command(about = "Train a skin-lesion classifier on HAM10000 with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Minimum log level (trace, debug, info, warn, error); RUST_LOG overrides it
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Disable coloured output
    #[arg(long, global = true, default_value = "false")]
    plain: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Dataset location flags shared by every subcommand
#[derive(clap::Args, Debug, Clone)]
struct DataArgs {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory containing the images (searched recursively)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Metadata CSV (defaults to <data_dir>/HAM10000_metadata.csv)
    #[arg(long)]
    metadata_file: Option<PathBuf>,

    /// Directory for checkpoints, statistics and history
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train the classifier
    Train {
        #[command(flatten)]
        data: DataArgs,

        /// Number of training epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Batch size for training and validation
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Learning rate
        #[arg(short, long)]
        learning_rate: Option<f64>,

        /// Architecture id (densenet, cnn)
        #[arg(short, long)]
        architecture: Option<String>,

        /// Loader worker threads (0 loads inline)
        #[arg(long)]
        num_workers: Option<usize>,

        /// Compute device (cpu, cuda)
        #[arg(long)]
        device: Option<DeviceKind>,

        /// Use f16 arithmetic when the device supports it
        #[arg(long, default_value = "false")]
        mixed_precision: bool,
    },

    /// Compute and print per-channel normalization statistics
    Stats {
        #[command(flatten)]
        data: DataArgs,
    },

    /// Print the stratified split and class-balance summary
    Split {
        #[command(flatten)]
        data: DataArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::for_cli(cli.verbose, cli.log_level, cli.plain);
    init_logging(&log_config)?;
    if cli.plain {
        colored::control::set_override(false);
    }

    print_banner();

    match cli.command {
        Commands::Train {
            data,
            epochs,
            batch_size,
            learning_rate,
            architecture,
            num_workers,
            device,
            mixed_precision,
        } => {
            let mut config = load_config(&data)?;
            if let Some(epochs) = epochs {
                config.training.num_epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.training.batch_size = batch_size;
            }
            if let Some(learning_rate) = learning_rate {
                config.training.learning_rate = learning_rate;
            }
            if let Some(architecture) = architecture {
                config.model.architecture = architecture;
            }
            if let Some(num_workers) = num_workers {
                config.training.num_workers = num_workers;
            }
            if let Some(device) = device {
                config.device.device = device;
            }
            config.device.mixed_precision |= mixed_precision;

            cmd_train(&config)?;
        }

        Commands::Stats { data } => {
            cmd_stats(&load_config(&data)?)?;
        }

        Commands::Split { data } => {
            cmd_split(&load_config(&data)?)?;
        }
    }

    Ok(())
}

fn print_banner() {
    let title = format!("Lesion Trainer v{}", VERSION);
    println!(
        "{}",
        format!(
            r#"
 +--------------------------------------------------------------+
 |   {:<59}|
 |   HAM10000 skin-lesion classification with Burn + Rust       |
 +--------------------------------------------------------------+
  "#,
            title
        )
        .green()
    );
}

/// Config file (or defaults) with the shared path flags applied
fn load_config(args: &DataArgs) -> Result<TrainingConfig> {
    let mut config = match &args.config {
        Some(path) => TrainingConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TrainingConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.data.data_dir = dir.clone();
    }
    if let Some(file) = &args.metadata_file {
        config.data.metadata_file = Some(file.clone());
    }
    if let Some(dir) = &args.output_dir {
        config.data.output_dir = dir.clone();
    }
    Ok(config)
}

fn cmd_train(config: &TrainingConfig) -> Result<()> {
    config.validate().context("invalid training configuration")?;
    let caps = DeviceCapabilities::resolve(config.device.device)?;
    let mixed = caps.use_mixed_precision(config.device.mixed_precision);

    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Data directory:  {}", config.data.data_dir.display());
    println!("  Output:          {}", config.data.output_dir.display());
    println!("  Architecture:    {}", config.model.architecture);
    println!("  Epochs:          {}", config.training.num_epochs);
    println!("  Batch size:      {}", config.training.batch_size);
    println!("  Learning rate:   {}", config.training.learning_rate);
    println!(
        "  Device:          {} ({}, {})",
        caps.device_kind,
        backend_name(caps.device_kind),
        if mixed { "f16" } else { "f32" }
    );
    println!();

    let started = std::time::Instant::now();
    let report = dispatch_training(config, caps, mixed)?;

    println!();
    println!("{}", "Training Complete:".green().bold());
    println!(
        "  Duration:        {}",
        format_duration(started.elapsed().as_secs_f64())
    );
    match (report.best_epoch, report.best_accuracy) {
        (Some(epoch), Some(acc)) => {
            println!("  Best val acc:    {:.2}% (epoch {})", acc * 100.0, epoch)
        }
        _ => println!("  Best val acc:    {}", "none".yellow()),
    }
    if let Some(path) = &report.checkpoint_path {
        println!("  Checkpoint:      {}", path.display());
    }
    Ok(())
}

/// Run the pipeline on the backend matching the resolved device
#[cfg_attr(not(feature = "cuda"), allow(unused_variables))]
fn dispatch_training(
    config: &TrainingConfig,
    caps: DeviceCapabilities,
    mixed_precision: bool,
) -> Result<TrainingReport> {
    use lesion_trainer::training::run_training;

    let report = match caps.device_kind {
        #[cfg(feature = "cuda")]
        DeviceKind::Cuda if mixed_precision => run_training::<
            lesion_trainer::backend::CudaMixedPrecisionBackend,
        >(config)?,
        #[cfg(feature = "cuda")]
        DeviceKind::Cuda => {
            run_training::<lesion_trainer::backend::CudaTrainingBackend>(config)?
        }
        #[cfg(feature = "ndarray")]
        DeviceKind::Cpu => run_training::<lesion_trainer::backend::CpuTrainingBackend>(config)?,
        #[allow(unreachable_patterns)]
        other => anyhow::bail!("no backend compiled in for device '{}'", other),
    };
    Ok(report)
}

fn cmd_stats(config: &TrainingConfig) -> Result<()> {
    info!("Computing channel statistics for: {}", config.data.data_dir.display());
    let table = MetadataTable::load(&config.data.data_dir, &config.data.metadata_path())
        .context("loading metadata")?;
    let stats = compute_and_save_stats(&table, &config.data.output_dir)?;

    println!("{}", "Channel Statistics (RGB):".cyan().bold());
    println!("  Images:  {}", table.len());
    println!(
        "  Mean:    [{:.6}, {:.6}, {:.6}]",
        stats.mean[0], stats.mean[1], stats.mean[2]
    );
    println!(
        "  Std:     [{:.6}, {:.6}, {:.6}]",
        stats.std[0], stats.std[1], stats.std[2]
    );
    Ok(())
}

fn cmd_split(config: &TrainingConfig) -> Result<()> {
    let data = prepare_data(config).context("loading metadata")?;
    let summary = &data.summary;

    println!("{}", "Split Summary:".cyan().bold());
    println!(
        "  {:<32} {:>8} {:>10} {:>8}",
        "class", "train", "balanced", "val"
    );
    for (i, name) in summary.class_names.iter().enumerate() {
        println!(
            "  {:<32} {:>8} {:>10} {:>8}",
            name, summary.train_before[i], summary.train_after[i], summary.val[i]
        );
    }
    println!(
        "  {:<32} {:>8} {:>10} {:>8}",
        "total",
        data.train.len(),
        data.balanced_train.len(),
        data.val.len()
    );
    Ok(())
}
