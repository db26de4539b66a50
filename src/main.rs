use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nnlab::config::{load_config, CifarConfig, DiabetesConfig, StockConfig};
use nnlab::experiments::{cifar, diabetes, stock};

#[derive(Debug, Parser)]
#[command(name = "nnlab", version, about = "Run the stock, diabetes and CIFAR-10 classification experiments")]
struct Cli {
    /// Log filter, e.g. `info` or `nnlab=debug`; RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    /// TOML configuration; built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the data file (or directory for CIFAR-10) from the configuration
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Overrides the random seed from the configuration
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// GRU over engineered daily price features
    Stock(RunArgs),
    /// Perceptron over the Pima diabetes table
    Diabetes(RunArgs),
    /// MobileNetV2 or ResNet18 on CIFAR-10 with hyperparameter search
    Cifar(RunArgs),
}

fn read_config<T: DeserializeOwned + Default>(args: &RunArgs) -> Result<T> {
    match &args.config {
        Some(path) => load_config(path).with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(T::default()),
    }
}

fn print_report<T: Serialize>(report: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&cli.log_level))?;
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match &cli.command {
        Command::Stock(args) => {
            let mut config: StockConfig = read_config(args)?;
            if let Some(path) = &args.data {
                config.data_path = path.clone();
            }
            config.seed = args.seed.or(config.seed);
            info!(data = %config.data_path.display(), "running stock experiment");
            let report = stock::run(&config).context("stock experiment failed")?;
            print_report(&report)?;
        }
        Command::Diabetes(args) => {
            let mut config: DiabetesConfig = read_config(args)?;
            if let Some(path) = &args.data {
                config.data_path = path.clone();
            }
            config.seed = args.seed.or(config.seed);
            info!(data = %config.data_path.display(), "running diabetes experiment");
            let report = diabetes::run(&config).context("diabetes experiment failed")?;
            print_report(&report)?;
        }
        Command::Cifar(args) => {
            let mut config: CifarConfig = read_config(args)?;
            if let Some(path) = &args.data {
                config.data_dir = path.clone();
            }
            config.seed = args.seed.or(config.seed);
            info!(data = %config.data_dir.display(), "running CIFAR-10 experiment");
            let report = cifar::run(&config).context("CIFAR-10 experiment failed")?;
            print_report(&report)?;
        }
    }

    Ok(())
}
