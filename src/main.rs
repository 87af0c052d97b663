//! dial-reader - angle readout for HMS/SHMS analog dials
//!
//! Prints one line per image: the angle with two decimals, or `failure`.

use anyhow::Result;
use clap::{ArgAction, Parser};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use dial_reader::batch::run_batch;
use dial_reader::config::{default_config_path, load_config, save_config};
use dial_reader::{DeviceType, DialConfig, DialReader};

/// Read dial angles from photographs
#[derive(Parser, Debug)]
#[command(name = "dial-reader")]
#[command(about = "Reads the pointer angle of HMS/SHMS analog dials from photographs")]
struct Args {
    /// Images to read
    #[arg(required_unless_present = "write_default_config")]
    images: Vec<PathBuf>,

    /// Device type (HMS or SHMS); inferred from each file name when omitted
    #[arg(short, long)]
    device: Option<DeviceType>,

    /// Encoder angle recorded alongside the reading
    #[arg(long)]
    encoder_angle: Option<f64>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of worker threads
    #[arg(short, long, default_value = "1")]
    jobs: usize,

    /// Emit one JSON object per image instead of plain lines
    #[arg(long)]
    json: bool,

    /// Write annotated frames and digit crops into this directory
    #[arg(long)]
    debug_dir: Option<PathBuf>,

    /// Write the default configuration (to --config or the default path) and exit
    #[arg(long)]
    write_default_config: bool,

    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries only results
    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.write_default_config {
        let path = match &args.config {
            Some(path) => path.clone(),
            None => default_config_path()?,
        };
        save_config(&DialConfig::default(), &path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let config = load_or_default_config(args.config.as_deref())?;

    let records = run_batch(
        &args.images,
        args.jobs,
        args.device,
        args.encoder_angle,
        || Ok(DialReader::new(config.clone())?.with_debug_dir(args.debug_dir.clone())),
    )?;

    for record in &records {
        if args.json {
            println!("{}", serde_json::to_string(record)?);
        } else {
            println!("{}", record.output);
        }
    }

    Ok(())
}

/// Explicit config file, else the default path if it exists, else defaults
fn load_or_default_config(explicit: Option<&Path>) -> Result<DialConfig> {
    if let Some(path) = explicit {
        let config = load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(path) = default_config_path() {
        if path.exists() {
            let config = load_config(&path)?;
            info!("Loaded configuration from {:?}", path);
            return Ok(config);
        }
    }

    info!("Using default configuration");
    Ok(DialConfig::default())
}
