//! NutriScan - food package photo to nutrition record
//!
//! Tries the product barcode against Open Food Facts first and falls back
//! to multi-pass OCR of the nutrition label.

mod config;
mod error;
mod lookup;
mod nutrition;
mod scanner;
mod vision;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::AppConfig;
use crate::scanner::Scanner;
use crate::vision::TesseractCli;

/// NutriScan - extract nutrition data from a food package photo
#[derive(Parser, Debug)]
#[command(name = "nutriscan")]
#[command(about = "Barcode lookup with OCR fallback for food package photos")]
struct Args {
    /// Photo of the package (JPEG, PNG, ...)
    image: Option<PathBuf>,

    /// Configuration file (defaults to the per-user config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip barcode detection and go straight to OCR
    #[arg(long)]
    no_barcode: bool,

    /// Add a single-block pass restricted to label characters
    #[arg(long)]
    whitelist: bool,

    /// Print confident text regions instead of scanning
    #[arg(long, conflicts_with = "words")]
    regions: bool,

    /// Print word-level OCR output instead of scanning
    #[arg(long)]
    words: bool,

    /// Check that the OCR engine is installed and exit
    #[arg(long)]
    check_engine: bool,

    /// Write the default configuration to the config path and exit
    #[arg(long)]
    write_default_config: bool,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Grace period for OCR passes abandoned by the pass budget
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays machine-readable
    let default_level = if args.verbose { "debug" } else { "info" };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => config::get_config_dir()?.join("config.toml"),
    };

    if args.write_default_config {
        config::save_config(&AppConfig::default(), &config_path)?;
        println!("Wrote default configuration to {}", config_path.display());
        return Ok(());
    }

    let mut config = load_or_default_config(&config_path, args.config.is_some())?;
    if args.no_barcode {
        config.barcode.enabled = false;
    }
    if args.whitelist {
        config.recognition.whitelist_pass = true;
    }

    if args.check_engine {
        let engine = TesseractCli::new(
            config.recognition.tesseract_cmd.clone(),
            config.recognition.languages.clone(),
        );
        let version = engine.version()?;
        println!("{}", version);
        return Ok(());
    }

    let Some(image_path) = args.image.as_deref() else {
        bail!("No image given (see --help)");
    };
    let bytes = std::fs::read(image_path)
        .with_context(|| format!("Failed to read {}", image_path.display()))?;

    // Blocking OCR calls cannot be cancelled, so the runtime is shut down
    // with a timeout instead of waiting for them on drop
    let runtime = tokio::runtime::Runtime::new()?;
    let output = runtime.block_on(run(&config, &args, bytes));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    println!("{}", output?);
    Ok(())
}

async fn run(config: &AppConfig, args: &Args, bytes: Vec<u8>) -> Result<String> {
    let scanner = Scanner::with_default_backends(config)?;
    if args.regions {
        to_json(&scanner.regions(bytes).await?, args.pretty)
    } else if args.words {
        to_json(&scanner.words(bytes).await?, args.pretty)
    } else {
        let report = scanner.scan(bytes).await?;
        to_json(&report.response(), args.pretty)
    }
}

/// An explicit config path must load; the default path is optional
fn load_or_default_config(path: &Path, explicit: bool) -> Result<AppConfig> {
    if explicit || path.exists() {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(json)
}
