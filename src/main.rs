//! docscan - extract text from a document image and print it as JSON

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use docscan::config::{self, AppConfig};
use docscan::vision::annotate;
use docscan::{input, storage, OcrEngine};

/// docscan - document text extraction
#[derive(Parser, Debug)]
#[command(name = "docscan")]
#[command(about = "Detects and reads text in a document image, printing JSON")]
struct Args {
    /// Image file to read (or a file holding a base64 payload with --base64)
    #[arg(required_unless_present = "write_default_config")]
    image: Option<PathBuf>,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Treat IMAGE as a text file containing a base64 or data-URI payload
    #[arg(long)]
    base64: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,

    /// Write a copy of the image with region boxes drawn on it
    #[arg(long, value_name = "PATH")]
    annotate: Option<PathBuf>,

    /// Recognition worker threads (overrides the configuration)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Write the default configuration to PATH and exit
    #[arg(long, value_name = "PATH")]
    write_default_config: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose) {
        eprintln!("failed to initialize logging: {:#}", e);
    }

    if let Err(e) = run(args) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn run(args: Args) -> Result<()> {
    if let Some(path) = &args.write_default_config {
        config::save_config(&AppConfig::default(), path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote default configuration to {:?}", path);
        return Ok(());
    }

    let image_path = args.image.as_deref().context("no input image given")?;

    let mut config = load_or_default_config(args.config.as_deref())?;
    if let Some(workers) = args.workers {
        config.performance.worker_threads = workers;
    }

    let image = if args.base64 {
        let payload = std::fs::read_to_string(image_path)
            .with_context(|| format!("failed to read {}", image_path.display()))?;
        input::load_base64(&payload)?
    } else {
        input::load_path(image_path)?
    };

    let engine = OcrEngine::from_config(&config)?;
    let report = engine.run_detailed(&image)?;

    let json = if args.pretty {
        serde_json::to_string_pretty(&report.result)?
    } else {
        serde_json::to_string(&report.result)?
    };
    println!("{}", json);

    if let Some(out) = &args.annotate {
        annotate::draw_regions(&image, &report.result)
            .save(out)
            .with_context(|| format!("failed to write annotated image {}", out.display()))?;
        info!("Annotated image written to {:?}", out);
    }

    Ok(())
}

/// Explicit config path, else `<config_dir>/config.toml` when present, else defaults
fn load_or_default_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        let config = config::load_config(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            let config = config::load_config(&config_path)
                .with_context(|| format!("failed to load configuration {}", config_path.display()))?;
            info!("Loaded configuration from {:?}", config_path);
            return Ok(config);
        }
    }

    info!("Using default configuration");
    Ok(AppConfig::default())
}
