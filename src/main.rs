//! Thumbnail Pipeline CLI
//!
//! Serves the thumbnail HTTP API or resizes a single image from the command line.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use thumbnail_pipeline::{build_runtime, server, start_pipeline, Config, Metrics};

#[derive(Parser)]
#[command(name = "thumbnail-pipeline")]
#[command(about = "Resize images into thumbnails through a bounded worker pipeline", long_about = None)]
struct Cli {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(long, global = true)]
    addr: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default if no command specified)
    Serve,

    /// Resize a single image and exit
    Resize(ResizeArgs),

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ResizeArgs {
    /// Download the image from this URL
    #[arg(long)]
    url: Option<String>,

    /// Read the image from this file
    #[arg(long)]
    file: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Serve) => {
            serve_command(cli.config, cli.addr)?;
        }

        Some(Commands::Resize(args)) => {
            resize_command(cli.config, args)?;
        }

        Some(Commands::Validate) => {
            validate_command(cli.config)?;
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn serve_command(config_path: Option<PathBuf>, addr: Option<String>) -> Result<()> {
    let mut config = load_config(config_path)?;

    // Apply overrides
    if let Some(addr) = addr {
        config.server.addr = addr;
    }

    config.validate()?;

    let runtime = build_runtime(config.processing.worker_threads)?;
    runtime.block_on(server::serve(config))
}

fn resize_command(config_path: Option<PathBuf>, args: ResizeArgs) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate()?;

    let runtime = build_runtime(config.processing.worker_threads)?;
    runtime.block_on(async {
        let metrics = Metrics::new();
        let pipeline = start_pipeline(&config, metrics.clone())?;

        let outcome = match (args.url, args.file) {
            (Some(url), _) => pipeline.submit_from_url(url).await,
            (None, Some(file)) => {
                let image = tokio::fs::read(&file)
                    .await
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                pipeline.submit_bytes(image).await
            }
            (None, None) => anyhow::bail!("Either --url or --file is required"),
        };

        pipeline.shutdown().await;
        outcome?;

        println!("Thumbnail written to {}", config.storage.path_display());
        println!("{}", metrics.snapshot());
        Ok::<(), anyhow::Error>(())
    })
}

fn validate_command(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# Thumbnail Pipeline Configuration

# === PROCESSING: Worker pools, queues and job limits ===
processing:
  # Concurrent outbound downloads
  fetch_workers: 100

  # Concurrent decode/resize/encode jobs (CPU bound)
  transform_workers: 10

  # Concurrent blob writes
  persist_workers: 10

  # Queue capacities (default: matching worker count)
  # fetch_queue_size: 100
  # transform_queue_size: 10
  # persist_queue_size: 10

  # How long a caller waits for its job, in seconds.
  # A timed-out job is not cancelled and may still write its thumbnail.
  job_timeout_secs: 10

  # Largest accepted source image (15 MiB)
  max_image_size_bytes: 15728640

  # Tokio async worker threads (null = num CPUs)
  # worker_threads: 8

# === TRANSFORM: Thumbnail geometry ===
transform:
  width: 100
  height: 100

  # crop: fill the box exactly, cropping overflow
  # fit: fit inside the box, preserving aspect ratio
  strategy: crop

# === STORAGE: Where thumbnails are written ===
# Choose ONE of: local_path (local disk) OR bucket+prefix (S3)
storage:
  # Option 1: Write to local filesystem
  local_path: "thumbnails"

  # Option 2: Write to S3 (comment out local_path and uncomment these)
  # Credentials and region come from the environment (AWS_*)
  # bucket: "thumbnail-bucket"
  # prefix: "thumbnails"

# === HTTP CLIENT: Outbound connections used for fetching ===
http_client:
  idle_conn_timeout_secs: 90
  max_idle_conns_per_host: 100
  connect_timeout_secs: 5

# === SERVER ===
server:
  addr: "localhost:3000"

  # Log throughput and orphaned-job counters periodically
  enable_metrics: true
  metrics_interval_secs: 10

  # Write a final metrics snapshot as JSON on shutdown
  # metrics_output_path: "metrics.json"
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
