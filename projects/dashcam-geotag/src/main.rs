mod cli;
mod error;
mod pipeline;
mod run_artifacts;
mod run_context;
mod telemetry;
mod video;

use anyhow::{bail, Result};
use cli::Args;
use pipeline::orchestrator::process_batch;
use run_context::{list_videos, GeotagConfig};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse_args();
    let config = GeotagConfig::from_args(&args)?;

    let videos = list_videos(&args.inputs);
    if videos.is_empty() {
        bail!("No video files found in the given inputs");
    }
    tracing::info!(
        "Found {} video(s); writing to {}",
        videos.len(),
        config.output_root.display()
    );

    process_batch(&videos, &config);

    Ok(())
}
