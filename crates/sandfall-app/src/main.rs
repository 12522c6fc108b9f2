//! Sandfall Interactive App
//!
//! Window viewer for the falling-sand reveal: play/pause, pointer pushes and draw mode.

mod surface;
mod viewer;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use sandfall_core::{load_image, ConversionSettings, RevealMode, SandConfig};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Drawing to animate (PNG)
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Random seed for reproducible runs
    #[arg(short, long)]
    seed: Option<u64>,

    /// Animation preset: build or reveal
    #[arg(short, long)]
    mode: Option<RevealMode>,
}

fn load_config(path: Option<&Path>) -> Result<SandConfig> {
    let Some(path) = path else {
        return Ok(SandConfig::default());
    };
    log::info!("Loading configuration from {}", path.display());
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config = serde_yaml::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(mode) = cli.mode {
        config.conversion = ConversionSettings::for_mode(mode);
    }

    let drawing = cli
        .image
        .as_deref()
        .map(|path| load_image(path).with_context(|| format!("loading {}", path.display())))
        .transpose()?;

    log::info!(
        "Starting Sandfall viewer: {}x{} canvas, seed {}",
        config.canvas.width,
        config.canvas.height,
        config.seed
    );

    pollster::block_on(viewer::run_viewer(config, drawing))
}
