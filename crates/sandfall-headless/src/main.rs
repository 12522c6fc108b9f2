mod metrics;
mod snapshots;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use image::RgbaImage;
use sandfall_core::{
    load_image, ConversionSettings, FrameTarget, GpuDevice, OffscreenTarget, RevealMode, SandConfig,
    SandStore,
};

use metrics::MetricsWriter;
use snapshots::{Capture, RasterTarget, SnapshotWriter};

#[derive(Parser)]
#[command(name = "sandfall-headless")]
#[command(about = "Headless CLI runner for sandfall reveal animations")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Drawing to animate (PNG); the filler block is used when omitted
    #[arg(short, long, value_name = "FILE")]
    image: Option<PathBuf>,

    /// Output directory for results
    #[arg(short, long, value_name = "DIR")]
    out: PathBuf,

    /// Number of ticks to simulate
    #[arg(long, default_value = "600")]
    ticks: u32,

    /// Write a PNG and grain CSV every N ticks (0 disables)
    #[arg(long, default_value = "100")]
    snapshot_every: u32,

    /// Write a metrics row every N ticks
    #[arg(long, default_value = "10")]
    metrics_every: u32,

    /// Render snapshots on the GPU instead of the CPU rasterizer
    #[arg(long)]
    gpu: bool,

    /// Stop early once every grain has been released and come to rest
    #[arg(long)]
    stop_when_settled: bool,

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

/// Drive the store for the requested ticks, writing metrics and snapshots
fn run<T: FrameTarget + Capture>(
    mut store: SandStore<T>,
    cli: &Cli,
    drawing: &RgbaImage,
) -> Result<SandStore<T>> {
    let grains = store.load_image(drawing)?;
    log::info!("Converted drawing into {} grains", grains);

    let mut metrics_writer = MetricsWriter::new(&cli.out)?;
    let mut snapshot_writer = SnapshotWriter::new(&cli.out)?;
    let dt_ms = store.settings().tick_ms;
    let metrics_every = cli.metrics_every.max(1);

    if cli.snapshot_every > 0 {
        snapshot_writer.write_frame(0, &store.target().capture()?)?;
        snapshot_writer.write_grains(0, store.grains())?;
    }

    log::info!("Starting simulation for {} ticks...", cli.ticks);
    let start_time = Instant::now();

    for tick in 1..=cli.ticks {
        let tick_start = Instant::now();
        store.tick(dt_ms)?;
        let tick_time = tick_start.elapsed();
        let stats = store.stats();

        if tick % metrics_every == 0 || tick == cli.ticks {
            metrics_writer.write_tick(tick, store.physics().elapsed_ms(), &stats, tick_time)?;
            log::debug!(
                "Tick {}: falling={}, settled={}, visible={}, time={:?}",
                tick,
                stats.falling,
                stats.settled,
                stats.visible,
                tick_time
            );
        }

        if cli.snapshot_every > 0 && tick % cli.snapshot_every == 0 {
            snapshot_writer.write_frame(tick, &store.target().capture()?)?;
            snapshot_writer.write_grains(tick, store.grains())?;
            log::info!("Snapshot written for tick {}", tick);
        }

        if cli.stop_when_settled && stats.is_at_rest() {
            log::info!("All grains at rest after {} ticks", tick);
            if tick % metrics_every != 0 {
                metrics_writer.write_tick(tick, store.physics().elapsed_ms(), &stats, tick_time)?;
            }
            break;
        }
    }

    snapshot_writer.write_final_grains(store.grains())?;

    log::info!(
        "Simulation completed in {:?} ({} metric rows, {} frames)",
        start_time.elapsed(),
        metrics_writer.rows(),
        snapshot_writer.frames_written()
    );
    match metrics_writer.settled_at() {
        Some(tick) => log::info!("Pile came to rest at tick {}", tick),
        None => log::warn!("Grains still moving at the end of the run"),
    }
    Ok(store)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(mode) = cli.mode {
        config.conversion = ConversionSettings::for_mode(mode);
    }

    // Validate configuration
    if config.canvas.width < 8 || config.canvas.height < 8 {
        anyhow::bail!(
            "Canvas too small ({}x{}). Minimum supported is 8x8.",
            config.canvas.width,
            config.canvas.height
        );
    }
    if cli.ticks == 0 {
        anyhow::bail!("Tick count must be greater than 0.");
    }

    let drawing = match cli.image.as_deref() {
        Some(path) => load_image(path).with_context(|| format!("loading {}", path.display()))?,
        None => {
            log::warn!("No --image given, animating the filler block");
            RgbaImage::new(1, 1)
        }
    };

    std::fs::create_dir_all(&cli.out)?;

    if cli.gpu {
        log::info!("Initializing GPU...");
        let gpu = GpuDevice::blocking()?;
        log::info!("{}", gpu.info());
        let target = OffscreenTarget::new(gpu, config.canvas, config.settings.cell_size)?;
        let store = SandStore::new(target, &config)?;
        run(store, &cli, &drawing)?.dispose().dispose();
    } else {
        let target = RasterTarget::new(config.canvas, config.settings.cell_size);
        let store = SandStore::new(target, &config)?;
        run(store, &cli, &drawing)?;
    }

    log::info!("Results written to {}", cli.out.display());
    Ok(())
}
