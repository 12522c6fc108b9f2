use std::fs::File;
use std::path::Path;
use std::time::Duration;

use csv::Writer;
use sandfall_core::GrainStats;

/// Metrics writer for CSV output and performance logging
pub struct MetricsWriter {
    csv_writer: Writer<File>,
    rows: u32,
    settled_at: Option<u32>,
}

impl MetricsWriter {
    pub fn new(output_dir: &Path) -> Result<Self, anyhow::Error> {
        let file = File::create(output_dir.join("metrics.csv"))?;
        let mut csv_writer = Writer::from_writer(file);

        csv_writer.write_record([
            "tick",
            "elapsed_ms",
            "total",
            "active",
            "settled",
            "falling",
            "visible",
            "settled_fraction",
            "wall_time_ms",
            "fps_proxy",
        ])?;

        Ok(Self {
            csv_writer,
            rows: 0,
            settled_at: None,
        })
    }

    /// Write metrics for a single tick
    pub fn write_tick(
        &mut self,
        tick: u32,
        elapsed_ms: f32,
        stats: &GrainStats,
        tick_time: Duration,
    ) -> Result<(), anyhow::Error> {
        let wall_time_ms = tick_time.as_secs_f64() * 1000.0;
        let fps_proxy = if wall_time_ms > 0.0 { 1000.0 / wall_time_ms } else { 0.0 };
        let settled_fraction = if stats.total > 0 {
            stats.settled as f32 / stats.total as f32
        } else {
            0.0
        };

        if self.settled_at.is_none() && stats.total > 0 && stats.is_at_rest() {
            self.settled_at = Some(tick);
        }

        self.csv_writer.write_record(&[
            tick.to_string(),
            format!("{:.1}", elapsed_ms),
            stats.total.to_string(),
            stats.active.to_string(),
            stats.settled.to_string(),
            stats.falling.to_string(),
            stats.visible.to_string(),
            format!("{:.4}", settled_fraction),
            format!("{:.3}", wall_time_ms),
            format!("{:.1}", fps_proxy),
        ])?;
        self.csv_writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// First recorded tick at which every grain was released and at rest
    pub fn settled_at(&self) -> Option<u32> {
        self.settled_at
    }
}
