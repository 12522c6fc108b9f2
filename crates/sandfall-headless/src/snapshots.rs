use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Result;
use csv::Writer;
use image::{Rgba, RgbaImage};
use sandfall_core::{
    CanvasSize, FrameTarget, Grain, OffscreenTarget, RenderError, SimulationSettings, CLEAR_COLOR,
};

/// A frame target whose last frame can be saved
pub trait Capture {
    fn capture(&self) -> Result<RgbaImage>;
}

fn to_byte(channel: f32) -> u8 {
    (channel.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// CPU rasterizer drawing the same squares the GPU renderer does
pub struct RasterTarget {
    canvas: CanvasSize,
    cell_size: f32,
    frame: RgbaImage,
}

impl RasterTarget {
    pub fn new(canvas: CanvasSize, cell_size: f32) -> Self {
        Self {
            canvas,
            cell_size,
            frame: RgbaImage::new(canvas.width, canvas.height),
        }
    }

    fn background() -> Rgba<u8> {
        Rgba([
            to_byte(CLEAR_COLOR.r as f32),
            to_byte(CLEAR_COLOR.g as f32),
            to_byte(CLEAR_COLOR.b as f32),
            255,
        ])
    }
}

impl FrameTarget for RasterTarget {
    fn update_grains(&mut self, grains: &[Grain]) {
        let background = Self::background();
        self.frame.pixels_mut().for_each(|p| *p = background);

        let width = self.canvas.width as f32;
        let height = self.canvas.height as f32;
        for grain in grains.iter().filter(|g| g.is_visible()) {
            let color = Rgba(grain.color.map(to_byte));
            let x0 = grain.x.max(0.0);
            let y0 = grain.y.max(0.0);
            let x1 = (grain.x + self.cell_size).min(width);
            let y1 = (grain.y + self.cell_size).min(height);

            // pixel centers inside the square, as the rasterizer samples them
            let first_px = (x0 - 0.5).ceil().max(0.0) as u32;
            let end_px = (x1 - 0.5).ceil().max(0.0) as u32;
            let first_py = (y0 - 0.5).ceil().max(0.0) as u32;
            let end_py = (y1 - 0.5).ceil().max(0.0) as u32;
            for py in first_py..end_py {
                for px in first_px..end_px {
                    self.frame.put_pixel(px, py, color);
                }
            }
        }
    }

    fn render(&mut self) -> Result<(), RenderError> {
        Ok(())
    }

    fn resize(&mut self, canvas: CanvasSize) {
        self.canvas = canvas;
        self.frame = RgbaImage::new(canvas.width, canvas.height);
    }

    fn update_settings(&mut self, settings: &SimulationSettings) {
        self.cell_size = settings.cell_size;
    }
}

impl Capture for RasterTarget {
    fn capture(&self) -> Result<RgbaImage> {
        Ok(self.frame.clone())
    }
}

impl Capture for OffscreenTarget {
    fn capture(&self) -> Result<RgbaImage> {
        Ok(self.read_pixels()?)
    }
}

fn write_grain_csv(path: &Path, grains: &[Grain]) -> Result<()> {
    let mut csv_writer = Writer::from_writer(File::create(path)?);

    csv_writer.write_record([
        "id", "x", "y", "vy", "r", "g", "b", "a", "settled", "active", "delay",
    ])?;
    for (i, grain) in grains.iter().enumerate() {
        csv_writer.write_record(&[
            i.to_string(),
            grain.x.to_string(),
            grain.y.to_string(),
            grain.vy.to_string(),
            grain.color[0].to_string(),
            grain.color[1].to_string(),
            grain.color[2].to_string(),
            grain.color[3].to_string(),
            (grain.settled as u8).to_string(),
            (grain.is_active() as u8).to_string(),
            grain.delay().to_string(),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Snapshot writer for frame images and grain data
pub struct SnapshotWriter {
    output_dir: PathBuf,
    written: u32,
}

impl SnapshotWriter {
    pub fn new(output_dir: &Path) -> Result<Self> {
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            written: 0,
        })
    }

    /// Write a frame as PNG
    pub fn write_frame(&mut self, tick: u32, frame: &RgbaImage) -> Result<PathBuf> {
        let path = self.output_dir.join(format!("frame_{:05}.png", tick));
        frame.save(&path)?;
        self.written += 1;
        Ok(path)
    }

    /// Write grain positions and states to CSV
    pub fn write_grains(&self, tick: u32, grains: &[Grain]) -> Result<PathBuf> {
        let path = self.output_dir.join(format!("grains_{:05}.csv", tick));
        write_grain_csv(&path, grains)?;
        Ok(path)
    }

    /// Final grain dump at the end of a run
    pub fn write_final_grains(&self, grains: &[Grain]) -> Result<PathBuf> {
        let path = self.output_dir.join("grains.csv");
        write_grain_csv(&path, grains)?;
        Ok(path)
    }

    pub fn frames_written(&self) -> u32 {
        self.written
    }
}
