use std::path::Path;

use image::{imageops::FilterType, RgbaImage};
use rand::Rng;
use sandfall_params::{CanvasSize, ConversionSettings, RevealMode};

use crate::error::{ConfigError, ConvertError};
use crate::sim::grain::Grain;

/// Pixels at or below this alpha produce no grain
const ALPHA_CUTOFF: f32 = 0.1;
/// Downward velocity every converted grain starts with
const RELEASE_VY: f32 = 0.5;
const FILLER_COLOR: [f32; 4] = [0.9, 0.9, 0.9, 1.0];

/// Image size after aspect-preserving fit into the canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledDimensions {
    pub width: f32,
    pub height: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

pub fn scaled_dimensions(
    image_width: u32,
    image_height: u32,
    canvas: CanvasSize,
) -> ScaledDimensions {
    let canvas_w = canvas.width as f32;
    let canvas_h = canvas.height as f32;
    if image_width == 0 || image_height == 0 || canvas.is_empty() {
        return ScaledDimensions {
            width: 0.0,
            height: 0.0,
            offset_x: canvas_w / 2.0,
            offset_y: canvas_h / 2.0,
        };
    }

    let image_aspect = image_width as f32 / image_height as f32;
    let canvas_aspect = canvas_w / canvas_h;
    let (width, height) = if image_aspect > canvas_aspect {
        (canvas_w, canvas_w / image_aspect)
    } else {
        (canvas_h * image_aspect, canvas_h)
    };

    ScaledDimensions {
        width,
        height,
        offset_x: (canvas_w - width) / 2.0,
        offset_y: (canvas_h - height) / 2.0,
    }
}

/// Release time and spawn height for a grain in `row` of a `rows`-row image
fn wave_timing<R: Rng + ?Sized>(
    mode: RevealMode,
    row: u32,
    rows: u32,
    settings: &ConversionSettings,
    rng: &mut R,
) -> (f32, f32) {
    let wave = settings.wave_delay_ms;
    let cell = settings.cell_size;
    match mode {
        // bottom rows first, so the picture builds upward
        RevealMode::Build => {
            let delay = (rows - 1 - row) as f32 * wave * 0.08 + rng.gen::<f32>() * wave * 0.3;
            let start_y = -cell * (2.0 + rng.gen::<f32>() * 3.0);
            (delay, start_y)
        }
        // top rows first
        RevealMode::Reveal => {
            let delay = row as f32 * wave * 0.05 + rng.gen::<f32>() * wave * 0.2;
            let start_y = -cell * (2.0 + rng.gen::<f32>() * 5.0);
            (delay, start_y)
        }
    }
}

/// Turn the visible pixels of `image` into inactive grains waiting above the canvas
///
/// The image is fitted to the canvas, resampled to one pixel per cell and
/// centered horizontally. Grains come out in row-major order. A fully
/// transparent or zero-size image gives an empty list.
pub fn image_to_grains<R: Rng + ?Sized>(
    image: &RgbaImage,
    canvas: CanvasSize,
    settings: &ConversionSettings,
    rng: &mut R,
) -> Result<Vec<Grain>, ConfigError> {
    let cell = ConfigError::check_conversion(settings)?;
    let canvas = ConfigError::check_canvas(canvas)?;

    let scaled = scaled_dimensions(image.width(), image.height(), canvas);
    let cols = (scaled.width / cell).floor() as u32;
    let rows = (scaled.height / cell).floor() as u32;
    if cols == 0 || rows == 0 {
        log::warn!(
            "Image {}x{} is too small for cell size {}",
            image.width(),
            image.height(),
            cell
        );
        return Ok(Vec::new());
    }

    let sampled = if (cols, rows) == image.dimensions() {
        image.clone()
    } else {
        image::imageops::resize(image, cols, rows, FilterType::Triangle)
    };
    let offset_x = (canvas.width as f32 - cols as f32 * cell) / 2.0;

    let mut grains = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            let [r, g, b, a] = sampled.get_pixel(col, row).0;
            let alpha = a as f32 / 255.0;
            if alpha < ALPHA_CUTOFF {
                continue;
            }

            let color = [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0, alpha];
            let (delay, start_y) = wave_timing(settings.mode, row, rows, settings, rng);
            let x = offset_x + col as f32 * cell;
            grains.push(Grain::pending(x, start_y, color, delay).with_velocity(RELEASE_VY));
        }
    }

    log::debug!(
        "Converted {}x{} image into {} grains on {}x{} cells ({:?})",
        image.width(),
        image.height(),
        grains.len(),
        cols,
        rows,
        settings.mode
    );
    Ok(grains)
}

/// Decode an encoded drawing (PNG bytes) into RGBA
pub fn decode_drawing(bytes: &[u8]) -> Result<RgbaImage, ConvertError> {
    let image = image::load_from_memory(bytes)?;
    Ok(image.to_rgba8())
}

pub fn load_image(path: impl AsRef<Path>) -> Result<RgbaImage, ConvertError> {
    let image = image::open(path.as_ref())?;
    Ok(image.to_rgba8())
}

/// Decode and convert in one step
pub fn drawing_to_grains<R: Rng + ?Sized>(
    bytes: &[u8],
    canvas: CanvasSize,
    settings: &ConversionSettings,
    rng: &mut R,
) -> Result<Vec<Grain>, ConvertError> {
    let image = decode_drawing(bytes)?;
    Ok(image_to_grains(&image, canvas, settings, rng)?)
}

/// Light-gray block shown when a drawing had nothing visible in it
///
/// Half the canvas wide and a quarter high once piled, centered horizontally
/// and released with reveal timing.
pub fn filler_grains<R: Rng + ?Sized>(
    canvas: CanvasSize,
    settings: &ConversionSettings,
    rng: &mut R,
) -> Result<Vec<Grain>, ConfigError> {
    let cell = ConfigError::check_conversion(settings)?;
    let canvas = ConfigError::check_canvas(canvas)?;

    let cols = ((canvas.width as f32 / 2.0) / cell).floor().max(1.0) as u32;
    let rows = ((canvas.height as f32 / 4.0) / cell).floor().max(1.0) as u32;
    let offset_x = ((canvas.width as f32 - cols as f32 * cell) / 2.0).max(0.0);

    let mut grains = Vec::with_capacity((cols * rows) as usize);
    for row in 0..rows {
        for col in 0..cols {
            let (delay, start_y) = wave_timing(RevealMode::Reveal, row, rows, settings, rng);
            let x = offset_x + col as f32 * cell;
            grains.push(Grain::pending(x, start_y, FILLER_COLOR, delay).with_velocity(RELEASE_VY));
        }
    }
    Ok(grains)
}
