use glam::Vec2;
use image::RgbaImage;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sandfall_params::{
    CanvasSize, ConversionSettings, DrawConfig, PointerState, SandConfig, SettingsPatch,
    SimulationSettings, OFFSCREEN,
};

use crate::error::{ConfigError, RenderError, StoreError};
use crate::sim::convert;
use crate::sim::grain::{Grain, GrainStats};
use crate::sim::physics::SandPhysics;

/// Cells a draw-mode brush grain may land away from the pointer
const BRUSH_JITTER_CELLS: i32 = 1;
const BRUSH_COLOR_JITTER: f32 = 0.05;
const BRUSH_MAX_VY: f32 = 0.5;

/// Anything that can draw the grain list
///
/// Implemented by the on-screen viewer, the offscreen GPU target and the CPU
/// rasterizer used for headless snapshots.
pub trait FrameTarget {
    fn update_grains(&mut self, grains: &[Grain]);
    fn render(&mut self) -> Result<(), RenderError>;
    fn resize(&mut self, canvas: CanvasSize);
    fn update_settings(&mut self, settings: &SimulationSettings);
}

/// Owns the physics engine and a frame target and drives them once per tick
///
/// Pointer handlers only record state and queue draw-mode grains; the next
/// [`SandStore::tick`] consumes them. Settings updates are staged the same
/// way and applied before the step that follows.
pub struct SandStore<T: FrameTarget> {
    target: T,
    physics: SandPhysics,
    rng: ChaCha8Rng,
    canvas: CanvasSize,
    conversion: ConversionSettings,
    draw: DrawConfig,
    pointer: PointerState,
    staged_settings: SettingsPatch,
    queued: Vec<Grain>,
    last_spawn: Option<(Vec2, f32)>,
    playing: bool,
    draw_mode: bool,
    frames: u64,
}

impl<T: FrameTarget> SandStore<T> {
    pub fn new(mut target: T, config: &SandConfig) -> Result<Self, ConfigError> {
        let canvas = ConfigError::check_canvas(config.canvas)?;
        ConfigError::check_cell_size(config.conversion.cell_size)?;

        let mut physics = SandPhysics::seeded(config.settings.clone(), config.seed)?;
        physics.initialize(Vec::new(), canvas.width, canvas.height)?;

        target.resize(canvas);
        target.update_settings(physics.settings());

        // converter and brush draw from their own stream so physics stays reproducible
        let rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(1));

        log::info!(
            "Store ready: {}x{} canvas, cell size {}, seed {}",
            canvas.width,
            canvas.height,
            config.settings.cell_size,
            config.seed
        );

        Ok(Self {
            target,
            physics,
            rng,
            canvas,
            conversion: config.conversion.clone(),
            draw: config.draw.clone(),
            pointer: PointerState::default(),
            staged_settings: SettingsPatch::default(),
            queued: Vec::new(),
            last_spawn: None,
            playing: true,
            draw_mode: false,
            frames: 0,
        })
    }

    /// Replace every grain and draw the new state immediately
    pub fn set_grains(&mut self, grains: Vec<Grain>) -> Result<(), StoreError> {
        self.queued.clear();
        self.last_spawn = None;
        self.physics.initialize(grains, self.canvas.width, self.canvas.height)?;
        self.render_now()?;
        Ok(())
    }

    /// Queue grains to join the simulation at the next tick
    pub fn add_grains(&mut self, grains: impl IntoIterator<Item = Grain>) {
        self.queued.extend(grains);
    }

    /// Convert a drawing and start its reveal. Returns the grain count.
    ///
    /// Wave timing comes from the store's conversion settings and the engine
    /// switches to their cell size. A drawing with no visible pixels is
    /// replaced by a filler block.
    pub fn load_image(&mut self, image: &RgbaImage) -> Result<usize, StoreError> {
        let conversion = self.conversion.clone();
        self.load_image_with(image, &conversion)
    }

    pub fn load_image_with(
        &mut self,
        image: &RgbaImage,
        conversion: &ConversionSettings,
    ) -> Result<usize, StoreError> {
        let mut grains = convert::image_to_grains(image, self.canvas, conversion, &mut self.rng)?;
        if grains.is_empty() {
            log::warn!("Drawing has no visible pixels, using filler pattern");
            grains = convert::filler_grains(self.canvas, conversion, &mut self.rng)?;
        }

        self.physics.update_settings(&SettingsPatch {
            cell_size: Some(conversion.cell_size),
            ..Default::default()
        })?;
        self.target.update_settings(self.physics.settings());

        let count = grains.len();
        self.set_grains(grains)?;
        log::info!("Loaded drawing as {} grains ({:?})", count, conversion.mode);
        Ok(count)
    }

    /// Decode PNG bytes and load them as a drawing
    pub fn load_drawing(&mut self, bytes: &[u8]) -> Result<usize, StoreError> {
        let image = convert::decode_drawing(bytes)?;
        self.load_image(&image)
    }

    pub fn set_canvas_size(&mut self, canvas: CanvasSize) -> Result<(), StoreError> {
        let canvas = ConfigError::check_canvas(canvas)?;
        if canvas == self.canvas {
            return Ok(());
        }
        self.physics.resize(canvas.width, canvas.height)?;
        self.target.resize(canvas);
        self.canvas = canvas;
        Ok(())
    }

    /// Stage a settings change for the next tick
    pub fn update_settings(&mut self, patch: &SettingsPatch) {
        self.staged_settings.merge(patch);
    }

    /// Used by the next [`SandStore::load_image`]
    pub fn set_conversion(&mut self, conversion: ConversionSettings) {
        self.conversion = conversion;
    }

    pub fn conversion(&self) -> &ConversionSettings {
        &self.conversion
    }

    pub fn pointer_move(&mut self, x: f32, y: f32) {
        let offscreen = self.pointer.x == OFFSCREEN && self.pointer.y == OFFSCREEN;
        if offscreen {
            self.pointer.vel_x = 0.0;
            self.pointer.vel_y = 0.0;
        } else {
            self.pointer.vel_x = x - self.pointer.x;
            self.pointer.vel_y = y - self.pointer.y;
        }
        self.pointer.x = x;
        self.pointer.y = y;

        if self.draw_mode && self.pointer.is_down {
            self.queue_brush(x, y);
        }
    }

    pub fn pointer_down(&mut self, x: f32, y: f32) {
        self.pointer.x = x;
        self.pointer.y = y;
        self.pointer.is_down = true;
        if self.draw_mode {
            self.queue_brush(x, y);
        }
    }

    pub fn pointer_up(&mut self) {
        self.pointer.is_down = false;
        self.last_spawn = None;
    }

    /// Park the pointer far off-canvas so it touches nothing
    pub fn pointer_leave(&mut self) {
        self.pointer = PointerState::default();
        self.last_spawn = None;
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    pub fn set_draw_mode(&mut self, draw_mode: bool) {
        self.draw_mode = draw_mode;
        self.last_spawn = None;
    }

    pub fn set_draw_color(&mut self, color: [f32; 4]) {
        self.draw.color = color;
    }

    /// Advance one step of `dt_ms` and draw it. Returns false while paused.
    pub fn tick(&mut self, dt_ms: f32) -> Result<bool, RenderError> {
        if !self.playing {
            return Ok(false);
        }

        if !self.staged_settings.is_empty() {
            let patch = std::mem::take(&mut self.staged_settings);
            match self.physics.update_settings(&patch) {
                Ok(()) => self.target.update_settings(self.physics.settings()),
                Err(err) => log::warn!("Ignoring settings update: {}", err),
            }
        }

        if !self.queued.is_empty() {
            let added = self.physics.spawn(self.queued.drain(..), self.draw.max_grains);
            log::trace!("Spawned {} grains", added);
        }

        self.physics.advance(&self.pointer, dt_ms);

        // velocity is a per-tick delta, consumed by the step that saw it
        self.pointer.vel_x = 0.0;
        self.pointer.vel_y = 0.0;

        self.render_now()?;
        Ok(true)
    }

    /// Push the current grains to the target and draw, without stepping
    pub fn render_now(&mut self) -> Result<(), RenderError> {
        self.target.update_grains(self.physics.grains());
        self.target.render()?;
        self.frames += 1;
        Ok(())
    }

    /// Tear down, handing the target back so its resources are released exactly once
    pub fn dispose(self) -> T {
        log::debug!("Disposing store after {} frames", self.frames);
        self.target
    }

    pub fn grains(&self) -> &[Grain] {
        self.physics.grains()
    }

    pub fn physics(&self) -> &SandPhysics {
        &self.physics
    }

    pub fn settings(&self) -> &SimulationSettings {
        self.physics.settings()
    }

    pub fn pointer(&self) -> &PointerState {
        &self.pointer
    }

    pub fn canvas(&self) -> CanvasSize {
        self.canvas
    }

    pub fn draw_color(&self) -> [f32; 4] {
        self.draw.color
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_draw_mode(&self) -> bool {
        self.draw_mode
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn stats(&self) -> GrainStats {
        self.physics.stats()
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    /// Queue a brush of grains at the pointer if it has moved far enough and
    /// enough simulated time has passed since the last one
    fn queue_brush(&mut self, x: f32, y: f32) {
        let cell = self.physics.settings().cell_size;
        let now = self.physics.elapsed_ms();
        let point = Vec2::new(x, y);

        if let Some((last_point, last_ms)) = self.last_spawn {
            if point.distance(last_point) <= cell || now - last_ms < self.draw.spawn_interval_ms {
                return;
            }
        }

        let room = self
            .draw
            .max_grains
            .saturating_sub(self.physics.grains().len() + self.queued.len());
        if room == 0 {
            log::debug!("Brush skipped, {} grains already", self.draw.max_grains);
            return;
        }

        let base_col = (x / cell).floor() as i32;
        let base_row = (y / cell).floor() as i32;
        let count = (self.draw.brush_size as usize).min(room);

        for _ in 0..count {
            let col = base_col + self.rng.gen_range(-BRUSH_JITTER_CELLS..=BRUSH_JITTER_CELLS);
            let row = base_row + self.rng.gen_range(-BRUSH_JITTER_CELLS..=BRUSH_JITTER_CELLS);

            let mut color = self.draw.color;
            for channel in color.iter_mut().take(3) {
                let jitter = self.rng.gen_range(-BRUSH_COLOR_JITTER..=BRUSH_COLOR_JITTER);
                *channel = (*channel + jitter).clamp(0.0, 1.0);
            }
            color[3] = 1.0;

            let vy = self.rng.gen_range(0.0..BRUSH_MAX_VY);
            self.queued
                .push(Grain::new(col as f32 * cell, row as f32 * cell, color).with_velocity(vy));
        }

        self.last_spawn = Some((point, now));
    }
}
