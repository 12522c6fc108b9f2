//! Interactive viewer for the sandfall simulation

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use image::RgbaImage;
use winit::{
    dpi::{LogicalSize, PhysicalPosition},
    event::{ElementState, Event, KeyEvent, MouseButton, WindowEvent},
    event_loop::EventLoop,
    keyboard::{Key, NamedKey},
    window::{Window, WindowBuilder},
};

use sandfall_core::{
    bindings, CanvasSize, ConversionSettings, GpuDevice, GrainRenderer, RevealMode, SandConfig,
    SandStore, SettingsPatch,
};

use crate::surface::{GpuContext, SurfaceTarget};

/// Brush colors selectable with the number keys
const PALETTE: [[f32; 4]; 4] = [
    [1.0, 0.8, 0.4, 1.0],
    [0.9, 0.35, 0.2, 1.0],
    [0.35, 0.6, 0.95, 1.0],
    [0.55, 0.85, 0.4, 1.0],
];

const GRAVITY_STEP: f32 = 0.1;
const HUD_EVERY_FRAMES: u64 = 120;

/// Main viewer state
pub struct Viewer {
    window: Arc<Window>,
    store: Option<SandStore<SurfaceTarget>>,
    drawing: Option<RgbaImage>,
    cursor: PhysicalPosition<f64>,
    last_frame_time: Instant,
}

impl Viewer {
    fn store(&mut self) -> Option<&mut SandStore<SurfaceTarget>> {
        self.store.as_mut()
    }

    /// Re-run the drawing animation in `mode`; with no drawing the filler block is used
    fn reload(&mut self, mode: RevealMode) {
        let drawing = self.drawing.clone().unwrap_or_else(|| RgbaImage::new(1, 1));
        let Some(store) = self.store() else { return };
        let conversion = ConversionSettings::for_mode(mode);
        store.set_conversion(conversion);
        match store.load_image(&drawing) {
            Ok(count) => log::info!("Reloaded {} grains in {:?} mode", count, mode),
            Err(e) => log::error!("Reload failed: {}", e),
        }
    }

    /// Handle key press for playback, draw mode and presets
    pub fn handle_key(&mut self, key: &Key) {
        match key {
            Key::Named(NamedKey::Space) => {
                if let Some(store) = self.store() {
                    let playing = !store.is_playing();
                    store.set_playing(playing);
                    log::info!("Playing: {}", playing);
                }
            }
            Key::Character(c) if c == "d" || c == "D" => {
                if let Some(store) = self.store() {
                    let draw_mode = !store.is_draw_mode();
                    store.set_draw_mode(draw_mode);
                    log::info!("Draw mode: {}", draw_mode);
                }
            }
            Key::Character(c) if c == "b" || c == "B" => self.reload(RevealMode::Build),
            Key::Character(c) if c == "r" || c == "R" => self.reload(RevealMode::Reveal),
            Key::Character(c) if c == "c" || c == "C" => {
                if let Some(store) = self.store() {
                    if let Err(e) = store.set_grains(Vec::new()) {
                        log::error!("Clear failed: {}", e);
                    }
                }
            }
            Key::Character(c) if c == "+" || c == "=" || c == "-" => {
                let step = if c == "-" { -GRAVITY_STEP } else { GRAVITY_STEP };
                if let Some(store) = self.store() {
                    let gravity = (store.settings().gravity + step).max(0.0);
                    store.update_settings(&SettingsPatch {
                        gravity: Some(gravity),
                        ..Default::default()
                    });
                    log::info!("Gravity: {:.2}", gravity);
                }
            }
            Key::Character(c) => {
                let slot = c.parse::<usize>().ok().and_then(|n| n.checked_sub(1));
                let color = slot.and_then(|i| PALETTE.get(i));
                if let (Some(color), Some(store)) = (color, self.store.as_mut()) {
                    store.set_draw_color(*color);
                    log::info!("Brush color: {:?}", color);
                }
            }
            _ => {}
        }
    }

    /// Step and present one frame if the tick interval has elapsed
    fn frame(&mut self) {
        let Some(store) = self.store.as_mut() else { return };
        let tick = Duration::from_secs_f32(store.settings().tick_ms / 1000.0);
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_frame_time);
        if elapsed < tick {
            return;
        }
        self.last_frame_time = now;

        // Long stalls (dragging the window) advance at most a few ticks
        let dt_ms = (elapsed.as_secs_f32() * 1000.0).min(store.settings().tick_ms * 4.0);
        match store.tick(dt_ms) {
            Ok(true) if store.frames() % HUD_EVERY_FRAMES == 0 => {
                let stats = store.stats();
                log::info!(
                    "frame {} | grains {} | falling {} | settled {} | visible {}",
                    store.frames(),
                    stats.total,
                    stats.falling,
                    stats.settled,
                    stats.visible
                );
            }
            Ok(_) => {}
            Err(e) => log::error!("Render error: {}", e),
        }
    }

    fn dispose(&mut self) {
        if let Some(store) = self.store.take() {
            store.dispose().dispose();
        }
    }
}

/// Run the interactive viewer
pub async fn run_viewer(config: SandConfig, drawing: Option<RgbaImage>) -> Result<()> {
    let event_loop = EventLoop::new()?;

    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Sandfall")
            .with_inner_size(LogicalSize::new(
                config.canvas.width as f64,
                config.canvas.height as f64,
            ))
            .build(&event_loop)?,
    );

    let instance = wgpu::Instance::default();
    let surface = instance.create_surface(window.clone())?;
    let gpu = GpuDevice::request(instance, Some(&surface)).await?;

    let surface_caps = surface.get_capabilities(&gpu.adapter);
    let surface_format = surface_caps
        .formats
        .iter()
        .copied()
        .find(|f| !f.is_srgb())
        .or_else(|| surface_caps.formats.first().copied())
        .ok_or_else(|| anyhow::anyhow!("surface reports no formats"))?;

    let size = window.inner_size();
    let canvas = CanvasSize::new(size.width.max(1), size.height.max(1));
    let surface_config = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format: surface_format,
        width: canvas.width,
        height: canvas.height,
        present_mode: wgpu::PresentMode::AutoVsync,
        alpha_mode: surface_caps.alpha_modes[0],
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    };
    surface.configure(&gpu.device, &surface_config);

    // Renderer failure ends here, before anything starts playing
    let renderer =
        GrainRenderer::new(&gpu.device, surface_format, canvas, config.settings.cell_size)?;
    bindings::log_binding_layouts();
    let target = SurfaceTarget::new(
        GpuContext {
            gpu,
            surface,
            config: surface_config,
        },
        renderer,
    );
    log::info!("{}", target.info());

    let mut store_config = config;
    store_config.canvas = canvas;
    let mut store = SandStore::new(target, &store_config)?;
    if let Some(image) = &drawing {
        store.load_image(image)?;
    }

    let mut viewer = Viewer {
        window: window.clone(),
        store: Some(store),
        drawing,
        cursor: PhysicalPosition::new(0.0, 0.0),
        last_frame_time: Instant::now(),
    };

    log::info!(concat!(
        "Space: play/pause | D: draw mode | 1-4: brush color | ",
        "B/R: build/reveal | C: clear | +/-: gravity"
    ));
    window.request_redraw();

    event_loop.run(move |event, elwt| match event {
        Event::WindowEvent {
            ref event,
            window_id,
        } if window_id == viewer.window.id() => match event {
            WindowEvent::CloseRequested => elwt.exit(),
            WindowEvent::Resized(size) => {
                if size.width > 0 && size.height > 0 {
                    if let Some(store) = viewer.store() {
                        let canvas = CanvasSize::new(size.width, size.height);
                        if let Err(e) = store.set_canvas_size(canvas) {
                            log::error!("Resize failed: {}", e);
                        }
                    }
                }
                viewer.window.request_redraw();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => elwt.exit(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key,
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => viewer.handle_key(logical_key),
            WindowEvent::CursorMoved { position, .. } => {
                viewer.cursor = *position;
                if let Some(store) = viewer.store() {
                    store.pointer_move(position.x as f32, position.y as f32);
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                let cursor = viewer.cursor;
                if let Some(store) = viewer.store() {
                    match state {
                        ElementState::Pressed => {
                            store.pointer_down(cursor.x as f32, cursor.y as f32)
                        }
                        ElementState::Released => store.pointer_up(),
                    }
                }
            }
            WindowEvent::CursorLeft { .. } => {
                if let Some(store) = viewer.store() {
                    store.pointer_leave();
                }
            }
            WindowEvent::RedrawRequested => {
                viewer.frame();
                viewer.window.request_redraw();
            }
            _ => {}
        },
        Event::AboutToWait => viewer.frame(),
        Event::LoopExiting => viewer.dispose(),
        _ => {}
    })?;

    Ok(())
}
