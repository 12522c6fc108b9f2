//! Window surface frame target for the sandfall viewer

use sandfall_core::{
    CanvasSize, FrameTarget, GpuDevice, Grain, GrainRenderer, RenderError, SimulationSettings,
};
use wgpu::{Surface, SurfaceConfiguration};

/// Central GPU context that owns the device and the window surface
pub struct GpuContext {
    pub gpu: GpuDevice,
    pub surface: Surface<'static>,
    pub config: SurfaceConfiguration,
}

impl GpuContext {
    pub fn configure(&self) {
        self.surface.configure(&self.gpu.device, &self.config);
    }
}

/// Presents grains to the window every tick
pub struct SurfaceTarget {
    context: GpuContext,
    renderer: GrainRenderer,
}

impl SurfaceTarget {
    pub fn new(context: GpuContext, renderer: GrainRenderer) -> Self {
        Self { context, renderer }
    }

    pub fn info(&self) -> String {
        self.context.gpu.info()
    }

    pub fn dispose(self) {
        self.renderer.dispose();
    }
}

impl FrameTarget for SurfaceTarget {
    fn update_grains(&mut self, grains: &[Grain]) {
        self.renderer
            .update_grains(&self.context.gpu.device, &self.context.gpu.queue, grains);
    }

    fn render(&mut self) -> Result<(), RenderError> {
        let frame = match self.context.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(err @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                // Skip this frame, the next one uses the fresh configuration
                log::warn!("Surface {:?}, reconfiguring", err);
                self.context.configure();
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .context
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame_encoder"),
            });
        self.renderer.render(&mut encoder, &view);
        self.context.gpu.submit(encoder.finish());
        frame.present();
        Ok(())
    }

    fn resize(&mut self, canvas: CanvasSize) {
        if canvas.is_empty() {
            return;
        }
        self.context.config.width = canvas.width;
        self.context.config.height = canvas.height;
        self.context.configure();
        self.renderer.resize(&self.context.gpu.queue, canvas);
    }

    fn update_settings(&mut self, settings: &SimulationSettings) {
        self.renderer.update_settings(&self.context.gpu.queue, settings);
    }
}
