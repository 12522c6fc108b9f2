use image::RgbaImage;
use sandfall_params::{CanvasSize, SimulationSettings};

use crate::error::{RenderError, RenderResult};
use crate::gpu::{GpuDevice, GrainRenderer};
use crate::sim::{FrameTarget, Grain};

/// Linear RGBA so read-back bytes match grain colors directly
pub const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Renders grains into a texture that can be read back as an image
pub struct OffscreenTarget {
    gpu: GpuDevice,
    renderer: GrainRenderer,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    canvas: CanvasSize,
}

impl OffscreenTarget {
    pub fn new(gpu: GpuDevice, canvas: CanvasSize, cell_size: f32) -> RenderResult<Self> {
        let renderer = GrainRenderer::new(&gpu.device, OFFSCREEN_FORMAT, canvas, cell_size)?;
        let (texture, view) = Self::create_texture(&gpu.device, canvas);
        log::info!("Offscreen target {}x{} on {}", canvas.width, canvas.height, gpu.info());
        Ok(Self {
            gpu,
            renderer,
            texture,
            view,
            canvas,
        })
    }

    fn create_texture(
        device: &wgpu::Device,
        canvas: CanvasSize,
    ) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen_grains"),
            size: wgpu::Extent3d {
                width: canvas.width.max(1),
                height: canvas.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OFFSCREEN_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    pub fn renderer(&self) -> &GrainRenderer {
        &self.renderer
    }

    /// Copy the last rendered frame back to the CPU
    pub fn read_pixels(&self) -> RenderResult<RgbaImage> {
        let width = self.canvas.width.max(1);
        let height = self.canvas.height.max(1);
        let unpadded = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let staging_buffer = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("offscreen_readback"),
            size: padded as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("offscreen_readback_encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.gpu.submit(encoder.finish());

        let slice = staging_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.gpu.wait();
        rx.recv()
            .map_err(|e| RenderError::Readback(e.to_string()))?
            .map_err(|e| RenderError::Readback(e.to_string()))?;

        let data = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded * height) as usize);
        for row in data.chunks(padded as usize) {
            pixels.extend_from_slice(&row[..unpadded as usize]);
        }
        drop(data);
        staging_buffer.unmap();

        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| RenderError::Readback("pixel buffer size mismatch".into()))
    }

    pub fn dispose(self) {
        self.renderer.dispose();
        self.texture.destroy();
    }
}

impl FrameTarget for OffscreenTarget {
    fn update_grains(&mut self, grains: &[Grain]) {
        self.renderer.update_grains(&self.gpu.device, &self.gpu.queue, grains);
    }

    fn render(&mut self) -> Result<(), RenderError> {
        let mut encoder = self.gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("offscreen_render_encoder"),
        });
        self.renderer.render(&mut encoder, &self.view);
        self.gpu.submit(encoder.finish());
        Ok(())
    }

    fn resize(&mut self, canvas: CanvasSize) {
        if canvas == self.canvas {
            return;
        }
        self.texture.destroy();
        let (texture, view) = Self::create_texture(&self.gpu.device, canvas);
        self.texture = texture;
        self.view = view;
        self.canvas = canvas;
        self.renderer.resize(&self.gpu.queue, canvas);
    }

    fn update_settings(&mut self, settings: &SimulationSettings) {
        self.renderer.update_settings(&self.gpu.queue, settings);
    }
}
