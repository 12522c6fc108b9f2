use sandfall_params::bindings::{COLOR_SLOT, OFFSET_SLOT, QUAD_SLOT};
use sandfall_params::{CanvasSize, GrainUniforms, SimulationSettings};
use wgpu::util::DeviceExt;

use crate::error::{RenderError, RenderResult};
use crate::gpu::instances::{InstanceBuffer, InstanceStaging, INITIAL_CAPACITY};
use crate::shaders;
use crate::sim::Grain;

pub const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.05,
    g: 0.05,
    b: 0.1,
    a: 1.0,
};

/// Unit quad as two triangles, scaled by cell size in the vertex stage
const QUAD: [[f32; 2]; 6] = [
    [0.0, 0.0],
    [1.0, 0.0],
    [0.0, 1.0],
    [0.0, 1.0],
    [1.0, 0.0],
    [1.0, 1.0],
];

const OFFSET_STRIDE: u64 = std::mem::size_of::<[f32; 2]>() as u64;
const COLOR_STRIDE: u64 = std::mem::size_of::<[f32; 4]>() as u64;

/// Draws every visible grain as a `cell_size` square with one instanced call
pub struct GrainRenderer {
    pipeline: wgpu::RenderPipeline,
    quad_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    offsets: InstanceBuffer,
    colors: InstanceBuffer,
    staging: InstanceStaging,
    instance_count: usize,
    uniforms: GrainUniforms,
}

impl GrainRenderer {
    /// Build the pipeline and buffers for `format`
    ///
    /// Shader or pipeline validation failures are returned here rather than
    /// surfacing later as a lost device.
    pub fn new(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        canvas: CanvasSize,
        cell_size: f32,
    ) -> RenderResult<Self> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("grain_shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::grain().into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("grain_bind_group_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("grain_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("grain_render_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[
                    wgpu::VertexBufferLayout {
                        array_stride: OFFSET_STRIDE,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &[wgpu::VertexAttribute {
                            offset: 0,
                            shader_location: QUAD_SLOT,
                            format: wgpu::VertexFormat::Float32x2,
                        }],
                    },
                    wgpu::VertexBufferLayout {
                        array_stride: OFFSET_STRIDE,
                        step_mode: wgpu::VertexStepMode::Instance,
                        attributes: &[wgpu::VertexAttribute {
                            offset: 0,
                            shader_location: OFFSET_SLOT,
                            format: wgpu::VertexFormat::Float32x2,
                        }],
                    },
                    wgpu::VertexBufferLayout {
                        array_stride: COLOR_STRIDE,
                        step_mode: wgpu::VertexStepMode::Instance,
                        attributes: &[wgpu::VertexAttribute {
                            offset: 0,
                            shader_location: COLOR_SLOT,
                            format: wgpu::VertexFormat::Float32x4,
                        }],
                    },
                ],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                // the Y flip reverses winding
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(RenderError::Pipeline(err.to_string()));
        }

        let quad_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("grain_quad_buffer"),
            contents: bytemuck::cast_slice(&QUAD),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let uniforms = GrainUniforms::new(canvas, cell_size);
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("grain_uniforms"),
            contents: bytemuck::cast_slice(&[uniforms]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("grain_bind_group"),
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let offsets = InstanceBuffer::new(device, "grain_offsets", OFFSET_STRIDE, INITIAL_CAPACITY);
        let colors = InstanceBuffer::new(device, "grain_colors", COLOR_STRIDE, INITIAL_CAPACITY);

        log::debug!("Grain renderer ready for {:?}", format);

        Ok(Self {
            pipeline,
            quad_buffer,
            uniform_buffer,
            bind_group,
            offsets,
            colors,
            staging: InstanceStaging::default(),
            instance_count: 0,
            uniforms,
        })
    }

    /// Pack visible grains and upload them, growing the buffers if needed
    pub fn update_grains(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, grains: &[Grain]) {
        let count = self.staging.pack(grains);
        self.instance_count = count;
        if count == 0 {
            return;
        }

        self.offsets.reserve(device, count);
        self.colors.reserve(device, count);
        self.offsets.write(queue, self.staging.offsets());
        self.colors.write(queue, self.staging.colors());
    }

    /// Clear `view` and draw the last uploaded grains into it
    pub fn render(&self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("grain_render_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });

        if self.instance_count == 0 {
            return;
        }

        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, &self.bind_group, &[]);
        render_pass.set_vertex_buffer(QUAD_SLOT, self.quad_buffer.slice(..));
        render_pass.set_vertex_buffer(OFFSET_SLOT, self.offsets.slice(self.instance_count));
        render_pass.set_vertex_buffer(COLOR_SLOT, self.colors.slice(self.instance_count));
        render_pass.draw(0..QUAD.len() as u32, 0..self.instance_count as u32);
    }

    /// New output resolution; grain data is untouched
    pub fn resize(&mut self, queue: &wgpu::Queue, canvas: CanvasSize) {
        self.uniforms.resolution = [canvas.width as f32, canvas.height as f32];
        self.write_uniforms(queue);
    }

    pub fn update_settings(&mut self, queue: &wgpu::Queue, settings: &SimulationSettings) {
        self.uniforms.cell_size = settings.cell_size;
        self.write_uniforms(queue);
    }

    fn write_uniforms(&self, queue: &wgpu::Queue) {
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[self.uniforms]));
    }

    pub fn instance_count(&self) -> usize {
        self.instance_count
    }

    pub fn capacity(&self) -> usize {
        self.offsets.capacity()
    }

    pub fn uniforms(&self) -> GrainUniforms {
        self.uniforms
    }

    /// Release every GPU buffer. Consumes the renderer so it runs once.
    pub fn dispose(self) {
        self.offsets.destroy();
        self.colors.destroy();
        self.quad_buffer.destroy();
        self.uniform_buffer.destroy();
        log::debug!("Grain renderer disposed");
    }
}
