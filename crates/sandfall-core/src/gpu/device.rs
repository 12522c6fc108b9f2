use wgpu::{Adapter, Device, Instance, Queue, RequestAdapterOptions, Surface};

use crate::error::{RenderError, RenderResult};

/// GPU device manager shared by the windowed viewer and offscreen rendering
pub struct GpuDevice {
    pub instance: Instance,
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
}

impl GpuDevice {
    /// Headless device, no surface needed
    pub async fn new() -> RenderResult<Self> {
        Self::request(Instance::default(), None).await
    }

    /// Blocking variant of [`GpuDevice::new`] for synchronous callers
    pub fn blocking() -> RenderResult<Self> {
        pollster::block_on(Self::new())
    }

    /// Pick an adapter able to present to `surface`, when given
    pub async fn request(instance: Instance, surface: Option<&Surface<'_>>) -> RenderResult<Self> {
        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RenderError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("sandfall_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_webgl2_defaults()
                        .using_resolution(adapter.limits()),
                },
                None,
            )
            .await?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    /// Get device info for logging
    pub fn info(&self) -> String {
        let info = self.adapter.get_info();
        format!("GPU: {} ({:?})", info.name, info.backend)
    }

    pub fn submit(&self, commands: wgpu::CommandBuffer) {
        self.queue.submit(Some(commands));
    }

    /// Block until submitted work has finished
    pub fn wait(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}
