//! Per-grain instance data and the growable GPU buffers that hold it

use crate::sim::Grain;

/// Instances the buffers can hold before their first reallocation
pub const INITIAL_CAPACITY: usize = 10_000;
/// Headroom applied when the buffers have to grow
pub const GROWTH_FACTOR: f32 = 1.5;

/// Capacity after making room for `needed` instances
///
/// Unchanged while `needed` fits, otherwise `needed` plus headroom, so a
/// slowly growing grain count reallocates only a logarithmic number of times.
pub fn grown_capacity(current: usize, needed: usize) -> usize {
    if needed <= current {
        current
    } else {
        (needed as f32 * GROWTH_FACTOR).ceil() as usize
    }
}

/// CPU-side staging of visible grains, packed in one linear pass
#[derive(Debug, Default)]
pub struct InstanceStaging {
    offsets: Vec<[f32; 2]>,
    colors: Vec<[f32; 4]>,
}

impl InstanceStaging {
    /// Pack every visible grain. Returns the instance count.
    pub fn pack(&mut self, grains: &[Grain]) -> usize {
        self.offsets.clear();
        self.colors.clear();
        for grain in grains.iter().filter(|g| g.is_visible()) {
            self.offsets.push([grain.x, grain.y]);
            self.colors.push(grain.color);
        }
        self.offsets.len()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offsets(&self) -> &[[f32; 2]] {
        &self.offsets
    }

    pub fn colors(&self) -> &[[f32; 4]] {
        &self.colors
    }
}

/// Vertex buffer holding one fixed-size record per instance
pub struct InstanceBuffer {
    label: &'static str,
    stride: u64,
    capacity: usize,
    buffer: wgpu::Buffer,
}

impl InstanceBuffer {
    pub fn new(device: &wgpu::Device, label: &'static str, stride: u64, capacity: usize) -> Self {
        let buffer = Self::allocate(device, label, stride, capacity);
        Self {
            label,
            stride,
            capacity,
            buffer,
        }
    }

    fn allocate(device: &wgpu::Device, label: &str, stride: u64, capacity: usize) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: stride * capacity.max(1) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Make room for `needed` instances. Returns true if the buffer was reallocated.
    pub fn reserve(&mut self, device: &wgpu::Device, needed: usize) -> bool {
        let capacity = grown_capacity(self.capacity, needed);
        if capacity == self.capacity {
            return false;
        }
        log::debug!("Growing {} from {} to {} instances", self.label, self.capacity, capacity);
        self.buffer.destroy();
        self.buffer = Self::allocate(device, self.label, self.stride, capacity);
        self.capacity = capacity;
        true
    }

    /// Upload the used prefix only
    pub fn write<T: bytemuck::Pod>(&self, queue: &wgpu::Queue, data: &[T]) {
        if data.is_empty() {
            return;
        }
        queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(data));
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slice covering the first `count` instances
    pub fn slice(&self, count: usize) -> wgpu::BufferSlice<'_> {
        self.buffer.slice(..self.stride * count as u64)
    }

    pub fn destroy(&self) {
        self.buffer.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_holds_until_exceeded() {
        assert_eq!(grown_capacity(INITIAL_CAPACITY, 0), INITIAL_CAPACITY);
        assert_eq!(grown_capacity(INITIAL_CAPACITY, INITIAL_CAPACITY), INITIAL_CAPACITY);
        assert_eq!(grown_capacity(INITIAL_CAPACITY, INITIAL_CAPACITY + 1), 15_002);
    }

    #[test]
    fn growth_is_amortized() {
        let mut capacity = INITIAL_CAPACITY;
        let mut reallocations = 0;
        for needed in (0..=200_000).step_by(100) {
            let next = grown_capacity(capacity, needed);
            if next != capacity {
                reallocations += 1;
                assert!(next >= needed);
            }
            capacity = next;
        }
        assert!(reallocations <= 10, "{} reallocations", reallocations);
    }

    #[test]
    fn staging_skips_pending_and_offscreen_grains() {
        let grains = vec![
            Grain::new(4.0, 6.0, [0.1, 0.2, 0.3, 1.0]),
            Grain::new(8.0, -2.0, [1.0; 4]),
            Grain::pending(2.0, 10.0, [1.0; 4], 100.0),
            Grain::new(0.0, 0.0, [0.5; 4]).at_rest(),
        ];
        let mut staging = InstanceStaging::default();
        assert_eq!(staging.pack(&grains), 2);
        assert_eq!(staging.offsets(), &[[4.0, 6.0], [0.0, 0.0]]);
        assert_eq!(staging.colors()[0], [0.1, 0.2, 0.3, 1.0]);

        assert_eq!(staging.pack(&[]), 0);
        assert!(staging.is_empty());
    }
}
