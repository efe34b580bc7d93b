// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Upload buffers and command encoders.

use crate::bittricks::{align_down, align_up};
use crate::imp::mapped::MappedBlock;
use crate::imp::{CommandBuffer, Error, GpuAddress, MappedBuffer};
use std::ptr::NonNull;

/// Copies must be aligned to this.
const COPY_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

/// A wgpu buffer with a CPU shadow.
///
/// wgpu has no persistent mapping, so the shadow stands in for it and
/// [`crate::imp::Backend::flush_mapped`] copies dirty ranges with `Queue::write_buffer`.
#[derive(Debug)]
pub struct WgpuMappedBuffer {
    shadow: MappedBlock,
    buffer: wgpu::Buffer,
    address: GpuAddress,
}

impl WgpuMappedBuffer {
    pub(super) fn new(device: &wgpu::Device, size: u64, address: GpuAddress, label: &str) -> Self {
        let size = align_up(size.max(COPY_ALIGNMENT), COPY_ALIGNMENT);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::UNIFORM
                | wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        WgpuMappedBuffer {
            shadow: MappedBlock::zeroed(size as usize),
            buffer,
            address,
        }
    }

    /// The native buffer, for binding.
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub(super) fn flush(&self, queue: &wgpu::Queue, offset: u64, len: u64) {
        let size = self.shadow.len() as u64;
        let start = align_down(offset.min(size), COPY_ALIGNMENT);
        let end = align_up(offset.saturating_add(len), COPY_ALIGNMENT).min(size);
        if end <= start {
            return;
        }
        let bytes = self.shadow.read(start as usize, (end - start) as usize);
        queue.write_buffer(&self.buffer, start, &bytes);
    }
}

impl MappedBuffer for WgpuMappedBuffer {
    fn gpu_address(&self) -> GpuAddress {
        self.address
    }

    fn cpu_ptr(&self) -> NonNull<u8> {
        self.shadow.ptr()
    }

    fn size(&self) -> u64 {
        self.shadow.len() as u64
    }

    fn is_coherent(&self) -> bool {
        false
    }
}

/// A command buffer backed by a fresh encoder per recording.
#[derive(Debug)]
pub struct WgpuCommandBuffer {
    device: wgpu::Device,
    label: String,
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuCommandBuffer {
    pub(super) fn new(device: wgpu::Device, label: &str) -> Self {
        WgpuCommandBuffer {
            device,
            label: label.to_string(),
            encoder: None,
        }
    }

    /// The open encoder, for recording native passes.
    pub fn encoder(&mut self) -> Option<&mut wgpu::CommandEncoder> {
        self.encoder.as_mut()
    }

    pub(super) fn finish(&mut self) -> Result<wgpu::CommandBuffer, Error> {
        self.encoder
            .take()
            .map(|e| e.finish())
            .ok_or(Error::NotRecording)
    }
}

impl CommandBuffer for WgpuCommandBuffer {
    fn reset(&mut self) -> Result<(), Error> {
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some(&self.label),
                }),
        );
        Ok(())
    }

    fn insert_marker(&mut self, label: &str) {
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.insert_debug_marker(label);
        }
    }
}
