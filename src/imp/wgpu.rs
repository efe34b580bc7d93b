// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The wgpu backend.

Fences are emulated with `Queue::on_submitted_work_done` callbacks that complete the timeline from
the poll thread.  wgpu exposes no ray tracing pipelines or shader identifiers, so those
operations report [`Error::Unsupported`]; everything on the synchronization and ring side works.
*/

mod buffer;
mod device;

pub use buffer::{WgpuCommandBuffer, WgpuMappedBuffer};

use crate::imp::descriptor_table::{DescriptorTable, synthetic_start};
use crate::imp::{
    Backend, DispatchRaysDesc, Error, FenceValue, GpuAddress, PipelineDesc, RayTracingLimits,
    Timeline,
};
use device::BoundDevice;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// wgpu has no pipeline objects for ray tracing; this type is never constructed.
#[derive(Debug)]
pub enum WgpuPipeline {}

#[derive(Debug)]
pub struct WgpuBackend {
    bound: BoundDevice,
    timeline: Arc<Timeline>,
    //synthetic address space for mapped buffers and descriptor handles
    next_address: AtomicU64,
}

impl WgpuBackend {
    pub async fn new() -> Result<Self, Error> {
        let bound = BoundDevice::bind().await?;
        logwise::info_sync!(
            "Created wgpu backend on {adapter}",
            adapter = bound.adapter_name.clone()
        );
        Ok(WgpuBackend {
            bound,
            timeline: Arc::new(Timeline::new()),
            next_address: AtomicU64::new(0x1_0000_0000),
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.bound.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.bound.queue
    }

    fn reserve_addresses(&self, len: u64) -> u64 {
        let len = crate::bittricks::align_up(len.max(1), 64 * 1024);
        self.next_address.fetch_add(len, Ordering::Relaxed)
    }
}

impl Backend for WgpuBackend {
    type CommandBuffer = WgpuCommandBuffer;
    type DescriptorHeap = DescriptorTable;
    type MappedBuffer = WgpuMappedBuffer;
    type Pipeline = WgpuPipeline;

    const NAME: &'static str = "wgpu";

    fn create_command_buffer(&self, label: &str) -> Result<Self::CommandBuffer, Error> {
        Ok(WgpuCommandBuffer::new(self.bound.device.clone(), label))
    }

    fn submit(&self, cmd: &mut Self::CommandBuffer) -> Result<(), Error> {
        let finished = cmd.finish()?;
        self.bound.queue.submit(std::iter::once(finished));
        self.bound.set_needs_poll();
        Ok(())
    }

    fn signal(&self, value: FenceValue) {
        let timeline = self.timeline.clone();
        self.bound
            .queue
            .on_submitted_work_done(move || timeline.complete(value));
        self.bound.set_needs_poll();
    }

    fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    fn create_descriptor_heap(
        &self,
        capacity: u32,
        label: &str,
    ) -> Result<Self::DescriptorHeap, Error> {
        let bytes =
            (capacity as u64 + 1) * crate::imp::descriptor_table::DESCRIPTOR_STRIDE as u64;
        let base = self.reserve_addresses(bytes);
        Ok(DescriptorTable::new(
            capacity,
            synthetic_start(base, base),
            label,
        ))
    }

    fn create_mapped_buffer(&self, size: u64, label: &str) -> Result<Self::MappedBuffer, Error> {
        let max = self.bound.device.limits().max_buffer_size;
        if size > max {
            return Err(Error::Creation(format!(
                "{label}: {size} bytes exceeds the device maximum of {max}"
            )));
        }
        let address = GpuAddress(self.reserve_addresses(size));
        Ok(WgpuMappedBuffer::new(
            &self.bound.device,
            size,
            address,
            label,
        ))
    }

    fn flush_mapped(&self, buffer: &Self::MappedBuffer, offset: u64, len: u64) {
        buffer.flush(&self.bound.queue, offset, len);
    }

    fn ray_tracing_limits(&self) -> RayTracingLimits {
        RayTracingLimits::DXR
    }

    fn create_ray_tracing_pipeline(
        &self,
        _desc: &PipelineDesc<'_>,
    ) -> Result<Self::Pipeline, Error> {
        Err(Error::Unsupported {
            backend: Self::NAME,
            operation: "ray tracing pipelines",
        })
    }

    fn shader_identifier<'p>(
        &self,
        pipeline: &'p Self::Pipeline,
        _export: &str,
    ) -> Option<&'p [u8]> {
        match *pipeline {}
    }

    fn record_dispatch_rays(
        &self,
        _cmd: &mut Self::CommandBuffer,
        pipeline: &Self::Pipeline,
        _global_arguments: &[u64],
        _desc: &DispatchRaysDesc,
    ) -> Result<(), Error> {
        match *pipeline {}
    }

    fn present(&self) -> Result<(), Error> {
        //surfaces belong to the caller; there is nothing queued on our side
        logwise::trace_sync!("wgpu present");
        Ok(())
    }
}
