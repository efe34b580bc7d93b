// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The native device boundary.

Everything above this module is written against [`Backend`].  A backend is picked once, when the
[`crate::Context`] is created, and every component is generic over it, so operations dispatch
statically and never need to recover a concrete type from an abstract handle.

Two backends ship with the crate:

* [`SoftBackend`], a deterministic CPU device.  Its queue executes in order, its memory lives in a
  simulated GPU virtual address space, and its ray dispatch reads the shader table back out of
  that memory.  It exists for tests and for headless tooling.
* `WgpuBackend` (feature `backend_wgpu`), which drives a real adapter.
*/

pub mod descriptor_table;
pub(crate) mod mapped;
pub mod soft;
pub mod timeline;

#[cfg(all(feature = "backend_wgpu", not(target_arch = "wasm32")))]
pub mod wgpu;

use std::fmt::Debug;
use std::ptr::NonNull;

pub use descriptor_table::DescriptorTable;
pub use soft::SoftBackend;
pub use timeline::{FenceValue, Timeline};

#[cfg(all(feature = "backend_wgpu", not(target_arch = "wasm32")))]
pub use self::wgpu::WgpuBackend;

/// A GPU virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GpuAddress(pub u64);

impl GpuAddress {
    pub const fn offset(self, bytes: u64) -> GpuAddress {
        GpuAddress(self.0 + bytes)
    }
}

/// CPU-side handle to a descriptor slot, used for writing views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuDescriptor(pub u64);

/// GPU-side handle to a descriptor slot, the value shaders and shader records consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GpuDescriptor(pub u64);

/// The handle pair that addresses one descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorHandle {
    pub cpu: CpuDescriptor,
    pub gpu: GpuDescriptor,
}

impl DescriptorHandle {
    /// The handle `slots` slots after this one, for a heap with the given byte stride.
    pub const fn offset(self, slots: u64, stride: u32) -> DescriptorHandle {
        let bytes = slots * stride as u64;
        DescriptorHandle {
            cpu: CpuDescriptor(self.cpu.0 + bytes),
            gpu: GpuDescriptor(self.gpu.0 + bytes),
        }
    }
}

/// A view written into a descriptor slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum ResourceView {
    #[default]
    Null,
    ConstantBuffer {
        address: GpuAddress,
        size: u64,
    },
    StructuredBuffer {
        address: GpuAddress,
        element_count: u32,
        element_stride: u32,
    },
    /// A texture, identified by the caller's own handle.
    Texture {
        texture: u64,
        mip_levels: u32,
    },
    AccelerationStructure {
        address: GpuAddress,
    },
}

/// Sizes the hardware imposes on shader records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RayTracingLimits {
    /// Bytes in a shader identifier.
    pub identifier_size: u32,
    /// Every record stride is a multiple of this.
    pub record_alignment: u32,
    /// Every sub-table start address is a multiple of this.
    pub table_alignment: u32,
}

impl RayTracingLimits {
    /// Values for DXR-class hardware.
    pub const DXR: RayTracingLimits = RayTracingLimits {
        identifier_size: 32,
        record_alignment: 32,
        table_alignment: 64,
    };
}

/// Compiled bytecode for one shader library, as produced by an external compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBlob {
    pub bytecode: Vec<u8>,
    /// Entry points this library exports.
    pub exports: Vec<String>,
}

/// What an 8-byte shader argument refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// A descriptor handle in the shader-visible heap.
    Descriptor,
    /// The GPU address of a constant block.
    Constant,
    /// A descriptor handle in a sampler heap.
    Sampler,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitGroupDesc {
    pub name: String,
    pub closest_hit: Option<String>,
    pub any_hit: Option<String>,
}

/// Everything a backend needs to build a ray-tracing pipeline state object.
#[derive(Debug)]
pub struct PipelineDesc<'a> {
    pub label: &'a str,
    pub libraries: &'a [ShaderBlob],
    pub hit_groups: &'a [HitGroupDesc],
    pub max_payload_size: u32,
    pub max_attribute_size: u32,
    pub max_recursion_depth: u32,
    /// Root arguments shared by every shader in the dispatch, in binding order.
    pub global_arguments: &'a [BindingKind],
}

/// A sub-range of a shader table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRange {
    pub start: GpuAddress,
    pub size: u64,
    pub stride: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchRaysDesc {
    pub ray_generation: TableRange,
    pub miss: TableRange,
    pub hit_group: TableRange,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

/// A reusable recording buffer.
pub trait CommandBuffer: Debug + Send + 'static {
    /// Discards anything recorded and opens the buffer for recording again.
    ///
    /// Only called once the GPU has retired whatever was last submitted from this buffer.
    fn reset(&mut self) -> Result<(), Error>;
    fn insert_marker(&mut self, label: &str);
}

/// A contiguous, fixed-stride table of shader-visible descriptor slots.
pub trait DescriptorHeap: Debug + Send + Sync + 'static {
    fn capacity(&self) -> u32;
    /// Bytes between consecutive slot handles.
    fn stride(&self) -> u32;
    /// Handle of slot 0.
    fn start(&self) -> DescriptorHandle;
    fn write(&self, index: u32, view: &ResourceView) -> Result<(), Error>;
}

/// A GPU-visible buffer that stays mapped for the CPU for its whole life.
pub trait MappedBuffer: Debug + Send + Sync + 'static {
    fn gpu_address(&self) -> GpuAddress;
    /// Start of the CPU mapping, valid for [`MappedBuffer::size`] bytes until the buffer drops.
    fn cpu_ptr(&self) -> NonNull<u8>;
    fn size(&self) -> u64;
    /// When false, CPU writes are only visible to the GPU after [`Backend::flush_mapped`].
    fn is_coherent(&self) -> bool;
}

/// A native graphics device.
pub trait Backend: Debug + Send + Sync + Sized + 'static {
    type CommandBuffer: CommandBuffer;
    type DescriptorHeap: DescriptorHeap;
    type MappedBuffer: MappedBuffer;
    type Pipeline: Debug + Send + Sync + 'static;

    /// Short name for logs and errors.
    const NAME: &'static str;

    fn create_command_buffer(&self, label: &str) -> Result<Self::CommandBuffer, Error>;
    /// Closes recording and submits to the queue.  Does not wait for execution.
    fn submit(&self, cmd: &mut Self::CommandBuffer) -> Result<(), Error>;
    /// Queues a signal of `value` behind all previously submitted work.
    ///
    /// The value becomes complete on [`Backend::timeline`] once the GPU reaches it.
    fn signal(&self, value: FenceValue);
    fn timeline(&self) -> &Timeline;

    fn create_descriptor_heap(
        &self,
        capacity: u32,
        label: &str,
    ) -> Result<Self::DescriptorHeap, Error>;
    fn create_mapped_buffer(&self, size: u64, label: &str) -> Result<Self::MappedBuffer, Error>;
    /// Makes CPU writes in `offset..offset + len` visible to the GPU.
    fn flush_mapped(&self, buffer: &Self::MappedBuffer, offset: u64, len: u64);

    fn ray_tracing_limits(&self) -> RayTracingLimits;
    fn create_ray_tracing_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<Self::Pipeline, Error>;
    /// Identifier for an export or hit group of `pipeline`.
    fn shader_identifier<'p>(&self, pipeline: &'p Self::Pipeline, export: &str) -> Option<&'p [u8]>;
    fn record_dispatch_rays(
        &self,
        cmd: &mut Self::CommandBuffer,
        pipeline: &Self::Pipeline,
        global_arguments: &[u64],
        desc: &DispatchRaysDesc,
    ) -> Result<(), Error>;

    /// Queues presentation of the current frame.
    fn present(&self) -> Result<(), Error>;
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("no suitable adapter")]
    NoSuchAdapter,
    #[cfg(all(feature = "backend_wgpu", not(target_arch = "wasm32")))]
    #[error(transparent)]
    RequestDevice(#[from] ::wgpu::RequestDeviceError),
    #[error("the {backend} backend does not support {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },
    #[error("failed to create {0}")]
    Creation(String),
    #[error("descriptor {index} is outside a heap of {capacity} slots")]
    DescriptorOutOfBounds { index: u32, capacity: u32 },
    #[error("pipeline state creation failed: {0}")]
    Pipeline(String),
    #[error("command buffer is not recording")]
    NotRecording,
}
