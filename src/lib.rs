/*! fences_and_rings is the synchronization and transient-memory core of a GPU abstraction layer.

It covers the parts of a renderer that encode the contract between CPU submission and GPU
consumption:

| Part                                  | Does                                                                  |
|---------------------------------------|-----------------------------------------------------------------------|
| [`FrameSynchronizer`]                 | Fence counter, queue submission, fixed pool of reusable command lists |
| [`DescriptorRing`], [`ConstantRing`]  | Per-frame bump allocation out of statically partitioned GPU memory    |
| [`ShaderTable`]                       | Lays out ray-tracing shader records and per-instance arguments        |
| [`FramePacer`]                        | Brackets frames, so rings are only reused once the GPU retired them   |

# Frames in flight

Every transient resource is split into `frames_in_flight` regions.  Frame `n` writes region
`n mod frames_in_flight`, and [`FramePacer::begin_frame`] does not resolve until the GPU has
retired frame `n - frames_in_flight`, the previous owner of that region.  So there is no per-item
lifetime tracking and no lock on the allocation path.  The cost is a fixed budget: rings never
grow, and allocating past a frame's capacity is a caller bug, asserted in debug builds (and in
release builds with the `strict_rings` feature).

# Backends

Everything is generic over [`Backend`].  Two are provided:

* [`SoftBackend`], a deterministic CPU device with a simulated GPU address space.  It executes
  submissions in order, keeps a log of what it executed, and can hold its queue to model a GPU
  that is behind.  It supports ray dispatch by reading back the shader table.
* `WgpuBackend` (feature `backend_wgpu`, native targets), on [wgpu](https://wgpu.rs).  Fences are
  driven by submission-done callbacks.  wgpu has no ray-tracing pipelines, so those operations
  report [`BackendError::Unsupported`].

# Async

Waits on the GPU are futures resumed by the fence timeline, rather than blocked threads.  Drive
them with any executor.
*/

pub mod bittricks;
mod config;
mod context;
mod frame;
mod imp;
pub mod raytracing;
pub mod rings;
pub mod sync;
mod sys;

pub use config::{ConfigError, DescriptorDomain, HalConfig};
pub use context::Context;
pub use frame::{Frame, FrameError, FrameInfo, FramePacer};
pub use imp::Error as BackendError;
pub use imp::soft::{
    DispatchRecord, EXECUTED_LOG_LIMIT, ExecutedCommand, RecordSnapshot, SoftCommandBuffer,
    SoftMappedBuffer, SoftPipeline,
};
pub use imp::{
    Backend, CommandBuffer, CpuDescriptor, DescriptorHandle, DescriptorHeap, DescriptorTable,
    DispatchRaysDesc, FenceValue, GpuAddress, GpuDescriptor, HitGroupDesc, MappedBuffer,
    PipelineDesc, RayTracingLimits, ResourceView, ShaderBlob, SoftBackend, TableRange, Timeline,
};
#[cfg(all(feature = "backend_wgpu", not(target_arch = "wasm32")))]
pub use imp::WgpuBackend;
#[cfg(all(feature = "backend_wgpu", not(target_arch = "wasm32")))]
pub use imp::wgpu::{WgpuCommandBuffer, WgpuMappedBuffer, WgpuPipeline};
pub use raytracing::{
    ArgumentValue, Binding, BindingKind, PipelineBuilder, PipelineError, RayTracingPipeline,
    ShaderCompiler, ShaderRegistry, ShaderRole, ShaderTable, ShaderTableError, ShaderTableLayout,
};
pub use rings::{
    CRepr, ConstantAllocation, ConstantRing, DescriptorAllocation, DescriptorHeapRegion,
    DescriptorReservation, DescriptorRing, RingError,
};
pub use sync::{CommandList, FrameSynchronizer, RetirementQueue};
