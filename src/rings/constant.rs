// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The constant ring: per-frame bump allocation out of one persistently mapped upload buffer.

Every allocation returns both sides of the same bytes: a GPU address to bind and a CPU pointer to
write through.

```
use fences_and_rings::{ConstantRing, Context, HalConfig, SoftBackend};
let context = Context::new(SoftBackend::new(), HalConfig::default()).unwrap();
let ring = ConstantRing::new(&context, 4096, 3, "constants").unwrap();
let block = ring.alloc_constant(&[1.0f32, 0.0, 0.0, 1.0]);
assert_eq!(block.len(), 256);
let bytes = context.backend().read_gpu_memory(block.gpu_address(), 4).unwrap();
assert_eq!(bytes, 1.0f32.to_ne_bytes());
```
*/

use crate::bittricks::align_up;
use crate::context::Context;
use crate::imp::{Backend, GpuAddress, MappedBuffer, ResourceView};
use crate::rings::RingError;
use crate::rings::ring::RingCursor;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

/**
Types that can be copied byte-for-byte into GPU memory.

# Safety

The type must have a C-compatible layout that the shader agrees on, no padding the shader reads,
and no pointers or references.

```
# use fences_and_rings::CRepr;
#[repr(C)]
struct CameraMatrix([f32; 16]);
unsafe impl CRepr for CameraMatrix {}
```
*/
pub unsafe trait CRepr: Sized {}

unsafe impl CRepr for u8 {}
unsafe impl CRepr for u16 {}
unsafe impl CRepr for u32 {}
unsafe impl CRepr for u64 {}
unsafe impl CRepr for i32 {}
unsafe impl CRepr for f32 {}
unsafe impl<T: CRepr, const N: usize> CRepr for [T; N] {}

/// Both sides of one constant-ring allocation.
///
/// Borrows the ring, so it can't outlive the frame it was allocated in.
#[derive(Debug)]
pub struct ConstantAllocation<'a> {
    gpu_address: GpuAddress,
    cpu_ptr: NonNull<u8>,
    len: u64,
    _ring: PhantomData<&'a ()>,
}

impl ConstantAllocation<'_> {
    pub fn gpu_address(&self) -> GpuAddress {
        self.gpu_address
    }

    /// Start of the CPU mapping for this allocation, valid for [`ConstantAllocation::len`] bytes.
    pub fn cpu_ptr(&self) -> NonNull<u8> {
        self.cpu_ptr
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn write_bytes(&self, offset: u64, bytes: &[u8]) {
        assert!(
            offset + bytes.len() as u64 <= self.len,
            "write of {} bytes at {offset} into a {} byte allocation",
            bytes.len(),
            self.len
        );
        //safety: bounds checked; the ring handed out this range for the current frame only
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.cpu_ptr.as_ptr().add(offset as usize),
                bytes.len(),
            );
        }
    }

    pub fn write<T: CRepr>(&self, offset: u64, value: &T) {
        //safety: CRepr types are plain bytes
        let bytes = unsafe {
            std::slice::from_raw_parts((value as *const T).cast::<u8>(), size_of::<T>())
        };
        self.write_bytes(offset, bytes);
    }

    /// A constant buffer view over this allocation.
    pub fn view(&self) -> ResourceView {
        ResourceView::ConstantBuffer {
            address: self.gpu_address,
            size: self.len,
        }
    }
}

/// Per-frame bump allocator over a persistently mapped upload buffer.
#[derive(Debug)]
pub struct ConstantRing<B: Backend> {
    backend: Arc<B>,
    buffer: B::MappedBuffer,
    alignment: u64,
    ring: RingCursor,
}

impl<B: Backend> ConstantRing<B> {
    /// Maps `bytes_per_frame × num_frames` bytes.
    pub fn new(
        context: &Context<B>,
        bytes_per_frame: u64,
        num_frames: u32,
        label: &'static str,
    ) -> Result<Self, RingError> {
        if bytes_per_frame == 0 || num_frames == 0 {
            return Err(RingError::ZeroCapacity(label));
        }
        let backend = context.backend().clone();
        let buffer = backend
            .create_mapped_buffer(bytes_per_frame * num_frames as u64, label)
            .inspect_err(|e| {
                logwise::error_sync!(
                    "constant ring creation failed: {err}",
                    err = logwise::privacy::LogIt(e)
                );
            })?;
        logwise::info_sync!(
            "{label}: {bytes} bytes per frame, {frames} frames",
            label = label,
            bytes = bytes_per_frame,
            frames = num_frames
        );
        Ok(ConstantRing {
            backend,
            buffer,
            alignment: context.config().constant_alignment,
            ring: RingCursor::new(label, bytes_per_frame, num_frames),
        })
    }

    /// `size` bytes at the cursor of the current frame's region.
    ///
    /// The size is used as given.  Callers binding the result as a constant buffer round it with
    /// [`crate::bittricks::align_constant_size`] first, or use [`ConstantRing::alloc_constant`].
    pub fn alloc_gpu_memory(&self, size: u64) -> ConstantAllocation<'_> {
        let offset = self.ring.alloc(size);
        //safety: RingCursor::alloc keeps offset + size inside the buffer
        let cpu_ptr = unsafe {
            NonNull::new_unchecked(self.buffer.cpu_ptr().as_ptr().add(offset as usize))
        };
        ConstantAllocation {
            gpu_address: self.buffer.gpu_address().offset(offset),
            cpu_ptr,
            len: size,
            _ring: PhantomData,
        }
    }

    /// Allocates a constant block for `value`, rounded up to the constant alignment, and writes it.
    pub fn alloc_constant<T: CRepr>(&self, value: &T) -> ConstantAllocation<'_> {
        let size = align_up(size_of::<T>() as u64, self.alignment);
        let allocation = self.alloc_gpu_memory(size);
        allocation.write(0, value);
        allocation
    }

    /// Makes everything written this frame visible to the GPU.  A no-op on coherent memory.
    pub fn flush(&self) {
        if let Some(range) = self.ring.take_unflushed()
            && !self.buffer.is_coherent()
        {
            self.backend
                .flush_mapped(&self.buffer, range.start, range.end - range.start);
        }
    }

    /// Moves to the next frame's region.
    ///
    /// Only call once the GPU has retired the frame that last used that region.
    pub fn advance(&mut self) {
        self.ring.advance();
    }

    pub fn frame_index(&self) -> u32 {
        self.ring.frame_index()
    }

    pub fn cursor(&self) -> u64 {
        self.ring.cursor()
    }

    pub fn high_water(&self) -> u64 {
        self.ring.high_water()
    }

    pub fn bytes_per_frame(&self) -> u64 {
        self.ring.capacity_per_frame()
    }

    pub fn buffer(&self) -> &B::MappedBuffer {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HalConfig;
    use crate::imp::SoftBackend;

    fn context() -> Context<SoftBackend> {
        Context::new(SoftBackend::new(), HalConfig::default()).unwrap()
    }

    #[test]
    fn addresses_follow_frames() {
        let context = context();
        let mut ring = ConstantRing::new(&context, 1024, 2, "constants").unwrap();
        let base = ring.buffer().gpu_address();
        let a = ring.alloc_gpu_memory(256);
        assert_eq!(a.gpu_address(), base);
        let b = ring.alloc_gpu_memory(512);
        assert_eq!(b.gpu_address(), base.offset(256));
        ring.advance();
        let c = ring.alloc_gpu_memory(256);
        assert_eq!(c.gpu_address(), base.offset(1024));
        ring.advance();
        let d = ring.alloc_gpu_memory(256);
        assert_eq!(d.gpu_address(), base);
    }

    #[test]
    fn write_is_visible_at_gpu_address() {
        let context = context();
        let mut ring = ConstantRing::new(&context, 1024, 3, "constants").unwrap();
        ring.advance();
        let _pad = ring.alloc_gpu_memory(256);
        let block = ring.alloc_gpu_memory(256);
        block.write(8, &0xdead_beef_u32);
        let read = context
            .backend()
            .read_gpu_memory(block.gpu_address().offset(8), 4)
            .unwrap();
        assert_eq!(read, 0xdead_beef_u32.to_ne_bytes());
    }

    #[test]
    fn alloc_constant_rounds() {
        let context = context();
        let ring = ConstantRing::new(&context, 4096, 1, "constants").unwrap();
        let a = ring.alloc_constant(&[0u32; 65]);
        assert_eq!(a.len(), 512);
        let b = ring.alloc_constant(&1u8);
        assert_eq!(b.gpu_address(), a.gpu_address().offset(512));
        assert_eq!(ring.cursor(), 768);
        assert!(matches!(b.view(), ResourceView::ConstantBuffer { size: 256, .. }));
    }

    #[test]
    #[should_panic]
    fn write_past_allocation() {
        let context = context();
        let ring = ConstantRing::new(&context, 1024, 1, "constants").unwrap();
        let block = ring.alloc_gpu_memory(4);
        block.write(2, &0u32);
    }
}
