// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Descriptor rings.

One shader-visible heap is created at startup.  [`DescriptorHeapRegion::reserve`] carves
contiguous blocks out of it, once, for the lifetime of the heap.  Each [`DescriptorRing`] owns such
a block and hands out slots from the current frame's part of it.

```
use fences_and_rings::{Context, DescriptorHeapRegion, DescriptorRing, HalConfig, SoftBackend};
let context = Context::new(SoftBackend::new(), HalConfig::default()).unwrap();
let heap = DescriptorHeapRegion::new(&context, 64, "heap").unwrap();
let mut ring = DescriptorRing::new(&heap, 16, 3, "global descriptor ring").unwrap();
let a = ring.alloc_descriptor();
let b = ring.alloc_descriptors(4);
assert_eq!(b.heap_index(), a.heap_index() + 1);
ring.advance();
assert_eq!(ring.alloc_descriptor().heap_index(), 16);
```
*/

use crate::context::Context;
use crate::imp::{Backend, DescriptorHandle, DescriptorHeap, ResourceView};
use crate::rings::RingError;
use crate::rings::ring::RingCursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// A shader-visible descriptor heap from which rings reserve fixed blocks.
#[derive(Debug)]
pub struct DescriptorHeapRegion<B: Backend> {
    heap: Arc<B::DescriptorHeap>,
    next: AtomicU32,
}

/// A block of heap slots, reserved for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorReservation {
    pub first: u32,
    pub count: u32,
}

impl<B: Backend> DescriptorHeapRegion<B> {
    pub fn new(context: &Context<B>, capacity: u32, label: &str) -> Result<Self, RingError> {
        let heap = context
            .backend()
            .create_descriptor_heap(capacity, label)
            .inspect_err(|e| {
                logwise::error_sync!(
                    "descriptor heap creation failed: {err}",
                    err = logwise::privacy::LogIt(e)
                );
            })?;
        logwise::info_sync!(
            "Created descriptor heap with {capacity} slots",
            capacity = capacity
        );
        Ok(DescriptorHeapRegion {
            heap: Arc::new(heap),
            next: AtomicU32::new(0),
        })
    }

    /// Carves `count` contiguous slots out of the heap.
    ///
    /// Reservations are never returned.
    pub fn reserve(&self, count: u32) -> Result<DescriptorReservation, RingError> {
        let capacity = self.heap.capacity();
        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
                next.checked_add(count).filter(|end| *end <= capacity)
            })
            .map(|first| DescriptorReservation { first, count })
            .map_err(|next| RingError::HeapExhausted {
                requested: count as u64,
                remaining: capacity - next,
            })
    }

    pub fn heap(&self) -> &Arc<B::DescriptorHeap> {
        &self.heap
    }

    /// Slots not yet reserved.
    pub fn remaining(&self) -> u32 {
        self.heap.capacity() - self.next.load(Ordering::Acquire)
    }
}

/// A run of descriptor slots from one allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorAllocation {
    handle: DescriptorHandle,
    heap_index: u32,
    count: u32,
    stride: u32,
}

impl DescriptorAllocation {
    /// Handle pair of the first slot.
    pub fn handle(&self) -> DescriptorHandle {
        self.handle
    }

    /// Handle pair of slot `i` within this allocation.
    pub fn handle_at(&self, i: u32) -> DescriptorHandle {
        assert!(i < self.count, "slot {i} outside an allocation of {}", self.count);
        self.handle.offset(i as u64, self.stride)
    }

    /// Index of the first slot in the whole heap.
    pub fn heap_index(&self) -> u32 {
        self.heap_index
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Per-frame bump allocator over a block of descriptor slots.
#[derive(Debug)]
pub struct DescriptorRing<B: Backend> {
    heap: Arc<B::DescriptorHeap>,
    reservation: DescriptorReservation,
    base: DescriptorHandle,
    stride: u32,
    ring: RingCursor,
}

impl<B: Backend> DescriptorRing<B> {
    /// Reserves `count_per_frame × num_frames` slots from `heap`.
    pub fn new(
        heap: &DescriptorHeapRegion<B>,
        count_per_frame: u32,
        num_frames: u32,
        label: &'static str,
    ) -> Result<Self, RingError> {
        if count_per_frame == 0 || num_frames == 0 {
            return Err(RingError::ZeroCapacity(label));
        }
        let total = count_per_frame
            .checked_mul(num_frames)
            .ok_or(RingError::HeapExhausted {
                requested: count_per_frame as u64 * num_frames as u64,
                remaining: heap.remaining(),
            })?;
        let reservation = heap.reserve(total)?;
        let stride = heap.heap.stride();
        let base = heap.heap.start().offset(reservation.first as u64, stride);
        logwise::info_sync!(
            "{label}: slots {first}..{end}, {per_frame} per frame",
            label = label,
            first = reservation.first,
            end = reservation.first + total,
            per_frame = count_per_frame
        );
        Ok(DescriptorRing {
            heap: heap.heap.clone(),
            reservation,
            base,
            stride,
            ring: RingCursor::new(label, count_per_frame as u64, num_frames),
        })
    }

    pub fn alloc_descriptor(&self) -> DescriptorAllocation {
        self.alloc_descriptors(1)
    }

    /// `n` contiguous slots in the current frame's region.
    ///
    /// A frame must not allocate more than its capacity in total; see [`RingCursor::alloc`].
    pub fn alloc_descriptors(&self, n: u32) -> DescriptorAllocation {
        let offset = self.ring.alloc(n as u64);
        DescriptorAllocation {
            handle: self.base.offset(offset, self.stride),
            heap_index: self.reservation.first + offset as u32,
            count: n,
            stride: self.stride,
        }
    }

    /// Writes `view` into the slot addressed by `handle`, which must belong to this ring.
    pub fn write_view(
        &self,
        handle: DescriptorHandle,
        view: &ResourceView,
    ) -> Result<(), RingError> {
        let index = self
            .slot_of(handle)
            .ok_or(RingError::ForeignHandle(self.ring.label()))?;
        self.heap.write(self.reservation.first + index, view)?;
        Ok(())
    }

    /// Writes consecutive views starting at the first slot of `allocation`, which must come from
    /// this ring.
    pub fn write_views(
        &self,
        allocation: &DescriptorAllocation,
        views: &[ResourceView],
    ) -> Result<(), RingError> {
        assert!(
            views.len() <= allocation.count as usize,
            "{} views for {} slots",
            views.len(),
            allocation.count
        );
        let first = self
            .slot_of(allocation.handle)
            .filter(|slot| *slot as u64 + views.len() as u64 <= self.reservation.count as u64)
            .ok_or(RingError::ForeignHandle(self.ring.label()))?;
        for (i, view) in views.iter().enumerate() {
            self.heap.write(self.reservation.first + first + i as u32, view)?;
        }
        Ok(())
    }

    fn slot_of(&self, handle: DescriptorHandle) -> Option<u32> {
        let delta = handle.cpu.0.checked_sub(self.base.cpu.0)?;
        if delta % self.stride as u64 != 0 {
            return None;
        }
        let slot = delta / self.stride as u64;
        (slot < self.reservation.count as u64).then_some(slot as u32)
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

    pub fn cursor(&self) -> u32 {
        self.ring.cursor() as u32
    }

    pub fn high_water(&self) -> u32 {
        self.ring.high_water() as u32
    }

    pub fn count_per_frame(&self) -> u32 {
        self.ring.capacity_per_frame() as u32
    }

    pub fn reservation(&self) -> DescriptorReservation {
        self.reservation
    }

    pub fn heap(&self) -> &Arc<B::DescriptorHeap> {
        &self.heap
    }
}
