// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use fences_and_rings::{
    ConstantRing, Context, DescriptorHeapRegion, DescriptorRing, GpuAddress, HalConfig,
    MappedBuffer, ResourceView, RingError, SoftBackend,
};

fn context() -> Context<SoftBackend> {
    Context::new(SoftBackend::new(), HalConfig::default()).unwrap()
}

#[test]
fn allocations_between_advances_are_disjoint() {
    let context = context();
    let ring = ConstantRing::new(&context, 64 * 1024, 3, "constants").unwrap();
    let sizes = [256u64, 512, 256, 1024, 768];
    let mut previous_end = None;
    for size in sizes {
        let block = ring.alloc_gpu_memory(size);
        if let Some(end) = previous_end {
            assert!(block.gpu_address().0 >= end);
        }
        previous_end = Some(block.gpu_address().0 + block.len());
    }
    assert_eq!(ring.cursor(), sizes.iter().sum::<u64>());
    assert_eq!(ring.high_water(), ring.cursor());
}

#[test]
fn advancing_k_times_selects_slot_k_mod_n() {
    let context = context();
    let heap = DescriptorHeapRegion::new(&context, 300, "heap").unwrap();
    let mut ring = DescriptorRing::new(&heap, 100, 3, "texture descriptor ring").unwrap();
    let first = ring.alloc_descriptor().heap_index();
    for k in 1..10u32 {
        ring.alloc_descriptors(7);
        ring.advance();
        assert_eq!(ring.frame_index(), k % 3);
        assert_eq!(ring.cursor(), 0);
        assert_eq!(ring.alloc_descriptor().heap_index(), first + 100 * (k % 3));
    }
}

#[test]
fn empty_frame_behaves_like_a_fresh_slot() {
    let context = context();
    let mut ring = ConstantRing::new(&context, 4096, 2, "constants").unwrap();
    let base = ring.buffer().gpu_address();
    ring.advance();
    ring.advance();
    assert_eq!(ring.alloc_gpu_memory(256).gpu_address(), base);
    ring.advance();
    assert_eq!(ring.alloc_gpu_memory(256).gpu_address(), base.offset(4096));
}

#[test]
fn constants_round_trip_through_gpu_memory() {
    let context = context();
    let mut ring = ConstantRing::new(&context, 4096, 3, "constants").unwrap();
    ring.advance();
    let matrix: [f32; 16] = std::array::from_fn(|i| i as f32);
    let block = ring.alloc_constant(&matrix);
    let bytes = context
        .backend()
        .read_gpu_memory(block.gpu_address(), 64)
        .unwrap();
    let expected = matrix
        .iter()
        .flat_map(|f| f.to_ne_bytes())
        .collect::<Vec<_>>();
    assert_eq!(bytes, expected);
}

#[test]
fn views_land_in_the_shared_heap() {
    let context = context();
    let heap = DescriptorHeapRegion::new(&context, 64, "heap").unwrap();
    let global = DescriptorRing::new(&heap, 8, 3, "global descriptor ring").unwrap();
    let geometry = DescriptorRing::new(&heap, 8, 3, "geometry descriptor ring").unwrap();
    assert_eq!(geometry.reservation().first, 24);
    assert_eq!(heap.remaining(), 64 - 48);

    let slot = geometry.alloc_descriptors(2);
    let view = ResourceView::StructuredBuffer {
        address: GpuAddress(0x4000),
        element_count: 12,
        element_stride: 16,
    };
    geometry.write_view(slot.handle_at(1), &view).unwrap();
    assert_eq!(heap.heap().view(slot.heap_index() + 1), Some(view.clone()));
    assert!(matches!(
        global.write_view(slot.handle(), &view),
        Err(RingError::ForeignHandle("global descriptor ring"))
    ));
}

#[test]
fn heap_exhaustion_is_reported_at_startup() {
    let context = context();
    let heap = DescriptorHeapRegion::new(&context, 32, "heap").unwrap();
    let _ring = DescriptorRing::new(&heap, 10, 3, "global descriptor ring").unwrap();
    assert!(matches!(
        DescriptorRing::new(&heap, 1, 3, "texture descriptor ring"),
        Err(RingError::HeapExhausted {
            requested: 3,
            remaining: 2
        })
    ));
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "capacity per frame")]
fn overflowing_a_frame_is_caught_in_debug() {
    let context = context();
    let ring = ConstantRing::new(&context, 1024, 3, "constants").unwrap();
    ring.alloc_gpu_memory(768);
    ring.alloc_gpu_memory(512);
}
