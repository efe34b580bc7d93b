// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Runs a few frames on a real adapter.  Skips when the machine has none.
#![cfg(all(feature = "backend_wgpu", not(target_arch = "wasm32")))]

use fences_and_rings::{
    CommandBuffer, Context, DescriptorDomain, FramePacer, HalConfig, MappedBuffer,
    PipelineBuilder, ShaderTable, WgpuBackend,
};

fn context() -> Option<Context<WgpuBackend>> {
    let backend = match test_executors::sleep_on(WgpuBackend::new()) {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("skipping: {e}");
            return None;
        }
    };
    let config = HalConfig {
        command_list_pool_size: 16,
        constant_ring_bytes_per_frame: 64 * 1024,
        ..HalConfig::default()
    };
    Some(Context::new(backend, config).unwrap())
}

#[test]
fn frames_retire_on_a_real_queue() {
    let Some(context) = context() else { return };
    let mut pacer = FramePacer::new(&context).unwrap();
    assert!(!pacer.constant_ring().buffer().is_coherent());
    test_executors::sleep_on(async {
        for _ in 0..5 {
            let frame = pacer.begin_frame().await.unwrap();
            let block = pacer.constant_ring().alloc_constant(&[frame.number() as u32; 4]);
            let slot = pacer
                .descriptor_ring(DescriptorDomain::Global)
                .alloc_descriptor();
            pacer
                .descriptor_ring(DescriptorDomain::Global)
                .write_view(slot.handle(), &block.view())
                .unwrap();
            let mut cmd = pacer.alloc_cmd_list().await.unwrap();
            cmd.insert_marker("smoke");
            pacer.execute_command_list(cmd).unwrap();
            pacer.end_frame().unwrap();
        }
        pacer.wait_gpu().await;
    });
    let sync = pacer.synchronizer();
    assert!(sync.is_complete(sync.current_fence_value() - 1));
}

#[test]
fn ray_tracing_reports_unsupported() {
    let Some(context) = context() else { return };
    let table = ShaderTable::new(&context);
    let err = PipelineBuilder::new(&context, "rt")
        .build(table.registry())
        .unwrap_err();
    assert!(err.diagnostics.contains("does not support ray tracing pipelines"));
}
