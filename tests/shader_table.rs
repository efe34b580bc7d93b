// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Shader tables, checked by what the soft GPU reads back at dispatch time.
*/

use fences_and_rings::{
    Binding, Context, DescriptorDomain, DispatchRecord, ExecutedCommand, FramePacer, HalConfig,
    PipelineBuilder, RayTracingPipeline, ShaderBlob, ShaderRole, ShaderTable, ShaderTableError,
    SoftBackend,
};

fn context() -> Context<SoftBackend> {
    Context::new(
        SoftBackend::new(),
        HalConfig {
            command_list_pool_size: 16,
            ..HalConfig::default()
        },
    )
    .unwrap()
}

fn register(table: &mut ShaderTable<SoftBackend>) {
    table
        .register_shader("globals", ShaderRole::Global, [Binding::constant("scene")])
        .unwrap();
    table
        .register_shader("rgen", ShaderRole::RayGen, [Binding::descriptor("output")])
        .unwrap();
    table.register_shader("miss", ShaderRole::Miss, []).unwrap();
    table
        .register_shader("shadow_miss", ShaderRole::Miss, [Binding::constant("sky")])
        .unwrap();
    table
        .register_shader(
            "chit",
            ShaderRole::Hit,
            [Binding::descriptor("vertices"), Binding::descriptor("indices")],
        )
        .unwrap();
    table.register_hit_group("opaque", Some("chit"), None).unwrap();
}

fn pipeline(
    context: &Context<SoftBackend>,
    table: &ShaderTable<SoftBackend>,
) -> RayTracingPipeline<SoftBackend> {
    let mut builder = PipelineBuilder::new(context, "rt");
    builder.add_library(ShaderBlob {
        bytecode: vec![0xde, 0xad],
        exports: ["rgen", "miss", "shadow_miss", "chit"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    });
    builder.build(table.registry()).unwrap()
}

fn dispatches(context: &Context<SoftBackend>) -> Vec<DispatchRecord> {
    context
        .backend()
        .take_executed()
        .into_iter()
        .filter_map(|c| match c {
            ExecutedCommand::DispatchRays(record) => Some(record),
            ExecutedCommand::PageFault { address } => panic!("page fault at {address:?}"),
            _ => None,
        })
        .collect()
}

#[test]
fn dispatch_reads_the_records_that_were_written() {
    let context = context();
    let mut pacer = FramePacer::new(&context).unwrap();
    let mut table = ShaderTable::new(&context);
    register(&mut table);
    let pipeline = pipeline(&context, &table);

    test_executors::sleep_on(async {
        for _ in 0..4 {
            let frame = pacer.begin_frame().await.unwrap();
            let output = pacer
                .descriptor_ring(DescriptorDomain::Global)
                .alloc_descriptor()
                .handle();
            let scene = pacer.constant_ring().alloc_constant(&[1.0f32; 4]).gpu_address();
            table.bind("output", output).unwrap();
            table.bind("sky", 0x55u64).unwrap();
            table.bind("scene", scene).unwrap();
            for instance in 0..3u32 {
                table.start_hit_program("opaque", instance).unwrap();
                table.add_descriptor(100 + instance as u64).unwrap();
                table.add_descriptor(200 + instance as u64).unwrap();
            }
            table.end_shader_table(&pipeline, frame, 3).unwrap();

            let mut cmd = pacer.alloc_cmd_list().await.unwrap();
            table
                .dispatch_ray(&pipeline, frame, 64, 32, &mut cmd, 3)
                .unwrap();
            pacer.execute_command_list(cmd).unwrap();
            pacer.end_frame().unwrap();

            let records = dispatches(&context);
            assert_eq!(records.len(), 1);
            let record = &records[0];
            assert_eq!((record.width, record.height, record.depth), (64, 32, 1));
            assert_eq!(record.global_arguments, vec![scene.0]);

            assert_eq!(record.ray_generation.identifier, pipeline.identifier("rgen").unwrap());
            assert_eq!(record.ray_generation.arguments[0], output.gpu.0);

            assert_eq!(record.miss.len(), 2);
            assert_eq!(record.miss[0].identifier, pipeline.identifier("miss").unwrap());
            assert_eq!(record.miss[1].identifier, pipeline.identifier("shadow_miss").unwrap());
            assert_eq!(record.miss[1].arguments[0], 0x55);

            assert_eq!(record.hit_groups.len(), 3);
            for (instance, hit) in record.hit_groups.iter().enumerate() {
                assert_eq!(hit.identifier, pipeline.identifier("opaque").unwrap());
                assert_eq!(
                    &hit.arguments[..2],
                    &[100 + instance as u64, 200 + instance as u64]
                );
            }
        }
    });

    let layout = table.layout().unwrap();
    assert_eq!(layout.entry_stride, 64);
    assert_eq!(layout.total_entries(), 1 + 2 + 3);
    assert_eq!(layout.buffer_size(), 64 * 6 * 3);
}

#[test]
fn fewer_instances_dispatch_a_shorter_hit_table() {
    let context = context();
    let mut pacer = FramePacer::new(&context).unwrap();
    let mut table = ShaderTable::new(&context);
    register(&mut table);
    let pipeline = pipeline(&context, &table);
    table.bind("output", 1u64).unwrap();
    table.bind("sky", 2u64).unwrap();
    table.bind("scene", 3u64).unwrap();

    test_executors::sleep_on(async {
        let frame = pacer.begin_frame().await.unwrap();
        table.end_shader_table(&pipeline, frame, 4).unwrap();
        pacer.end_frame().unwrap();

        let frame = pacer.begin_frame().await.unwrap();
        assert!(matches!(
            table.end_shader_table(&pipeline, frame, 5),
            Err(ShaderTableError::InstanceCountExceeded {
                requested: 5,
                sized: 4
            })
        ));
        table.end_shader_table(&pipeline, frame, 2).unwrap();
        let mut cmd = pacer.alloc_cmd_list().await.unwrap();
        assert!(matches!(
            table.dispatch_ray(&pipeline, frame, 8, 8, &mut cmd, 3),
            Err(ShaderTableError::InstanceCountExceeded { .. })
        ));
        table.dispatch_ray(&pipeline, frame, 8, 8, &mut cmd, 2).unwrap();
        pacer.execute_command_list(cmd).unwrap();
        pacer.end_frame().unwrap();
    });
    let records = dispatches(&context);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].hit_groups.len(), 2);
}

#[test]
fn layout_is_frozen_until_reset() {
    let context = context();
    let mut pacer = FramePacer::new(&context).unwrap();
    let mut table = ShaderTable::new(&context);
    register(&mut table);
    let pipeline = pipeline(&context, &table);
    table.bind("output", 1u64).unwrap();
    table.bind("sky", 2u64).unwrap();
    table.bind("scene", 3u64).unwrap();

    test_executors::sleep_on(async {
        let frame = pacer.begin_frame().await.unwrap();
        let mut cmd = pacer.alloc_cmd_list().await.unwrap();
        assert!(matches!(
            table.dispatch_ray(&pipeline, frame, 1, 1, &mut cmd, 1),
            Err(ShaderTableError::NotSized)
        ));
        table.end_shader_table(&pipeline, frame, 1).unwrap();
        assert!(matches!(
            table.register_shader("late_miss", ShaderRole::Miss, []),
            Err(ShaderTableError::LayoutFrozen(_))
        ));
        pacer.execute_command_list(cmd).unwrap();
        pacer.end_frame().unwrap();

        //the table was written for the previous frame only
        let frame = pacer.begin_frame().await.unwrap();
        let mut cmd = pacer.alloc_cmd_list().await.unwrap();
        assert!(matches!(
            table.dispatch_ray(&pipeline, frame, 1, 1, &mut cmd, 1),
            Err(ShaderTableError::NotPopulated(1))
        ));
        drop(cmd);

        table.reset_layout(&pacer);
        assert!(table.layout().is_none());
        assert_eq!(pacer.pending_retirements(), 1);
        table
            .register_shader("late_miss", ShaderRole::Miss, [])
            .unwrap();
        //the pipeline predates late_miss
        assert!(matches!(
            table.end_shader_table(&pipeline, frame, 1),
            Err(ShaderTableError::MissingIdentifier(name)) if name == "late_miss"
        ));
        pacer.end_frame().unwrap();
        pacer.wait_gpu().await;
        assert_eq!(pacer.pending_retirements(), 0);
    });
}

#[test]
fn argument_errors() {
    let context = context();
    let mut pacer = FramePacer::new(&context).unwrap();
    let mut table = ShaderTable::new(&context);
    register(&mut table);
    let pipeline = pipeline(&context, &table);

    assert!(matches!(
        table.bind("vertices", 1u64),
        Err(ShaderTableError::UnknownBinding(_))
    ));
    assert!(matches!(
        table.add_descriptor(1u64),
        Err(ShaderTableError::NoActiveHitProgram)
    ));

    test_executors::sleep_on(async {
        let frame = pacer.begin_frame().await.unwrap();
        table.bind("output", 1u64).unwrap();
        table.bind("scene", 3u64).unwrap();
        assert!(matches!(
            table.end_shader_table(&pipeline, frame, 1),
            Err(ShaderTableError::UnboundArgument { binding, .. }) if binding == "sky"
        ));
        table.bind("sky", 2u64).unwrap();

        //stride 64 leaves room for four arguments after a 32 byte identifier
        table.start_hit_program("opaque", 0).unwrap();
        for value in 0..5u64 {
            table.add_descriptor(value).unwrap();
        }
        assert!(matches!(
            table.end_shader_table(&pipeline, frame, 1),
            Err(ShaderTableError::TooManyArguments { count: 5, max: 4, .. })
        ));
        table.reset_hit_program(0);
        table.end_shader_table(&pipeline, frame, 1).unwrap();
        pacer.end_frame().unwrap();
    });
}

#[test]
fn one_ray_generation_shader_is_required() {
    let context = context();
    let mut pacer = FramePacer::new(&context).unwrap();
    let mut table = ShaderTable::new(&context);
    register(&mut table);
    let pipeline = pipeline(&context, &table);
    table.register_shader("rgen2", ShaderRole::RayGen, []).unwrap();
    test_executors::sleep_on(async {
        let frame = pacer.begin_frame().await.unwrap();
        assert!(matches!(
            table.end_shader_table(&pipeline, frame, 1),
            Err(ShaderTableError::RayGenCount(2))
        ));
        assert!(table.layout().is_none());
        pacer.end_frame().unwrap();
    });
}
