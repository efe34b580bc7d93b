// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The shader table.

# Layout

Every record has the same stride:

```text
stride = align(max(identifier, identifier + 8 × max bindings), alignment)
```

where `max bindings` is taken over every registered shader and `alignment` is the larger of the
hardware record and table alignments, so every sub-table starts aligned.  Each frame slot owns a
region of `stride × entries` bytes laid out as

```text
[RayGen][Miss 0 .. Miss M-1][instance 0: group 0 .. group H-1][instance 1: ...] ...
```

# States

A table starts *uninitialized*.  The first [`ShaderTable::end_shader_table`] freezes the registry
and sizes the buffer from what is registered at that moment.  Every call writes the current frame
slot's region (*populated* for that frame), which [`ShaderTable::dispatch_ray`] then references.
*/

use crate::bittricks::align_up;
use crate::context::Context;
use crate::frame::{Frame, FramePacer};
use crate::imp::{
    Backend, DispatchRaysDesc, GpuAddress, MappedBuffer, RayTracingLimits, TableRange,
};
use crate::raytracing::ShaderTableError;
use crate::raytracing::pipeline::RayTracingPipeline;
use crate::raytracing::shader::{ArgumentValue, Binding, ShaderDecl, ShaderRegistry, ShaderRole};
use crate::sync::CommandList;
use std::collections::HashMap;
use std::sync::Arc;

/// Bytes per argument slot.
const ARGUMENT_SIZE: u64 = 8;

/// Shape of a sized shader table.  Pure arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderTableLayout {
    pub identifier_size: u64,
    pub entry_stride: u64,
    pub miss_count: u64,
    pub hit_group_count: u64,
    /// Instances the table was sized for.
    pub instances: u64,
    pub num_frames: u32,
}

impl ShaderTableLayout {
    pub fn entry_stride(limits: &RayTracingLimits, max_bindings: usize) -> u64 {
        let identifier = limits.identifier_size as u64;
        let required = identifier.max(identifier + ARGUMENT_SIZE * max_bindings as u64);
        let alignment = limits.record_alignment.max(limits.table_alignment) as u64;
        align_up(required, alignment)
    }

    pub fn new(
        limits: &RayTracingLimits,
        max_bindings: usize,
        miss_count: usize,
        hit_group_count: usize,
        instances: u32,
        num_frames: u32,
    ) -> Self {
        ShaderTableLayout {
            identifier_size: limits.identifier_size as u64,
            entry_stride: Self::entry_stride(limits, max_bindings),
            miss_count: miss_count as u64,
            hit_group_count: hit_group_count as u64,
            instances: instances as u64,
            num_frames,
        }
    }

    /// `(#RayGen + #Miss) + instances × #HitGroups`, with exactly one RayGen.
    pub fn total_entries(&self) -> u64 {
        1 + self.miss_count + self.instances * self.hit_group_count
    }

    pub fn frame_size(&self) -> u64 {
        self.entry_stride * self.total_entries()
    }

    pub fn buffer_size(&self) -> u64 {
        self.frame_size() * self.num_frames as u64
    }

    /// Argument slots that fit in a record after the identifier.
    pub fn max_arguments(&self) -> u64 {
        (self.entry_stride - self.identifier_size) / ARGUMENT_SIZE
    }

    pub fn frame_offset(&self, slot: u32) -> u64 {
        slot as u64 * self.frame_size()
    }

    pub fn ray_gen_offset(&self, slot: u32) -> u64 {
        self.frame_offset(slot)
    }

    pub fn miss_offset(&self, slot: u32) -> u64 {
        self.ray_gen_offset(slot) + self.entry_stride
    }

    pub fn hit_offset(&self, slot: u32) -> u64 {
        self.miss_offset(slot) + self.miss_count * self.entry_stride
    }

    pub fn hit_record_offset(&self, slot: u32, instance: u32, group: usize) -> u64 {
        self.hit_offset(slot)
            + (instance as u64 * self.hit_group_count + group as u64) * self.entry_stride
    }

    pub fn miss_table_size(&self) -> u64 {
        self.miss_count * self.entry_stride
    }

    /// Bytes of hit records referenced by a dispatch over `instances` instances.
    pub fn hit_table_size(&self, instances: u32) -> u64 {
        self.entry_stride * self.hit_group_count * instances as u64
    }

    /// The three ranges a dispatch references, relative to `base`.
    pub fn dispatch_ranges(
        &self,
        base: GpuAddress,
        slot: u32,
        instances: u32,
    ) -> (TableRange, TableRange, TableRange) {
        let range = |offset: u64, size: u64| TableRange {
            start: base.offset(offset),
            size,
            stride: self.entry_stride,
        };
        (
            range(self.ray_gen_offset(slot), self.entry_stride),
            range(self.miss_offset(slot), self.miss_table_size()),
            range(self.hit_offset(slot), self.hit_table_size(instances)),
        )
    }
}

#[derive(Debug)]
enum TableState<B: Backend> {
    Uninitialized,
    Sized {
        layout: ShaderTableLayout,
        buffer: B::MappedBuffer,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Populated {
    frame: Frame,
    instances: u32,
}

/// Builds and owns the shader table consumed by ray dispatches.
#[derive(Debug)]
pub struct ShaderTable<B: Backend> {
    backend: Arc<B>,
    num_frames: u32,
    registry: ShaderRegistry,
    bound: HashMap<String, ArgumentValue>,
    state: TableState<B>,
    populated: Option<Populated>,
}

impl<B: Backend> ShaderTable<B> {
    pub fn new(context: &Context<B>) -> Self {
        ShaderTable {
            backend: context.backend().clone(),
            num_frames: context.frames_in_flight(),
            registry: ShaderRegistry::new(),
            bound: HashMap::new(),
            state: TableState::Uninitialized,
            populated: None,
        }
    }

    /// Registers a shader.  Fails with [`ShaderTableError::LayoutFrozen`] once the table is sized.
    pub fn register_shader(
        &mut self,
        name: &str,
        role: ShaderRole,
        bindings: impl IntoIterator<Item = Binding>,
    ) -> Result<(), ShaderTableError> {
        self.registry.register_shader(name, role, bindings)
    }

    /// Registers a hit group.  Fails with [`ShaderTableError::LayoutFrozen`] once the table is sized.
    pub fn register_hit_group(
        &mut self,
        name: &str,
        closest_hit: Option<&str>,
        any_hit: Option<&str>,
    ) -> Result<(), ShaderTableError> {
        self.registry.register_hit_group(name, closest_hit, any_hit)
    }

    /// Sets the value of a RayGen, Miss or Global binding.  Holds until rebound.
    pub fn bind(
        &mut self,
        name: &str,
        value: impl Into<ArgumentValue>,
    ) -> Result<(), ShaderTableError> {
        if !self.registry.has_table_binding(name) {
            return Err(ShaderTableError::UnknownBinding(name.to_string()));
        }
        self.bound.insert(name.to_string(), value.into());
        Ok(())
    }

    pub fn start_hit_program(&mut self, group: &str, instance: u32) -> Result<(), ShaderTableError> {
        self.registry.start_hit_program(group, instance)
    }

    pub fn add_descriptor(
        &mut self,
        value: impl Into<ArgumentValue>,
    ) -> Result<(), ShaderTableError> {
        self.registry.add_descriptor(value)
    }

    pub fn reset_hit_program(&mut self, instance: u32) {
        self.registry.reset_hit_program(instance)
    }

    pub fn registry(&self) -> &ShaderRegistry {
        &self.registry
    }

    /// The layout, once sized.
    pub fn layout(&self) -> Option<&ShaderTableLayout> {
        match &self.state {
            TableState::Uninitialized => None,
            TableState::Sized { layout, .. } => Some(layout),
        }
    }

    /// Address of the table buffer, once sized.
    pub fn gpu_address(&self) -> Option<GpuAddress> {
        match &self.state {
            TableState::Uninitialized => None,
            TableState::Sized { buffer, .. } => Some(buffer.gpu_address()),
        }
    }

    fn arguments_for(&self, shader: &ShaderDecl) -> Result<Vec<ArgumentValue>, ShaderTableError> {
        shader
            .bindings
            .iter()
            .map(|b| {
                self.bound
                    .get(&b.name)
                    .copied()
                    .ok_or_else(|| ShaderTableError::UnboundArgument {
                        shader: shader.name.clone(),
                        binding: b.name.clone(),
                    })
            })
            .collect()
    }

    fn size(&mut self, num_instances: u32) -> Result<(), ShaderTableError> {
        let ray_gens = self.registry.shaders_with_role(ShaderRole::RayGen).count();
        if ray_gens != 1 {
            return Err(ShaderTableError::RayGenCount(ray_gens));
        }
        let layout = ShaderTableLayout::new(
            &self.backend.ray_tracing_limits(),
            self.registry.max_bindings(),
            self.registry.shaders_with_role(ShaderRole::Miss).count(),
            self.registry.hit_group_count(),
            num_instances,
            self.num_frames,
        );
        let buffer = self
            .backend
            .create_mapped_buffer(layout.buffer_size(), "shader table")
            .inspect_err(|e| {
                logwise::error_sync!(
                    "shader table allocation failed: {err}",
                    err = logwise::privacy::LogIt(e)
                );
            })?;
        logwise::info_sync!(
            "Sized shader table: stride {stride}, {entries} entries, {frames} frames",
            stride = layout.entry_stride,
            entries = layout.total_entries(),
            frames = self.num_frames
        );
        self.registry.freeze();
        self.state = TableState::Sized { layout, buffer };
        Ok(())
    }

    /**
    Writes this frame slot's region of the table.

    The first call sizes the table for `num_instances` instances from the registrations present
    at that moment; after that, registration fails until [`ShaderTable::reset_layout`].
    Later calls may use fewer instances than the table was sized for, never more.
    */
    pub fn end_shader_table(
        &mut self,
        pipeline: &RayTracingPipeline<B>,
        frame: Frame,
        num_instances: u32,
    ) -> Result<(), ShaderTableError> {
        if matches!(self.state, TableState::Uninitialized) {
            self.size(num_instances)?;
        }
        let TableState::Sized { layout, buffer } = &self.state else {
            unreachable!("sized above")
        };
        let layout = *layout;
        if num_instances as u64 > layout.instances {
            return Err(ShaderTableError::InstanceCountExceeded {
                requested: num_instances,
                sized: layout.instances as u32,
            });
        }

        let slot = frame.slot();
        let mut region = vec![0u8; layout.frame_size() as usize];
        let mut cursor = 0u64;
        let mut put = |name: &str, args: &[ArgumentValue]| -> Result<(), ShaderTableError> {
            let identifier = pipeline
                .identifier(name)
                .ok_or_else(|| ShaderTableError::MissingIdentifier(name.to_string()))?;
            if args.len() as u64 > layout.max_arguments() {
                return Err(ShaderTableError::TooManyArguments {
                    record: name.to_string(),
                    count: args.len(),
                    max: layout.max_arguments() as usize,
                });
            }
            let start = cursor as usize;
            let id_len = identifier.len().min(layout.identifier_size as usize);
            region[start..start + id_len].copy_from_slice(&identifier[..id_len]);
            let mut at = start + layout.identifier_size as usize;
            for arg in args {
                region[at..at + ARGUMENT_SIZE as usize].copy_from_slice(&arg.0.to_le_bytes());
                at += ARGUMENT_SIZE as usize;
            }
            cursor += layout.entry_stride;
            Ok(())
        };

        for shader in self
            .registry
            .shaders_with_role(ShaderRole::RayGen)
            .chain(self.registry.shaders_with_role(ShaderRole::Miss))
        {
            put(&shader.name, &self.arguments_for(shader)?)?;
        }
        for instance in 0..num_instances {
            for group in self.registry.hit_groups() {
                put(&group.name, group.arguments(instance))?;
            }
        }

        let offset = layout.frame_offset(slot);
        //only the records written; instances past num_instances keep whatever they had
        let written = cursor as usize;
        //safety: the region lies inside the buffer, which was sized from this layout, and the GPU
        //has retired the frame that last read this slot
        unsafe {
            std::ptr::copy_nonoverlapping(
                region.as_ptr(),
                buffer.cpu_ptr().as_ptr().add(offset as usize),
                written,
            );
        }
        if !buffer.is_coherent() {
            self.backend.flush_mapped(buffer, offset, written as u64);
        }
        self.populated = Some(Populated {
            frame,
            instances: num_instances,
        });
        Ok(())
    }

    /// Records a ray dispatch that uses this frame's table.
    pub fn dispatch_ray(
        &self,
        pipeline: &RayTracingPipeline<B>,
        frame: Frame,
        width: u32,
        height: u32,
        cmd: &mut CommandList<B>,
        num_instances: u32,
    ) -> Result<(), ShaderTableError> {
        let TableState::Sized { layout, buffer } = &self.state else {
            return Err(ShaderTableError::NotSized);
        };
        let populated = self
            .populated
            .filter(|p| p.frame == frame)
            .ok_or(ShaderTableError::NotPopulated(frame.number()))?;
        if num_instances > populated.instances {
            return Err(ShaderTableError::InstanceCountExceeded {
                requested: num_instances,
                sized: populated.instances,
            });
        }
        let (ray_generation, miss, hit_group) =
            layout.dispatch_ranges(buffer.gpu_address(), frame.slot(), num_instances);
        let mut global_arguments = Vec::new();
        for shader in self.registry.shaders_with_role(ShaderRole::Global) {
            global_arguments.extend(self.arguments_for(shader)?.into_iter().map(|a| a.0));
        }
        let desc = DispatchRaysDesc {
            ray_generation,
            miss,
            hit_group,
            width,
            height,
            depth: 1,
        };
        self.backend
            .record_dispatch_rays(cmd, pipeline.native(), &global_arguments, &desc)?;
        Ok(())
    }

    /// Drops the layout so registration is possible again.
    ///
    /// The old buffer is retired through `pacer`, since frames in flight may still read it.
    pub fn reset_layout(&mut self, pacer: &FramePacer<B>) {
        if let TableState::Sized { buffer, .. } =
            std::mem::replace(&mut self.state, TableState::Uninitialized)
        {
            pacer.retire("shader table", buffer);
        }
        self.registry.thaw();
        self.populated = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_rounds_to_table_alignment() {
        let limits = RayTracingLimits::DXR;
        assert_eq!(ShaderTableLayout::entry_stride(&limits, 0), 64);
        assert_eq!(ShaderTableLayout::entry_stride(&limits, 4), 64);
        assert_eq!(ShaderTableLayout::entry_stride(&limits, 5), 128);
        let small = RayTracingLimits {
            identifier_size: 32,
            record_alignment: 32,
            table_alignment: 32,
        };
        assert_eq!(ShaderTableLayout::entry_stride(&small, 1), 64);
        assert_eq!(ShaderTableLayout::entry_stride(&small, 0), 32);
    }

    #[test]
    fn one_raygen_two_miss_one_group_three_instances() {
        let layout = ShaderTableLayout::new(&RayTracingLimits::DXR, 2, 2, 1, 3, 3);
        assert_eq!(layout.total_entries(), 6);
        assert_eq!(layout.hit_table_size(3), layout.entry_stride * 3);
        assert_eq!(layout.buffer_size(), layout.entry_stride * 6 * 3);
    }

    #[test]
    fn offsets() {
        let layout = ShaderTableLayout::new(&RayTracingLimits::DXR, 1, 2, 2, 4, 2);
        let s = layout.entry_stride;
        assert_eq!(s, 64);
        assert_eq!(layout.ray_gen_offset(1), layout.frame_size());
        assert_eq!(layout.miss_offset(0), s);
        assert_eq!(layout.hit_offset(0), 3 * s);
        assert_eq!(layout.hit_record_offset(0, 1, 1), 3 * s + 3 * s);
        assert_eq!(layout.max_arguments(), 4);

        let (rg, miss, hit) = layout.dispatch_ranges(GpuAddress(0x1000), 1, 3);
        let base = 0x1000 + layout.frame_size();
        assert_eq!(rg.start, GpuAddress(base));
        assert_eq!(rg.size, s);
        assert_eq!(miss.start, GpuAddress(base + s));
        assert_eq!(miss.size, 2 * s);
        assert_eq!(hit.start, GpuAddress(base + 3 * s));
        assert_eq!(hit.size, s * 2 * 3);
        assert_eq!(hit.stride, s);
    }
}
