// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Ray tracing: shader registration, pipeline assembly, and the per-frame shader table.

A typical frame:

1. Register shaders and hit groups once, then build a [`RayTracingPipeline`].
2. Each frame, [`ShaderTable::bind`] table arguments and record hit programs per instance.
3. [`ShaderTable::end_shader_table`] writes the frame's records.
4. [`ShaderTable::dispatch_ray`] records the dispatch into a command list.
*/

pub mod pipeline;
pub mod shader;
pub mod table;

pub use pipeline::{PipelineBuilder, PipelineError, RayTracingPipeline, ShaderCompiler};
pub use crate::imp::BindingKind;
pub use shader::{ArgumentValue, Binding, ShaderDecl, ShaderRegistry, ShaderRole};
pub use table::{ShaderTable, ShaderTableLayout};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ShaderTableError {
    #[error("{0} registered after the shader table layout was fixed")]
    LayoutFrozen(String),
    #[error("{0} is already registered")]
    DuplicateName(String),
    #[error("shader {shader} declares {binding} twice")]
    DuplicateBinding { shader: String, binding: String },
    #[error("hit group {hit_group} references unknown shader {shader}")]
    UnknownShader { hit_group: String, shader: String },
    #[error("shader {shader} is {actual:?}, expected {expected:?}")]
    WrongRole {
        shader: String,
        expected: shader::ShaderRole,
        actual: shader::ShaderRole,
    },
    #[error("hit group {0} has neither a closest-hit nor an any-hit shader")]
    EmptyHitGroup(String),
    #[error("no hit group named {0}")]
    UnknownHitGroup(String),
    #[error("add_descriptor without start_hit_program")]
    NoActiveHitProgram,
    #[error("no RayGen, Miss or Global shader binds {0}")]
    UnknownBinding(String),
    #[error("shader {shader} binding {binding} has no value")]
    UnboundArgument { shader: String, binding: String },
    #[error("expected exactly one RayGen shader, found {0}")]
    RayGenCount(usize),
    #[error("pipeline has no identifier for {0}")]
    MissingIdentifier(String),
    #[error("{requested} instances requested, table holds {sized}")]
    InstanceCountExceeded { requested: u32, sized: u32 },
    #[error("record {record} has {count} arguments, at most {max} fit")]
    TooManyArguments {
        record: String,
        count: usize,
        max: usize,
    },
    #[error("shader table has not been sized")]
    NotSized,
    #[error("shader table was not written for frame {0}")]
    NotPopulated(u64),
    #[error(transparent)]
    Backend(#[from] crate::imp::Error),
}
