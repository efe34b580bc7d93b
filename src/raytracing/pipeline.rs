// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Ray-tracing pipeline assembly.

Shader source compilation happens outside this crate, behind [`ShaderCompiler`].  A
[`PipelineBuilder`] gathers libraries, asks the backend for a pipeline state object, then looks up
the identifier of every RayGen, Miss and hit group the registry knows.  Every failure along the way
is collected; if there were any, the whole diagnostic text comes back as a [`PipelineError`] and
nothing is built.
*/

use crate::context::Context;
use crate::imp::{Backend, PipelineDesc, ShaderBlob};
use crate::raytracing::shader::{ShaderRegistry, ShaderRole};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// An external shader compiler.
pub trait ShaderCompiler {
    /// Compiles `source` into a library exporting `entry_points`.
    ///
    /// Errors are the compiler's diagnostic text.
    fn compile(&self, label: &str, source: &str, entry_points: &[&str])
    -> Result<ShaderBlob, String>;
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("pipeline {label} failed:\n{diagnostics}")]
pub struct PipelineError {
    pub label: String,
    /// One line per problem.
    pub diagnostics: String,
}

pub struct PipelineBuilder<'a, B: Backend> {
    context: &'a Context<B>,
    label: String,
    libraries: Vec<ShaderBlob>,
    diagnostics: Vec<String>,
    max_payload_size: u32,
    max_attribute_size: u32,
    max_recursion_depth: u32,
}

impl<B: Backend> Debug for PipelineBuilder<'_, B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("label", &self.label)
            .field("libraries", &self.libraries.len())
            .field("diagnostics", &self.diagnostics)
            .finish_non_exhaustive()
    }
}

impl<'a, B: Backend> PipelineBuilder<'a, B> {
    pub fn new(context: &'a Context<B>, label: &str) -> Self {
        PipelineBuilder {
            context,
            label: label.to_string(),
            libraries: Vec::new(),
            diagnostics: Vec::new(),
            max_payload_size: 16,
            max_attribute_size: 8,
            max_recursion_depth: 1,
        }
    }

    /// Adds precompiled bytecode.
    pub fn add_library(&mut self, blob: ShaderBlob) -> &mut Self {
        self.libraries.push(blob);
        self
    }

    /// Compiles a library with `compiler`.  Failures are kept for [`PipelineBuilder::build`].
    pub fn compile_library<C: ShaderCompiler + ?Sized>(
        &mut self,
        compiler: &C,
        label: &str,
        source: &str,
        entry_points: &[&str],
    ) -> &mut Self {
        match compiler.compile(label, source, entry_points) {
            Ok(blob) => self.libraries.push(blob),
            Err(diagnostic) => {
                logwise::warn_sync!(
                    "shader library {label} failed to compile",
                    label = label
                );
                self.diagnostics.push(format!("{label}: {diagnostic}"));
            }
        }
        self
    }

    pub fn max_payload_size(&mut self, bytes: u32) -> &mut Self {
        self.max_payload_size = bytes;
        self
    }

    pub fn max_attribute_size(&mut self, bytes: u32) -> &mut Self {
        self.max_attribute_size = bytes;
        self
    }

    pub fn max_recursion_depth(&mut self, depth: u32) -> &mut Self {
        self.max_recursion_depth = depth;
        self
    }

    /// Diagnostics so far.
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    /// Builds the pipeline for the shaders and hit groups in `registry`.
    pub fn build(mut self, registry: &ShaderRegistry) -> Result<RayTracingPipeline<B>, PipelineError> {
        if !self.diagnostics.is_empty() {
            return Err(self.fail());
        }
        let hit_groups = registry.hit_group_descs();
        let global_arguments = registry
            .shaders_with_role(ShaderRole::Global)
            .flat_map(|s| s.bindings.iter().map(|b| b.kind))
            .collect::<Vec<_>>();
        let desc = PipelineDesc {
            label: &self.label,
            libraries: &self.libraries,
            hit_groups: &hit_groups,
            max_payload_size: self.max_payload_size,
            max_attribute_size: self.max_attribute_size,
            max_recursion_depth: self.max_recursion_depth,
            global_arguments: &global_arguments,
        };
        let backend = self.context.backend().clone();
        let native = match backend.create_ray_tracing_pipeline(&desc) {
            Ok(native) => native,
            Err(e) => {
                self.diagnostics.push(e.to_string());
                return Err(self.fail());
            }
        };

        let mut identifiers = HashMap::new();
        let names = registry
            .shaders_with_role(ShaderRole::RayGen)
            .chain(registry.shaders_with_role(ShaderRole::Miss))
            .map(|s| s.name.as_str())
            .chain(hit_groups.iter().map(|g| g.name.as_str()));
        for name in names {
            match backend.shader_identifier(&native, name) {
                Some(id) => {
                    identifiers.insert(name.to_string(), id.to_vec());
                }
                None => self
                    .diagnostics
                    .push(format!("no shader identifier for {name}")),
            }
        }
        if !self.diagnostics.is_empty() {
            return Err(self.fail());
        }
        let count = identifiers.len();
        logwise::info_sync!(
            "Built ray tracing pipeline {label} with {count} identifiers",
            label = self.label.clone(),
            count = count
        );
        Ok(RayTracingPipeline {
            backend,
            native,
            label: self.label,
            identifiers,
        })
    }

    fn fail(&self) -> PipelineError {
        let count = self.diagnostics.len();
        logwise::error_sync!(
            "pipeline {label} failed with {count} diagnostics",
            label = self.label.clone(),
            count = count
        );
        PipelineError {
            label: self.label.clone(),
            diagnostics: self.diagnostics.join("\n"),
        }
    }
}

/// A built pipeline state object and the identifiers of its records.
pub struct RayTracingPipeline<B: Backend> {
    backend: Arc<B>,
    native: B::Pipeline,
    label: String,
    identifiers: HashMap<String, Vec<u8>>,
}

impl<B: Backend> Debug for RayTracingPipeline<B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RayTracingPipeline")
            .field("label", &self.label)
            .field("native", &self.native)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> RayTracingPipeline<B> {
    /// Identifier for a RayGen or Miss shader, or a hit group.
    ///
    /// Falls back to asking the backend for names registered after the pipeline was built.
    pub fn identifier(&self, name: &str) -> Option<&[u8]> {
        self.identifiers
            .get(name)
            .map(|v| v.as_slice())
            .or_else(|| self.backend.shader_identifier(&self.native, name))
    }

    pub fn native(&self) -> &B::Pipeline {
        &self.native
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}
