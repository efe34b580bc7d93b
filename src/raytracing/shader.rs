// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Shader and hit-group registration.

use crate::imp::{BindingKind, DescriptorHandle, GpuAddress, GpuDescriptor, HitGroupDesc};
use crate::raytracing::ShaderTableError;

/// What a shader does in a ray dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderRole {
    /// Not a record; its bindings are root arguments shared by the whole dispatch.
    Global,
    RayGen,
    Miss,
    /// Closest hit.
    Hit,
    AnyHit,
}

/// One 8-byte argument slot a shader declares.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binding {
    pub name: String,
    pub kind: BindingKind,
}

impl Binding {
    pub fn descriptor(name: &str) -> Self {
        Binding {
            name: name.to_string(),
            kind: BindingKind::Descriptor,
        }
    }

    pub fn constant(name: &str) -> Self {
        Binding {
            name: name.to_string(),
            kind: BindingKind::Constant,
        }
    }

    pub fn sampler(name: &str) -> Self {
        Binding {
            name: name.to_string(),
            kind: BindingKind::Sampler,
        }
    }
}

/// An 8-byte value in a shader record: a GPU address or a descriptor handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ArgumentValue(pub u64);

impl From<u64> for ArgumentValue {
    fn from(value: u64) -> Self {
        ArgumentValue(value)
    }
}

impl From<GpuAddress> for ArgumentValue {
    fn from(value: GpuAddress) -> Self {
        ArgumentValue(value.0)
    }
}

impl From<GpuDescriptor> for ArgumentValue {
    fn from(value: GpuDescriptor) -> Self {
        ArgumentValue(value.0)
    }
}

impl From<DescriptorHandle> for ArgumentValue {
    fn from(value: DescriptorHandle) -> Self {
        ArgumentValue(value.gpu.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderDecl {
    pub name: String,
    pub role: ShaderRole,
    /// In declaration order, which is also record order.
    pub bindings: Vec<Binding>,
}

#[derive(Debug, Clone)]
pub(crate) struct HitGroup {
    pub(crate) name: String,
    pub(crate) closest_hit: Option<String>,
    pub(crate) any_hit: Option<String>,
    /// Per-instance argument lists, indexed by instance.
    pub(crate) instances: Vec<Vec<ArgumentValue>>,
}

impl HitGroup {
    pub(crate) fn arguments(&self, instance: u32) -> &[ArgumentValue] {
        self.instances
            .get(instance as usize)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

/// Everything registered for one ray-tracing shader table, in registration order.
#[derive(Debug, Default)]
pub struct ShaderRegistry {
    shaders: Vec<ShaderDecl>,
    hit_groups: Vec<HitGroup>,
    frozen: bool,
    //(group index, instance) that add_descriptor appends to
    active: Option<(usize, u32)>,
}

impl ShaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_new_name(&self, name: &str) -> Result<(), ShaderTableError> {
        if self.frozen {
            return Err(ShaderTableError::LayoutFrozen(name.to_string()));
        }
        if self.shader(name).is_some() || self.hit_group_index(name).is_some() {
            return Err(ShaderTableError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    pub fn register_shader(
        &mut self,
        name: &str,
        role: ShaderRole,
        bindings: impl IntoIterator<Item = Binding>,
    ) -> Result<(), ShaderTableError> {
        self.check_new_name(name)?;
        let bindings: Vec<Binding> = bindings.into_iter().collect();
        for (i, binding) in bindings.iter().enumerate() {
            if bindings[..i].iter().any(|b| b.name == binding.name) {
                return Err(ShaderTableError::DuplicateBinding {
                    shader: name.to_string(),
                    binding: binding.name.clone(),
                });
            }
        }
        self.shaders.push(ShaderDecl {
            name: name.to_string(),
            role,
            bindings,
        });
        Ok(())
    }

    pub fn register_hit_group(
        &mut self,
        name: &str,
        closest_hit: Option<&str>,
        any_hit: Option<&str>,
    ) -> Result<(), ShaderTableError> {
        self.check_new_name(name)?;
        if closest_hit.is_none() && any_hit.is_none() {
            return Err(ShaderTableError::EmptyHitGroup(name.to_string()));
        }
        for (shader, expected) in [(closest_hit, ShaderRole::Hit), (any_hit, ShaderRole::AnyHit)] {
            let Some(shader) = shader else { continue };
            let decl = self
                .shader(shader)
                .ok_or_else(|| ShaderTableError::UnknownShader {
                    hit_group: name.to_string(),
                    shader: shader.to_string(),
                })?;
            if decl.role != expected {
                return Err(ShaderTableError::WrongRole {
                    shader: shader.to_string(),
                    expected,
                    actual: decl.role,
                });
            }
        }
        self.hit_groups.push(HitGroup {
            name: name.to_string(),
            closest_hit: closest_hit.map(str::to_string),
            any_hit: any_hit.map(str::to_string),
            instances: Vec::new(),
        });
        Ok(())
    }

    /// Clears the argument list of `group` for `instance`, and directs
    /// [`ShaderRegistry::add_descriptor`] at it.
    pub fn start_hit_program(&mut self, group: &str, instance: u32) -> Result<(), ShaderTableError> {
        let index = self
            .hit_group_index(group)
            .ok_or_else(|| ShaderTableError::UnknownHitGroup(group.to_string()))?;
        let instances = &mut self.hit_groups[index].instances;
        if instances.len() <= instance as usize {
            instances.resize_with(instance as usize + 1, Vec::new);
        }
        instances[instance as usize].clear();
        self.active = Some((index, instance));
        Ok(())
    }

    /// Appends one value to the hit program opened by the last `start_hit_program`.
    pub fn add_descriptor(
        &mut self,
        value: impl Into<ArgumentValue>,
    ) -> Result<(), ShaderTableError> {
        let (index, instance) = self.active.ok_or(ShaderTableError::NoActiveHitProgram)?;
        self.hit_groups[index].instances[instance as usize].push(value.into());
        Ok(())
    }

    /// Clears `instance`'s arguments in every hit group.
    pub fn reset_hit_program(&mut self, instance: u32) {
        for group in &mut self.hit_groups {
            if let Some(arguments) = group.instances.get_mut(instance as usize) {
                arguments.clear();
            }
        }
        if matches!(self.active, Some((_, i)) if i == instance) {
            self.active = None;
        }
    }

    pub fn shader(&self, name: &str) -> Option<&ShaderDecl> {
        self.shaders.iter().find(|s| s.name == name)
    }

    fn hit_group_index(&self, name: &str) -> Option<usize> {
        self.hit_groups.iter().position(|g| g.name == name)
    }

    pub fn shaders_with_role(&self, role: ShaderRole) -> impl Iterator<Item = &ShaderDecl> {
        self.shaders.iter().filter(move |s| s.role == role)
    }

    pub(crate) fn hit_groups(&self) -> &[HitGroup] {
        &self.hit_groups
    }

    pub fn hit_group_count(&self) -> usize {
        self.hit_groups.len()
    }

    /// Arguments recorded for `group` and `instance`, if the group exists.
    pub fn hit_arguments(&self, group: &str, instance: u32) -> Option<&[ArgumentValue]> {
        self.hit_group_index(group)
            .map(|i| self.hit_groups[i].arguments(instance))
    }

    /// Largest binding count over every registered shader.
    pub fn max_bindings(&self) -> usize {
        self.shaders
            .iter()
            .map(|s| s.bindings.len())
            .max()
            .unwrap_or(0)
    }

    /// Hit groups in the form a backend builds pipelines from.
    pub fn hit_group_descs(&self) -> Vec<HitGroupDesc> {
        self.hit_groups
            .iter()
            .map(|g| HitGroupDesc {
                name: g.name.clone(),
                closest_hit: g.closest_hit.clone(),
                any_hit: g.any_hit.clone(),
            })
            .collect()
    }

    /// Whether some RayGen, Miss or Global shader declares a binding called `name`.
    pub fn has_table_binding(&self, name: &str) -> bool {
        self.shaders
            .iter()
            .filter(|s| matches!(s.role, ShaderRole::RayGen | ShaderRole::Miss | ShaderRole::Global))
            .any(|s| s.bindings.iter().any(|b| b.name == name))
    }

    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    pub(crate) fn thaw(&mut self) {
        self.frozen = false;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}
