// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Soft ray-tracing pipelines.

use crate::imp::{BindingKind, Error, PipelineDesc};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Bytes in a soft shader identifier.
pub(super) const IDENTIFIER_SIZE: usize = 32;

/// A validated pipeline with a deterministic identifier per export and hit group.
#[derive(Debug)]
pub struct SoftPipeline {
    label: String,
    identifiers: HashMap<String, Vec<u8>>,
    global_arguments: Vec<BindingKind>,
}

impl SoftPipeline {
    pub(super) fn build(desc: &PipelineDesc<'_>) -> Result<Self, Error> {
        let mut identifiers = HashMap::new();
        for (i, library) in desc.libraries.iter().enumerate() {
            if library.bytecode.is_empty() {
                return Err(Error::Pipeline(format!("library {i} has no bytecode")));
            }
            for export in &library.exports {
                if identifiers
                    .insert(export.clone(), identifier(desc.label, export))
                    .is_some()
                {
                    return Err(Error::Pipeline(format!("export {export} defined twice")));
                }
            }
        }
        for group in desc.hit_groups {
            if group.closest_hit.is_none() && group.any_hit.is_none() {
                return Err(Error::Pipeline(format!(
                    "hit group {} has no shaders",
                    group.name
                )));
            }
            for shader in group.closest_hit.iter().chain(group.any_hit.iter()) {
                if !identifiers.contains_key(shader) {
                    return Err(Error::Pipeline(format!(
                        "hit group {} references missing export {shader}",
                        group.name
                    )));
                }
            }
        }
        //hit groups are added after validation so a group can't satisfy another group's reference
        for group in desc.hit_groups {
            if identifiers
                .insert(group.name.clone(), identifier(desc.label, &group.name))
                .is_some()
            {
                return Err(Error::Pipeline(format!(
                    "hit group {} collides with another export",
                    group.name
                )));
            }
        }
        Ok(SoftPipeline {
            label: desc.label.to_string(),
            identifiers,
            global_arguments: desc.global_arguments.to_vec(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(super) fn identifier(&self, export: &str) -> Option<&[u8]> {
        self.identifiers.get(export).map(|v| v.as_slice())
    }

    /// The root argument layout the pipeline was built with.
    pub fn global_arguments(&self) -> &[BindingKind] {
        &self.global_arguments
    }
}

fn identifier(pipeline: &str, export: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(IDENTIFIER_SIZE);
    for lane in 0..(IDENTIFIER_SIZE / 8) as u64 {
        let mut hasher = DefaultHasher::new();
        pipeline.hash(&mut hasher);
        export.hash(&mut hasher);
        lane.hash(&mut hasher);
        out.extend_from_slice(&hasher.finish().to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imp::{HitGroupDesc, ShaderBlob};

    fn blob(exports: &[&str]) -> ShaderBlob {
        ShaderBlob {
            bytecode: vec![1, 2, 3],
            exports: exports.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn desc<'a>(libraries: &'a [ShaderBlob], hit_groups: &'a [HitGroupDesc]) -> PipelineDesc<'a> {
        PipelineDesc {
            label: "test",
            libraries,
            hit_groups,
            max_payload_size: 16,
            max_attribute_size: 8,
            max_recursion_depth: 1,
            global_arguments: &[],
        }
    }

    #[test]
    fn identifiers_are_distinct_and_stable() {
        let libraries = [blob(&["rgen", "miss", "chit"])];
        let groups = [HitGroupDesc {
            name: "hg".to_string(),
            closest_hit: Some("chit".to_string()),
            any_hit: None,
        }];
        let p = SoftPipeline::build(&desc(&libraries, &groups)).unwrap();
        let rgen = p.identifier("rgen").unwrap();
        assert_eq!(rgen.len(), IDENTIFIER_SIZE);
        assert_ne!(rgen, p.identifier("miss").unwrap());
        assert_ne!(rgen, p.identifier("hg").unwrap());
        assert!(p.identifier("nope").is_none());

        let again = SoftPipeline::build(&desc(&libraries, &groups)).unwrap();
        assert_eq!(again.identifier("rgen"), p.identifier("rgen"));
    }

    #[test]
    fn missing_hit_shader() {
        let libraries = [blob(&["rgen"])];
        let groups = [HitGroupDesc {
            name: "hg".to_string(),
            closest_hit: Some("chit".to_string()),
            any_hit: None,
        }];
        let err = SoftPipeline::build(&desc(&libraries, &groups)).unwrap_err();
        assert!(err.to_string().contains("missing export chit"));
    }
}
