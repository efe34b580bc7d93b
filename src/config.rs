// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Build/init-time configuration.
//!
//! All of these values are fixed once a [`crate::Context`] has been created.
//! None of them can be changed while frames are in flight, because every one of
//! them determines the shape of a statically partitioned resource.

use crate::bittricks::{CONSTANT_BUFFER_ALIGNMENT, is_aligned};

/// The usage domains that get their own descriptor ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorDomain {
    /// Per-dispatch views: constant buffers, output images, acceleration structures.
    Global,
    /// Material textures.
    Texture,
    /// Vertex/index views used by hit shaders.
    Geometry,
}

impl DescriptorDomain {
    pub const ALL: [DescriptorDomain; 3] = [
        DescriptorDomain::Global,
        DescriptorDomain::Texture,
        DescriptorDomain::Geometry,
    ];

    pub(crate) fn debug_name(self) -> &'static str {
        match self {
            DescriptorDomain::Global => "global descriptor ring",
            DescriptorDomain::Texture => "texture descriptor ring",
            DescriptorDomain::Geometry => "geometry descriptor ring",
        }
    }
}

/// Configuration for a [`crate::Context`].
///
/// The [`Default`] values are suitable for a typical triple-buffered renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HalConfig {
    /// Number of frames whose GPU work may be outstanding at once.
    ///
    /// Every ring is partitioned into this many regions.
    pub frames_in_flight: u32,
    /// Fixed number of command lists in the pool.
    ///
    /// This must comfortably exceed the number of command lists that are in flight at once,
    /// or `alloc_cmd_list` degrades into a full GPU stall every time the pool wraps.
    pub command_list_pool_size: u32,
    /// Descriptors per frame in the global ring.
    pub global_descriptors_per_frame: u32,
    /// Descriptors per frame in the texture ring.
    pub texture_descriptors_per_frame: u32,
    /// Descriptors per frame in the geometry ring.
    pub geometry_descriptors_per_frame: u32,
    /// Bytes per frame in the constant ring.
    pub constant_ring_bytes_per_frame: u64,
    /// Granularity of constant blocks.  Hardware requires 256.
    pub constant_alignment: u64,
}

impl Default for HalConfig {
    fn default() -> Self {
        HalConfig {
            frames_in_flight: 3,
            command_list_pool_size: 4096,
            global_descriptors_per_frame: 1024,
            texture_descriptors_per_frame: 4096,
            geometry_descriptors_per_frame: 4096,
            constant_ring_bytes_per_frame: 10 * 1024 * 1024,
            constant_alignment: CONSTANT_BUFFER_ALIGNMENT,
        }
    }
}

impl HalConfig {
    /// Descriptors per frame reserved for `domain`.
    pub fn descriptors_per_frame(&self, domain: DescriptorDomain) -> u32 {
        match domain {
            DescriptorDomain::Global => self.global_descriptors_per_frame,
            DescriptorDomain::Texture => self.texture_descriptors_per_frame,
            DescriptorDomain::Geometry => self.geometry_descriptors_per_frame,
        }
    }

    /// Total size of the shader-visible descriptor heap that backs all domain rings.
    pub fn descriptor_heap_capacity(&self) -> u64 {
        DescriptorDomain::ALL
            .iter()
            .map(|d| self.descriptors_per_frame(*d) as u64 * self.frames_in_flight as u64)
            .sum()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames_in_flight == 0 {
            return Err(ConfigError::NoFramesInFlight);
        }
        if self.command_list_pool_size <= self.frames_in_flight {
            return Err(ConfigError::PoolTooSmall {
                pool_size: self.command_list_pool_size,
                frames_in_flight: self.frames_in_flight,
            });
        }
        for domain in DescriptorDomain::ALL {
            if self.descriptors_per_frame(domain) == 0 {
                return Err(ConfigError::EmptyRing(domain.debug_name()));
            }
        }
        if self.constant_ring_bytes_per_frame == 0 {
            return Err(ConfigError::EmptyRing("constant ring"));
        }
        if !self.constant_alignment.is_power_of_two()
            || self.constant_alignment < CONSTANT_BUFFER_ALIGNMENT
        {
            return Err(ConfigError::BadAlignment(self.constant_alignment));
        }
        if !is_aligned(self.constant_ring_bytes_per_frame, self.constant_alignment) {
            return Err(ConfigError::UnalignedConstantRing {
                bytes: self.constant_ring_bytes_per_frame,
                alignment: self.constant_alignment,
            });
        }
        if self.descriptor_heap_capacity() > u32::MAX as u64 {
            return Err(ConfigError::HeapTooLarge(self.descriptor_heap_capacity()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("frames_in_flight must be at least 1")]
    NoFramesInFlight,
    #[error("command list pool ({pool_size}) must be larger than frames in flight ({frames_in_flight})")]
    PoolTooSmall { pool_size: u32, frames_in_flight: u32 },
    #[error("{0} has zero capacity")]
    EmptyRing(&'static str),
    #[error("constant alignment {0} must be a power of two of at least 256")]
    BadAlignment(u64),
    #[error("constant ring size {bytes} is not a multiple of {alignment}")]
    UnalignedConstantRing { bytes: u64, alignment: u64 },
    #[error("descriptor heap of {0} slots is too large")]
    HeapTooLarge(u64),
}
