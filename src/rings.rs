// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Per-frame ring allocators for descriptors and constant data.

pub mod constant;
pub mod descriptor;
pub mod ring;

pub use constant::{CRepr, ConstantAllocation, ConstantRing};
pub use descriptor::{
    DescriptorAllocation, DescriptorHeapRegion, DescriptorReservation, DescriptorRing,
};
pub use ring::RingCursor;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RingError {
    #[error("descriptor heap exhausted: {requested} slots requested, {remaining} remaining")]
    HeapExhausted { requested: u64, remaining: u32 },
    #[error("{0} has zero capacity")]
    ZeroCapacity(&'static str),
    #[error("handle does not belong to {0}")]
    ForeignHandle(&'static str),
    #[error(transparent)]
    Backend(#[from] crate::imp::Error),
}
