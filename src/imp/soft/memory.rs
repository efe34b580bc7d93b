// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Simulated GPU virtual address space.

use crate::bittricks::align_up;
use crate::imp::mapped::MappedBlock;
use crate::imp::{GpuAddress, MappedBuffer};
use std::ptr::NonNull;
use std::sync::{Arc, Weak};

/// Allocations start here so that address 0 is never valid.
const BASE_ADDRESS: u64 = 0x1_0000_0000;
/// Granularity of the address space.  Every buffer starts at a multiple of this.
const PAGE: u64 = 64 * 1024;

#[derive(Debug)]
struct Region {
    base: u64,
    block: Weak<MappedBlock>,
}

/// Bump-allocated address space.  Addresses are never reused.
#[derive(Debug)]
pub(super) struct AddressSpace {
    next: u64,
    regions: Vec<Region>,
}

impl AddressSpace {
    pub fn new() -> Self {
        AddressSpace {
            next: BASE_ADDRESS,
            regions: Vec::new(),
        }
    }

    pub fn allocate(&mut self, size: u64) -> (GpuAddress, Arc<MappedBlock>) {
        self.regions.retain(|r| r.block.strong_count() > 0);
        let base = self.next;
        self.next = align_up(base + size.max(1), PAGE);
        let block = Arc::new(MappedBlock::zeroed(size as usize));
        self.regions.push(Region {
            base,
            block: Arc::downgrade(&block),
        });
        (GpuAddress(base), block)
    }

    /// Copies `len` bytes at `address`, or `None` if the range isn't inside one live buffer.
    pub fn read(&self, address: GpuAddress, len: u64) -> Option<Vec<u8>> {
        self.regions.iter().find_map(|r| {
            let offset = address.0.checked_sub(r.base)?;
            let block = r.block.upgrade()?;
            let end = offset.checked_add(len)?;
            if end > block.len() as u64 {
                return None;
            }
            Some(block.read(offset as usize, len as usize))
        })
    }
}

/// Persistently mapped memory in the soft backend's address space.
///
/// CPU writes are immediately visible to the soft queue.
#[derive(Debug)]
pub struct SoftMappedBuffer {
    block: Arc<MappedBlock>,
    address: GpuAddress,
    label: String,
}

impl SoftMappedBuffer {
    pub(super) fn new(block: Arc<MappedBlock>, address: GpuAddress, label: &str) -> Self {
        SoftMappedBuffer {
            block,
            address,
            label: label.to_string(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl MappedBuffer for SoftMappedBuffer {
    fn gpu_address(&self) -> GpuAddress {
        self.address
    }

    fn cpu_ptr(&self) -> NonNull<u8> {
        self.block.ptr()
    }

    fn size(&self) -> u64 {
        self.block.len() as u64
    }

    fn is_coherent(&self) -> bool {
        true
    }
}
