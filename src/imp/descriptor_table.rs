// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! A descriptor heap kept as a CPU-side table of views.

use crate::imp::{
    CpuDescriptor, DescriptorHandle, DescriptorHeap, Error, GpuDescriptor, ResourceView,
};
use std::sync::Mutex;

/// Bytes between slot handles.  Matches the common native descriptor size.
pub const DESCRIPTOR_STRIDE: u32 = 32;

/// A fixed-capacity table of [`ResourceView`]s addressed by synthetic handles.
///
/// Both shipped backends use this for their descriptor heaps; handles are laid out exactly like a
/// native heap so ring arithmetic is the same everywhere.
#[derive(Debug)]
pub struct DescriptorTable {
    views: Mutex<Vec<ResourceView>>,
    start: DescriptorHandle,
    label: String,
}

impl DescriptorTable {
    pub(crate) fn new(capacity: u32, start: DescriptorHandle, label: &str) -> Self {
        DescriptorTable {
            views: Mutex::new(vec![ResourceView::Null; capacity as usize]),
            start,
            label: label.to_string(),
        }
    }

    /// The view currently written at `index`.
    pub fn view(&self, index: u32) -> Option<ResourceView> {
        self.views.lock().unwrap().get(index as usize).cloned()
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl DescriptorHeap for DescriptorTable {
    fn capacity(&self) -> u32 {
        self.views.lock().unwrap().len() as u32
    }

    fn stride(&self) -> u32 {
        DESCRIPTOR_STRIDE
    }

    fn start(&self) -> DescriptorHandle {
        self.start
    }

    fn write(&self, index: u32, view: &ResourceView) -> Result<(), Error> {
        let mut views = self.views.lock().unwrap();
        let capacity = views.len() as u32;
        let slot = views
            .get_mut(index as usize)
            .ok_or(Error::DescriptorOutOfBounds { index, capacity })?;
        *slot = view.clone();
        Ok(())
    }
}

pub(crate) fn synthetic_start(cpu_base: u64, gpu_base: u64) -> DescriptorHandle {
    DescriptorHandle {
        cpu: CpuDescriptor(cpu_base),
        gpu: GpuDescriptor(gpu_base),
    }
}
