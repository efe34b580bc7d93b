// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Heap memory with a stable address, shared between a CPU writer and a (simulated) GPU reader.

use std::ptr::NonNull;

/// A zeroed block that never moves.
///
/// The CPU side writes through raw pointers handed out by the rings; readers copy out with
/// [`MappedBlock::read`].  Ordering between the two is the fence protocol's job, not this type's.
#[derive(Debug)]
pub(crate) struct MappedBlock {
    ptr: NonNull<u8>,
    len: usize,
}

//the block is plain bytes; synchronization is external
unsafe impl Send for MappedBlock {}
unsafe impl Sync for MappedBlock {}

impl MappedBlock {
    pub fn zeroed(len: usize) -> Self {
        let boxed: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let ptr = NonNull::from(Box::leak(boxed)).cast::<u8>();
        MappedBlock { ptr, len }
    }

    pub fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "read of {len} bytes at {offset} outside a block of {}",
            self.len
        );
        let mut out = vec![0u8; len];
        //safety: bounds checked above, and `out` is a fresh allocation
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), out.as_mut_ptr(), len);
        }
        out
    }

    #[cfg(test)]
    pub fn write(&self, offset: usize, bytes: &[u8]) {
        assert!(
            offset
                .checked_add(bytes.len())
                .is_some_and(|end| end <= self.len),
            "write of {} bytes at {offset} outside a block of {}",
            bytes.len(),
            self.len
        );
        //safety: bounds checked above
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.ptr.as_ptr().add(offset),
                bytes.len(),
            );
        }
    }
}

impl Drop for MappedBlock {
    fn drop(&mut self) {
        //safety: ptr and len came from Box::leak in zeroed
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.len,
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MappedBlock;

    #[test]
    fn write_then_read() {
        let block = MappedBlock::zeroed(64);
        assert_eq!(block.read(0, 4), vec![0, 0, 0, 0]);
        block.write(10, &[1, 2, 3]);
        assert_eq!(block.read(9, 5), vec![0, 1, 2, 3, 0]);
        assert_eq!(block.len(), 64);
    }

    #[test]
    #[should_panic]
    fn read_out_of_bounds() {
        let block = MappedBlock::zeroed(8);
        block.read(4, 8);
    }
}
