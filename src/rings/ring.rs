// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The shape shared by every ring.

A ring is a reservation of `capacity_per_frame × num_frames` units split into `num_frames` disjoint
regions.  Allocation bumps a cursor inside the current region; [`RingCursor::advance`] moves to the
next region and rewinds the cursor.  Nothing is ever freed individually.

Non-aliasing across frames is the caller's side of the bargain: a region may only be advanced into
once the frame that last wrote it has retired on the GPU, and a frame may not allocate more than
`capacity_per_frame` units.
*/

use std::cell::Cell;
use std::ops::Range;

#[derive(Debug)]
pub struct RingCursor {
    label: &'static str,
    capacity_per_frame: u64,
    num_frames: u32,
    frame: Cell<u32>,
    cursor: Cell<u64>,
    high_water: Cell<u64>,
    flushed: Cell<u64>,
}

impl RingCursor {
    pub fn new(label: &'static str, capacity_per_frame: u64, num_frames: u32) -> Self {
        assert!(num_frames > 0, "{label}: a ring needs at least one frame");
        RingCursor {
            label,
            capacity_per_frame,
            num_frames,
            frame: Cell::new(0),
            cursor: Cell::new(0),
            high_water: Cell::new(0),
            flushed: Cell::new(0),
        }
    }

    /**
    Bumps the cursor by `n` units and returns the start of the allocation, measured from the start
    of the whole reservation.

    # Panics

    In debug builds (or with `strict_rings`), if this frame's allocations exceed
    `capacity_per_frame`.  In release builds the overflow runs into the next frame's region.

    Always, if the allocation would leave the reservation entirely.
    */
    pub fn alloc(&self, n: u64) -> u64 {
        let start = self.cursor.get();
        let end = start + n;
        let absolute = self.frame_base() + start;
        assert!(
            absolute + n <= self.total_capacity(),
            "{}: allocation of {n} at {absolute} leaves a reservation of {}",
            self.label,
            self.total_capacity()
        );
        if end > self.capacity_per_frame && cfg!(any(debug_assertions, feature = "strict_rings"))
        {
            panic!(
                "{label}: frame allocated {end} units, capacity per frame is {capacity}",
                label = self.label,
                capacity = self.capacity_per_frame
            );
        }
        self.cursor.set(end);
        self.high_water.set(self.high_water.get().max(end));
        absolute
    }

    /// Moves to the next frame region and rewinds the cursor.
    pub fn advance(&self) {
        let high_water = self.high_water.get();
        if high_water > self.capacity_per_frame {
            logwise::warn_sync!(
                "{label} overran its frame budget: {used} of {capacity}",
                label = self.label,
                used = high_water,
                capacity = self.capacity_per_frame
            );
        }
        self.frame.set((self.frame.get() + 1) % self.num_frames);
        self.cursor.set(0);
        self.high_water.set(0);
        self.flushed.set(0);
    }

    /// The part of this frame's region written since the last call, measured from the start of
    /// the reservation.
    pub fn take_unflushed(&self) -> Option<Range<u64>> {
        let flushed = self.flushed.get();
        let cursor = self.cursor.get();
        if cursor <= flushed {
            return None;
        }
        self.flushed.set(cursor);
        let base = self.frame_base();
        Some(base + flushed..base + cursor)
    }

    pub fn frame_index(&self) -> u32 {
        self.frame.get()
    }

    pub fn cursor(&self) -> u64 {
        self.cursor.get()
    }

    /// Highest cursor reached in the current frame.
    pub fn high_water(&self) -> u64 {
        self.high_water.get()
    }

    pub fn capacity_per_frame(&self) -> u64 {
        self.capacity_per_frame
    }

    pub fn num_frames(&self) -> u32 {
        self.num_frames
    }

    pub fn total_capacity(&self) -> u64 {
        self.capacity_per_frame * self.num_frames as u64
    }

    /// Start of the current frame's region.
    pub fn frame_base(&self) -> u64 {
        self.frame.get() as u64 * self.capacity_per_frame
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}
