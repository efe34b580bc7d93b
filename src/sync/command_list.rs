// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The fixed pool of reusable command lists.
//!
//! # Slot states
//!
//! Each slot moves through:
//! - `AVAILABLE`: never used, or returned without being submitted.  Can be checked out immediately.
//! - `RECORDING`: held by exactly one [`CommandList`].
//! - `SUBMITTED`: handed to the queue, tagged with the fence value that retires it.
//!   Can be checked out once that value is complete.
//!
//! Checkout advances a round-robin cursor under one pool-wide lock, so the pool index and the
//! wait for the slot it selects happen as one step.

use crate::context::Context;
use crate::imp::{Backend, CommandBuffer, Error, FenceValue};
use std::cell::UnsafeCell;
use std::fmt::{Debug, Formatter};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const AVAILABLE: u8 = 0;
const RECORDING: u8 = 1;
const SUBMITTED: u8 = 2;

/// No fence assigned.
const NO_FENCE: FenceValue = 0;

struct Slot<B: Backend> {
    index: u32,
    state: AtomicU8,
    fence: AtomicU64,
    buffer: UnsafeCell<B::CommandBuffer>,
    pending_checkout: Mutex<Vec<r#continue::Sender<()>>>,
}

//the buffer is only touched by the CommandList holding the slot in RECORDING
unsafe impl<B: Backend> Send for Slot<B> {}
unsafe impl<B: Backend> Sync for Slot<B> {}

impl<B: Backend> Debug for Slot<B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("index", &self.index)
            .field("state", &self.state)
            .field("fence", &self.fence)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> Slot<B> {
    fn leave_recording(&self, new_state: u8, fence: FenceValue) {
        self.fence.store(fence, Ordering::Release);
        let old = self.state.swap(new_state, Ordering::AcqRel);
        debug_assert_eq!(old, RECORDING);
        let take = self
            .pending_checkout
            .lock()
            .unwrap()
            .drain(..)
            .collect::<Vec<_>>();
        for sender in take {
            sender.send(());
        }
    }

    /// Resolves once nobody is recording into this slot.
    async fn wait_not_recording(&self) {
        loop {
            let future = {
                let mut wake_list = self.pending_checkout.lock().unwrap();
                if self.state.load(Ordering::Acquire) != RECORDING {
                    return;
                }
                let (s, f) = r#continue::continuation();
                wake_list.push(s);
                f
            };
            logwise::trace_sync!(
                "command list {index} is still recording; waiting",
                index = self.index
            );
            future.await;
        }
    }
}

/// A command list checked out of the pool.
///
/// Derefs to the backend's command buffer for recording.  Hand it to
/// [`crate::FrameSynchronizer::execute_command_list`] to submit it; dropping it instead returns the
/// slot to the pool unsubmitted.
pub struct CommandList<B: Backend> {
    slot: Arc<Slot<B>>,
    submitted: bool,
}

impl<B: Backend> Debug for CommandList<B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandList")
            .field("slot", &self.slot)
            .field("submitted", &self.submitted)
            .finish()
    }
}

impl<B: Backend> CommandList<B> {
    /// Position of this list in the pool.
    pub fn index(&self) -> u32 {
        self.slot.index
    }

    /// Records that this list was submitted and is retired by `fence`.
    pub(crate) fn retire_at(mut self, fence: FenceValue) {
        self.submitted = true;
        self.slot.leave_recording(SUBMITTED, fence);
    }
}

impl<B: Backend> Deref for CommandList<B> {
    type Target = B::CommandBuffer;
    fn deref(&self) -> &Self::Target {
        //safety: the slot is RECORDING and we are its only holder
        unsafe { &*self.slot.buffer.get() }
    }
}

impl<B: Backend> DerefMut for CommandList<B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        //safety: the slot is RECORDING and we are its only holder
        unsafe { &mut *self.slot.buffer.get() }
    }
}

impl<B: Backend> Drop for CommandList<B> {
    fn drop(&mut self) {
        if !self.submitted {
            self.slot.leave_recording(AVAILABLE, NO_FENCE);
        }
    }
}

/// A fixed number of command buffers, created up front and recycled round-robin.
#[derive(Debug)]
pub struct CommandListPool<B: Backend> {
    backend: Arc<B>,
    slots: Vec<Arc<Slot<B>>>,
    cursor: wasm_safe_mutex::Mutex<usize>,
}

impl<B: Backend> CommandListPool<B> {
    pub fn new(context: &Context<B>) -> Result<Self, Error> {
        let backend = context.backend().clone();
        let size = context.config().command_list_pool_size;
        let slots = (0..size)
            .map(|index| {
                let buffer = backend.create_command_buffer(&format!("command list {index}"))?;
                Ok(Arc::new(Slot {
                    index,
                    state: AtomicU8::new(AVAILABLE),
                    fence: AtomicU64::new(NO_FENCE),
                    buffer: UnsafeCell::new(buffer),
                    pending_checkout: Mutex::new(Vec::new()),
                }))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(CommandListPool {
            backend,
            slots,
            cursor: wasm_safe_mutex::Mutex::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Checks out the next list in round-robin order.
    ///
    /// If that list's previous submission has not retired yet, this calls `before_stall` with the
    /// fence it is about to wait for, then waits, holding the pool lock so later callers queue up
    /// behind.  `before_stall` is where the owner of the fence counter queues a signal the wait
    /// depends on.
    pub async fn checkout(
        &self,
        before_stall: impl FnOnce(FenceValue),
    ) -> Result<CommandList<B>, Error> {
        let mut cursor = self.cursor.lock_async().await;
        let index = *cursor;
        *cursor = (index + 1) % self.slots.len();
        let slot = self.slots[index].clone();

        slot.wait_not_recording().await;
        let fence = slot.fence.load(Ordering::Acquire);
        let timeline = self.backend.timeline();
        if fence != NO_FENCE && !timeline.is_complete(fence) {
            logwise::trace_sync!(
                "alloc_cmd_list stalled: list {index} waits for fence {fence}, completed {completed}",
                index = slot.index,
                fence = fence,
                completed = timeline.completed_value()
            );
            before_stall(fence);
            timeline.wait(fence).await;
        }
        //we hold the pool lock, so nobody else can claim this slot between the checks and here
        slot.fence.store(NO_FENCE, Ordering::Release);
        slot.state.store(RECORDING, Ordering::Release);
        let mut list = CommandList {
            slot,
            submitted: false,
        };
        list.reset()?;
        drop(cursor);
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HalConfig;
    use crate::imp::SoftBackend;

    fn context(pool: u32) -> Context<SoftBackend> {
        Context::new(
            SoftBackend::new(),
            HalConfig {
                frames_in_flight: 1,
                command_list_pool_size: pool,
                ..HalConfig::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn round_robin() {
        let context = context(3);
        let pool = CommandListPool::new(&context).unwrap();
        assert_eq!(pool.len(), 3);
        let indices = (0..5)
            .map(|_| {
                let list = test_executors::sleep_on(pool.checkout(|_| {})).unwrap();
                assert!(list.is_recording());
                list.index()
            })
            .collect::<Vec<_>>();
        assert_eq!(indices, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn dropped_list_is_reusable() {
        let context = context(2);
        let pool = CommandListPool::new(&context).unwrap();
        let mut list = test_executors::sleep_on(pool.checkout(|_| {})).unwrap();
        list.insert_marker("discarded");
        drop(list);
        let _second = test_executors::sleep_on(pool.checkout(|_| {})).unwrap();
        let again = test_executors::sleep_on(pool.checkout(|_| {})).unwrap();
        assert_eq!(again.index(), 0);
        assert!(again.is_empty());
    }

    #[test]
    fn retired_list_is_reusable() {
        let context = context(2);
        let pool = CommandListPool::new(&context).unwrap();
        let mut list = test_executors::sleep_on(pool.checkout(|_| {})).unwrap();
        context.backend().submit(&mut list).unwrap();
        list.retire_at(1);
        context.backend().signal(1);
        let _ = test_executors::sleep_on(pool.checkout(|_| {})).unwrap();
        let again = test_executors::sleep_on(pool.checkout(|_| {})).unwrap();
        assert_eq!(again.index(), 0);
    }

    #[test]
    fn stall_hook_sees_the_pending_fence() {
        let context = context(2);
        let pool = CommandListPool::new(&context).unwrap();
        let mut list = test_executors::sleep_on(pool.checkout(|_| {})).unwrap();
        context.backend().submit(&mut list).unwrap();
        list.retire_at(1);
        let mut seen = None;
        let fresh = test_executors::sleep_on(pool.checkout(|fence| seen = Some(fence))).unwrap();
        assert_eq!(fresh.index(), 1);
        assert_eq!(seen, None);
        drop(fresh);
        let again = test_executors::sleep_on(pool.checkout(|fence| {
            seen = Some(fence);
            context.backend().signal(fence);
        }))
        .unwrap();
        assert_eq!(seen, Some(1));
        assert_eq!(again.index(), 0);
    }
}
