// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Deferred destruction of GPU objects.
//!
//! An object the GPU may still read can't be dropped when the CPU is done with it.  It goes here
//! instead, tagged with the fence value that retires the last work that could reference it, and is
//! dropped by [`RetirementQueue::collect`] once the GPU gets there.

use crate::imp::FenceValue;
use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::sync::Mutex;

struct Pending {
    fence: FenceValue,
    label: String,
    object: Box<dyn Any + Send>,
}

#[derive(Default)]
pub struct RetirementQueue {
    pending: Mutex<Vec<Pending>>,
}

impl Debug for RetirementQueue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let pending = self.pending.lock().unwrap();
        f.debug_list()
            .entries(pending.iter().map(|p| (p.fence, &p.label)))
            .finish()
    }
}

impl RetirementQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps `object` alive until `fence` is complete.
    pub fn retire<T: Send + 'static>(&self, fence: FenceValue, label: &str, object: T) {
        self.pending.lock().unwrap().push(Pending {
            fence,
            label: label.to_string(),
            object: Box::new(object),
        });
    }

    /// Drops everything retired at or before `completed`.  Returns how many objects were dropped.
    pub fn collect(&self, completed: FenceValue) -> usize {
        let retired = {
            let mut pending = self.pending.lock().unwrap();
            let (retired, keep): (Vec<_>, Vec<_>) =
                pending.drain(..).partition(|p| p.fence <= completed);
            *pending = keep;
            retired
        };
        let count = retired.len();
        for p in retired {
            logwise::trace_sync!(
                "retiring {label} at fence {fence}",
                label = p.label.clone(),
                fence = p.fence
            );
            drop(p.object);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::RetirementQueue;
    use std::sync::Arc;

    #[test]
    fn drops_in_fence_order() {
        let queue = RetirementQueue::new();
        let a = Arc::new(());
        let b = Arc::new(());
        queue.retire(2, "a", a.clone());
        queue.retire(5, "b", b.clone());
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.collect(1), 0);
        assert_eq!(Arc::strong_count(&a), 2);

        assert_eq!(queue.collect(3), 1);
        assert_eq!(Arc::strong_count(&a), 1);
        assert_eq!(Arc::strong_count(&b), 2);

        assert_eq!(queue.collect(5), 1);
        assert_eq!(Arc::strong_count(&b), 1);
        assert!(queue.is_empty());
    }
}
