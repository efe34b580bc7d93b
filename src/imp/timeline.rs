// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The fence counter.

A [`Timeline`] records the highest fence value the GPU has reached.  Backends call
[`Timeline::complete`] from wherever they learn about completion (inline in the soft backend,
from a submission-done callback on the poll thread for wgpu).  Waiters park a continuation
and are resumed by whoever completes their value.
*/

use std::fmt::{Debug, Formatter};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// A point on the fence timeline.
///
/// Values are monotonic.  0 is never signaled; it means "no fence".
pub type FenceValue = u64;

pub struct Timeline {
    completed: AtomicU64,
    waiters: Mutex<Vec<(FenceValue, r#continue::Sender<()>)>>,
}

impl Debug for Timeline {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeline")
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeline {
    pub fn new() -> Self {
        Timeline {
            completed: AtomicU64::new(0),
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Highest value the GPU has reached.
    pub fn completed_value(&self) -> FenceValue {
        self.completed.load(Ordering::Acquire)
    }

    pub fn is_complete(&self, value: FenceValue) -> bool {
        value <= self.completed_value()
    }

    /// Records that the GPU reached `value`, and resumes everyone waiting on it or anything earlier.
    ///
    /// Completing a value lower than one already completed does nothing.
    pub fn complete(&self, value: FenceValue) {
        let ready = {
            let mut waiters = self.waiters.lock().unwrap();
            let reached = self
                .completed
                .fetch_max(value, Ordering::AcqRel)
                .max(value);
            let (ready, pending): (Vec<_>, Vec<_>) =
                waiters.drain(..).partition(|(v, _)| *v <= reached);
            *waiters = pending;
            ready
        };
        for (_, sender) in ready {
            sender.send(());
        }
    }

    /// Resolves once the GPU has reached `value`.
    ///
    /// There is no timeout.  A GPU that never gets there hangs the caller.
    pub async fn wait(&self, value: FenceValue) {
        let future = {
            let mut waiters = self.waiters.lock().unwrap();
            //checked under the lock so a concurrent complete can't slip between check and park
            if self.is_complete(value) {
                return;
            }
            let (s, f) = r#continue::continuation();
            waiters.push((value, s));
            f
        };
        future.await
    }

    /// Number of parked waiters.
    pub fn waiting(&self) -> usize {
        self.waiters.lock().unwrap().len()
    }
}

impl Drop for Timeline {
    fn drop(&mut self) {
        //nobody can complete these anymore
        let waiters = self
            .waiters
            .get_mut()
            .map(std::mem::take)
            .unwrap_or_default();
        for (_, sender) in waiters {
            sender.send(());
        }
    }
}
