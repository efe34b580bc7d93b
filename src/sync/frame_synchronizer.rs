// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use crate::context::Context;
use crate::imp::{Backend, Error, FenceValue};
use crate::sync::command_list::{CommandList, CommandListPool};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/**
Owns the fence counter, the queue and the command list pool.

The counter holds the value the *next* signal will carry.  Submitted command lists are tagged
with it, so a list is retired by the first signal queued after its submission.

# Example

```
use fences_and_rings::{CommandBuffer, Context, FrameSynchronizer, HalConfig, SoftBackend};
let context = Context::new(SoftBackend::new(), HalConfig::default()).unwrap();
let sync = FrameSynchronizer::new(&context).unwrap();
test_executors::sleep_on(async {
    let mut cmd = sync.alloc_cmd_list().await.unwrap();
    cmd.insert_marker("clear");
    sync.execute_command_list(cmd).unwrap();
    sync.wait_gpu().await;
});
```
*/
#[derive(Debug)]
pub struct FrameSynchronizer<B: Backend> {
    backend: Arc<B>,
    pool: CommandListPool<B>,
    current_fence: AtomicU64,
    //submits and signals must reach the queue in the order they read current_fence
    queue_lock: Mutex<()>,
}

impl<B: Backend> FrameSynchronizer<B> {
    /// Creates the pool.  Device object creation failure is fatal; there is no retry.
    pub fn new(context: &Context<B>) -> Result<Self, Error> {
        let pool = CommandListPool::new(context).inspect_err(|e| {
            logwise::error_sync!(
                "failed to create command list pool: {err}",
                err = logwise::privacy::LogIt(e)
            );
        })?;
        let size = pool.len();
        logwise::info_sync!("FrameSynchronizer with {size} command lists", size = size);
        let backend = context.backend().clone();
        let current_fence = backend.timeline().completed_value() + 1;
        Ok(FrameSynchronizer {
            backend,
            pool,
            current_fence: AtomicU64::new(current_fence),
            queue_lock: Mutex::new(()),
        })
    }

    /// Checks out a command list, ready for recording.
    ///
    /// Safe to call from several threads at once.  Resolves only once the list's previous
    /// submission has retired, so a pool that wraps faster than the GPU retires work stalls here.
    ///
    /// A list submitted since the last signal is tagged with a value nobody has queued yet.  If
    /// the pool wraps onto such a list, the signal is queued here before waiting, so lapping the
    /// pool inside one frame degrades to a full stall.
    pub async fn alloc_cmd_list(&self) -> Result<CommandList<B>, Error> {
        self.pool
            .checkout(|fence| {
                if fence >= self.current_fence_value() {
                    let signaled = self.signal_current_fence();
                    logwise::warn_sync!(
                        "command list pool wrapped before fence {fence} was signaled; signaled {signaled} early",
                        fence = fence,
                        signaled = signaled
                    );
                }
            })
            .await
    }

    /// Closes and submits `cmd`.  Does not wait.
    ///
    /// Returns the fence value that will retire the list.
    pub fn execute_command_list(&self, mut cmd: CommandList<B>) -> Result<FenceValue, Error> {
        let _queue = self.queue_lock.lock().unwrap();
        self.backend.submit(&mut cmd)?;
        let fence = self.current_fence.load(Ordering::Acquire);
        cmd.retire_at(fence);
        Ok(fence)
    }

    /// Queues a signal of the current counter value and increments the counter.
    ///
    /// Returns the value that was signaled.
    pub fn signal_current_fence(&self) -> FenceValue {
        let _queue = self.queue_lock.lock().unwrap();
        let value = self.current_fence.fetch_add(1, Ordering::AcqRel);
        self.backend.signal(value);
        value
    }

    /// Resolves once the GPU has reached `value`.  No timeout.
    pub async fn wait_fence_value(&self, value: FenceValue) {
        self.backend.timeline().wait(value).await
    }

    /// Full flush: signals, then waits for that signal.
    pub async fn wait_gpu(&self) {
        let value = self.signal_current_fence();
        if self.backend.timeline().is_complete(value) {
            return;
        }
        let _interval = logwise::perfwarn_begin!("FrameSynchronizer::wait_gpu");
        self.wait_fence_value(value).await
    }

    /// The value the next [`FrameSynchronizer::signal_current_fence`] will signal.
    pub fn current_fence_value(&self) -> FenceValue {
        self.current_fence.load(Ordering::Acquire)
    }

    /// Highest value the GPU has reached.
    pub fn completed_fence_value(&self) -> FenceValue {
        self.backend.timeline().completed_value()
    }

    pub fn is_complete(&self, value: FenceValue) -> bool {
        self.backend.timeline().is_complete(value)
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }
}

impl<B: Backend> Drop for FrameSynchronizer<B> {
    /// Queues a final signal so everything submitted retires, without waiting for it.
    ///
    /// Await [`FrameSynchronizer::wait_gpu`] first if the GPU must be idle when this returns.
    fn drop(&mut self) {
        let value = *self.current_fence.get_mut();
        self.backend.signal(value);
        logwise::info_sync!(
            "FrameSynchronizer teardown: signaled {value}, completed {completed}",
            value = value,
            completed = self.backend.timeline().completed_value()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HalConfig;
    use crate::imp::soft::ExecutedCommand;
    use crate::imp::{CommandBuffer, SoftBackend};

    fn sync() -> FrameSynchronizer<SoftBackend> {
        let context = Context::new(
            SoftBackend::new(),
            HalConfig {
                command_list_pool_size: 8,
                ..HalConfig::default()
            },
        )
        .unwrap();
        FrameSynchronizer::new(&context).unwrap()
    }

    #[test]
    fn fence_values_increase() {
        let sync = sync();
        assert_eq!(sync.current_fence_value(), 1);
        assert_eq!(sync.signal_current_fence(), 1);
        assert_eq!(sync.signal_current_fence(), 2);
        assert_eq!(sync.current_fence_value(), 3);
        assert_eq!(sync.completed_fence_value(), 2);
    }

    #[test]
    fn list_is_tagged_with_next_signal() {
        let sync = sync();
        test_executors::sleep_on(async {
            let cmd = sync.alloc_cmd_list().await.unwrap();
            assert_eq!(sync.execute_command_list(cmd).unwrap(), 1);
            let signaled = sync.signal_current_fence();
            assert_eq!(signaled, 1);
            let cmd = sync.alloc_cmd_list().await.unwrap();
            assert_eq!(sync.execute_command_list(cmd).unwrap(), 2);
        });
    }

    #[test]
    fn wait_gpu_flushes() {
        let sync = sync();
        test_executors::sleep_on(async {
            let mut cmd = sync.alloc_cmd_list().await.unwrap();
            cmd.insert_marker("work");
            sync.execute_command_list(cmd).unwrap();
            sync.wait_gpu().await;
        });
        assert!(sync.is_complete(1));
        let executed = sync.backend().executed();
        assert_eq!(executed.last(), Some(&ExecutedCommand::Signal(1)));
    }

    #[test]
    fn wrapping_within_a_frame_signals_the_pending_fence() {
        let sync = sync();
        let fences = test_executors::sleep_on(async {
            let mut fences = Vec::new();
            for _ in 0..sync.pool_size() + 1 {
                let cmd = sync.alloc_cmd_list().await.unwrap();
                fences.push((cmd.index(), sync.execute_command_list(cmd).unwrap()));
            }
            fences
        });
        assert!(fences[..8].iter().all(|&(_, fence)| fence == 1));
        assert_eq!(fences[8], (0, 2));
        assert_eq!(sync.completed_fence_value(), 1);
        assert_eq!(sync.current_fence_value(), 2);
    }
}
