// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Frame bracketing.

[`FramePacer`] owns everything that is partitioned per frame slot: the descriptor rings, the
constant ring, and the fence that last retired each slot.  [`FramePacer::begin_frame`] waits until
the slot it is about to reuse has retired on the GPU and advances every ring into it;
[`FramePacer::end_frame`] presents and signals.

```
use fences_and_rings::{Context, DescriptorDomain, FramePacer, HalConfig, SoftBackend};
let context = Context::new(SoftBackend::new(), HalConfig::default()).unwrap();
let mut pacer = FramePacer::new(&context).unwrap();
test_executors::sleep_on(async {
    for _ in 0..4 {
        let frame = pacer.begin_frame().await.unwrap();
        let constants = pacer.constant_ring().alloc_constant(&[0.5f32; 4]);
        let slot = pacer.descriptor_ring(DescriptorDomain::Global).alloc_descriptor();
        pacer
            .descriptor_ring(DescriptorDomain::Global)
            .write_view(slot.handle(), &constants.view())
            .unwrap();
        let cmd = pacer.alloc_cmd_list().await.unwrap();
        pacer.execute_command_list(cmd).unwrap();
        let info = pacer.end_frame().unwrap();
        assert_eq!(info.number, frame.number());
    }
});
```
*/

use crate::config::{ConfigError, DescriptorDomain};
use crate::context::Context;
use crate::imp::{Backend, FenceValue};
use crate::rings::{ConstantRing, DescriptorHeapRegion, DescriptorRing, RingError};
use crate::sync::{CommandList, FrameSynchronizer, RetirementQueue};
use crate::sys::time::{Duration, Instant};
use std::sync::Arc;

/// The frame currently being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame {
    number: u64,
    slot: u32,
}

impl Frame {
    /// Frames since the pacer was created, starting at 0.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Which of the `frames_in_flight` ring regions this frame owns.
    pub fn slot(&self) -> u32 {
        self.slot
    }
}

/// What [`FramePacer::end_frame`] reports about the frame it closed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    pub number: u64,
    pub slot: u32,
    /// Value that retires this frame's work.
    pub fence: FenceValue,
    /// From the end of `begin_frame` to `end_frame`.
    pub cpu_time: Duration,
    /// Time `begin_frame` spent waiting for the slot to retire.
    pub wait_time: Duration,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FrameError {
    #[error(transparent)]
    Backend(#[from] crate::imp::Error),
    #[error(transparent)]
    Ring(#[from] RingError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("begin_frame called while frame {0} is open")]
    AlreadyInFrame(u64),
    #[error("end_frame called outside a frame")]
    NotInFrame,
}

#[derive(Debug)]
struct OpenFrame {
    frame: Frame,
    started: Instant,
    wait_time: Duration,
}

#[derive(Debug)]
pub struct FramePacer<B: Backend> {
    sync: Arc<FrameSynchronizer<B>>,
    heap: DescriptorHeapRegion<B>,
    global: DescriptorRing<B>,
    texture: DescriptorRing<B>,
    geometry: DescriptorRing<B>,
    constants: ConstantRing<B>,
    //fence signaled at the end of the last frame that used each slot
    slot_fences: Vec<FenceValue>,
    retirement: RetirementQueue,
    open: Option<OpenFrame>,
    next_frame: u64,
}

impl<B: Backend> FramePacer<B> {
    /// Creates the synchronizer, carves the descriptor heap into rings and maps the constant ring.
    pub fn new(context: &Context<B>) -> Result<Self, FrameError> {
        let config = context.config();
        config.validate()?;
        let frames = config.frames_in_flight;
        let sync = Arc::new(FrameSynchronizer::new(context)?);
        let heap = DescriptorHeapRegion::new(
            context,
            config.descriptor_heap_capacity() as u32,
            "shader-visible descriptors",
        )?;
        let ring = |domain: DescriptorDomain| {
            DescriptorRing::new(
                &heap,
                config.descriptors_per_frame(domain),
                frames,
                domain.debug_name(),
            )
        };
        let global = ring(DescriptorDomain::Global)?;
        let texture = ring(DescriptorDomain::Texture)?;
        let geometry = ring(DescriptorDomain::Geometry)?;
        let constants = ConstantRing::new(
            context,
            config.constant_ring_bytes_per_frame,
            frames,
            "constant ring",
        )?;
        Ok(FramePacer {
            sync,
            heap,
            global,
            texture,
            geometry,
            constants,
            slot_fences: vec![0; frames as usize],
            retirement: RetirementQueue::new(),
            open: None,
            next_frame: 0,
        })
    }

    /**
    Opens the next frame.

    Resolves once the GPU has retired the last frame that used this frame's slot, then moves every
    ring into that slot.
    */
    pub async fn begin_frame(&mut self) -> Result<Frame, FrameError> {
        if let Some(open) = &self.open {
            return Err(FrameError::AlreadyInFrame(open.frame.number));
        }
        let number = self.next_frame;
        let slot = (number % self.slot_fences.len() as u64) as u32;
        let fence = self.slot_fences[slot as usize];

        let wait_started = Instant::now();
        if !self.sync.is_complete(fence) {
            logwise::trace_sync!(
                "frame {number} waiting on slot {slot} fence {fence}",
                number = number,
                slot = slot,
                fence = fence
            );
            let _interval = logwise::perfwarn_begin!("FramePacer::begin_frame slot wait");
            self.sync.wait_fence_value(fence).await;
        }
        let wait_time = wait_started.elapsed();

        if number > 0 {
            self.global.advance();
            self.texture.advance();
            self.geometry.advance();
            self.constants.advance();
        }
        let frame = Frame { number, slot };
        self.open = Some(OpenFrame {
            frame,
            started: Instant::now(),
            wait_time,
        });
        Ok(frame)
    }

    /// Presents, then signals the fence that retires this frame's slot.
    pub fn end_frame(&mut self) -> Result<FrameInfo, FrameError> {
        let open = self.open.take().ok_or(FrameError::NotInFrame)?;
        if let Err(e) = self.sync.backend().present() {
            logwise::error_sync!("present failed: {err}", err = logwise::privacy::LogIt(&e));
            return Err(e.into());
        }
        let fence = self.sync.signal_current_fence();
        self.slot_fences[open.frame.slot as usize] = fence;
        self.retirement.collect(self.sync.completed_fence_value());
        self.next_frame += 1;
        Ok(FrameInfo {
            number: open.frame.number,
            slot: open.frame.slot,
            fence,
            cpu_time: open.started.elapsed(),
            wait_time: open.wait_time,
        })
    }

    /// The frame between `begin_frame` and `end_frame`, if any.
    pub fn current_frame(&self) -> Option<Frame> {
        self.open.as_ref().map(|o| o.frame)
    }

    pub async fn alloc_cmd_list(&self) -> Result<CommandList<B>, crate::imp::Error> {
        self.sync.alloc_cmd_list().await
    }

    /// Flushes ring writes made so far, then submits `cmd`.
    pub fn execute_command_list(&self, cmd: CommandList<B>) -> Result<FenceValue, crate::imp::Error> {
        self.constants.flush();
        self.sync.execute_command_list(cmd)
    }

    pub fn descriptor_ring(&self, domain: DescriptorDomain) -> &DescriptorRing<B> {
        match domain {
            DescriptorDomain::Global => &self.global,
            DescriptorDomain::Texture => &self.texture,
            DescriptorDomain::Geometry => &self.geometry,
        }
    }

    pub fn constant_ring(&self) -> &ConstantRing<B> {
        &self.constants
    }

    /// The heap the descriptor rings were carved from.  Its remaining slots are free for other use.
    pub fn descriptor_heap(&self) -> &DescriptorHeapRegion<B> {
        &self.heap
    }

    pub fn synchronizer(&self) -> &Arc<FrameSynchronizer<B>> {
        &self.sync
    }

    /// Keeps `object` alive until all work submitted so far has retired.
    pub fn retire<T: Send + 'static>(&self, label: &str, object: T) {
        self.retirement
            .retire(self.sync.current_fence_value(), label, object);
    }

    /// Objects waiting for the GPU before they can drop.
    pub fn pending_retirements(&self) -> usize {
        self.retirement.len()
    }

    /// Waits for the GPU to go idle and drops everything retired.
    pub async fn wait_gpu(&self) {
        self.sync.wait_gpu().await;
        self.retirement.collect(self.sync.completed_fence_value());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HalConfig;
    use crate::imp::SoftBackend;

    fn pacer() -> FramePacer<SoftBackend> {
        let config = HalConfig {
            command_list_pool_size: 16,
            global_descriptors_per_frame: 8,
            texture_descriptors_per_frame: 8,
            geometry_descriptors_per_frame: 8,
            constant_ring_bytes_per_frame: 4096,
            ..HalConfig::default()
        };
        let context = Context::new(SoftBackend::new(), config).unwrap();
        FramePacer::new(&context).unwrap()
    }

    #[test]
    fn bracketing_misuse() {
        let mut pacer = pacer();
        assert!(matches!(pacer.end_frame(), Err(FrameError::NotInFrame)));
        test_executors::sleep_on(async {
            pacer.begin_frame().await.unwrap();
            assert!(matches!(
                pacer.begin_frame().await,
                Err(FrameError::AlreadyInFrame(0))
            ));
        });
        assert!(pacer.end_frame().is_ok());
    }

    #[test]
    fn slots_cycle_with_rings() {
        let mut pacer = pacer();
        test_executors::sleep_on(async {
            for n in 0..7u64 {
                let frame = pacer.begin_frame().await.unwrap();
                assert_eq!(frame.number(), n);
                assert_eq!(frame.slot(), (n % 3) as u32);
                assert_eq!(pacer.constant_ring().frame_index(), frame.slot());
                assert_eq!(
                    pacer.descriptor_ring(DescriptorDomain::Texture).frame_index(),
                    frame.slot()
                );
                let info = pacer.end_frame().unwrap();
                assert_eq!(info.fence, n + 1);
            }
        });
    }

    #[test]
    fn retired_objects_drop_after_their_fence() {
        let mut pacer = pacer();
        let marker = Arc::new(());
        pacer.synchronizer().backend().hold();
        test_executors::sleep_on(async {
            pacer.begin_frame().await.unwrap();
            pacer.retire("marker", marker.clone());
            pacer.end_frame().unwrap();
        });
        assert_eq!(pacer.pending_retirements(), 1);
        assert_eq!(Arc::strong_count(&marker), 2);
        pacer.synchronizer().backend().release();
        test_executors::sleep_on(pacer.wait_gpu());
        assert_eq!(pacer.pending_retirements(), 0);
        assert_eq!(Arc::strong_count(&marker), 1);
    }
}
