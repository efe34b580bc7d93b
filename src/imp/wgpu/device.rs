// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Adapter/device acquisition and the poll thread.

use crate::imp::Error;
use std::sync::mpsc;
use std::thread::JoinHandle;
use wgpu::{PollType, Trace};

/// Polls a device whenever it is nudged, until the nudging side goes away.
///
/// Fence callbacks only run from inside `Device::poll`, so something has to poll.
#[derive(Debug)]
struct Poller {
    nudge: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Poller {
    fn spawn(device: wgpu::Device) -> Result<Self, Error> {
        let (nudge, nudged) = mpsc::channel::<()>();
        let thread = std::thread::Builder::new()
            .name("fences_and_rings poll".to_string())
            .spawn(move || {
                //recv fails once the sender drops
                while nudged.recv().is_ok() {
                    //coalesce nudges that arrived while we were polling
                    while nudged.try_recv().is_ok() {}
                    if let Err(e) = device.poll(PollType::Wait) {
                        logwise::warn_sync!(
                            "device poll failed: {err}",
                            err = logwise::privacy::LogIt(&e)
                        );
                    }
                }
            })
            .map_err(|e| Error::Creation(format!("wgpu poll thread: {e}")))?;
        Ok(Poller {
            nudge: Some(nudge),
            thread: Some(thread),
        })
    }

    fn nudge(&self) {
        if let Some(nudge) = &self.nudge {
            let _ = nudge.send(());
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.nudge.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Device and queue, plus the thread that polls them.
#[derive(Debug)]
pub(super) struct BoundDevice {
    pub(super) device: wgpu::Device,
    pub(super) queue: wgpu::Queue,
    pub(super) adapter_name: String,
    poller: Poller,
}

impl BoundDevice {
    pub(super) async fn bind() -> Result<Self, Error> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::from_env_or_default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .map_err(|e| {
                logwise::error_sync!(
                    "request_adapter failed: {err}",
                    err = logwise::privacy::LogIt(&e)
                );
                Error::NoSuchAdapter
            })?;
        let adapter_name = adapter.get_info().name;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("fences_and_rings device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: Trace::Off,
            })
            .await
            .map_err(|e| {
                logwise::error_sync!(
                    "request_device failed: {err}",
                    err = logwise::privacy::LogIt(&e)
                );
                Error::from(e)
            })?;
        let poller = Poller::spawn(device.clone())?;
        Ok(BoundDevice {
            device,
            queue,
            adapter_name,
            poller,
        })
    }

    /// Wakes the poll thread after new work or a new fence callback.
    pub(super) fn set_needs_poll(&self) {
        self.poller.nudge();
    }
}
