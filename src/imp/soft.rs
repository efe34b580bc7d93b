// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
A deterministic CPU device.

The soft queue executes submissions in order.  Normally it executes them inline, inside
[`Backend::submit`] / [`Backend::signal`], so a signaled fence is complete by the time the call
returns.  [`SoftBackend::hold`] stops execution, modelling a GPU that is still busy; submissions
pile up until [`SoftBackend::release`].

What the queue executed is recorded and can be inspected with [`SoftBackend::executed`].
The log keeps the most recent [`EXECUTED_LOG_LIMIT`] entries; older ones are dropped.
Ray dispatches read their shader records back out of simulated GPU memory at execution time,
so what's recorded is what a real GPU would have consumed.
*/

mod memory;
mod pipeline;

pub use memory::SoftMappedBuffer;
pub use pipeline::SoftPipeline;

use crate::imp::descriptor_table::{DescriptorTable, synthetic_start};
use crate::imp::{
    Backend, CommandBuffer, DispatchRaysDesc, Error, FenceValue, GpuAddress, PipelineDesc,
    RayTracingLimits, TableRange, Timeline,
};
use memory::AddressSpace;
use std::collections::VecDeque;
use std::sync::Mutex;

/// How many executed commands the log keeps.
pub const EXECUTED_LOG_LIMIT: usize = 4096;

/// A command recorded into a [`SoftCommandBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
enum SoftCommand {
    Marker(String),
    DispatchRays {
        desc: DispatchRaysDesc,
        global_arguments: Vec<u64>,
    },
}

#[derive(Debug)]
pub struct SoftCommandBuffer {
    label: String,
    commands: Vec<SoftCommand>,
    recording: bool,
}

impl SoftCommandBuffer {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of commands recorded since the last reset.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }
}

impl CommandBuffer for SoftCommandBuffer {
    fn reset(&mut self) -> Result<(), Error> {
        self.commands.clear();
        self.recording = true;
        Ok(())
    }

    fn insert_marker(&mut self, label: &str) {
        self.commands.push(SoftCommand::Marker(label.to_string()));
    }
}

/// One shader record as the GPU read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSnapshot {
    pub identifier: Vec<u8>,
    /// Every 8-byte word after the identifier, up to the record stride.
    pub arguments: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub global_arguments: Vec<u64>,
    pub ray_generation: RecordSnapshot,
    pub miss: Vec<RecordSnapshot>,
    pub hit_groups: Vec<RecordSnapshot>,
}

/// Something the soft queue executed, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExecutedCommand {
    Marker { list: String, label: String },
    Signal(FenceValue),
    Present,
    DispatchRays(DispatchRecord),
    /// A dispatch referenced memory outside any live buffer.
    PageFault { address: GpuAddress },
}

#[derive(Debug)]
enum Submission {
    Commands {
        label: String,
        commands: Vec<SoftCommand>,
    },
    Signal(FenceValue),
    Present,
}

#[derive(Debug)]
struct QueueState {
    held: bool,
    pending: VecDeque<Submission>,
    executed: VecDeque<ExecutedCommand>,
}

impl QueueState {
    fn log(&mut self, command: ExecutedCommand) {
        if self.executed.len() == EXECUTED_LOG_LIMIT {
            self.executed.pop_front();
        }
        self.executed.push_back(command);
    }
}

#[derive(Debug)]
pub struct SoftBackend {
    timeline: Timeline,
    queue: Mutex<QueueState>,
    memory: Mutex<AddressSpace>,
    limits: RayTracingLimits,
    next_heap_base: Mutex<u64>,
}

impl Default for SoftBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftBackend {
    pub fn new() -> Self {
        logwise::info_sync!("Creating soft backend");
        SoftBackend {
            timeline: Timeline::new(),
            queue: Mutex::new(QueueState {
                held: false,
                pending: VecDeque::new(),
                executed: VecDeque::new(),
            }),
            memory: Mutex::new(AddressSpace::new()),
            limits: RayTracingLimits {
                identifier_size: pipeline::IDENTIFIER_SIZE as u32,
                ..RayTracingLimits::DXR
            },
            next_heap_base: Mutex::new(0x10_0000),
        }
    }

    /// Stops the queue.  Work submitted from now on waits for [`SoftBackend::release`].
    pub fn hold(&self) {
        self.queue.lock().unwrap().held = true;
    }

    /// Restarts the queue and executes everything that piled up, in submission order.
    pub fn release(&self) {
        let mut queue = self.queue.lock().unwrap();
        queue.held = false;
        self.drain(&mut queue);
    }

    /// Submissions waiting on a held queue.
    pub fn pending_submissions(&self) -> usize {
        self.queue.lock().unwrap().pending.len()
    }

    /// The executed log, oldest first.
    pub fn executed(&self) -> Vec<ExecutedCommand> {
        self.queue.lock().unwrap().executed.iter().cloned().collect()
    }

    /// Returns and clears the executed log.
    pub fn take_executed(&self) -> Vec<ExecutedCommand> {
        std::mem::take(&mut self.queue.lock().unwrap().executed).into()
    }

    /// Reads simulated GPU memory the way a shader would see it.
    ///
    /// `None` if the range is not inside one live buffer.
    pub fn read_gpu_memory(&self, address: GpuAddress, len: u64) -> Option<Vec<u8>> {
        self.memory.lock().unwrap().read(address, len)
    }

    fn enqueue(&self, submission: Submission) {
        let mut queue = self.queue.lock().unwrap();
        queue.pending.push_back(submission);
        if !queue.held {
            self.drain(&mut queue);
        }
    }

    fn drain(&self, queue: &mut QueueState) {
        while let Some(submission) = queue.pending.pop_front() {
            match submission {
                Submission::Commands { label, commands } => {
                    for command in commands {
                        let executed = self.execute(&label, command);
                        queue.log(executed);
                    }
                }
                Submission::Signal(value) => {
                    queue.log(ExecutedCommand::Signal(value));
                    self.timeline.complete(value);
                }
                Submission::Present => queue.log(ExecutedCommand::Present),
            }
        }
    }

    fn execute(&self, list: &str, command: SoftCommand) -> ExecutedCommand {
        match command {
            SoftCommand::Marker(label) => ExecutedCommand::Marker {
                list: list.to_string(),
                label,
            },
            SoftCommand::DispatchRays {
                desc,
                global_arguments,
            } => match self.read_dispatch(&desc, global_arguments) {
                Ok(record) => ExecutedCommand::DispatchRays(record),
                Err(address) => {
                    logwise::error_sync!(
                        "soft dispatch faulted at {address}",
                        address = address.0
                    );
                    ExecutedCommand::PageFault { address }
                }
            },
        }
    }

    fn read_dispatch(
        &self,
        desc: &DispatchRaysDesc,
        global_arguments: Vec<u64>,
    ) -> Result<DispatchRecord, GpuAddress> {
        let mut ray_generation = self.read_records(&desc.ray_generation)?;
        let ray_generation = ray_generation.pop().ok_or(desc.ray_generation.start)?;
        Ok(DispatchRecord {
            width: desc.width,
            height: desc.height,
            depth: desc.depth,
            global_arguments,
            ray_generation,
            miss: self.read_records(&desc.miss)?,
            hit_groups: self.read_records(&desc.hit_group)?,
        })
    }

    fn read_records(&self, range: &TableRange) -> Result<Vec<RecordSnapshot>, GpuAddress> {
        if range.size == 0 {
            return Ok(Vec::new());
        }
        if range.stride == 0 {
            return Err(range.start);
        }
        let bytes = self
            .read_gpu_memory(range.start, range.size)
            .ok_or(range.start)?;
        let identifier_size = self.limits.identifier_size as usize;
        Ok(bytes
            .chunks_exact(range.stride as usize)
            .map(|record| {
                let (identifier, rest) = record.split_at(identifier_size.min(record.len()));
                RecordSnapshot {
                    identifier: identifier.to_vec(),
                    arguments: rest
                        .chunks_exact(8)
                        .map(|w| {
                            let mut word = [0u8; 8];
                            word.copy_from_slice(w);
                            u64::from_le_bytes(word)
                        })
                        .collect(),
                }
            })
            .collect())
    }
}

impl Backend for SoftBackend {
    type CommandBuffer = SoftCommandBuffer;
    type DescriptorHeap = DescriptorTable;
    type MappedBuffer = SoftMappedBuffer;
    type Pipeline = SoftPipeline;

    const NAME: &'static str = "soft";

    fn create_command_buffer(&self, label: &str) -> Result<Self::CommandBuffer, Error> {
        Ok(SoftCommandBuffer {
            label: label.to_string(),
            commands: Vec::new(),
            recording: false,
        })
    }

    fn submit(&self, cmd: &mut Self::CommandBuffer) -> Result<(), Error> {
        if !cmd.recording {
            return Err(Error::NotRecording);
        }
        cmd.recording = false;
        self.enqueue(Submission::Commands {
            label: cmd.label.clone(),
            commands: std::mem::take(&mut cmd.commands),
        });
        Ok(())
    }

    fn signal(&self, value: FenceValue) {
        self.enqueue(Submission::Signal(value));
    }

    fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    fn create_descriptor_heap(
        &self,
        capacity: u32,
        label: &str,
    ) -> Result<Self::DescriptorHeap, Error> {
        let mut next = self.next_heap_base.lock().unwrap();
        let base = *next;
        *next += (capacity as u64 + 1) * crate::imp::descriptor_table::DESCRIPTOR_STRIDE as u64;
        //gpu handles live in their own range so a mixup with cpu handles is visible
        Ok(DescriptorTable::new(
            capacity,
            synthetic_start(base, base | 0x8000_0000_0000),
            label,
        ))
    }

    fn create_mapped_buffer(&self, size: u64, label: &str) -> Result<Self::MappedBuffer, Error> {
        if usize::try_from(size).is_err() {
            return Err(Error::Creation(format!("{label}: {size} bytes")));
        }
        let (address, block) = self.memory.lock().unwrap().allocate(size);
        Ok(SoftMappedBuffer::new(block, address, label))
    }

    fn flush_mapped(&self, _buffer: &Self::MappedBuffer, _offset: u64, _len: u64) {
        //coherent
    }

    fn ray_tracing_limits(&self) -> RayTracingLimits {
        self.limits
    }

    fn create_ray_tracing_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<Self::Pipeline, Error> {
        SoftPipeline::build(desc)
    }

    fn shader_identifier<'p>(&self, pipeline: &'p Self::Pipeline, export: &str) -> Option<&'p [u8]> {
        pipeline.identifier(export)
    }

    fn record_dispatch_rays(
        &self,
        cmd: &mut Self::CommandBuffer,
        pipeline: &Self::Pipeline,
        global_arguments: &[u64],
        desc: &DispatchRaysDesc,
    ) -> Result<(), Error> {
        if !cmd.recording {
            return Err(Error::NotRecording);
        }
        if global_arguments.len() != pipeline.global_arguments().len() {
            return Err(Error::Pipeline(format!(
                "{} expects global arguments {:?}, got {} values",
                pipeline.label(),
                pipeline.global_arguments(),
                global_arguments.len()
            )));
        }
        cmd.commands.push(SoftCommand::DispatchRays {
            desc: *desc,
            global_arguments: global_arguments.to_vec(),
        });
        Ok(())
    }

    fn present(&self) -> Result<(), Error> {
        self.enqueue(Submission::Present);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imp::MappedBuffer;

    #[test]
    fn inline_execution() {
        let backend = SoftBackend::new();
        let mut cmd = backend.create_command_buffer("a").unwrap();
        assert!(matches!(backend.submit(&mut cmd), Err(Error::NotRecording)));
        cmd.reset().unwrap();
        cmd.insert_marker("hello");
        backend.submit(&mut cmd).unwrap();
        backend.signal(1);
        assert!(backend.timeline().is_complete(1));
        assert_eq!(
            backend.executed(),
            vec![
                ExecutedCommand::Marker {
                    list: "a".to_string(),
                    label: "hello".to_string()
                },
                ExecutedCommand::Signal(1)
            ]
        );
    }

    #[test]
    fn hold_and_release() {
        let backend = SoftBackend::new();
        backend.hold();
        backend.signal(1);
        backend.present().unwrap();
        backend.signal(2);
        assert_eq!(backend.pending_submissions(), 3);
        assert!(!backend.timeline().is_complete(1));
        backend.release();
        assert_eq!(backend.pending_submissions(), 0);
        assert!(backend.timeline().is_complete(2));
        assert_eq!(
            backend.take_executed(),
            vec![
                ExecutedCommand::Signal(1),
                ExecutedCommand::Present,
                ExecutedCommand::Signal(2)
            ]
        );
        assert!(backend.executed().is_empty());
    }

    #[test]
    fn executed_log_keeps_the_newest_entries() {
        let backend = SoftBackend::new();
        let frames = EXECUTED_LOG_LIMIT as u64;
        for value in 1..=frames {
            backend.present().unwrap();
            backend.signal(value);
        }
        let executed = backend.executed();
        assert_eq!(executed.len(), EXECUTED_LOG_LIMIT);
        assert_eq!(executed.last(), Some(&ExecutedCommand::Signal(frames)));
        assert_eq!(executed.first(), Some(&ExecutedCommand::Present));
        assert!(!executed.contains(&ExecutedCommand::Signal(frames / 2)));
        assert!(backend.timeline().is_complete(frames));
    }

    #[test]
    fn mapped_memory_is_gpu_visible() {
        let backend = SoftBackend::new();
        let buffer = backend.create_mapped_buffer(256, "upload").unwrap();
        unsafe {
            buffer.cpu_ptr().as_ptr().add(16).write(42);
        }
        let read = backend
            .read_gpu_memory(buffer.gpu_address().offset(16), 1)
            .unwrap();
        assert_eq!(read, vec![42]);
    }
}
