//! Null Recording Backend
//!
//! A headless [`Device`] implementation that journals every recorded
//! command and completes submissions immediately. It backs the crate's
//! test suite and lets applications run the full declare / compile /
//! execute cycle without a GPU.
//!
//! # Behavior
//!
//! - Command contexts append [`RecordedCommand`]s to a per-context
//!   journal; `submit` snapshots them into a [`Submission`] entry.
//! - Submissions complete synchronously: every signal fence advances to
//!   its signal value before `submit` returns.
//! - The bindless allocator hands out monotonically increasing slots and
//!   tracks the live set, so descriptor-lifetime behavior is observable.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use super::{
    BindlessAllocator, BindlessHandle, CommandContext, CommandQueue, ComputePipeline, Device,
    Fence, FenceSignalInfo, FenceWaitInfo, GpuBuffer, GpuBufferBarrier, RenderPipeline,
    RenderingInfo, Sampler, SwapChain, Texture, TextureBarrier,
};
use crate::error::Result;
use crate::types::{
    ComputePipelineDesc, GpuBufferDesc, PerQueue, QueueType, RenderPipelineDesc, SamplerDesc,
    TextureDesc, TextureSubresourceLayer,
};

// ─── Recorded State ───────────────────────────────────────────────────────────

/// One command as recorded into a null context.
#[derive(Debug, Clone)]
pub enum RecordedCommand {
    Begin,
    End,
    BufferBarrier(GpuBufferBarrier),
    TextureBarrier(TextureBarrier),
    BeginRendering {
        render_target: String,
        depth_stencil: Option<String>,
        clear_color: bool,
        clear_depth: bool,
    },
    EndRendering,
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyBufferRegion {
        src: String,
        dst: String,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    },
    CopyTextureRegion {
        src: String,
        dst: String,
        extent: [u32; 3],
    },
}

/// A context snapshot taken at submission time.
#[derive(Debug, Clone)]
pub struct RecordedContext {
    pub label: String,
    pub commands: Vec<RecordedCommand>,
}

impl RecordedContext {
    /// The texture barriers in recording order.
    #[must_use]
    pub fn texture_barriers(&self) -> Vec<&TextureBarrier> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::TextureBarrier(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    /// The buffer barriers in recording order.
    #[must_use]
    pub fn buffer_barriers(&self) -> Vec<&GpuBufferBarrier> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BufferBarrier(b) => Some(b),
                _ => None,
            })
            .collect()
    }
}

/// One `submit` call as observed by a null queue.
#[derive(Debug, Clone)]
pub struct Submission {
    pub queue: QueueType,
    pub contexts: Vec<RecordedContext>,
    /// `(fence name, value)` pairs waited on before the batch starts.
    pub waits: Vec<(String, u64)>,
    /// `(fence name, value)` pairs signalled on completion.
    pub signals: Vec<(String, u64)>,
}

// ─── Resources ────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct NullBuffer {
    desc: GpuBufferDesc,
}

impl GpuBuffer for NullBuffer {
    fn desc(&self) -> &GpuBufferDesc {
        &self.desc
    }
}

#[derive(Debug)]
struct NullTexture {
    desc: TextureDesc,
}

impl Texture for NullTexture {
    fn desc(&self) -> &TextureDesc {
        &self.desc
    }
}

#[derive(Debug)]
struct NullSampler {
    desc: SamplerDesc,
}

impl Sampler for NullSampler {
    fn desc(&self) -> &SamplerDesc {
        &self.desc
    }
}

#[derive(Debug)]
struct NullRenderPipeline {
    desc: RenderPipelineDesc,
}

impl RenderPipeline for NullRenderPipeline {
    fn desc(&self) -> &RenderPipelineDesc {
        &self.desc
    }
}

#[derive(Debug)]
struct NullComputePipeline {
    desc: ComputePipelineDesc,
}

impl ComputePipeline for NullComputePipeline {
    fn desc(&self) -> &ComputePipelineDesc {
        &self.desc
    }
}

// ─── Fence ────────────────────────────────────────────────────────────────────

struct NullFence {
    name: String,
    value: Mutex<u64>,
}

impl Fence for NullFence {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> u64 {
        *self.value.lock()
    }

    fn signal(&self, value: u64) {
        let mut current = self.value.lock();
        if value > *current {
            *current = value;
        }
    }

    fn wait(&self, value: u64) {
        // Submissions complete synchronously, so an unreached value means
        // the caller waits on something that was never submitted.
        if *self.value.lock() < value {
            log::warn!(
                "fence `{}` waited for {value} but only reached {}",
                self.name,
                *self.value.lock()
            );
        }
    }
}

// ─── Command Context ──────────────────────────────────────────────────────────

struct NullCommandContext {
    queue: QueueType,
    label: String,
    commands: Arc<Mutex<Vec<RecordedCommand>>>,
}

impl CommandContext for NullCommandContext {
    fn queue_type(&self) -> QueueType {
        self.queue
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn begin(&mut self) {
        self.commands.lock().push(RecordedCommand::Begin);
    }

    fn end(&mut self) {
        self.commands.lock().push(RecordedCommand::End);
    }

    fn resource_barrier(
        &mut self,
        buffer_barriers: &[GpuBufferBarrier],
        texture_barriers: &[TextureBarrier],
    ) {
        let mut commands = self.commands.lock();
        for barrier in buffer_barriers {
            commands.push(RecordedCommand::BufferBarrier(barrier.clone()));
        }
        for barrier in texture_barriers {
            commands.push(RecordedCommand::TextureBarrier(barrier.clone()));
        }
    }

    fn begin_rendering(&mut self, info: RenderingInfo) {
        self.commands.lock().push(RecordedCommand::BeginRendering {
            render_target: info.render_target.desc().name.clone(),
            depth_stencil: info.depth_stencil.map(|t| t.desc().name.clone()),
            clear_color: info.clear_color,
            clear_depth: info.clear_depth,
        });
    }

    fn end_rendering(&mut self) {
        self.commands.lock().push(RecordedCommand::EndRendering);
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.commands.lock().push(RecordedCommand::Draw {
            vertex_count,
            instance_count,
        });
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.commands
            .lock()
            .push(RecordedCommand::Dispatch { x, y, z });
    }

    fn copy_buffer_region(
        &mut self,
        src: &Arc<dyn GpuBuffer>,
        src_offset: u64,
        dst: &Arc<dyn GpuBuffer>,
        dst_offset: u64,
        size: u64,
    ) {
        self.commands.lock().push(RecordedCommand::CopyBufferRegion {
            src: src.desc().name.clone(),
            dst: dst.desc().name.clone(),
            src_offset,
            dst_offset,
            size,
        });
    }

    fn copy_texture_region(
        &mut self,
        src: &Arc<dyn Texture>,
        _src_origin: [u32; 3],
        dst: &Arc<dyn Texture>,
        _dst_origin: [u32; 3],
        extent: [u32; 3],
        _layer: TextureSubresourceLayer,
    ) {
        self.commands.lock().push(RecordedCommand::CopyTextureRegion {
            src: src.desc().name.clone(),
            dst: dst.desc().name.clone(),
            extent,
        });
    }
}

// ─── Queue ────────────────────────────────────────────────────────────────────

struct NullQueue {
    queue: QueueType,
    journal: Arc<Mutex<Vec<Submission>>>,
    context_registry: Arc<Mutex<Vec<(String, Arc<Mutex<Vec<RecordedCommand>>>)>>>,
}

impl CommandQueue for NullQueue {
    fn queue_type(&self) -> QueueType {
        self.queue
    }

    fn submit(
        &self,
        contexts: Vec<Box<dyn CommandContext>>,
        waits: &[FenceWaitInfo],
        signals: &[FenceSignalInfo],
    ) {
        let registry = self.context_registry.lock();
        let snapshot = contexts
            .iter()
            .map(|ctx| {
                let commands = registry
                    .iter()
                    .rev()
                    .find(|(label, _)| label == ctx.label())
                    .map(|(_, commands)| commands.lock().clone())
                    .unwrap_or_default();
                RecordedContext {
                    label: ctx.label().to_owned(),
                    commands,
                }
            })
            .collect();
        drop(registry);

        self.journal.lock().push(Submission {
            queue: self.queue,
            contexts: snapshot,
            waits: waits
                .iter()
                .map(|w| (w.fence.name().to_owned(), w.value))
                .collect(),
            signals: signals
                .iter()
                .map(|s| (s.fence.name().to_owned(), s.value))
                .collect(),
        });

        // Work completes synchronously.
        for signal in signals {
            signal.fence.signal(signal.value);
        }
    }
}

// ─── Bindless ─────────────────────────────────────────────────────────────────

struct NullBindless {
    next: Mutex<u32>,
    live: Mutex<FxHashSet<u32>>,
}

impl NullBindless {
    fn allocate(&self) -> BindlessHandle {
        let mut next = self.next.lock();
        let slot = *next;
        *next += 1;
        self.live.lock().insert(slot);
        BindlessHandle::new(slot)
    }
}

impl BindlessAllocator for NullBindless {
    fn create_buffer_handle(
        &self,
        _buffer: &Arc<dyn GpuBuffer>,
        _element_index: u64,
        _write: bool,
    ) -> BindlessHandle {
        self.allocate()
    }

    fn create_texture_handle(&self, _texture: &Arc<dyn Texture>, _write: bool) -> BindlessHandle {
        self.allocate()
    }

    fn create_sampler_handle(&self, _sampler: &Arc<dyn Sampler>) -> BindlessHandle {
        self.allocate()
    }

    fn discard_handle(&self, handle: BindlessHandle) {
        if handle.is_valid() {
            self.live.lock().remove(&handle.index());
        }
    }
}

// ─── Device ───────────────────────────────────────────────────────────────────

/// A headless recording device.
pub struct NullDevice {
    queues: PerQueue<NullQueue>,
    bindless: NullBindless,
    fences: Mutex<Vec<Arc<NullFence>>>,
    journal: Arc<Mutex<Vec<Submission>>>,
    context_registry: Arc<Mutex<Vec<(String, Arc<Mutex<Vec<RecordedCommand>>>)>>>,
    created_resources: Mutex<Vec<String>>,
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl NullDevice {
    #[must_use]
    pub fn new() -> Self {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let context_registry = Arc::new(Mutex::new(Vec::new()));
        let queue = |queue| NullQueue {
            queue,
            journal: Arc::clone(&journal),
            context_registry: Arc::clone(&context_registry),
        };
        Self {
            queues: PerQueue {
                graphics: queue(QueueType::Graphics),
                compute: queue(QueueType::Compute),
                copy: queue(QueueType::Copy),
            },
            bindless: NullBindless {
                next: Mutex::new(0),
                live: Mutex::new(FxHashSet::default()),
            },
            fences: Mutex::new(Vec::new()),
            journal,
            context_registry,
            created_resources: Mutex::new(Vec::new()),
        }
    }

    // ── Inspection ─────────────────────────────────────────────────────────

    /// Every submission observed so far, across all queues, in order.
    #[must_use]
    pub fn submissions(&self) -> Vec<Submission> {
        self.journal.lock().clone()
    }

    /// The current value of a fence created through this device.
    #[must_use]
    pub fn fence_value(&self, name: &str) -> Option<u64> {
        self.fences
            .lock()
            .iter()
            .find(|f| f.name == name)
            .map(|f| *f.value.lock())
    }

    /// Number of bindless slots currently allocated and not discarded.
    #[must_use]
    pub fn live_bindless_count(&self) -> usize {
        self.bindless.live.lock().len()
    }

    /// Total bindless slots ever allocated.
    #[must_use]
    pub fn total_bindless_count(&self) -> usize {
        *self.bindless.next.lock() as usize
    }

    /// Names of resources materialized through the `create_*` calls, in
    /// creation order.
    #[must_use]
    pub fn created_resource_names(&self) -> Vec<String> {
        self.created_resources.lock().clone()
    }
}

impl Device for NullDevice {
    fn create_command_context(&self, queue: QueueType, name: &str) -> Box<dyn CommandContext> {
        let commands = Arc::new(Mutex::new(Vec::new()));
        self.context_registry
            .lock()
            .push((name.to_owned(), Arc::clone(&commands)));
        Box::new(NullCommandContext {
            queue,
            label: name.to_owned(),
            commands,
        })
    }

    fn command_queue(&self, queue: QueueType) -> &dyn CommandQueue {
        self.queues.get(queue)
    }

    fn create_fence(&self, initial_value: u64, name: &str) -> Arc<dyn Fence> {
        let fence = Arc::new(NullFence {
            name: name.to_owned(),
            value: Mutex::new(initial_value),
        });
        self.fences.lock().push(Arc::clone(&fence));
        fence
    }

    fn bindless(&self) -> &dyn BindlessAllocator {
        &self.bindless
    }

    fn create_gpu_buffer(&self, desc: &GpuBufferDesc) -> Result<Arc<dyn GpuBuffer>> {
        self.created_resources.lock().push(desc.name.clone());
        Ok(Arc::new(NullBuffer { desc: desc.clone() }))
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<Arc<dyn Texture>> {
        self.created_resources.lock().push(desc.name.clone());
        Ok(Arc::new(NullTexture { desc: desc.clone() }))
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<Arc<dyn Sampler>> {
        self.created_resources.lock().push(desc.name.clone());
        Ok(Arc::new(NullSampler { desc: desc.clone() }))
    }

    fn create_render_pipeline(&self, desc: &RenderPipelineDesc) -> Result<Arc<dyn RenderPipeline>> {
        self.created_resources.lock().push(desc.name.clone());
        Ok(Arc::new(NullRenderPipeline { desc: desc.clone() }))
    }

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc,
    ) -> Result<Arc<dyn ComputePipeline>> {
        self.created_resources.lock().push(desc.name.clone());
        Ok(Arc::new(NullComputePipeline { desc: desc.clone() }))
    }

    fn wait_idle(&self) {}
}

/// A swap chain backed by a single null texture.
pub struct NullSwapChain {
    back_buffer: Arc<dyn Texture>,
}

impl NullSwapChain {
    #[must_use]
    pub fn new(desc: TextureDesc) -> Self {
        Self {
            back_buffer: Arc::new(NullTexture { desc }),
        }
    }
}

impl SwapChain for NullSwapChain {
    fn acquire_texture_for_rendering(&self) -> Arc<dyn Texture> {
        self.back_buffer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_advances_signal_fence() {
        let device = NullDevice::new();
        let fence = device.create_fence(0, "fence");
        let mut ctx = device.create_command_context(QueueType::Graphics, "pass");
        ctx.begin();
        ctx.end();
        device.command_queue(QueueType::Graphics).submit(
            vec![ctx],
            &[],
            &[FenceSignalInfo {
                fence: Arc::clone(&fence),
                value: 3,
            }],
        );
        assert_eq!(fence.value(), 3);
        assert_eq!(device.fence_value("fence"), Some(3));

        let submissions = device.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].contexts[0].label, "pass");
        assert_eq!(submissions[0].contexts[0].commands.len(), 2);
    }

    #[test]
    fn test_bindless_live_tracking() {
        let device = NullDevice::new();
        let sampler = device
            .create_sampler(&SamplerDesc {
                name: "s".into(),
                ..SamplerDesc::default()
            })
            .unwrap();
        let handle = device.bindless().create_sampler_handle(&sampler);
        assert_eq!(device.live_bindless_count(), 1);
        device.bindless().discard_handle(handle);
        assert_eq!(device.live_bindless_count(), 0);
    }
}
