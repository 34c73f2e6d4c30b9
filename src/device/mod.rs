//! Device Capability Interface
//!
//! The render graph consumes the GPU backend abstractly through the
//! traits in this module: command contexts and queues, fences, bindless
//! descriptor allocation, swap chains, and resource creation. A backend
//! implements these once; the graph never names a concrete GPU API.
//!
//! Resources cross the boundary as `Arc<dyn …>` trait objects. Identity
//! of an imported resource is pointer identity of its `Arc`, which is
//! what makes [`crate::RenderGraph`] imports idempotent.

pub mod null;

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{
    BarrierAccess, ComputePipelineDesc, GpuBufferDesc, PipelineStage, QueueType,
    RenderPipelineDesc, SamplerDesc, TextureDesc, TextureLayout, TextureSubresourceLayer,
};

// ─── Resources ────────────────────────────────────────────────────────────────

/// A GPU buffer owned by the backend.
pub trait GpuBuffer: fmt::Debug {
    fn desc(&self) -> &GpuBufferDesc;
}

/// A texture owned by the backend.
pub trait Texture: fmt::Debug {
    fn desc(&self) -> &TextureDesc;
}

/// A sampler owned by the backend.
pub trait Sampler: fmt::Debug {
    fn desc(&self) -> &SamplerDesc;
}

/// A compiled render pipeline.
pub trait RenderPipeline: fmt::Debug {
    fn desc(&self) -> &RenderPipelineDesc;
}

/// A compiled compute pipeline.
pub trait ComputePipeline: fmt::Debug {
    fn desc(&self) -> &ComputePipelineDesc;
}

/// A shared reference to any backend resource.
#[derive(Debug, Clone)]
pub enum ResourceRef {
    Buffer(Arc<dyn GpuBuffer>),
    Texture(Arc<dyn Texture>),
    Sampler(Arc<dyn Sampler>),
    RenderPipeline(Arc<dyn RenderPipeline>),
    ComputePipeline(Arc<dyn ComputePipeline>),
}

impl ResourceRef {
    /// The backend debug name of the referenced resource.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Buffer(b) => &b.desc().name,
            Self::Texture(t) => &t.desc().name,
            Self::Sampler(s) => &s.desc().name,
            Self::RenderPipeline(p) => &p.desc().name,
            Self::ComputePipeline(p) => &p.desc().name,
        }
    }

    /// Pointer identity: true when both refer to the same backend object.
    #[must_use]
    pub fn ptr_eq(&self, other: &ResourceRef) -> bool {
        match (self, other) {
            (Self::Buffer(a), Self::Buffer(b)) => Arc::ptr_eq(a, b),
            (Self::Texture(a), Self::Texture(b)) => Arc::ptr_eq(a, b),
            (Self::Sampler(a), Self::Sampler(b)) => Arc::ptr_eq(a, b),
            (Self::RenderPipeline(a), Self::RenderPipeline(b)) => Arc::ptr_eq(a, b),
            (Self::ComputePipeline(a), Self::ComputePipeline(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    #[must_use]
    pub fn as_buffer(&self) -> Option<&Arc<dyn GpuBuffer>> {
        match self {
            Self::Buffer(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_texture(&self) -> Option<&Arc<dyn Texture>> {
        match self {
            Self::Texture(t) => Some(t),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_sampler(&self) -> Option<&Arc<dyn Sampler>> {
        match self {
            Self::Sampler(s) => Some(s),
            _ => None,
        }
    }
}

// ─── Bindless ─────────────────────────────────────────────────────────────────

/// A descriptor-heap index through which shaders reach a resource
/// without binding slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindlessHandle(u32);

impl BindlessHandle {
    /// The reserved invalid slot.
    pub const INVALID: BindlessHandle = BindlessHandle(u32::MAX);

    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }
}

impl Default for BindlessHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Allocates and retires bindless descriptor slots.
pub trait BindlessAllocator {
    /// One descriptor for one element of a buffer. `write` selects a
    /// storage (UAV) view over a constant view.
    fn create_buffer_handle(
        &self,
        buffer: &Arc<dyn GpuBuffer>,
        element_index: u64,
        write: bool,
    ) -> BindlessHandle;

    fn create_texture_handle(&self, texture: &Arc<dyn Texture>, write: bool) -> BindlessHandle;

    fn create_sampler_handle(&self, sampler: &Arc<dyn Sampler>) -> BindlessHandle;

    /// Return a slot to the heap. Invalid handles are ignored.
    fn discard_handle(&self, handle: BindlessHandle);
}

// ─── Synchronization ──────────────────────────────────────────────────────────

/// A timeline fence owned by the backend.
pub trait Fence {
    fn name(&self) -> &str;

    /// The highest value the fence has reached.
    fn value(&self) -> u64;

    /// Advance the fence to `value` from the CPU timeline.
    fn signal(&self, value: u64);

    /// Block until the fence reaches `value`.
    fn wait(&self, value: u64);
}

/// A fence value a submission must wait for before starting.
#[derive(Clone)]
pub struct FenceWaitInfo {
    pub fence: Arc<dyn Fence>,
    pub value: u64,
}

/// A fence value a submission signals on completion.
#[derive(Clone)]
pub struct FenceSignalInfo {
    pub fence: Arc<dyn Fence>,
    pub value: u64,
}

// ─── Barriers ─────────────────────────────────────────────────────────────────

/// A synchronization record for one buffer.
#[derive(Debug, Clone)]
pub struct GpuBufferBarrier {
    pub src_access: BarrierAccess,
    pub dst_access: BarrierAccess,
    pub src_stage: PipelineStage,
    pub dst_stage: PipelineStage,
    pub buffer: Arc<dyn GpuBuffer>,
}

/// A synchronization and layout-transition record for one texture.
#[derive(Debug, Clone)]
pub struct TextureBarrier {
    pub src_access: BarrierAccess,
    pub dst_access: BarrierAccess,
    pub src_stage: PipelineStage,
    pub dst_stage: PipelineStage,
    pub src_layout: TextureLayout,
    pub dst_layout: TextureLayout,
    pub texture: Arc<dyn Texture>,
}

// ─── Command Recording ────────────────────────────────────────────────────────

/// Render-target configuration for `begin_rendering`.
#[derive(Debug, Clone)]
pub struct RenderingInfo {
    pub render_target: Arc<dyn Texture>,
    pub depth_stencil: Option<Arc<dyn Texture>>,
    pub clear_color: bool,
    pub clear_depth: bool,
}

/// A command recording context, affine to the caller thread.
///
/// The graph records barriers and pass scaffolding; user executor
/// closures record the actual draws, dispatches and copies. Recording
/// never blocks.
pub trait CommandContext {
    fn queue_type(&self) -> QueueType;

    /// Debug label the context was created with (the pass name).
    fn label(&self) -> &str;

    fn begin(&mut self);

    fn end(&mut self);

    fn resource_barrier(
        &mut self,
        buffer_barriers: &[GpuBufferBarrier],
        texture_barriers: &[TextureBarrier],
    );

    fn begin_rendering(&mut self, info: RenderingInfo);

    fn end_rendering(&mut self);

    fn draw(&mut self, vertex_count: u32, instance_count: u32);

    fn dispatch(&mut self, x: u32, y: u32, z: u32);

    fn copy_buffer_region(
        &mut self,
        src: &Arc<dyn GpuBuffer>,
        src_offset: u64,
        dst: &Arc<dyn GpuBuffer>,
        dst_offset: u64,
        size: u64,
    );

    fn copy_texture_region(
        &mut self,
        src: &Arc<dyn Texture>,
        src_origin: [u32; 3],
        dst: &Arc<dyn Texture>,
        dst_origin: [u32; 3],
        extent: [u32; 3],
        layer: TextureSubresourceLayer,
    );
}

/// A command queue the graph submits finished contexts to.
pub trait CommandQueue {
    fn queue_type(&self) -> QueueType;

    /// Submit a batch. The batch starts after every wait is reached and
    /// signals on completion. Contexts are consumed.
    fn submit(
        &self,
        contexts: Vec<Box<dyn CommandContext>>,
        waits: &[FenceWaitInfo],
        signals: &[FenceSignalInfo],
    );
}

// ─── Presentation ─────────────────────────────────────────────────────────────

/// The swap chain a present pass copies into.
pub trait SwapChain {
    /// Acquire the back buffer for this frame.
    fn acquire_texture_for_rendering(&self) -> Arc<dyn Texture>;
}

// ─── Device ───────────────────────────────────────────────────────────────────

/// The capability interface a backend exposes to the render graph.
pub trait Device {
    fn create_command_context(&self, queue: QueueType, name: &str) -> Box<dyn CommandContext>;

    fn command_queue(&self, queue: QueueType) -> &dyn CommandQueue;

    fn create_fence(&self, initial_value: u64, name: &str) -> Arc<dyn Fence>;

    fn bindless(&self) -> &dyn BindlessAllocator;

    fn create_gpu_buffer(&self, desc: &GpuBufferDesc) -> Result<Arc<dyn GpuBuffer>>;

    fn create_texture(&self, desc: &TextureDesc) -> Result<Arc<dyn Texture>>;

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<Arc<dyn Sampler>>;

    fn create_render_pipeline(&self, desc: &RenderPipelineDesc) -> Result<Arc<dyn RenderPipeline>>;

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc,
    ) -> Result<Arc<dyn ComputePipeline>>;

    /// Block until every queue has drained.
    fn wait_idle(&self);
}
