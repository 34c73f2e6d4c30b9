//! Graph Node Storage
//!
//! The graph arena holds two node species: resource nodes (one per
//! *version* of an underlying resource) and pass nodes (one per declared
//! unit of GPU work). Edges are plain handles, never owning references —
//! version chains and move aliases are index links, so nothing in the
//! arena owns a cycle and retirement only ever drops indices.

use std::sync::Arc;

use smallvec::SmallVec;

use super::handle::{
    ComputePipelineHandle, GpuBufferHandle, NodeKind, RenderPipelineHandle, SamplerHandle,
    TextureHandle,
};
use super::helper::ResourceHelper;
use crate::device::{BindlessHandle, CommandContext, ResourceRef, SwapChain};
use crate::types::{
    BarrierAccess, GpuBufferUsage, PipelineStage, QueueType, ResourceDesc, TextureLayout,
    TextureSubresourceLayer, TextureUsage,
};

// ─── Resource Backing ─────────────────────────────────────────────────────────

/// What an underlying resource slot is backed by.
///
/// Imported resources arrive materialized; created resources carry only
/// their description until the compiler materializes the retained ones.
pub(crate) enum ResourceBacking {
    External(ResourceRef),
    Transient(ResourceDesc),
    Materialized(ResourceRef),
}

impl ResourceBacking {
    pub(crate) fn name(&self) -> &str {
        match self {
            Self::External(r) | Self::Materialized(r) => r.name(),
            Self::Transient(d) => d.name(),
        }
    }

    /// The concrete resource, if already materialized.
    pub(crate) fn resolved(&self) -> Option<&ResourceRef> {
        match self {
            Self::External(r) | Self::Materialized(r) => Some(r),
            Self::Transient(_) => None,
        }
    }

    pub(crate) fn buffer_usages(&self) -> Option<GpuBufferUsage> {
        match self {
            Self::External(ResourceRef::Buffer(b)) | Self::Materialized(ResourceRef::Buffer(b)) => {
                Some(b.desc().usages)
            }
            Self::Transient(ResourceDesc::Buffer(d)) => Some(d.usages),
            _ => None,
        }
    }

    pub(crate) fn texture_usages(&self) -> Option<TextureUsage> {
        match self {
            Self::External(ResourceRef::Texture(t))
            | Self::Materialized(ResourceRef::Texture(t)) => Some(t.desc().usages),
            Self::Transient(ResourceDesc::Texture(d)) => Some(d.usages),
            _ => None,
        }
    }

    pub(crate) fn buffer_element_count(&self) -> Option<u64> {
        match self {
            Self::External(ResourceRef::Buffer(b)) | Self::Materialized(ResourceRef::Buffer(b)) => {
                Some(b.desc().element_count)
            }
            Self::Transient(ResourceDesc::Buffer(d)) => Some(d.element_count),
            _ => None,
        }
    }
}

// ─── Resource Node ────────────────────────────────────────────────────────────

/// One version of one underlying resource.
pub(crate) struct ResourceNode {
    pub kind: NodeKind,
    /// Blackboard name; empty when anonymous.
    pub name: String,
    /// Index into the graph's backing-slot table. Shared by every
    /// version (and move alias) of the same underlying resource.
    pub slot: u32,
    pub version: u32,
    /// Previous version in this chain, if any.
    pub prev_version: Option<u32>,
    /// Next version in this chain; `None` marks the newest version.
    pub next_version: Option<u32>,
    /// The pass whose write minted this version. Set on creation, never
    /// changed.
    pub writer: Option<u32>,
    /// Passes reading this version.
    pub readers: SmallVec<[u32; 4]>,
    /// Move-alias target node, if this version was moved from.
    pub move_target: Option<u32>,
}

impl ResourceNode {
    pub(crate) fn new(kind: NodeKind, name: impl Into<String>, slot: u32) -> Self {
        Self {
            kind,
            name: name.into(),
            slot,
            version: 0,
            prev_version: None,
            next_version: None,
            writer: None,
            readers: SmallVec::new(),
            move_target: None,
        }
    }

    #[inline]
    pub(crate) fn is_newest(&self) -> bool {
        self.next_version.is_none()
    }
}

// ─── Pass Edges ───────────────────────────────────────────────────────────────

/// A buffer read or write declared by a pass.
pub(crate) struct GpuBufferEdge {
    /// The version node the edge refers to (the minted node for writes).
    pub handle: GpuBufferHandle,
    pub write: bool,
    pub access: BarrierAccess,
    pub stage: PipelineStage,
    pub element_offset: u64,
    pub element_count: u64,
    /// One descriptor per element, created at execute time.
    pub bindless: SmallVec<[BindlessHandle; 4]>,
}

/// A texture read or write declared by a pass.
pub(crate) struct TextureEdge {
    pub handle: TextureHandle,
    pub write: bool,
    pub access: BarrierAccess,
    pub stage: PipelineStage,
    pub layout: TextureLayout,
    pub layer: TextureSubresourceLayer,
    pub bindless: BindlessHandle,
}

/// A sampler used by a pass.
pub(crate) struct SamplerEdge {
    pub handle: SamplerHandle,
    pub bindless: BindlessHandle,
}

// ─── Barrier Records ──────────────────────────────────────────────────────────

// Handle-based so the records survive until the executor resolves them
// against materialized resources.

pub(crate) struct BufferBarrierRecord {
    pub src_access: BarrierAccess,
    pub dst_access: BarrierAccess,
    pub src_stage: PipelineStage,
    pub dst_stage: PipelineStage,
    pub handle: GpuBufferHandle,
}

pub(crate) struct TextureBarrierRecord {
    pub src_access: BarrierAccess,
    pub dst_access: BarrierAccess,
    pub src_stage: PipelineStage,
    pub dst_stage: PipelineStage,
    pub src_layout: TextureLayout,
    pub dst_layout: TextureLayout,
    pub handle: TextureHandle,
}

// ─── Pass Node ────────────────────────────────────────────────────────────────

/// The executor closure a pass runs inside its command context.
pub(crate) type PassExecutor = Box<dyn FnMut(&ResourceHelper<'_>, &mut dyn CommandContext)>;

/// Kind-specific pass state.
pub(crate) enum PassPayload {
    Render {
        render_target: TextureHandle,
        depth_stencil: TextureHandle,
        clear_color: bool,
        clear_depth: bool,
    },
    Compute,
    Copy,
    Present {
        source: TextureHandle,
        swap_chain: Option<Arc<dyn SwapChain>>,
    },
}

impl PassPayload {
    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            Self::Render { .. } => NodeKind::RenderPass,
            Self::Compute => NodeKind::ComputePass,
            Self::Copy => NodeKind::CopyPass,
            Self::Present { .. } => NodeKind::PresentPass,
        }
    }
}

/// One declared unit of GPU work.
pub(crate) struct PassNode {
    pub name: String,
    pub payload: PassPayload,
    pub buffer_edges: SmallVec<[GpuBufferEdge; 4]>,
    pub texture_edges: SmallVec<[TextureEdge; 4]>,
    pub sampler_edges: SmallVec<[SamplerEdge; 2]>,
    pub render_pipelines: SmallVec<[RenderPipelineHandle; 2]>,
    pub compute_pipelines: SmallVec<[ComputePipelineHandle; 2]>,
    pub executor: Option<PassExecutor>,
    /// Filled by barrier inference; emitted before the executor runs.
    pub buffer_barriers: Vec<BufferBarrierRecord>,
    pub texture_barriers: Vec<TextureBarrierRecord>,
    /// Set when the builder's `finish()` succeeds; the compiler ignores
    /// unfinished passes.
    pub finished: bool,
}

impl PassNode {
    pub(crate) fn new(name: impl Into<String>, payload: PassPayload) -> Self {
        Self {
            name: name.into(),
            payload,
            buffer_edges: SmallVec::new(),
            texture_edges: SmallVec::new(),
            sampler_edges: SmallVec::new(),
            render_pipelines: SmallVec::new(),
            compute_pipelines: SmallVec::new(),
            executor: None,
            buffer_barriers: Vec::new(),
            texture_barriers: Vec::new(),
            finished: false,
        }
    }

    #[inline]
    pub(crate) fn kind(&self) -> NodeKind {
        self.payload.kind()
    }

    /// Render and present work requires graphics; compute and copy their
    /// own queues.
    pub(crate) fn queue_type(&self) -> QueueType {
        match self.payload {
            PassPayload::Render { .. } | PassPayload::Present { .. } => QueueType::Graphics,
            PassPayload::Compute => QueueType::Compute,
            PassPayload::Copy => QueueType::Copy,
        }
    }

    pub(crate) fn texture_edge(&self, handle: TextureHandle) -> Option<&TextureEdge> {
        self.texture_edges.iter().find(|e| e.handle == handle)
    }

    pub(crate) fn sampler_edge(&self, handle: SamplerHandle) -> Option<&SamplerEdge> {
        self.sampler_edges.iter().find(|e| e.handle == handle)
    }
}

// ─── Arena Node ───────────────────────────────────────────────────────────────

/// A slot in the graph's node arena.
pub(crate) enum Node {
    Resource(ResourceNode),
    Pass(PassNode),
}

impl Node {
    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            Self::Resource(r) => r.kind,
            Self::Pass(p) => p.kind(),
        }
    }

    pub(crate) fn as_resource(&self) -> Option<&ResourceNode> {
        match self {
            Self::Resource(r) => Some(r),
            Self::Pass(_) => None,
        }
    }

    pub(crate) fn as_resource_mut(&mut self) -> Option<&mut ResourceNode> {
        match self {
            Self::Resource(r) => Some(r),
            Self::Pass(_) => None,
        }
    }

    pub(crate) fn as_pass(&self) -> Option<&PassNode> {
        match self {
            Self::Pass(p) => Some(p),
            Self::Resource(_) => None,
        }
    }

    pub(crate) fn as_pass_mut(&mut self) -> Option<&mut PassNode> {
        match self {
            Self::Pass(p) => Some(p),
            Self::Resource(_) => None,
        }
    }
}
