//! Render Graph
//!
//! `RenderGraph` is the frame-scoped owner of every node: versioned
//! resource nodes (imported or created), pass nodes, and the per-kind
//! name blackboard. The per-frame cycle is:
//!
//! 1. **Declare** — import/create resources, declare passes through the
//!    builders, ending with a present pass.
//! 2. **Compile** — prune dead passes, resolve move aliases, layer the
//!    schedule across queues, materialize retained resources, infer
//!    barriers.
//! 3. **Execute** — record and submit per queue with inter-queue
//!    fences, creating bindless descriptors as each pass records.
//! 4. **Retire** — everything a submitted pass touched enters a FIFO
//!    keyed by fence value and is dropped once the fence passes it.
//!
//! Nodes live in an index-addressed arena; edges and version chains are
//! plain indices, so no structure owns a cycle and a frame reset is a
//! handful of `clear` calls.

pub mod builder;
pub(crate) mod barrier;
pub(crate) mod compiler;
pub(crate) mod executor;
pub mod handle;
pub mod helper;
pub(crate) mod node;

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use self::builder::{ComputePassBuilder, CopyPassBuilder, PresentPassBuilder, RenderPassBuilder};
use self::handle::{
    ComputePassHandle, ComputePipelineHandle, CopyPassHandle, GpuBufferHandle, Handle, NodeKind,
    NodeTag, RenderPassHandle, RenderPipelineHandle, SamplerHandle, TextureHandle, tags,
};
use self::node::{Node, PassNode, ResourceBacking, ResourceNode};
use crate::device::{
    BindlessHandle, ComputePipeline, Device, Fence, GpuBuffer, RenderPipeline, ResourceRef,
    Sampler, Texture,
};
use crate::error::{RenderGraphError, Result};
use crate::types::{
    ComputePipelineDesc, GpuBufferDesc, PerQueue, QueueType, RenderPipelineDesc, ResourceDesc,
    SamplerDesc, TextureDesc,
};

// ─── Compiled Plan ────────────────────────────────────────────────────────────

/// Passes of one execute layer, bucketed by queue.
pub(crate) type ExecuteLayer = PerQueue<SmallVec<[u32; 4]>>;

/// The output of compilation, consumed by one `execute()`.
pub(crate) struct Schedule {
    /// Topological layers; batches within a layer may run concurrently
    /// across queues.
    pub layers: Vec<ExecuteLayer>,
    /// Direct prerequisites per pass (pass-only flow graph, transposed).
    pub dependencies: FxHashMap<u32, FxHashSet<u32>>,
    /// Layer index each scheduled pass landed in.
    pub pass_layer: FxHashMap<u32, usize>,
}

// ─── Frame Bookkeeping ────────────────────────────────────────────────────────

struct FenceSlot {
    fence: Arc<dyn Fence>,
    /// Value the next submission on this queue will signal.
    next_value: u64,
}

/// One retirement entry: everything a submitted pass touched, safe to
/// drop once `fence(queue)` reaches `value`.
struct RetiredEntry {
    pass_name: String,
    bindless: Vec<BindlessHandle>,
    resources: Vec<ResourceRef>,
    queue: QueueType,
    value: u64,
}

// ─── Render Graph ─────────────────────────────────────────────────────────────

/// The frame-scoped render graph. See the module docs for the lifecycle.
pub struct RenderGraph {
    pub(crate) device: Arc<dyn Device>,
    name: String,
    pub(crate) nodes: Vec<Node>,
    pub(crate) resources: Vec<ResourceBacking>,
    blackboard: [FxHashMap<String, u32>; NodeKind::COUNT],
    pub(crate) present_pass: Option<u32>,
    fences: PerQueue<FenceSlot>,
    schedule: Option<Schedule>,
    retired: VecDeque<RetiredEntry>,
    frame_index: u64,
}

impl RenderGraph {
    /// Create a graph driving `device`. One fence per queue type is
    /// created up front and lives for the graph's lifetime.
    #[must_use]
    pub fn new(device: Arc<dyn Device>, name: impl Into<String>) -> Self {
        let name = name.into();
        let fence = |queue: QueueType| FenceSlot {
            fence: device.create_fence(0, &format!("{name}-{}-fence", queue.name())),
            next_value: 1,
        };
        log::trace!("create render graph `{name}`");
        Self {
            fences: PerQueue {
                graphics: fence(QueueType::Graphics),
                compute: fence(QueueType::Compute),
                copy: fence(QueueType::Copy),
            },
            device,
            name,
            nodes: Vec::new(),
            resources: Vec::new(),
            blackboard: Default::default(),
            present_pass: None,
            schedule: None,
            retired: VecDeque::new(),
            frame_index: 0,
        }
    }

    /// The graph's debug name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Frames executed so far.
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Nodes currently declared this frame (resources and passes).
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Entries still waiting on fences in the retirement FIFO.
    #[must_use]
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    // ── Import ─────────────────────────────────────────────────────────────

    /// Import an externally owned buffer. Importing the same buffer
    /// twice returns the existing handle.
    pub fn import_buffer(&mut self, buffer: Arc<dyn GpuBuffer>, name: &str) -> GpuBufferHandle {
        Handle::new(self.import_resource(ResourceRef::Buffer(buffer), NodeKind::GpuBuffer, name))
    }

    /// Import an externally owned texture.
    pub fn import_texture(&mut self, texture: Arc<dyn Texture>, name: &str) -> TextureHandle {
        Handle::new(self.import_resource(ResourceRef::Texture(texture), NodeKind::Texture, name))
    }

    /// Import an externally owned sampler.
    pub fn import_sampler(&mut self, sampler: Arc<dyn Sampler>, name: &str) -> SamplerHandle {
        Handle::new(self.import_resource(ResourceRef::Sampler(sampler), NodeKind::Sampler, name))
    }

    /// Import a compiled render pipeline.
    pub fn import_render_pipeline(
        &mut self,
        pipeline: Arc<dyn RenderPipeline>,
        name: &str,
    ) -> RenderPipelineHandle {
        Handle::new(self.import_resource(
            ResourceRef::RenderPipeline(pipeline),
            NodeKind::RenderPipeline,
            name,
        ))
    }

    /// Import a compiled compute pipeline.
    pub fn import_compute_pipeline(
        &mut self,
        pipeline: Arc<dyn ComputePipeline>,
        name: &str,
    ) -> ComputePipelineHandle {
        Handle::new(self.import_resource(
            ResourceRef::ComputePipeline(pipeline),
            NodeKind::ComputePipeline,
            name,
        ))
    }

    fn import_resource(&mut self, resource: ResourceRef, kind: NodeKind, name: &str) -> u32 {
        // A name that already resolves must point at the same resource.
        if !name.is_empty() {
            if let Some(&index) = self.blackboard[kind.index()].get(name) {
                let same = self
                    .resource(index)
                    .and_then(|r| self.resources[r.slot as usize].resolved())
                    .is_some_and(|existing| existing.ptr_eq(&resource));
                if same {
                    return index;
                }
                log::error!(
                    "import of `{}` failed: {:?}",
                    resource.name(),
                    RenderGraphError::NameCollision {
                        kind,
                        name: name.to_owned(),
                    }
                );
                return u32::MAX;
            }
        }

        // Idempotent import: same underlying resource, same handle.
        for (index, node) in self.nodes.iter().enumerate() {
            let Some(resource_node) = node.as_resource() else {
                continue;
            };
            if resource_node.version != 0 {
                continue;
            }
            let matches = self.resources[resource_node.slot as usize]
                .resolved()
                .is_some_and(|existing| existing.ptr_eq(&resource));
            if matches {
                if !name.is_empty() {
                    self.blackboard[kind.index()].insert(name.to_owned(), index as u32);
                }
                return index as u32;
            }
        }

        let slot = self.resources.len() as u32;
        let index = self.nodes.len() as u32;
        log::trace!("import resource `{}` as node {index}", resource.name());
        self.resources.push(ResourceBacking::External(resource));
        self.nodes
            .push(Node::Resource(ResourceNode::new(kind, name, slot)));
        if !name.is_empty() {
            self.blackboard[kind.index()].insert(name.to_owned(), index);
        }
        index
    }

    // ── Create ─────────────────────────────────────────────────────────────

    /// Declare a buffer the compiler will materialize if a retained pass
    /// uses it.
    pub fn create_buffer(&mut self, desc: GpuBufferDesc, name: &str) -> GpuBufferHandle {
        Handle::new(self.create_resource(ResourceDesc::Buffer(desc), NodeKind::GpuBuffer, name))
    }

    /// Declare a texture the compiler will materialize if a retained
    /// pass uses it.
    pub fn create_texture(&mut self, desc: TextureDesc, name: &str) -> TextureHandle {
        Handle::new(self.create_resource(ResourceDesc::Texture(desc), NodeKind::Texture, name))
    }

    /// Declare a sampler.
    pub fn create_sampler(&mut self, desc: SamplerDesc, name: &str) -> SamplerHandle {
        Handle::new(self.create_resource(ResourceDesc::Sampler(desc), NodeKind::Sampler, name))
    }

    /// Declare a render pipeline (compiled by the device at
    /// materialization).
    pub fn create_render_pipeline(
        &mut self,
        desc: RenderPipelineDesc,
        name: &str,
    ) -> RenderPipelineHandle {
        Handle::new(self.create_resource(
            ResourceDesc::RenderPipeline(desc),
            NodeKind::RenderPipeline,
            name,
        ))
    }

    /// Declare a compute pipeline.
    pub fn create_compute_pipeline(
        &mut self,
        desc: ComputePipelineDesc,
        name: &str,
    ) -> ComputePipelineHandle {
        Handle::new(self.create_resource(
            ResourceDesc::ComputePipeline(desc),
            NodeKind::ComputePipeline,
            name,
        ))
    }

    fn create_resource(&mut self, desc: ResourceDesc, kind: NodeKind, name: &str) -> u32 {
        if !name.is_empty() && self.blackboard[kind.index()].contains_key(name) {
            log::error!(
                "create of `{}` failed: {:?}",
                desc.name(),
                RenderGraphError::NameCollision {
                    kind,
                    name: name.to_owned(),
                }
            );
            return u32::MAX;
        }
        let slot = self.resources.len() as u32;
        let index = self.nodes.len() as u32;
        log::trace!("create resource `{}` as node {index}", desc.name());
        self.resources.push(ResourceBacking::Transient(desc));
        self.nodes
            .push(Node::Resource(ResourceNode::new(kind, name, slot)));
        if !name.is_empty() {
            self.blackboard[kind.index()].insert(name.to_owned(), index);
        }
        index
    }

    // ── Move Aliasing ──────────────────────────────────────────────────────

    /// Declare that a new resource is moved from `src`: both share the
    /// same underlying resource, no data is copied, and any pass using
    /// the new handle is ordered after the last writer of `src`'s chain.
    pub fn move_from<K: tags::Movable>(&mut self, src: Handle<K>, name: &str) -> Handle<K> {
        if !self.is_valid_handle(src) {
            log::error!(
                "move failed: {:?}",
                RenderGraphError::InvalidHandle {
                    expected: K::KIND,
                    index: src.index(),
                }
            );
            return Handle::INVALID;
        }
        if !name.is_empty() && self.blackboard[K::KIND.index()].contains_key(name) {
            log::error!(
                "move failed: {:?}",
                RenderGraphError::NameCollision {
                    kind: K::KIND,
                    name: name.to_owned(),
                }
            );
            return Handle::INVALID;
        }

        let src_node = self.resource(src.index()).expect("validated above");
        let slot = src_node.slot;
        let version = src_node.version + 1;
        let index = self.nodes.len() as u32;

        let mut moved = ResourceNode::new(K::KIND, name, slot);
        moved.version = version;
        moved.prev_version = Some(src.index());
        self.nodes.push(Node::Resource(moved));

        self.resource_mut(src.index()).expect("validated above").move_target = Some(index);
        if !name.is_empty() {
            self.blackboard[K::KIND.index()].insert(name.to_owned(), index);
        }
        log::trace!(
            "move node {} -> {index} (`{}`)",
            src.index(),
            self.resource_name(index)
        );
        Handle::new(index)
    }

    // ── Blackboard Lookup ──────────────────────────────────────────────────

    fn lookup<K: NodeTag>(&self, name: &str) -> Handle<K> {
        self.blackboard[K::KIND.index()]
            .get(name)
            .map_or(Handle::INVALID, |&index| Handle::new(index))
    }

    /// Buffer registered under `name`, or the invalid handle.
    #[must_use]
    pub fn buffer_handle(&self, name: &str) -> GpuBufferHandle {
        self.lookup(name)
    }

    /// Texture registered under `name`, or the invalid handle.
    #[must_use]
    pub fn texture_handle(&self, name: &str) -> TextureHandle {
        self.lookup(name)
    }

    /// Sampler registered under `name`, or the invalid handle.
    #[must_use]
    pub fn sampler_handle(&self, name: &str) -> SamplerHandle {
        self.lookup(name)
    }

    /// Render pipeline registered under `name`, or the invalid handle.
    #[must_use]
    pub fn render_pipeline_handle(&self, name: &str) -> RenderPipelineHandle {
        self.lookup(name)
    }

    /// Compute pipeline registered under `name`, or the invalid handle.
    #[must_use]
    pub fn compute_pipeline_handle(&self, name: &str) -> ComputePipelineHandle {
        self.lookup(name)
    }

    /// Render pass registered under `name`, or the invalid handle.
    #[must_use]
    pub fn render_pass_handle(&self, name: &str) -> RenderPassHandle {
        self.lookup(name)
    }

    /// Compute pass registered under `name`, or the invalid handle.
    #[must_use]
    pub fn compute_pass_handle(&self, name: &str) -> ComputePassHandle {
        self.lookup(name)
    }

    /// Copy pass registered under `name`, or the invalid handle.
    #[must_use]
    pub fn copy_pass_handle(&self, name: &str) -> CopyPassHandle {
        self.lookup(name)
    }

    // ── Pass Builders ──────────────────────────────────────────────────────

    /// Start declaring a render pass.
    pub fn render_pass(&mut self, name: &str) -> RenderPassBuilder<'_> {
        RenderPassBuilder::new(self, name)
    }

    /// Start declaring a compute pass.
    pub fn compute_pass(&mut self, name: &str) -> ComputePassBuilder<'_> {
        ComputePassBuilder::new(self, name)
    }

    /// Start declaring a copy pass.
    pub fn copy_pass(&mut self, name: &str) -> CopyPassBuilder<'_> {
        CopyPassBuilder::new(self, name)
    }

    /// Start declaring the frame's present pass.
    pub fn present_pass(&mut self) -> PresentPassBuilder<'_> {
        PresentPassBuilder::new(self)
    }

    // ── Frame Lifecycle ────────────────────────────────────────────────────

    /// Compile the declared graph into an execution plan.
    ///
    /// On failure the frame is skipped: `execute()` becomes a no-op
    /// that clears the declaration for the next frame.
    pub fn compile(&mut self) -> Result<()> {
        if self.schedule.is_some() {
            log::warn!("render graph `{}` is already compiled", self.name);
            return Ok(());
        }
        let schedule = match compiler::compile(self) {
            Ok(schedule) => schedule,
            Err(err) => {
                log::error!("compile of `{}` failed: {err}", self.name);
                return Err(err);
            }
        };
        if let Err(err) = barrier::infer(self, &schedule) {
            log::error!("compile of `{}` failed: {err}", self.name);
            return Err(err);
        }
        self.schedule = Some(schedule);
        log::trace!("compiled `{}`", self.name);
        Ok(())
    }

    /// Execute the compiled plan and return the executed frame's index.
    ///
    /// Blocks at entry until the previous frame's submissions have been
    /// reached by their fences. Without a successful `compile()` this
    /// logs, clears the declaration, and skips the frame.
    pub fn execute(&mut self) -> u64 {
        let Some(schedule) = self.schedule.take() else {
            log::error!("execute of `{}` skipped: graph is not compiled", self.name);
            self.reset();
            return self.frame_index;
        };

        for (_, slot) in self.fences.iter() {
            slot.fence.wait(slot.next_value - 1);
        }

        executor::execute_frame(self, &schedule);
        self.process_retirement();

        let frame = self.frame_index;
        self.frame_index += 1;
        self.reset();
        frame
    }

    /// Drop every frame-scoped table; the retirement FIFO and fences
    /// survive.
    fn reset(&mut self) {
        self.nodes.clear();
        self.resources.clear();
        for board in &mut self.blackboard {
            board.clear();
        }
        self.present_pass = None;
        self.schedule = None;
    }

    /// Pop retired entries whose fence value has been reached.
    fn process_retirement(&mut self) {
        while let Some(front) = self.retired.front() {
            if self.fences.get(front.queue).fence.value() < front.value {
                break;
            }
            let entry = self.retired.pop_front().expect("front checked above");
            log::trace!("retire pass `{}`", entry.pass_name);
            for handle in entry.bindless {
                self.device.bindless().discard_handle(handle);
            }
            drop(entry.resources);
        }
    }

    // ── Internal Accessors ─────────────────────────────────────────────────

    pub(crate) fn node(&self, index: u32) -> Option<&Node> {
        self.nodes.get(index as usize)
    }

    pub(crate) fn resource(&self, index: u32) -> Option<&ResourceNode> {
        self.node(index).and_then(Node::as_resource)
    }

    pub(crate) fn resource_mut(&mut self, index: u32) -> Option<&mut ResourceNode> {
        self.nodes.get_mut(index as usize).and_then(Node::as_resource_mut)
    }

    pub(crate) fn pass(&self, index: u32) -> Option<&PassNode> {
        self.node(index).and_then(Node::as_pass)
    }

    pub(crate) fn pass_mut(&mut self, index: u32) -> Option<&mut PassNode> {
        self.nodes.get_mut(index as usize).and_then(Node::as_pass_mut)
    }

    /// True when `handle` resolves to a live node of its tagged kind.
    pub(crate) fn is_valid_handle<K: NodeTag>(&self, handle: Handle<K>) -> bool {
        handle.is_valid()
            && self
                .node(handle.index())
                .is_some_and(|node| node.kind() == K::KIND)
    }

    /// Backing name of the resource behind a node index (for logs).
    pub(crate) fn resource_name(&self, index: u32) -> &str {
        self.resource(index)
            .map_or("<invalid>", |r| self.resources[r.slot as usize].name())
    }

    /// Walk `next_version` links to the newest version in the chain of
    /// `index`.
    pub(crate) fn newest_version(&self, index: u32) -> u32 {
        let mut current = index;
        while let Some(next) = self.resource(current).and_then(|r| r.next_version) {
            current = next;
        }
        current
    }

    /// Register a finished pass in its kind's blackboard.
    pub(crate) fn register_pass_name(&mut self, kind: NodeKind, name: &str, index: u32) {
        if !name.is_empty() {
            self.blackboard[kind.index()].insert(name.to_owned(), index);
        }
    }

    /// True when `name` is taken in the blackboard of `kind`.
    pub(crate) fn pass_name_taken(&self, kind: NodeKind, name: &str) -> bool {
        !name.is_empty() && self.blackboard[kind.index()].contains_key(name)
    }

    /// Fence bookkeeping used by the executor.
    pub(crate) fn fence(&self, queue: QueueType) -> &Arc<dyn Fence> {
        &self.fences.get(queue).fence
    }

    pub(crate) fn advance_fence_value(&mut self, queue: QueueType) -> u64 {
        let slot = self.fences.get_mut(queue);
        let value = slot.next_value;
        slot.next_value += 1;
        value
    }

    /// Push a submitted pass's leavings onto the retirement FIFO.
    pub(crate) fn push_retired(
        &mut self,
        pass_name: String,
        bindless: Vec<BindlessHandle>,
        resources: Vec<ResourceRef>,
        queue: QueueType,
        value: u64,
    ) {
        self.retired.push_back(RetiredEntry {
            pass_name,
            bindless,
            resources,
            queue,
            value,
        });
    }
}

impl Drop for RenderGraph {
    fn drop(&mut self) {
        self.device.wait_idle();
        while let Some(entry) = self.retired.pop_front() {
            for handle in entry.bindless {
                self.device.bindless().discard_handle(handle);
            }
        }
    }
}
