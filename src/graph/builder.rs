//! Pass Builders
//!
//! Four builder flavours (render, compute, copy, present) share one
//! edge-recording core. Builder methods never return errors: the first
//! validation failure latches the builder invalid, logs the diagnostic,
//! and every subsequent call is a no-op. `finish()` on a latched
//! builder returns the invalid handle, so a partially bad declaration
//! degrades into a pass the compiler never schedules.
//!
//! Reads resolve the given handle to the newest version of its chain at
//! record time, so one handle per resource is enough to chain passes.
//! Writes must name the newest version and mint the next one; the
//! minted handle is returned for explicit threading.

use super::handle::{
    ComputePassHandle, ComputePipelineHandle, CopyPassHandle, GpuBufferHandle, Handle, NodeKind,
    PresentPassHandle, RenderPassHandle, RenderPipelineHandle, SamplerHandle, TextureHandle,
};
use super::node::{
    GpuBufferEdge, Node, PassExecutor, PassNode, PassPayload, ResourceNode, SamplerEdge,
    TextureEdge,
};
use super::RenderGraph;
use crate::device::{BindlessHandle, CommandContext, SwapChain};
use crate::error::RenderGraphError;
use crate::graph::helper::ResourceHelper;
use crate::types::{
    BarrierAccess, GpuBufferUsage, PipelineStage, TextureLayout, TextureSubresourceLayer,
    TextureUsage,
};

use smallvec::SmallVec;
use std::sync::Arc;

// ─── Edge Specs ───────────────────────────────────────────────────────────────

struct BufferEdgeSpec {
    write: bool,
    access: BarrierAccess,
    stage: PipelineStage,
    element_offset: u64,
    /// `None` means the buffer's full element range.
    element_count: Option<u64>,
    required: GpuBufferUsage,
}

struct TextureEdgeSpec {
    write: bool,
    access: BarrierAccess,
    stage: PipelineStage,
    layout: TextureLayout,
    layer: TextureSubresourceLayer,
    required: TextureUsage,
}

// ─── Shared Core ──────────────────────────────────────────────────────────────

/// State common to all builder flavours: the reserved pass slot, the
/// invalid latch, and the edge recorder.
struct PassBuilderCore<'g> {
    graph: &'g mut RenderGraph,
    pass: u32,
    invalid: bool,
    finish_called: bool,
}

impl<'g> PassBuilderCore<'g> {
    fn new(graph: &'g mut RenderGraph, name: &str, payload: PassPayload) -> Self {
        // The slot is reserved up front so minted resource versions can
        // name this pass as their writer.
        let pass = graph.nodes.len() as u32;
        graph.nodes.push(Node::Pass(PassNode::new(name, payload)));
        Self {
            graph,
            pass,
            invalid: false,
            finish_called: false,
        }
    }

    fn pass_node(&self) -> &PassNode {
        self.graph.pass(self.pass).expect("builder owns a pass slot")
    }

    fn pass_node_mut(&mut self) -> &mut PassNode {
        self.graph
            .pass_mut(self.pass)
            .expect("builder owns a pass slot")
    }

    /// Latch the builder invalid. Only the first failure is logged.
    fn invalidate(&mut self, err: &RenderGraphError) {
        if !self.invalid {
            self.invalid = true;
            log::error!("pass `{}`: {err}", self.pass_node().name);
        }
    }

    // ── Buffer Edges ───────────────────────────────────────────────────────

    fn record_buffer_edge(
        &mut self,
        buffer: GpuBufferHandle,
        spec: &BufferEdgeSpec,
    ) -> GpuBufferHandle {
        if self.invalid {
            return Handle::INVALID;
        }
        if !self.graph.is_valid_handle(buffer) {
            self.invalidate(&RenderGraphError::InvalidHandle {
                expected: NodeKind::GpuBuffer,
                index: buffer.index(),
            });
            return Handle::INVALID;
        }

        let target = if spec.write {
            buffer.index()
        } else {
            self.graph.newest_version(buffer.index())
        };
        let target_node = self.graph.resource(target).expect("validated above");
        let slot = target_node.slot;
        let name = self.graph.resources[slot as usize].name().to_owned();

        // A write must name the newest version before anything else can
        // merge or conflict with it.
        if spec.write && !target_node.is_newest() {
            let err = RenderGraphError::OldVersionWrite {
                pass: self.pass_node().name.clone(),
                name,
                version: target_node.version,
            };
            self.invalidate(&err);
            return Handle::INVALID;
        }

        let usages = self.graph.resources[slot as usize]
            .buffer_usages()
            .unwrap_or_else(GpuBufferUsage::empty);
        if !usages.intersects(spec.required) {
            self.invalidate(&RenderGraphError::UsageMismatch {
                op: if spec.write { "write" } else { "read" },
                name,
            });
            return Handle::INVALID;
        }

        // One edge per underlying resource and pass: a repeated read
        // unions its stage mask, anything else aliases.
        let existing = self
            .pass_node()
            .buffer_edges
            .iter()
            .position(|e| self.graph.resource(e.handle.index()).map(|r| r.slot) == Some(slot));
        if let Some(position) = existing {
            let edge = &self.pass_node().buffer_edges[position];
            if spec.write || edge.write || edge.access != spec.access {
                let pass = self.pass_node().name.clone();
                self.invalidate(&RenderGraphError::AliasConflict { pass, name });
                return Handle::INVALID;
            }
            let handle = edge.handle;
            self.pass_node_mut().buffer_edges[position].stage |= spec.stage;
            return handle;
        }

        let element_count = spec.element_count.unwrap_or_else(|| {
            self.graph.resources[slot as usize]
                .buffer_element_count()
                .unwrap_or(0)
        });

        let handle = if spec.write {
            match self.mint_version(target, NodeKind::GpuBuffer) {
                Ok(index) => Handle::new(index),
                Err(err) => {
                    self.invalidate(&err);
                    return Handle::INVALID;
                }
            }
        } else {
            let pass = self.pass;
            self.graph
                .resource_mut(target)
                .expect("validated above")
                .readers
                .push(pass);
            Handle::new(target)
        };

        self.pass_node_mut().buffer_edges.push(GpuBufferEdge {
            handle,
            write: spec.write,
            access: spec.access,
            stage: spec.stage,
            element_offset: spec.element_offset,
            element_count,
            bindless: SmallVec::new(),
        });
        handle
    }

    // ── Texture Edges ──────────────────────────────────────────────────────

    fn record_texture_edge(
        &mut self,
        texture: TextureHandle,
        spec: &TextureEdgeSpec,
    ) -> TextureHandle {
        if self.invalid {
            return Handle::INVALID;
        }
        if !self.graph.is_valid_handle(texture) {
            self.invalidate(&RenderGraphError::InvalidHandle {
                expected: NodeKind::Texture,
                index: texture.index(),
            });
            return Handle::INVALID;
        }

        let target = if spec.write {
            texture.index()
        } else {
            self.graph.newest_version(texture.index())
        };
        let target_node = self.graph.resource(target).expect("validated above");
        let slot = target_node.slot;
        let name = self.graph.resources[slot as usize].name().to_owned();

        if spec.write && !target_node.is_newest() {
            let err = RenderGraphError::OldVersionWrite {
                pass: self.pass_node().name.clone(),
                name,
                version: target_node.version,
            };
            self.invalidate(&err);
            return Handle::INVALID;
        }

        let usages = self.graph.resources[slot as usize]
            .texture_usages()
            .unwrap_or_else(TextureUsage::empty);
        if !usages.intersects(spec.required) {
            self.invalidate(&RenderGraphError::UsageMismatch {
                op: if spec.write { "write" } else { "read" },
                name,
            });
            return Handle::INVALID;
        }

        let existing = self
            .pass_node()
            .texture_edges
            .iter()
            .position(|e| self.graph.resource(e.handle.index()).map(|r| r.slot) == Some(slot));
        if let Some(position) = existing {
            let edge = &self.pass_node().texture_edges[position];
            if spec.write || edge.write || edge.access != spec.access || edge.layout != spec.layout
            {
                let pass = self.pass_node().name.clone();
                self.invalidate(&RenderGraphError::AliasConflict { pass, name });
                return Handle::INVALID;
            }
            let handle = edge.handle;
            self.pass_node_mut().texture_edges[position].stage |= spec.stage;
            return handle;
        }

        let handle = if spec.write {
            match self.mint_version(target, NodeKind::Texture) {
                Ok(index) => Handle::new(index),
                Err(err) => {
                    self.invalidate(&err);
                    return Handle::INVALID;
                }
            }
        } else {
            let pass = self.pass;
            self.graph
                .resource_mut(target)
                .expect("validated above")
                .readers
                .push(pass);
            Handle::new(target)
        };

        self.pass_node_mut().texture_edges.push(TextureEdge {
            handle,
            write: spec.write,
            access: spec.access,
            stage: spec.stage,
            layout: spec.layout,
            layer: spec.layer,
            bindless: BindlessHandle::INVALID,
        });
        handle
    }

    /// Mint the next version of the resource at `target`; the current
    /// pass becomes its writer.
    fn mint_version(&mut self, target: u32, kind: NodeKind) -> Result<u32, RenderGraphError> {
        let source = self.graph.resource(target).expect("validated by caller");
        if !source.is_newest() {
            return Err(RenderGraphError::OldVersionWrite {
                pass: self.pass_node().name.clone(),
                name: self.graph.resource_name(target).to_owned(),
                version: source.version,
            });
        }
        let slot = source.slot;
        let version = source.version + 1;
        let index = self.graph.nodes.len() as u32;

        let mut minted = ResourceNode::new(kind, "", slot);
        minted.version = version;
        minted.prev_version = Some(target);
        minted.writer = Some(self.pass);
        self.graph.nodes.push(Node::Resource(minted));
        self.graph
            .resource_mut(target)
            .expect("validated by caller")
            .next_version = Some(index);
        Ok(index)
    }

    // ── Samplers, Pipelines, Executor ──────────────────────────────────────

    fn record_sampler(&mut self, sampler: SamplerHandle) {
        if self.invalid {
            return;
        }
        if !self.graph.is_valid_handle(sampler) {
            self.invalidate(&RenderGraphError::InvalidHandle {
                expected: NodeKind::Sampler,
                index: sampler.index(),
            });
            return;
        }
        // Idempotent.
        if self.pass_node().sampler_edge(sampler).is_none() {
            self.pass_node_mut().sampler_edges.push(SamplerEdge {
                handle: sampler,
                bindless: BindlessHandle::INVALID,
            });
        }
    }

    fn set_executor(&mut self, executor: PassExecutor) {
        if self.invalid {
            return;
        }
        if self.pass_node().executor.is_some() {
            let pass = self.pass_node().name.clone();
            self.invalidate(&RenderGraphError::DuplicateConfig {
                pass,
                what: "executor",
            });
            return;
        }
        self.pass_node_mut().executor = Some(executor);
    }

    fn require(&mut self, condition: bool, what: &'static str) {
        if !condition {
            let pass = self.pass_node().name.clone();
            self.invalidate(&RenderGraphError::MissingConfig { pass, what });
        }
    }

    /// Shared tail of every `finish()`: name uniqueness, blackboard
    /// registration, marking the node schedulable.
    fn finish_common(&mut self) -> Option<u32> {
        if self.finish_called {
            let pass = self.pass_node().name.clone();
            self.invalidate(&RenderGraphError::DuplicateConfig {
                pass,
                what: "finish",
            });
        }
        self.finish_called = true;
        if self.invalid {
            return None;
        }

        let kind = self.pass_node().kind();
        let name = self.pass_node().name.clone();
        if self.graph.pass_name_taken(kind, &name) {
            self.invalidate(&RenderGraphError::NameCollision { kind, name });
            return None;
        }

        self.pass_node_mut().finished = true;
        let pass = self.pass;
        self.graph.register_pass_name(kind, &name, pass);
        Some(pass)
    }
}

impl Drop for PassBuilderCore<'_> {
    fn drop(&mut self) {
        if !self.finish_called {
            log::warn!(
                "pass `{}` was declared but never finished; it will not be scheduled",
                self.pass_node().name
            );
        }
    }
}

fn boxed_executor(
    executor: impl FnMut(&ResourceHelper<'_>, &mut dyn CommandContext) + 'static,
) -> PassExecutor {
    Box::new(executor)
}

// ─── Render Pass ──────────────────────────────────────────────────────────────

/// Builder for a graphics-queue render pass.
pub struct RenderPassBuilder<'g> {
    core: PassBuilderCore<'g>,
}

impl<'g> RenderPassBuilder<'g> {
    pub(crate) fn new(graph: &'g mut RenderGraph, name: &str) -> Self {
        Self {
            core: PassBuilderCore::new(
                graph,
                name,
                PassPayload::Render {
                    render_target: Handle::INVALID,
                    depth_stencil: Handle::INVALID,
                    clear_color: false,
                    clear_depth: false,
                },
            ),
        }
    }

    /// Read a whole buffer as shader input at `stage`.
    pub fn read_buffer(&mut self, buffer: GpuBufferHandle, stage: PipelineStage) -> GpuBufferHandle {
        self.read_buffer_elements(buffer, 0, None, stage)
    }

    /// Read an element range of a buffer as shader input.
    pub fn read_buffer_elements(
        &mut self,
        buffer: GpuBufferHandle,
        element_offset: u64,
        element_count: Option<u64>,
        stage: PipelineStage,
    ) -> GpuBufferHandle {
        self.core.record_buffer_edge(
            buffer,
            &BufferEdgeSpec {
                write: false,
                access: BarrierAccess::CONSTANT,
                stage,
                element_offset,
                element_count,
                required: GpuBufferUsage::CONSTANT
                    | GpuBufferUsage::VERTEX
                    | GpuBufferUsage::INDEX
                    | GpuBufferUsage::COPY_SRC,
            },
        )
    }

    /// Read a texture subresource as shader input at `stage`.
    pub fn read_texture(
        &mut self,
        texture: TextureHandle,
        layer: TextureSubresourceLayer,
        stage: PipelineStage,
    ) -> TextureHandle {
        self.core.record_texture_edge(
            texture,
            &TextureEdgeSpec {
                write: false,
                access: BarrierAccess::SHADER_READ,
                stage,
                layout: TextureLayout::ShaderRead,
                layer,
                required: TextureUsage::SRV | TextureUsage::COPY_SRC,
            },
        )
    }

    /// Bind a vertex buffer.
    pub fn read_as_vertices(&mut self, buffer: GpuBufferHandle) -> GpuBufferHandle {
        self.core.record_buffer_edge(
            buffer,
            &BufferEdgeSpec {
                write: false,
                access: BarrierAccess::VERTEX,
                stage: PipelineStage::VERTEX_INPUT,
                element_offset: 0,
                element_count: None,
                required: GpuBufferUsage::VERTEX,
            },
        )
    }

    /// Bind an index buffer.
    pub fn read_as_indices(&mut self, buffer: GpuBufferHandle) -> GpuBufferHandle {
        self.core.record_buffer_edge(
            buffer,
            &BufferEdgeSpec {
                write: false,
                access: BarrierAccess::INDEX,
                stage: PipelineStage::VERTEX_INPUT,
                element_offset: 0,
                element_count: None,
                required: GpuBufferUsage::INDEX,
            },
        )
    }

    /// Write a whole buffer from shaders; returns the minted version.
    pub fn write_buffer(&mut self, buffer: GpuBufferHandle, stage: PipelineStage) -> GpuBufferHandle {
        self.write_buffer_elements(buffer, 0, None, stage)
    }

    /// Write an element range of a buffer from shaders.
    pub fn write_buffer_elements(
        &mut self,
        buffer: GpuBufferHandle,
        element_offset: u64,
        element_count: Option<u64>,
        stage: PipelineStage,
    ) -> GpuBufferHandle {
        self.core.record_buffer_edge(
            buffer,
            &BufferEdgeSpec {
                write: true,
                access: BarrierAccess::SHADER_WRITE,
                stage,
                element_offset,
                element_count,
                required: GpuBufferUsage::STORAGE | GpuBufferUsage::COPY_DST,
            },
        )
    }

    /// Write a texture subresource from shaders; returns the minted
    /// version.
    pub fn write_texture(
        &mut self,
        texture: TextureHandle,
        layer: TextureSubresourceLayer,
        stage: PipelineStage,
    ) -> TextureHandle {
        self.core.record_texture_edge(
            texture,
            &TextureEdgeSpec {
                write: true,
                access: BarrierAccess::SHADER_WRITE,
                stage,
                layout: TextureLayout::ShaderWrite,
                layer,
                required: TextureUsage::UAV
                    | TextureUsage::RENDER_TARGET
                    | TextureUsage::DEPTH_STENCIL
                    | TextureUsage::COPY_DST,
            },
        )
    }

    /// Configure the color target. Exactly one per render pass.
    pub fn set_render_target(
        &mut self,
        texture: TextureHandle,
        clear: bool,
        layer: TextureSubresourceLayer,
    ) -> &mut Self {
        if self.core.invalid {
            return self;
        }
        if let PassPayload::Render { render_target, .. } = &self.core.pass_node().payload {
            if render_target.is_valid() {
                let pass = self.core.pass_node().name.clone();
                self.core.invalidate(&RenderGraphError::DuplicateConfig {
                    pass,
                    what: "render target",
                });
                return self;
            }
        }
        let written = self.core.record_texture_edge(
            texture,
            &TextureEdgeSpec {
                write: true,
                access: BarrierAccess::RENDER_TARGET,
                stage: PipelineStage::RENDER,
                layout: TextureLayout::RenderTarget,
                layer,
                required: TextureUsage::RENDER_TARGET,
            },
        );
        if let PassPayload::Render {
            render_target,
            clear_color,
            ..
        } = &mut self.core.pass_node_mut().payload
        {
            *render_target = written;
            *clear_color = clear;
        }
        self
    }

    /// Configure the depth-stencil target. At most one per render pass.
    pub fn set_depth_stencil(
        &mut self,
        texture: TextureHandle,
        clear: bool,
        layer: TextureSubresourceLayer,
    ) -> &mut Self {
        if self.core.invalid {
            return self;
        }
        if let PassPayload::Render { depth_stencil, .. } = &self.core.pass_node().payload {
            if depth_stencil.is_valid() {
                let pass = self.core.pass_node().name.clone();
                self.core.invalidate(&RenderGraphError::DuplicateConfig {
                    pass,
                    what: "depth stencil",
                });
                return self;
            }
        }
        let written = self.core.record_texture_edge(
            texture,
            &TextureEdgeSpec {
                write: true,
                access: BarrierAccess::DEPTH_STENCIL_WRITE,
                stage: PipelineStage::DEPTH_STENCIL,
                layout: TextureLayout::DepthStencilWrite,
                layer,
                required: TextureUsage::DEPTH_STENCIL,
            },
        );
        if let PassPayload::Render {
            depth_stencil,
            clear_depth,
            ..
        } = &mut self.core.pass_node_mut().payload
        {
            *depth_stencil = written;
            *clear_depth = clear;
        }
        self
    }

    /// Use a sampler. Idempotent.
    pub fn add_sampler(&mut self, sampler: SamplerHandle) -> &mut Self {
        self.core.record_sampler(sampler);
        self
    }

    /// Use a render pipeline. Idempotent.
    pub fn add_pipeline(&mut self, pipeline: RenderPipelineHandle) -> &mut Self {
        if self.core.invalid {
            return self;
        }
        if !self.core.graph.is_valid_handle(pipeline) {
            self.core.invalidate(&RenderGraphError::InvalidHandle {
                expected: NodeKind::RenderPipeline,
                index: pipeline.index(),
            });
            return self;
        }
        if !self.core.pass_node().render_pipelines.contains(&pipeline) {
            self.core.pass_node_mut().render_pipelines.push(pipeline);
        }
        self
    }

    /// Install the closure that records this pass's draws.
    pub fn set_executor(
        &mut self,
        executor: impl FnMut(&ResourceHelper<'_>, &mut dyn CommandContext) + 'static,
    ) -> &mut Self {
        self.core.set_executor(boxed_executor(executor));
        self
    }

    /// Validate and finalize the pass. Returns the invalid handle if
    /// any builder call failed.
    pub fn finish(&mut self) -> RenderPassHandle {
        if !self.core.finish_called && !self.core.invalid {
            let has_target = matches!(
                &self.core.pass_node().payload,
                PassPayload::Render { render_target, .. } if render_target.is_valid()
            );
            let has_executor = self.core.pass_node().executor.is_some();
            let has_pipeline = !self.core.pass_node().render_pipelines.is_empty();
            self.core.require(has_executor, "executor");
            self.core.require(has_target, "render target");
            self.core.require(has_pipeline, "pipeline");
        }
        self.core.finish_common().map_or(Handle::INVALID, Handle::new)
    }
}

// ─── Compute Pass ─────────────────────────────────────────────────────────────

/// Builder for a compute-queue pass.
pub struct ComputePassBuilder<'g> {
    core: PassBuilderCore<'g>,
}

impl<'g> ComputePassBuilder<'g> {
    pub(crate) fn new(graph: &'g mut RenderGraph, name: &str) -> Self {
        Self {
            core: PassBuilderCore::new(graph, name, PassPayload::Compute),
        }
    }

    /// Read a whole buffer in compute shaders.
    pub fn read_buffer(&mut self, buffer: GpuBufferHandle) -> GpuBufferHandle {
        self.read_buffer_elements(buffer, 0, None)
    }

    /// Read an element range of a buffer in compute shaders.
    pub fn read_buffer_elements(
        &mut self,
        buffer: GpuBufferHandle,
        element_offset: u64,
        element_count: Option<u64>,
    ) -> GpuBufferHandle {
        self.core.record_buffer_edge(
            buffer,
            &BufferEdgeSpec {
                write: false,
                access: BarrierAccess::CONSTANT,
                stage: PipelineStage::COMPUTE_SHADER,
                element_offset,
                element_count,
                required: GpuBufferUsage::CONSTANT
                    | GpuBufferUsage::STORAGE
                    | GpuBufferUsage::COPY_SRC,
            },
        )
    }

    /// Read a texture subresource in compute shaders.
    pub fn read_texture(
        &mut self,
        texture: TextureHandle,
        layer: TextureSubresourceLayer,
    ) -> TextureHandle {
        self.core.record_texture_edge(
            texture,
            &TextureEdgeSpec {
                write: false,
                access: BarrierAccess::SHADER_READ,
                stage: PipelineStage::COMPUTE_SHADER,
                layout: TextureLayout::ShaderRead,
                layer,
                required: TextureUsage::SRV | TextureUsage::COPY_SRC,
            },
        )
    }

    /// Write a whole storage buffer; returns the minted version.
    pub fn write_buffer(&mut self, buffer: GpuBufferHandle) -> GpuBufferHandle {
        self.write_buffer_elements(buffer, 0, None)
    }

    /// Write an element range of a storage buffer.
    pub fn write_buffer_elements(
        &mut self,
        buffer: GpuBufferHandle,
        element_offset: u64,
        element_count: Option<u64>,
    ) -> GpuBufferHandle {
        self.core.record_buffer_edge(
            buffer,
            &BufferEdgeSpec {
                write: true,
                access: BarrierAccess::SHADER_WRITE,
                stage: PipelineStage::COMPUTE_SHADER,
                element_offset,
                element_count,
                required: GpuBufferUsage::STORAGE | GpuBufferUsage::COPY_DST,
            },
        )
    }

    /// Write a storage texture; returns the minted version.
    pub fn write_texture(
        &mut self,
        texture: TextureHandle,
        layer: TextureSubresourceLayer,
    ) -> TextureHandle {
        self.core.record_texture_edge(
            texture,
            &TextureEdgeSpec {
                write: true,
                access: BarrierAccess::SHADER_WRITE,
                stage: PipelineStage::COMPUTE_SHADER,
                layout: TextureLayout::ShaderWrite,
                layer,
                required: TextureUsage::UAV | TextureUsage::COPY_DST,
            },
        )
    }

    /// Use a sampler. Idempotent.
    pub fn add_sampler(&mut self, sampler: SamplerHandle) -> &mut Self {
        self.core.record_sampler(sampler);
        self
    }

    /// Use a compute pipeline. Idempotent.
    pub fn add_pipeline(&mut self, pipeline: ComputePipelineHandle) -> &mut Self {
        if self.core.invalid {
            return self;
        }
        if !self.core.graph.is_valid_handle(pipeline) {
            self.core.invalidate(&RenderGraphError::InvalidHandle {
                expected: NodeKind::ComputePipeline,
                index: pipeline.index(),
            });
            return self;
        }
        if !self.core.pass_node().compute_pipelines.contains(&pipeline) {
            self.core.pass_node_mut().compute_pipelines.push(pipeline);
        }
        self
    }

    /// Install the closure that records this pass's dispatches.
    pub fn set_executor(
        &mut self,
        executor: impl FnMut(&ResourceHelper<'_>, &mut dyn CommandContext) + 'static,
    ) -> &mut Self {
        self.core.set_executor(boxed_executor(executor));
        self
    }

    /// Validate and finalize the pass.
    pub fn finish(&mut self) -> ComputePassHandle {
        if !self.core.finish_called && !self.core.invalid {
            let has_executor = self.core.pass_node().executor.is_some();
            let has_pipeline = !self.core.pass_node().compute_pipelines.is_empty();
            self.core.require(has_executor, "executor");
            self.core.require(has_pipeline, "pipeline");
        }
        self.core.finish_common().map_or(Handle::INVALID, Handle::new)
    }
}

// ─── Copy Pass ────────────────────────────────────────────────────────────────

/// Builder for a copy-queue pass.
pub struct CopyPassBuilder<'g> {
    core: PassBuilderCore<'g>,
}

impl<'g> CopyPassBuilder<'g> {
    pub(crate) fn new(graph: &'g mut RenderGraph, name: &str) -> Self {
        Self {
            core: PassBuilderCore::new(graph, name, PassPayload::Copy),
        }
    }

    /// Copy one buffer into another.
    pub fn buffer_to_buffer(&mut self, src: GpuBufferHandle, dst: GpuBufferHandle) -> &mut Self {
        if self.core.invalid {
            return self;
        }
        if src == dst {
            let pass = self.core.pass_node().name.clone();
            let name = self.core.graph.resource_name(src.index()).to_owned();
            self.core
                .invalidate(&RenderGraphError::AliasConflict { pass, name });
            return self;
        }
        self.core.record_buffer_edge(
            src,
            &BufferEdgeSpec {
                write: false,
                access: BarrierAccess::COPY_SRC,
                stage: PipelineStage::COPY,
                element_offset: 0,
                element_count: None,
                required: GpuBufferUsage::COPY_SRC,
            },
        );
        self.core.record_buffer_edge(
            dst,
            &BufferEdgeSpec {
                write: true,
                access: BarrierAccess::COPY_DST,
                stage: PipelineStage::COPY,
                element_offset: 0,
                element_count: None,
                required: GpuBufferUsage::COPY_DST,
            },
        );
        self
    }

    /// Copy a buffer into a texture subresource.
    pub fn buffer_to_texture(
        &mut self,
        src: GpuBufferHandle,
        dst: TextureHandle,
        layer: TextureSubresourceLayer,
    ) -> &mut Self {
        self.core.record_buffer_edge(
            src,
            &BufferEdgeSpec {
                write: false,
                access: BarrierAccess::COPY_SRC,
                stage: PipelineStage::COPY,
                element_offset: 0,
                element_count: None,
                required: GpuBufferUsage::COPY_SRC,
            },
        );
        self.core.record_texture_edge(
            dst,
            &TextureEdgeSpec {
                write: true,
                access: BarrierAccess::COPY_DST,
                stage: PipelineStage::COPY,
                layout: TextureLayout::CopyDst,
                layer,
                required: TextureUsage::COPY_DST,
            },
        );
        self
    }

    /// Copy a texture subresource into another texture.
    pub fn texture_to_texture(
        &mut self,
        src: TextureHandle,
        dst: TextureHandle,
        src_layer: TextureSubresourceLayer,
        dst_layer: TextureSubresourceLayer,
    ) -> &mut Self {
        if self.core.invalid {
            return self;
        }
        if src == dst {
            let pass = self.core.pass_node().name.clone();
            let name = self.core.graph.resource_name(src.index()).to_owned();
            self.core
                .invalidate(&RenderGraphError::AliasConflict { pass, name });
            return self;
        }
        self.core.record_texture_edge(
            src,
            &TextureEdgeSpec {
                write: false,
                access: BarrierAccess::COPY_SRC,
                stage: PipelineStage::COPY,
                layout: TextureLayout::CopySrc,
                layer: src_layer,
                required: TextureUsage::COPY_SRC,
            },
        );
        self.core.record_texture_edge(
            dst,
            &TextureEdgeSpec {
                write: true,
                access: BarrierAccess::COPY_DST,
                stage: PipelineStage::COPY,
                layout: TextureLayout::CopyDst,
                layer: dst_layer,
                required: TextureUsage::COPY_DST,
            },
        );
        self
    }

    /// Install the closure that records the copy commands.
    pub fn set_executor(
        &mut self,
        executor: impl FnMut(&ResourceHelper<'_>, &mut dyn CommandContext) + 'static,
    ) -> &mut Self {
        self.core.set_executor(boxed_executor(executor));
        self
    }

    /// Validate and finalize the pass.
    pub fn finish(&mut self) -> CopyPassHandle {
        if !self.core.finish_called && !self.core.invalid {
            let has_executor = self.core.pass_node().executor.is_some();
            self.core.require(has_executor, "executor");
        }
        self.core.finish_common().map_or(Handle::INVALID, Handle::new)
    }
}

// ─── Present Pass ─────────────────────────────────────────────────────────────

/// Builder for the frame's present pass.
///
/// Present installs a built-in executor: it transitions the acquired
/// back buffer to `CopyDst`, copies the source texture into it, then
/// transitions it to `Present`.
pub struct PresentPassBuilder<'g> {
    core: PassBuilderCore<'g>,
}

impl<'g> PresentPassBuilder<'g> {
    pub(crate) fn new(graph: &'g mut RenderGraph) -> Self {
        Self {
            core: PassBuilderCore::new(
                graph,
                "present",
                PassPayload::Present {
                    source: Handle::INVALID,
                    swap_chain: None,
                },
            ),
        }
    }

    /// The texture presented this frame.
    pub fn from(&mut self, texture: TextureHandle, layer: TextureSubresourceLayer) -> &mut Self {
        if self.core.invalid {
            return self;
        }
        if let PassPayload::Present { source, .. } = &self.core.pass_node().payload {
            if source.is_valid() {
                let pass = self.core.pass_node().name.clone();
                self.core.invalidate(&RenderGraphError::DuplicateConfig {
                    pass,
                    what: "present source",
                });
                return self;
            }
        }
        let read = self.core.record_texture_edge(
            texture,
            &TextureEdgeSpec {
                write: false,
                access: BarrierAccess::COPY_SRC,
                stage: PipelineStage::ALL,
                layout: TextureLayout::CopySrc,
                layer,
                required: TextureUsage::COPY_SRC,
            },
        );
        if let PassPayload::Present { source, .. } = &mut self.core.pass_node_mut().payload {
            *source = read;
        }
        self
    }

    /// The swap chain the frame is presented to.
    pub fn set_swap_chain(&mut self, swap_chain: Arc<dyn SwapChain>) -> &mut Self {
        if self.core.invalid {
            return self;
        }
        if let PassPayload::Present { swap_chain: existing, .. } = &self.core.pass_node().payload {
            if existing.is_some() {
                let pass = self.core.pass_node().name.clone();
                self.core.invalidate(&RenderGraphError::DuplicateConfig {
                    pass,
                    what: "swap chain",
                });
                return self;
            }
        }
        if let PassPayload::Present { swap_chain: slot, .. } =
            &mut self.core.pass_node_mut().payload
        {
            *slot = Some(swap_chain);
        }
        self
    }

    /// Validate and finalize; registers this pass as the frame's
    /// present pass.
    pub fn finish(&mut self) -> PresentPassHandle {
        if !self.core.finish_called && !self.core.invalid {
            if self.core.graph.present_pass.is_some() {
                let pass = self.core.pass_node().name.clone();
                self.core.invalidate(&RenderGraphError::DuplicateConfig {
                    pass,
                    what: "present pass",
                });
            }
            let (has_source, has_swap_chain) = match &self.core.pass_node().payload {
                PassPayload::Present { source, swap_chain } => {
                    (source.is_valid(), swap_chain.is_some())
                }
                _ => (false, false),
            };
            self.core.require(has_source, "present source");
            self.core.require(has_swap_chain, "swap chain");
        }
        match self.core.finish_common() {
            Some(index) => {
                self.core.graph.present_pass = Some(index);
                Handle::new(index)
            }
            None => Handle::INVALID,
        }
    }
}
