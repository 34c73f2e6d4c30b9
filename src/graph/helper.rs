//! Resource Helper
//!
//! The view handed to executor closures. It resolves handles to the
//! concrete backend resources and bindless slots of *this* pass only;
//! resolving a handle the pass never declared is a logged error that
//! returns `None` / the invalid bindless slot, never a crash.
//!
//! Lookups match by underlying resource, so a closure may hold any
//! version handle of a resource the pass declared.

use std::sync::Arc;

use super::handle::{
    ComputePipelineHandle, GpuBufferHandle, NodeKind, NodeTag, RenderPipelineHandle, SamplerHandle,
    TextureHandle,
};
use super::node::{Node, PassNode, ResourceBacking};
use crate::device::{
    BindlessHandle, ComputePipeline, GpuBuffer, RenderPipeline, ResourceRef, Sampler, Texture,
};
use crate::graph::handle::Handle;

/// Per-pass handle resolution for executor closures.
pub struct ResourceHelper<'a> {
    pub(crate) nodes: &'a [Node],
    pub(crate) resources: &'a [ResourceBacking],
    pub(crate) pass: &'a PassNode,
}

impl ResourceHelper<'_> {
    /// The name of the pass this helper belongs to.
    #[must_use]
    pub fn pass_name(&self) -> &str {
        &self.pass.name
    }

    /// The underlying slot of a resource handle, with kind check.
    fn slot_of<K: NodeTag>(&self, handle: Handle<K>) -> Option<u32> {
        let node = self
            .nodes
            .get(handle.index() as usize)
            .and_then(Node::as_resource)?;
        (node.kind == K::KIND).then_some(node.slot)
    }

    fn resolved(&self, slot: u32) -> Option<&ResourceRef> {
        self.resources.get(slot as usize).and_then(ResourceBacking::resolved)
    }

    fn slot_of_node(&self, index: u32) -> Option<u32> {
        self.nodes
            .get(index as usize)
            .and_then(Node::as_resource)
            .map(|r| r.slot)
    }

    // ── Resources ──────────────────────────────────────────────────────────

    /// The buffer behind `handle`, if this pass declared an edge on it.
    #[must_use]
    pub fn buffer(&self, handle: GpuBufferHandle) -> Option<Arc<dyn GpuBuffer>> {
        let Some(slot) = self.slot_of(handle) else {
            log::error!("pass `{}`: buffer handle {handle:?} is invalid", self.pass.name);
            return None;
        };
        let declared = self
            .pass
            .buffer_edges
            .iter()
            .any(|e| self.slot_of_node(e.handle.index()) == Some(slot));
        if !declared {
            log::error!(
                "pass `{}`: buffer {handle:?} is not used by this pass",
                self.pass.name
            );
            return None;
        }
        self.resolved(slot)?.as_buffer().cloned()
    }

    /// The texture behind `handle`, if this pass declared an edge on it.
    #[must_use]
    pub fn texture(&self, handle: TextureHandle) -> Option<Arc<dyn Texture>> {
        let Some(slot) = self.slot_of(handle) else {
            log::error!("pass `{}`: texture handle {handle:?} is invalid", self.pass.name);
            return None;
        };
        let declared = self
            .pass
            .texture_edges
            .iter()
            .any(|e| self.slot_of_node(e.handle.index()) == Some(slot));
        if !declared {
            log::error!(
                "pass `{}`: texture {handle:?} is not used by this pass",
                self.pass.name
            );
            return None;
        }
        self.resolved(slot)?.as_texture().cloned()
    }

    /// The sampler behind `handle`, if this pass declared it.
    #[must_use]
    pub fn sampler(&self, handle: SamplerHandle) -> Option<Arc<dyn Sampler>> {
        let Some(slot) = self.slot_of(handle) else {
            log::error!("pass `{}`: sampler handle {handle:?} is invalid", self.pass.name);
            return None;
        };
        if self.pass.sampler_edge(handle).is_none() {
            log::error!(
                "pass `{}`: sampler {handle:?} is not used by this pass",
                self.pass.name
            );
            return None;
        }
        self.resolved(slot)?.as_sampler().cloned()
    }

    /// A render pipeline added to this pass.
    #[must_use]
    pub fn render_pipeline(&self, handle: RenderPipelineHandle) -> Option<Arc<dyn RenderPipeline>> {
        let Some(slot) = self.slot_of(handle) else {
            log::error!("pass `{}`: pipeline handle {handle:?} is invalid", self.pass.name);
            return None;
        };
        if !self.pass.render_pipelines.contains(&handle) {
            log::error!(
                "pass `{}`: pipeline {handle:?} is not used by this pass",
                self.pass.name
            );
            return None;
        }
        match self.resolved(slot)? {
            ResourceRef::RenderPipeline(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    /// A compute pipeline added to this pass.
    #[must_use]
    pub fn compute_pipeline(
        &self,
        handle: ComputePipelineHandle,
    ) -> Option<Arc<dyn ComputePipeline>> {
        let Some(slot) = self.slot_of(handle) else {
            log::error!("pass `{}`: pipeline handle {handle:?} is invalid", self.pass.name);
            return None;
        };
        if !self.pass.compute_pipelines.contains(&handle) {
            log::error!(
                "pass `{}`: pipeline {handle:?} is not used by this pass",
                self.pass.name
            );
            return None;
        }
        match self.resolved(slot)? {
            ResourceRef::ComputePipeline(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    // ── Bindless ───────────────────────────────────────────────────────────

    /// The bindless slot for one element of a buffer edge.
    ///
    /// `element` indexes into the elements the edge declared, starting
    /// at the edge's element offset.
    #[must_use]
    pub fn bindless_buffer(&self, handle: GpuBufferHandle, element: usize) -> BindlessHandle {
        let Some(slot) = self.slot_of(handle) else {
            log::error!("pass `{}`: buffer handle {handle:?} is invalid", self.pass.name);
            return BindlessHandle::INVALID;
        };
        let edge = self
            .pass
            .buffer_edges
            .iter()
            .find(|e| self.slot_of_node(e.handle.index()) == Some(slot));
        match edge {
            Some(edge) => edge.bindless.get(element).copied().unwrap_or_else(|| {
                log::error!(
                    "pass `{}`: buffer {handle:?} has no bindless slot for element {element}",
                    self.pass.name
                );
                BindlessHandle::INVALID
            }),
            None => {
                log::error!(
                    "pass `{}`: buffer {handle:?} is not used by this pass",
                    self.pass.name
                );
                BindlessHandle::INVALID
            }
        }
    }

    /// The bindless slot for a texture edge.
    #[must_use]
    pub fn bindless_texture(&self, handle: TextureHandle) -> BindlessHandle {
        let Some(slot) = self.slot_of(handle) else {
            log::error!("pass `{}`: texture handle {handle:?} is invalid", self.pass.name);
            return BindlessHandle::INVALID;
        };
        self.pass
            .texture_edges
            .iter()
            .find(|e| self.slot_of_node(e.handle.index()) == Some(slot))
            .map_or_else(
                || {
                    log::error!(
                        "pass `{}`: texture {handle:?} is not used by this pass",
                        self.pass.name
                    );
                    BindlessHandle::INVALID
                },
                |e| e.bindless,
            )
    }

    /// The bindless slot for a sampler.
    #[must_use]
    pub fn bindless_sampler(&self, handle: SamplerHandle) -> BindlessHandle {
        self.pass.sampler_edge(handle).map_or_else(
            || {
                log::error!(
                    "pass `{}`: sampler {handle:?} is not used by this pass",
                    self.pass.name
                );
                BindlessHandle::INVALID
            },
            |e| e.bindless,
        )
    }

    /// How many texture edges the pass declared (mostly useful in tests
    /// and debug overlays).
    #[must_use]
    pub fn texture_edge_count(&self) -> usize {
        self.pass.texture_edges.len()
    }

    /// Kind of the pass this helper serves.
    #[must_use]
    pub fn pass_kind(&self) -> NodeKind {
        self.pass.kind()
    }
}
