//! Kind-Tagged Handles
//!
//! Every node in the graph arena is addressed by an opaque `u32` index
//! tagged at the type level with the node kind it refers to. Handles are
//! frame-scoped: once the graph resets they mean nothing. A reserved
//! index denotes "invalid" — builder failures return it instead of
//! panicking.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// The runtime kind of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeKind {
    GpuBuffer = 0,
    Texture = 1,
    Sampler = 2,
    RenderPipeline = 3,
    ComputePipeline = 4,
    RenderPass = 5,
    ComputePass = 6,
    CopyPass = 7,
    PresentPass = 8,
}

impl NodeKind {
    /// Number of kinds (blackboard table size).
    pub const COUNT: usize = 9;

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline]
    #[must_use]
    pub const fn is_resource(self) -> bool {
        matches!(
            self,
            Self::GpuBuffer
                | Self::Texture
                | Self::Sampler
                | Self::RenderPipeline
                | Self::ComputePipeline
        )
    }

    #[inline]
    #[must_use]
    pub const fn is_pass(self) -> bool {
        !self.is_resource()
    }
}

/// Compile-time node kind carried by a [`Handle`].
pub trait NodeTag {
    const KIND: NodeKind;
}

/// Marker types, one per [`NodeKind`].
pub mod tags {
    use super::{NodeKind, NodeTag};

    macro_rules! tag {
        ($name:ident) => {
            pub enum $name {}

            impl NodeTag for $name {
                const KIND: NodeKind = NodeKind::$name;
            }
        };
    }

    tag!(GpuBuffer);
    tag!(Texture);
    tag!(Sampler);
    tag!(RenderPipeline);
    tag!(ComputePipeline);
    tag!(RenderPass);
    tag!(ComputePass);
    tag!(CopyPass);
    tag!(PresentPass);

    /// Resource kinds that can be the source of a move alias.
    pub trait Movable: NodeTag {}
    impl Movable for GpuBuffer {}
    impl Movable for Texture {}
}

const INVALID_INDEX: u32 = u32::MAX;

/// An opaque, kind-tagged index into the graph's node arena.
pub struct Handle<K> {
    index: u32,
    _marker: PhantomData<fn() -> K>,
}

pub type GpuBufferHandle = Handle<tags::GpuBuffer>;
pub type TextureHandle = Handle<tags::Texture>;
pub type SamplerHandle = Handle<tags::Sampler>;
pub type RenderPipelineHandle = Handle<tags::RenderPipeline>;
pub type ComputePipelineHandle = Handle<tags::ComputePipeline>;
pub type RenderPassHandle = Handle<tags::RenderPass>;
pub type ComputePassHandle = Handle<tags::ComputePass>;
pub type CopyPassHandle = Handle<tags::CopyPass>;
pub type PresentPassHandle = Handle<tags::PresentPass>;

impl<K> Handle<K> {
    /// The reserved invalid handle of this kind.
    pub const INVALID: Handle<K> = Handle {
        index: INVALID_INDEX,
        _marker: PhantomData,
    };

    #[inline]
    #[must_use]
    pub(crate) const fn new(index: u32) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.index != INVALID_INDEX
    }
}

impl<K: NodeTag> Handle<K> {
    /// The runtime kind this handle is tagged with.
    #[inline]
    #[must_use]
    pub const fn kind(self) -> NodeKind {
        K::KIND
    }
}

// Manual impls: `PhantomData<fn() -> K>` must not put bounds on `K`.

impl<K> Clone for Handle<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Handle<K> {}

impl<K> PartialEq for Handle<K> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<K> Eq for Handle<K> {}

impl<K> Hash for Handle<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<K: NodeTag> fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{:?}Handle({})", K::KIND, self.index)
        } else {
            write!(f, "{:?}Handle(invalid)", K::KIND)
        }
    }
}

impl<K> Default for Handle<K> {
    fn default() -> Self {
        Self::INVALID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_sentinel() {
        let handle = GpuBufferHandle::INVALID;
        assert!(!handle.is_valid());
        assert_eq!(handle, GpuBufferHandle::default());
    }

    #[test]
    fn test_kind_tagging() {
        assert_eq!(TextureHandle::new(4).kind(), NodeKind::Texture);
        assert!(NodeKind::Texture.is_resource());
        assert!(NodeKind::CopyPass.is_pass());
    }

    #[test]
    fn test_equality_is_index_equality_within_kind() {
        assert_eq!(TextureHandle::new(2), TextureHandle::new(2));
        assert_ne!(TextureHandle::new(2), TextureHandle::new(3));
    }
}
