//! Shared GPU Types
//!
//! Queue kinds, usage flags, barrier access/stage masks, texture layouts
//! and the resource description records the graph allocates from. These
//! mirror what the device capability interface (`crate::device`) speaks;
//! the graph itself never interprets them beyond validation and barrier
//! bookkeeping.

use bitflags::bitflags;

// ─── Queues ───────────────────────────────────────────────────────────────────

/// The command queue a pass records and submits on.
///
/// Render and present work requires the graphics queue; compute passes
/// run on the compute queue; copy passes on the copy queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum QueueType {
    Graphics = 0,
    Compute = 1,
    Copy = 2,
}

impl QueueType {
    /// All queue types, in submission iteration order.
    pub const ALL: [QueueType; 3] = [QueueType::Graphics, QueueType::Compute, QueueType::Copy];

    /// Queue name (for fence labels and diagnostics).
    #[inline]
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Graphics => "graphics",
            Self::Compute => "compute",
            Self::Copy => "copy",
        }
    }
}

/// A value per queue type.
///
/// Used for fences, per-layer batches and signal bookkeeping. Iteration
/// order is the order of [`QueueType::ALL`].
#[derive(Debug, Clone, Default)]
pub struct PerQueue<T> {
    pub graphics: T,
    pub compute: T,
    pub copy: T,
}

impl<T> PerQueue<T> {
    #[inline]
    pub fn get(&self, queue: QueueType) -> &T {
        match queue {
            QueueType::Graphics => &self.graphics,
            QueueType::Compute => &self.compute,
            QueueType::Copy => &self.copy,
        }
    }

    #[inline]
    pub fn get_mut(&mut self, queue: QueueType) -> &mut T {
        match queue {
            QueueType::Graphics => &mut self.graphics,
            QueueType::Compute => &mut self.compute,
            QueueType::Copy => &mut self.copy,
        }
    }

    /// Iterate `(queue, value)` pairs in [`QueueType::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (QueueType, &T)> {
        QueueType::ALL.into_iter().map(move |q| (q, self.get(q)))
    }
}

// ─── Usage Flags ──────────────────────────────────────────────────────────────

bitflags! {
    /// Capabilities a GPU buffer is created with.
    ///
    /// Builder validation checks declared edges against these: reads
    /// need one of `CONSTANT`/`VERTEX`/`INDEX`/`COPY_SRC`, writes need
    /// `STORAGE` or `COPY_DST`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GpuBufferUsage: u8 {
        /// CPU can read through a mapped pointer.
        const MAP_READ  = 1 << 0;
        /// CPU can write through a mapped pointer.
        const MAP_WRITE = 1 << 1;
        const COPY_SRC  = 1 << 2;
        const COPY_DST  = 1 << 3;
        const VERTEX    = 1 << 4;
        const INDEX     = 1 << 5;
        const CONSTANT  = 1 << 6;
        const STORAGE   = 1 << 7;
    }

    /// Capabilities a texture is created with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u8 {
        const COPY_SRC      = 1 << 0;
        const COPY_DST      = 1 << 1;
        /// Sampled in shaders (shader resource view).
        const SRV           = 1 << 2;
        /// Written from shaders (unordered access view).
        const UAV           = 1 << 3;
        const RENDER_TARGET = 1 << 4;
        const DEPTH_STENCIL = 1 << 5;
        const CUBE          = 1 << 6;
        const CUBE_ARRAY    = 1 << 7;
    }

    /// What a barrier endpoint accesses a resource as.
    ///
    /// `NONE` is a real bit so that "no prior access" survives mask
    /// unions and the copy-queue normalization of barrier inference.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BarrierAccess: u32 {
        const NONE                = 1 << 0;
        const COPY_SRC            = 1 << 1;
        const COPY_DST            = 1 << 2;
        const VERTEX              = 1 << 3;
        const INDEX               = 1 << 4;
        const CONSTANT            = 1 << 5;
        const SHADER_READ         = 1 << 6;
        const SHADER_WRITE        = 1 << 7;
        const DEPTH_STENCIL_READ  = 1 << 8;
        const DEPTH_STENCIL_WRITE = 1 << 9;
        const RENDER_TARGET       = 1 << 10;
        const PRESENT             = 1 << 11;
    }

    /// Pipeline stages a barrier endpoint synchronizes against.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStage: u32 {
        const NONE           = 1 << 0;
        const VERTEX_INPUT   = 1 << 1;
        const VERTEX_SHADER  = 1 << 2;
        const PIXEL_SHADER   = 1 << 3;
        const DEPTH_STENCIL  = 1 << 4;
        const RENDER         = 1 << 5;
        const RESOLVE        = 1 << 6;
        const ALL_GRAPHICS   = 1 << 7;
        const COMPUTE_SHADER = 1 << 8;
        const COPY           = 1 << 9;
        const ALL            = 1 << 10;
    }
}

// ─── Layouts & Formats ────────────────────────────────────────────────────────

/// Physical layout of a texture subresource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureLayout {
    #[default]
    Unknown,
    Common,
    CopySrc,
    CopyDst,
    ShaderRead,
    ShaderWrite,
    DepthStencilRead,
    DepthStencilWrite,
    RenderTarget,
    ResolveSrc,
    ResolveDst,
    Present,
}

/// Texel formats the graph cares about.
///
/// The set is intentionally small; the graph only threads formats
/// through descriptions, it never interprets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Unknown,
    R8Unorm,
    R8G8B8A8Unorm,
    R8G8B8A8UnormSrgb,
    B8G8R8A8Unorm,
    R11G11B10Float,
    R16G16B16A16Float,
    R32G32B32A32Float,
    R32Float,
    R32Uint,
    D16Unorm,
    D24UnormS8Uint,
    D32Float,
}

/// One mip level plus an array-layer range of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureSubresourceLayer {
    pub mip_level: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

impl Default for TextureSubresourceLayer {
    fn default() -> Self {
        Self {
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

/// Depth-stencil clear payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearDepthStencil {
    pub depth: f32,
    pub stencil: u32,
}

impl Default for ClearDepthStencil {
    fn default() -> Self {
        Self {
            depth: 1.0,
            stencil: 0,
        }
    }
}

/// Clear value for a created texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil(ClearDepthStencil),
}

// ─── Sampler State ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    Clamp,
    Repeat,
    MirrorRepeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    #[default]
    Point,
    Linear,
}

// ─── Resource Descriptions ────────────────────────────────────────────────────

/// Description a GPU buffer is created from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuBufferDesc {
    pub name: String,
    pub element_size: u64,
    pub element_count: u64,
    pub usages: GpuBufferUsage,
}

/// Description a texture is created from.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub array_size: u32,
    pub mip_levels: u32,
    pub format: Format,
    pub sample_count: u32,
    pub usages: TextureUsage,
    pub clear_value: Option<ClearValue>,
}

impl TextureDesc {
    /// A 2D color texture with everything else defaulted.
    #[must_use]
    pub fn new_2d(name: impl Into<String>, width: u32, height: u32, format: Format) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            depth: 1,
            array_size: 1,
            mip_levels: 1,
            format,
            sample_count: 1,
            usages: TextureUsage::empty(),
            clear_value: None,
        }
    }

    #[must_use]
    pub fn with_usages(mut self, usages: TextureUsage) -> Self {
        self.usages = usages;
        self
    }

    #[must_use]
    pub fn with_clear_value(mut self, clear_value: ClearValue) -> Self {
        self.clear_value = Some(clear_value);
        self
    }
}

/// Description a sampler is created from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SamplerDesc {
    pub name: String,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mipmap_filter: FilterMode,
}

/// Primitive assembly for render pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

/// Description a render pipeline is created from.
///
/// Shader compilation is an external service; the graph only carries
/// the compiled module names through to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPipelineDesc {
    pub name: String,
    pub vertex_shader: String,
    pub pixel_shader: String,
    pub topology: PrimitiveTopology,
    pub cull_mode: CullMode,
    pub color_format: Format,
    pub depth_format: Option<Format>,
}

/// Description a compute pipeline is created from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputePipelineDesc {
    pub name: String,
    pub compute_shader: String,
}

/// Any resource description accepted by [`crate::RenderGraph`] create
/// operations.
#[derive(Debug, Clone)]
pub enum ResourceDesc {
    Buffer(GpuBufferDesc),
    Texture(TextureDesc),
    Sampler(SamplerDesc),
    RenderPipeline(RenderPipelineDesc),
    ComputePipeline(ComputePipelineDesc),
}

impl ResourceDesc {
    /// The debug name carried by the description.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Buffer(d) => &d.name,
            Self::Texture(d) => &d.name,
            Self::Sampler(d) => &d.name,
            Self::RenderPipeline(d) => &d.name,
            Self::ComputePipeline(d) => &d.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_queue_round_trip() {
        let mut map = PerQueue::<u32>::default();
        *map.get_mut(QueueType::Compute) = 7;
        assert_eq!(*map.get(QueueType::Compute), 7);
        assert_eq!(*map.get(QueueType::Graphics), 0);
        assert_eq!(map.iter().count(), 3);
    }

    #[test]
    fn test_usage_flag_unions() {
        let usages = GpuBufferUsage::VERTEX | GpuBufferUsage::COPY_DST;
        assert!(usages.contains(GpuBufferUsage::VERTEX));
        assert!(!usages.contains(GpuBufferUsage::STORAGE));
    }
}
