#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! Frame-scoped render graph for the Kestrel engine.
//!
//! Each frame the application declares passes (render, compute, copy,
//! present) and the resources they touch; the graph compiles the
//! declaration into layered multi-queue GPU work, infers the barriers
//! between passes, creates bindless descriptors at execute time, and
//! retires everything behind fences.

pub mod device;
pub mod error;
pub mod graph;
pub mod types;

pub use device::{
    BindlessAllocator, BindlessHandle, CommandContext, CommandQueue, Device, Fence,
    FenceSignalInfo, FenceWaitInfo, GpuBuffer, GpuBufferBarrier, RenderingInfo, ResourceRef,
    Sampler, SwapChain, Texture, TextureBarrier,
};
pub use error::{RenderGraphError, Result};
pub use graph::builder::{
    ComputePassBuilder, CopyPassBuilder, PresentPassBuilder, RenderPassBuilder,
};
pub use graph::handle::{
    ComputePassHandle, ComputePipelineHandle, CopyPassHandle, GpuBufferHandle, Handle, NodeKind,
    PresentPassHandle, RenderPassHandle, RenderPipelineHandle, SamplerHandle, TextureHandle,
};
pub use graph::helper::ResourceHelper;
pub use graph::RenderGraph;
pub use types::{
    BarrierAccess, ClearDepthStencil, ClearValue, ComputePipelineDesc, Format, GpuBufferDesc,
    GpuBufferUsage, PerQueue, PipelineStage, QueueType, RenderPipelineDesc, SamplerDesc,
    TextureDesc, TextureLayout, TextureSubresourceLayer, TextureUsage,
};
