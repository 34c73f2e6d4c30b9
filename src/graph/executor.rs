//! Frame Executor
//!
//! Walks the compiled layers, records every pass into its own command
//! context and submits per queue with inter-queue fence waits. Bindless
//! descriptors are created here, immediately before a pass records —
//! never at compile time. If a consumer's descriptor were created ahead
//! of its producer's recording, the producer could still invalidate the
//! slot the descriptor points at; creating descriptors as each pass
//! records guarantees every producer has finished recording first.
//!
//! After submission each pass and everything it touched is pushed onto
//! the retirement FIFO, tagged with the fence value its batch signals.

use std::sync::Arc;

use smallvec::SmallVec;

use super::helper::ResourceHelper;
use super::node::PassPayload;
use super::{RenderGraph, Schedule};
use crate::device::{
    BindlessHandle, CommandContext, FenceSignalInfo, FenceWaitInfo, RenderingInfo, ResourceRef,
    TextureBarrier,
};
use crate::types::{
    BarrierAccess, GpuBufferUsage, PerQueue, PipelineStage, QueueType, TextureLayout,
    TextureSubresourceLayer, TextureUsage,
};

/// Record, submit and retire every scheduled pass.
pub(crate) fn execute_frame(graph: &mut RenderGraph, schedule: &Schedule) {
    let mut layer_signals: Vec<PerQueue<Option<u64>>> = Vec::with_capacity(schedule.layers.len());

    for layer in &schedule.layers {
        let mut signalled: PerQueue<Option<u64>> = PerQueue::default();

        for queue in QueueType::ALL {
            let batch = layer.get(queue);
            if batch.is_empty() {
                continue;
            }

            let mut contexts: Vec<Box<dyn CommandContext>> = Vec::with_capacity(batch.len());
            for &index in batch {
                contexts.push(record_pass(graph, index));
            }

            let waits = collect_waits(graph, schedule, batch, &layer_signals);
            let value = graph.advance_fence_value(queue);
            let signal = FenceSignalInfo {
                fence: Arc::clone(graph.fence(queue)),
                value,
            };

            let device = Arc::clone(&graph.device);
            device.command_queue(queue).submit(contexts, &waits, &[signal]);
            *signalled.get_mut(queue) = Some(value);

            for &index in batch {
                retire_pass(graph, index, queue, value);
            }
        }
        layer_signals.push(signalled);
    }
}

/// One wait per queue that signalled a layer containing any
/// prerequisite of the batch, at the highest such value.
fn collect_waits(
    graph: &RenderGraph,
    schedule: &Schedule,
    batch: &[u32],
    layer_signals: &[PerQueue<Option<u64>>],
) -> Vec<FenceWaitInfo> {
    let mut wait_values: PerQueue<Option<u64>> = PerQueue::default();
    for &index in batch {
        let Some(dependencies) = schedule.dependencies.get(&index) else {
            continue;
        };
        for &dep in dependencies {
            let Some(dep_queue) = graph.pass(dep).map(super::node::PassNode::queue_type) else {
                continue;
            };
            let Some(&dep_layer) = schedule.pass_layer.get(&dep) else {
                continue;
            };
            if let Some(value) = *layer_signals[dep_layer].get(dep_queue) {
                let slot = wait_values.get_mut(dep_queue);
                *slot = Some(slot.map_or(value, |current| current.max(value)));
            }
        }
    }

    wait_values
        .iter()
        .filter_map(|(queue, value)| {
            value.map(|value| FenceWaitInfo {
                fence: Arc::clone(graph.fence(queue)),
                value,
            })
        })
        .collect()
}

/// Record one pass: bindless creation, barriers, pass scaffolding and
/// the executor closure, in that order.
fn record_pass(graph: &mut RenderGraph, index: u32) -> Box<dyn CommandContext> {
    let (queue, name) = {
        let pass = graph.pass(index).expect("schedule holds passes");
        (pass.queue_type(), pass.name.clone())
    };
    let device = Arc::clone(&graph.device);
    let mut ctx = device.create_command_context(queue, &name);
    ctx.begin();
    create_bindless(graph, index);
    emit_barriers(graph, index, ctx.as_mut());

    let is_render = matches!(
        graph.pass(index).expect("schedule holds passes").payload,
        PassPayload::Render { .. }
    );
    if is_render {
        begin_rendering(graph, index, ctx.as_mut());
    }

    let is_present = matches!(
        graph.pass(index).expect("schedule holds passes").payload,
        PassPayload::Present { .. }
    );
    if is_present {
        record_present(graph, index, ctx.as_mut());
    } else if let Some(mut executor) = graph
        .pass_mut(index)
        .expect("schedule holds passes")
        .executor
        .take()
    {
        let helper = ResourceHelper {
            nodes: &graph.nodes,
            resources: &graph.resources,
            pass: graph.pass(index).expect("schedule holds passes"),
        };
        executor(&helper, ctx.as_mut());
    }

    if is_render {
        ctx.end_rendering();
    }
    ctx.end();
    ctx
}

/// Create the bindless descriptors a pass's edges call for.
///
/// Buffers need Constant usage on reads or Storage usage on writes (one
/// descriptor per declared element); textures need SRV on reads or UAV
/// on writes; samplers always get one.
fn create_bindless(graph: &mut RenderGraph, index: u32) {
    let device = Arc::clone(&graph.device);

    let mut buffer_handles: Vec<(usize, SmallVec<[BindlessHandle; 4]>)> = Vec::new();
    let mut texture_handles: Vec<(usize, BindlessHandle)> = Vec::new();
    let mut sampler_handles: Vec<(usize, BindlessHandle)> = Vec::new();
    {
        let pass = graph.pass(index).expect("schedule holds passes");

        for (position, edge) in pass.buffer_edges.iter().enumerate() {
            let Some(resource) = resolve_slot(graph, edge.handle.index()) else {
                continue;
            };
            let Some(buffer) = resource.as_buffer() else {
                continue;
            };
            let usages = buffer.desc().usages;
            let eligible = (!edge.write && usages.contains(GpuBufferUsage::CONSTANT))
                || (edge.write && usages.contains(GpuBufferUsage::STORAGE));
            if !eligible {
                continue;
            }
            let mut handles = SmallVec::with_capacity(edge.element_count as usize);
            for element in 0..edge.element_count {
                handles.push(device.bindless().create_buffer_handle(
                    buffer,
                    edge.element_offset + element,
                    edge.write,
                ));
            }
            buffer_handles.push((position, handles));
        }

        for (position, edge) in pass.texture_edges.iter().enumerate() {
            let Some(resource) = resolve_slot(graph, edge.handle.index()) else {
                continue;
            };
            let Some(texture) = resource.as_texture() else {
                continue;
            };
            let usages = texture.desc().usages;
            let eligible = (!edge.write && usages.contains(TextureUsage::SRV))
                || (edge.write && usages.contains(TextureUsage::UAV));
            if !eligible {
                continue;
            }
            texture_handles.push((
                position,
                device.bindless().create_texture_handle(texture, edge.write),
            ));
        }

        for (position, edge) in pass.sampler_edges.iter().enumerate() {
            let Some(resource) = resolve_slot(graph, edge.handle.index()) else {
                continue;
            };
            let Some(sampler) = resource.as_sampler() else {
                continue;
            };
            sampler_handles.push((position, device.bindless().create_sampler_handle(sampler)));
        }
    }

    let pass = graph.pass_mut(index).expect("schedule holds passes");
    for (position, handles) in buffer_handles {
        pass.buffer_edges[position].bindless = handles;
    }
    for (position, handle) in texture_handles {
        pass.texture_edges[position].bindless = handle;
    }
    for (position, handle) in sampler_handles {
        pass.sampler_edges[position].bindless = handle;
    }
}

/// The materialized resource behind a version node, if any.
fn resolve_slot(graph: &RenderGraph, node: u32) -> Option<&ResourceRef> {
    let slot = graph.resource(node)?.slot;
    graph.resources.get(slot as usize)?.resolved()
}

/// Emit the inferred barriers for a pass.
fn emit_barriers(graph: &RenderGraph, index: u32, ctx: &mut dyn CommandContext) {
    let pass = graph.pass(index).expect("schedule holds passes");

    let buffers: Vec<_> = pass
        .buffer_barriers
        .iter()
        .filter_map(|record| {
            let buffer = resolve_slot(graph, record.handle.index())?.as_buffer()?.clone();
            Some(crate::device::GpuBufferBarrier {
                src_access: record.src_access,
                dst_access: record.dst_access,
                src_stage: record.src_stage,
                dst_stage: record.dst_stage,
                buffer,
            })
        })
        .collect();

    let textures: Vec<_> = pass
        .texture_barriers
        .iter()
        .filter_map(|record| {
            let texture = resolve_slot(graph, record.handle.index())?.as_texture()?.clone();
            Some(TextureBarrier {
                src_access: record.src_access,
                dst_access: record.dst_access,
                src_stage: record.src_stage,
                dst_stage: record.dst_stage,
                src_layout: record.src_layout,
                dst_layout: record.dst_layout,
                texture,
            })
        })
        .collect();

    ctx.resource_barrier(&buffers, &textures);
}

/// Begin rendering against the configured targets.
fn begin_rendering(graph: &RenderGraph, index: u32, ctx: &mut dyn CommandContext) {
    let pass = graph.pass(index).expect("schedule holds passes");
    let PassPayload::Render {
        render_target,
        depth_stencil,
        clear_color,
        clear_depth,
    } = &pass.payload
    else {
        return;
    };

    let Some(target) = resolve_slot(graph, render_target.index()).and_then(|r| r.as_texture().cloned())
    else {
        log::error!("pass `{}`: render target did not materialize", pass.name);
        return;
    };
    let depth_stencil = depth_stencil
        .is_valid()
        .then(|| resolve_slot(graph, depth_stencil.index()))
        .flatten()
        .and_then(|r| r.as_texture().cloned());

    ctx.begin_rendering(RenderingInfo {
        render_target: target,
        depth_stencil,
        clear_color: *clear_color,
        clear_depth: *clear_depth,
    });
}

/// The built-in present sequence: back buffer to `CopyDst`, copy the
/// source into it, transition to `Present`.
fn record_present(graph: &RenderGraph, index: u32, ctx: &mut dyn CommandContext) {
    let pass = graph.pass(index).expect("schedule holds passes");
    let PassPayload::Present { source, swap_chain } = &pass.payload else {
        return;
    };
    let Some(swap_chain) = swap_chain.as_ref() else {
        log::error!("pass `{}`: swap chain is not set", pass.name);
        return;
    };
    let Some(src) = resolve_slot(graph, source.index()).and_then(|r| r.as_texture().cloned()) else {
        log::error!("pass `{}`: present source did not materialize", pass.name);
        return;
    };

    let back_buffer = swap_chain.acquire_texture_for_rendering();
    let layer = pass
        .texture_edge(*source)
        .map_or_else(TextureSubresourceLayer::default, |edge| edge.layer);

    ctx.resource_barrier(
        &[],
        &[TextureBarrier {
            src_access: BarrierAccess::NONE,
            dst_access: BarrierAccess::COPY_DST,
            src_stage: PipelineStage::NONE,
            dst_stage: PipelineStage::COPY,
            src_layout: TextureLayout::Common,
            dst_layout: TextureLayout::CopyDst,
            texture: Arc::clone(&back_buffer),
        }],
    );

    let extent = [
        back_buffer.desc().width.min(src.desc().width),
        back_buffer.desc().height.min(src.desc().height),
        1,
    ];
    ctx.copy_texture_region(&src, [0, 0, 0], &back_buffer, [0, 0, 0], extent, layer);

    ctx.resource_barrier(
        &[],
        &[TextureBarrier {
            src_access: BarrierAccess::COPY_DST,
            dst_access: BarrierAccess::PRESENT,
            src_stage: PipelineStage::COPY,
            dst_stage: PipelineStage::NONE,
            src_layout: TextureLayout::CopyDst,
            dst_layout: TextureLayout::Present,
            texture: back_buffer,
        }],
    );
}

/// Push the pass and everything it touched onto the retirement FIFO.
fn retire_pass(graph: &mut RenderGraph, index: u32, queue: QueueType, value: u64) {
    let mut resources: Vec<ResourceRef> = Vec::new();
    let name;
    {
        let pass = graph.pass(index).expect("schedule holds passes");
        name = pass.name.clone();
        let nodes = pass
            .buffer_edges
            .iter()
            .map(|e| e.handle.index())
            .chain(pass.texture_edges.iter().map(|e| e.handle.index()))
            .chain(pass.sampler_edges.iter().map(|e| e.handle.index()))
            .chain(pass.render_pipelines.iter().map(|h| h.index()))
            .chain(pass.compute_pipelines.iter().map(|h| h.index()));
        for node in nodes {
            if let Some(resource) = resolve_slot(graph, node) {
                resources.push(resource.clone());
            }
        }
    }

    let mut bindless: Vec<BindlessHandle> = Vec::new();
    let pass = graph.pass_mut(index).expect("schedule holds passes");
    for edge in &mut pass.buffer_edges {
        bindless.extend(edge.bindless.drain(..));
    }
    for edge in &mut pass.texture_edges {
        if edge.bindless.is_valid() {
            bindless.push(std::mem::take(&mut edge.bindless));
        }
    }
    for edge in &mut pass.sampler_edges {
        if edge.bindless.is_valid() {
            bindless.push(std::mem::take(&mut edge.bindless));
        }
    }

    graph.push_retired(name, bindless, resources, queue, value);
}
