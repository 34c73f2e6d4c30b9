//! Barrier Inference
//!
//! Walks the scheduled passes in execution order and chains each edge's
//! barrier source from the most recent prior access of the same
//! underlying resource. Destination tuples come straight from the
//! declared edges; untouched resources start from no access in the
//! `Common` layout. Redundant barriers (identical src and dst tuples)
//! are dropped, and copy-queue barriers are rewritten to the layouts a
//! copy queue is allowed to see.

use rustc_hash::FxHashMap;

use super::node::{BufferBarrierRecord, TextureBarrierRecord};
use super::{RenderGraph, Schedule};
use crate::error::{RenderGraphError, Result};
use crate::types::{BarrierAccess, PipelineStage, QueueType, TextureLayout};

struct LastBufferAccess {
    access: BarrierAccess,
    stage: PipelineStage,
}

struct LastTextureAccess {
    access: BarrierAccess,
    stage: PipelineStage,
    layout: TextureLayout,
}

/// Compute and attach barrier records for every scheduled pass.
pub(crate) fn infer(graph: &mut RenderGraph, schedule: &Schedule) -> Result<()> {
    let order: Vec<u32> = schedule
        .layers
        .iter()
        .flat_map(|layer| layer.iter().flat_map(|(_, batch)| batch.iter().copied()))
        .collect();

    let mut last_buffer: FxHashMap<u32, LastBufferAccess> = FxHashMap::default();
    let mut last_texture: FxHashMap<u32, LastTextureAccess> = FxHashMap::default();

    for &index in &order {
        check_conflicting_writers(graph, schedule, index)?;

        let pass = graph.pass(index).expect("schedule holds passes");
        let mut buffer_barriers = Vec::with_capacity(pass.buffer_edges.len());
        let mut texture_barriers = Vec::with_capacity(pass.texture_edges.len());

        for edge in &pass.buffer_edges {
            let slot = graph
                .resource(edge.handle.index())
                .expect("edges hold resources")
                .slot;
            let (src_access, src_stage) = last_buffer
                .get(&slot)
                .map_or((BarrierAccess::NONE, PipelineStage::NONE), |last| {
                    (last.access, last.stage)
                });
            buffer_barriers.push(BufferBarrierRecord {
                src_access,
                dst_access: edge.access,
                src_stage,
                dst_stage: edge.stage,
                handle: edge.handle,
            });
            last_buffer.insert(
                slot,
                LastBufferAccess {
                    access: edge.access,
                    stage: edge.stage,
                },
            );
        }

        for edge in &pass.texture_edges {
            let slot = graph
                .resource(edge.handle.index())
                .expect("edges hold resources")
                .slot;
            let (src_access, src_stage, src_layout) = last_texture.get(&slot).map_or(
                (
                    BarrierAccess::NONE,
                    PipelineStage::NONE,
                    TextureLayout::Common,
                ),
                |last| (last.access, last.stage, last.layout),
            );
            texture_barriers.push(TextureBarrierRecord {
                src_access,
                dst_access: edge.access,
                src_stage,
                dst_stage: edge.stage,
                src_layout,
                dst_layout: edge.layout,
                handle: edge.handle,
            });
            last_texture.insert(
                slot,
                LastTextureAccess {
                    access: edge.access,
                    stage: edge.stage,
                    layout: edge.layout,
                },
            );
        }

        let queue = pass.queue_type();
        drop_redundant(&mut buffer_barriers, &mut texture_barriers);
        if queue == QueueType::Copy {
            rewrite_for_copy_queue(&mut buffer_barriers, &mut texture_barriers);
        }

        let pass = graph.pass_mut(index).expect("schedule holds passes");
        pass.buffer_barriers = buffer_barriers;
        pass.texture_barriers = texture_barriers;
    }
    Ok(())
}

/// Two distinct direct predecessors writing the same underlying
/// resource would race into one consumer; this only arises through
/// move-alias fan-in and fails compilation.
fn check_conflicting_writers(
    graph: &RenderGraph,
    schedule: &Schedule,
    index: u32,
) -> Result<()> {
    let Some(dependencies) = schedule.dependencies.get(&index) else {
        return Ok(());
    };
    let pass = graph.pass(index).expect("schedule holds passes");

    let slot_of = |node: u32| graph.resource(node).map(|r| r.slot);
    let mut slots: Vec<u32> = pass
        .buffer_edges
        .iter()
        .map(|e| e.handle.index())
        .chain(pass.texture_edges.iter().map(|e| e.handle.index()))
        .filter_map(slot_of)
        .collect();
    slots.sort_unstable();
    slots.dedup();

    for slot in slots {
        let mut writers = dependencies.iter().copied().filter(|&dep| {
            graph.pass(dep).is_some_and(|pass| {
                pass.buffer_edges
                    .iter()
                    .filter(|e| e.write)
                    .map(|e| e.handle.index())
                    .chain(
                        pass.texture_edges
                            .iter()
                            .filter(|e| e.write)
                            .map(|e| e.handle.index()),
                    )
                    .any(|node| slot_of(node) == Some(slot))
            })
        });
        if let (Some(first), Some(second)) = (writers.next(), writers.next()) {
            return Err(RenderGraphError::ConflictingWriters {
                name: graph
                    .resources
                    .get(slot as usize)
                    .map_or("<unknown>", |b| b.name())
                    .to_owned(),
                first: graph.pass(first).map_or_else(String::new, |p| p.name.clone()),
                second: graph.pass(second).map_or_else(String::new, |p| p.name.clone()),
            });
        }
    }
    Ok(())
}

/// A barrier whose source and destination tuples coincide does nothing.
fn drop_redundant(
    buffer_barriers: &mut Vec<BufferBarrierRecord>,
    texture_barriers: &mut Vec<TextureBarrierRecord>,
) {
    buffer_barriers
        .retain(|b| b.src_access != b.dst_access || b.src_stage != b.dst_stage);
    texture_barriers.retain(|b| {
        b.src_access != b.dst_access || b.src_stage != b.dst_stage || b.src_layout != b.dst_layout
    });
}

/// Copy queues only understand copy accesses and the `Common` layout;
/// anything else on the source side collapses to none/unknown.
fn rewrite_for_copy_queue(
    buffer_barriers: &mut [BufferBarrierRecord],
    texture_barriers: &mut [TextureBarrierRecord],
) {
    let is_copy_access =
        |access: BarrierAccess| access == BarrierAccess::COPY_SRC || access == BarrierAccess::COPY_DST;

    for barrier in buffer_barriers {
        if !is_copy_access(barrier.src_access) {
            barrier.src_access = BarrierAccess::NONE;
        }
        if barrier.src_stage != PipelineStage::COPY {
            barrier.src_stage = PipelineStage::NONE;
        }
    }
    for barrier in texture_barriers {
        if !is_copy_access(barrier.src_access) {
            barrier.src_access = BarrierAccess::NONE;
        }
        if barrier.src_stage != PipelineStage::COPY {
            barrier.src_stage = PipelineStage::NONE;
        }
        if barrier.src_layout != TextureLayout::Common {
            barrier.src_layout = TextureLayout::Unknown;
        }
        barrier.dst_layout = TextureLayout::Common;
    }
}
