//! Graph Compiler
//!
//! Turns the declared node tables into an execution plan:
//!
//! 1. build the bipartite data-flow adjacency (pass → written resource,
//!    read resource → pass, resource → move target),
//! 2. prune everything not reachable backwards from the present pass,
//!    keeping resources written by retained passes,
//! 3. graft move-alias consumers onto the source chain's producer,
//! 4. collapse to the pass-only flow graph (readers depend on writers,
//!    a write depends on the previous version's writer),
//! 5. layer with a topological sort, failing on cycles,
//! 6. bucket each layer by queue and materialize retained resources.
//!
//! The builder API cannot declare a cyclic graph (every dependency edge
//! points from an earlier-finished pass to a later one), but the sort
//! still guards the invariant for hand-assembled or future mutation
//! paths.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use super::node::{Node, ResourceBacking};
use super::{ExecuteLayer, RenderGraph, Schedule};
use crate::error::{RenderGraphError, Result};
use crate::types::{PerQueue, ResourceDesc};

type Adjacency = FxHashMap<u32, FxHashSet<u32>>;

fn transpose(adjacency: &Adjacency) -> Adjacency {
    let mut result: Adjacency = Adjacency::default();
    for (&from, successors) in adjacency {
        result.entry(from).or_default();
        for &to in successors {
            result.entry(to).or_default().insert(from);
        }
    }
    result
}

pub(crate) fn compile(graph: &mut RenderGraph) -> Result<Schedule> {
    let Some(present) = graph.present_pass else {
        return Err(RenderGraphError::MissingConfig {
            pass: graph.name().to_owned(),
            what: "present pass",
        });
    };

    let dataflow = build_dataflow(graph);
    let (mut dataflow, retained) = prune(graph, dataflow, present);
    resolve_moves(graph, &mut dataflow, &retained);
    let flow = build_pass_flow(graph, &dataflow, &retained);
    let (layers, pass_layer) = layer(graph, &flow)?;
    materialize(graph, &retained)?;

    Ok(Schedule {
        layers,
        dependencies: transpose(&flow),
        pass_layer,
    })
}

/// Step 1: bipartite data-flow adjacency over every node index.
fn build_dataflow(graph: &RenderGraph) -> Adjacency {
    let mut dataflow = Adjacency::default();
    for index in 0..graph.nodes.len() as u32 {
        dataflow.insert(index, FxHashSet::default());
    }

    for (index, node) in graph.nodes.iter().enumerate() {
        let index = index as u32;
        match node {
            Node::Pass(pass) if pass.finished => {
                for edge in &pass.buffer_edges {
                    if edge.write {
                        dataflow.get_mut(&index).expect("seeded").insert(edge.handle.index());
                    } else {
                        dataflow
                            .get_mut(&edge.handle.index())
                            .expect("seeded")
                            .insert(index);
                    }
                }
                for edge in &pass.texture_edges {
                    if edge.write {
                        dataflow.get_mut(&index).expect("seeded").insert(edge.handle.index());
                    } else {
                        dataflow
                            .get_mut(&edge.handle.index())
                            .expect("seeded")
                            .insert(index);
                    }
                }
                for edge in &pass.sampler_edges {
                    dataflow
                        .get_mut(&edge.handle.index())
                        .expect("seeded")
                        .insert(index);
                }
                for pipeline in &pass.render_pipelines {
                    dataflow.get_mut(&pipeline.index()).expect("seeded").insert(index);
                }
                for pipeline in &pass.compute_pipelines {
                    dataflow.get_mut(&pipeline.index()).expect("seeded").insert(index);
                }
            }
            Node::Resource(resource) => {
                if let Some(target) = resource.move_target {
                    dataflow.get_mut(&index).expect("seeded").insert(target);
                }
            }
            Node::Pass(_) => {}
        }
    }
    dataflow
}

/// Step 2: reverse reachability from the present pass. A resource
/// written by a retained pass is retained even when nothing downstream
/// reads it, and the previous version of a write keeps its own writer
/// alive (write-after-write ordering needs it).
fn prune(graph: &RenderGraph, dataflow: Adjacency, present: u32) -> (Adjacency, FxHashSet<u32>) {
    let reverse = transpose(&dataflow);
    let mut retained: FxHashSet<u32> = FxHashSet::default();
    let mut stack = vec![present];

    while let Some(index) = stack.pop() {
        if !retained.insert(index) {
            continue;
        }
        if let Some(pass) = graph.pass(index) {
            for edge in pass.buffer_edges.iter().filter(|e| e.write) {
                retained.insert(edge.handle.index());
                if let Some(prev) = graph.resource(edge.handle.index()).and_then(|r| r.prev_version)
                {
                    stack.push(prev);
                }
            }
            for edge in pass.texture_edges.iter().filter(|e| e.write) {
                retained.insert(edge.handle.index());
                if let Some(prev) = graph.resource(edge.handle.index()).and_then(|r| r.prev_version)
                {
                    stack.push(prev);
                }
            }
        }
        // The content of a move alias is produced by the source chain's
        // last writer; keep that chain reachable.
        if let Some(resource) = graph.resource(index) {
            if resource.move_target.is_some() {
                stack.push(graph.newest_version(index));
            }
            if let Some(prev) = resource.prev_version {
                stack.push(prev);
            }
        }
        if let Some(previous) = reverse.get(&index) {
            stack.extend(previous.iter().copied());
        }
    }

    let filtered = dataflow
        .into_iter()
        .filter(|(index, _)| retained.contains(index))
        .map(|(index, successors)| {
            let successors = successors
                .into_iter()
                .filter(|next| retained.contains(next))
                .collect();
            (index, successors)
        })
        .collect();
    (filtered, retained)
}

/// Step 3: for every move edge, graft the alias chain's consumers onto
/// the source chain's last writer so an alias-producing pass is ordered
/// before every alias consumer.
fn resolve_moves(graph: &RenderGraph, dataflow: &mut Adjacency, retained: &FxHashSet<u32>) {
    let move_edges: Vec<(u32, u32)> = retained
        .iter()
        .filter_map(|&index| {
            let resource = graph.resource(index)?;
            let target = resource.move_target?;
            retained.contains(&target).then_some((index, target))
        })
        .collect();

    for (source, target) in move_edges {
        // The node the source chain's last writer produced.
        let source_newest = graph.newest_version(source);
        if graph.resource(source_newest).and_then(|r| r.writer).is_none() {
            continue;
        }

        // Every pass consuming any version of the alias chain.
        let mut consumers: FxHashSet<u32> = FxHashSet::default();
        let mut cursor = Some(target);
        while let Some(index) = cursor {
            let Some(node) = graph.resource(index) else { break };
            consumers.extend(node.readers.iter().copied());
            if let Some(writer) = graph.resource(index).and_then(|r| r.writer) {
                consumers.insert(writer);
            }
            cursor = node.next_version;
        }
        consumers.retain(|pass| retained.contains(pass));

        dataflow.entry(source_newest).or_default().extend(consumers);
    }
}

/// Step 4: collapse the bipartite graph into pass-only flow edges.
fn build_pass_flow(
    graph: &RenderGraph,
    dataflow: &Adjacency,
    retained: &FxHashSet<u32>,
) -> Adjacency {
    let mut flow = Adjacency::default();
    let is_scheduled_pass =
        |index: u32| graph.pass(index).is_some_and(|pass| pass.finished) && retained.contains(&index);

    for &index in retained {
        if !is_scheduled_pass(index) {
            continue;
        }
        let successors = flow.entry(index).or_default();
        if let Some(written) = dataflow.get(&index) {
            for resource in written {
                if let Some(next) = dataflow.get(resource) {
                    successors.extend(next.iter().copied().filter(|&n| is_scheduled_pass(n)));
                }
            }
        }
    }

    // A write depends on the writer of the version it supersedes.
    for &index in retained {
        if !is_scheduled_pass(index) {
            continue;
        }
        let pass = graph.pass(index).expect("checked above");
        let mut prev_writers: SmallVec<[u32; 4]> = SmallVec::new();
        for edge in pass.buffer_edges.iter().filter(|e| e.write) {
            if let Some(writer) = graph
                .resource(edge.handle.index())
                .and_then(|r| r.prev_version)
                .and_then(|prev| graph.resource(prev))
                .and_then(|prev| prev.writer)
            {
                if writer != index && is_scheduled_pass(writer) {
                    prev_writers.push(writer);
                }
            }
        }
        for edge in pass.texture_edges.iter().filter(|e| e.write) {
            if let Some(writer) = graph
                .resource(edge.handle.index())
                .and_then(|r| r.prev_version)
                .and_then(|prev| graph.resource(prev))
                .and_then(|prev| prev.writer)
            {
                if writer != index && is_scheduled_pass(writer) {
                    prev_writers.push(writer);
                }
            }
        }
        for writer in prev_writers {
            flow.entry(writer).or_default().insert(index);
        }
    }
    flow
}

/// Step 5: Kahn's algorithm by layers; within a layer passes keep
/// declaration order and are bucketed by queue.
fn layer(
    graph: &RenderGraph,
    flow: &Adjacency,
) -> Result<(Vec<ExecuteLayer>, FxHashMap<u32, usize>)> {
    let mut in_degrees: FxHashMap<u32, usize> =
        flow.keys().map(|&index| (index, 0)).collect();
    for successors in flow.values() {
        for next in successors {
            *in_degrees.get_mut(next).expect("flow is closed over passes") += 1;
        }
    }

    let mut start: Vec<u32> = in_degrees
        .iter()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(&index, _)| index)
        .collect();
    start.sort_unstable();

    let mut layers = Vec::new();
    let mut pass_layer = FxHashMap::default();
    let mut visited = 0usize;

    while !start.is_empty() {
        let mut layer: ExecuteLayer = PerQueue::default();
        let layer_index = layers.len();
        let mut next_start = Vec::new();

        for &index in &start {
            let queue = graph.pass(index).expect("flow holds passes").queue_type();
            layer.get_mut(queue).push(index);
            pass_layer.insert(index, layer_index);
            visited += 1;
        }
        for &index in &start {
            for &next in &flow[&index] {
                let degree = in_degrees.get_mut(&next).expect("flow is closed over passes");
                *degree -= 1;
                if *degree == 0 {
                    next_start.push(next);
                }
            }
        }
        next_start.sort_unstable();
        layers.push(layer);
        start = next_start;
    }

    if visited != flow.len() {
        return Err(RenderGraphError::CycleDetected {
            remaining: flow.len() - visited,
        });
    }
    Ok((layers, pass_layer))
}

/// Step 6: materialize every retained created resource from its
/// description.
fn materialize(graph: &mut RenderGraph, retained: &FxHashSet<u32>) -> Result<()> {
    let mut slots: FxHashSet<u32> = FxHashSet::default();
    for &index in retained {
        if let Some(resource) = graph.resource(index) {
            slots.insert(resource.slot);
        }
    }

    for slot in slots {
        let backing = &graph.resources[slot as usize];
        let ResourceBacking::Transient(desc) = backing else {
            continue;
        };
        let resource = match desc.clone() {
            ResourceDesc::Buffer(desc) => {
                crate::device::ResourceRef::Buffer(graph.device.create_gpu_buffer(&desc)?)
            }
            ResourceDesc::Texture(desc) => {
                crate::device::ResourceRef::Texture(graph.device.create_texture(&desc)?)
            }
            ResourceDesc::Sampler(desc) => {
                crate::device::ResourceRef::Sampler(graph.device.create_sampler(&desc)?)
            }
            ResourceDesc::RenderPipeline(desc) => {
                crate::device::ResourceRef::RenderPipeline(graph.device.create_render_pipeline(&desc)?)
            }
            ResourceDesc::ComputePipeline(desc) => crate::device::ResourceRef::ComputePipeline(
                graph.device.create_compute_pipeline(&desc)?,
            ),
        };
        graph.resources[slot as usize] = ResourceBacking::Materialized(resource);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use smallvec::SmallVec;

    use super::*;
    use crate::device::null::NullDevice;
    use crate::graph::handle::{Handle, NodeKind};
    use crate::graph::node::{GpuBufferEdge, PassNode, PassPayload, ResourceNode};
    use crate::types::{BarrierAccess, PipelineStage};

    fn read_edge(node: u32) -> GpuBufferEdge {
        GpuBufferEdge {
            handle: Handle::new(node),
            write: false,
            access: BarrierAccess::CONSTANT,
            stage: PipelineStage::COMPUTE_SHADER,
            element_offset: 0,
            element_count: 1,
            bindless: SmallVec::new(),
        }
    }

    fn write_edge(node: u32) -> GpuBufferEdge {
        GpuBufferEdge {
            write: true,
            access: BarrierAccess::SHADER_WRITE,
            ..read_edge(node)
        }
    }

    fn buffer_node(slot: u32, writer: Option<u32>, readers: &[u32]) -> Node {
        let mut node = ResourceNode::new(NodeKind::GpuBuffer, "", slot);
        node.writer = writer;
        node.readers = readers.iter().copied().collect();
        Node::Resource(node)
    }

    fn finished_pass(name: &str, payload: PassPayload) -> PassNode {
        let mut pass = PassNode::new(name, payload);
        pass.finished = true;
        pass
    }

    /// Two passes each reading what the other writes cannot be declared
    /// through the builders, but a hand-assembled arena must still be
    /// rejected by the topological sort.
    #[test]
    fn test_cyclic_flow_graph_is_rejected() {
        let device = Arc::new(NullDevice::new());
        let mut graph = RenderGraph::new(device, "cyclic");

        // node 0: buffer X, written by pass 3, read by pass 2
        // node 1: buffer Y, written by pass 2, read by pass 3 and present
        graph.nodes.push(buffer_node(0, Some(3), &[2]));
        graph.nodes.push(buffer_node(1, Some(2), &[3, 4]));

        let mut pass_a = finished_pass("a", PassPayload::Compute);
        pass_a.buffer_edges.push(read_edge(0));
        pass_a.buffer_edges.push(write_edge(1));
        graph.nodes.push(Node::Pass(pass_a));

        let mut pass_b = finished_pass("b", PassPayload::Compute);
        pass_b.buffer_edges.push(read_edge(1));
        pass_b.buffer_edges.push(write_edge(0));
        graph.nodes.push(Node::Pass(pass_b));

        let mut present = finished_pass("present", PassPayload::Present {
            source: Handle::INVALID,
            swap_chain: None,
        });
        present.buffer_edges.push(read_edge(1));
        graph.nodes.push(Node::Pass(present));
        graph.present_pass = Some(4);

        let result = compile(&mut graph);
        assert!(matches!(
            result,
            Err(RenderGraphError::CycleDetected { remaining: 3 })
        ));
        // Declaration is untouched; the caller decides to skip the frame.
        assert_eq!(graph.node_count(), 5);
    }

    #[test]
    fn test_compile_without_present_pass_is_missing_config() {
        let device = Arc::new(NullDevice::new());
        let mut graph = RenderGraph::new(device, "no-present");
        assert!(matches!(
            compile(&mut graph),
            Err(RenderGraphError::MissingConfig { what: "present pass", .. })
        ));
    }
}
