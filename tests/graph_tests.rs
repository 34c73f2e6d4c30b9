//! Render Graph Integration Tests
//!
//! End-to-end scenarios against the null recording device:
//! - present-only frame: swap-chain copy sequence, single submission
//! - layered scheduling across graphics/compute queues with fence waits
//! - barrier chaining between producer and consumer passes
//! - dead-pass pruning and deferred resource materialization
//! - move aliasing, conflicting-writer rejection
//! - builder invalid-latch behavior and edge idempotence
//! - bindless descriptor lifetime through the retirement FIFO

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kestrel_rdg::device::null::{NullDevice, NullSwapChain, RecordedCommand, Submission};
use kestrel_rdg::device::{Device, Texture};
use kestrel_rdg::types::{CullMode, PrimitiveTopology};
use kestrel_rdg::{
    BarrierAccess, ComputePipelineDesc, Format, GpuBufferDesc, GpuBufferUsage, PipelineStage,
    QueueType, RenderGraph, RenderGraphError, RenderPipelineDesc, SamplerDesc, TextureDesc,
    TextureLayout, TextureSubresourceLayer, TextureUsage,
};

// ============================================================================
// Helpers
// ============================================================================

fn graph(device: &Arc<NullDevice>) -> RenderGraph {
    let _ = env_logger::builder().is_test(true).try_init();
    RenderGraph::new(Arc::clone(device) as Arc<dyn Device>, "rg")
}

fn color_target(name: &str) -> TextureDesc {
    TextureDesc::new_2d(name, 4, 4, Format::R8G8B8A8Unorm)
        .with_usages(TextureUsage::RENDER_TARGET | TextureUsage::COPY_SRC)
}

fn render_pipeline(name: &str) -> RenderPipelineDesc {
    RenderPipelineDesc {
        name: name.to_owned(),
        vertex_shader: "vs_main".to_owned(),
        pixel_shader: "ps_main".to_owned(),
        topology: PrimitiveTopology::TriangleList,
        cull_mode: CullMode::Back,
        color_format: Format::R8G8B8A8Unorm,
        depth_format: None,
    }
}

fn compute_pipeline(name: &str) -> ComputePipelineDesc {
    ComputePipelineDesc {
        name: name.to_owned(),
        compute_shader: "cs_main".to_owned(),
    }
}

fn swap_chain(width: u32, height: u32) -> Arc<NullSwapChain> {
    Arc::new(NullSwapChain::new(
        TextureDesc::new_2d("backbuffer", width, height, Format::R8G8B8A8Unorm)
            .with_usages(TextureUsage::COPY_DST),
    ))
}

fn context_labels(submissions: &[Submission]) -> Vec<&str> {
    submissions
        .iter()
        .flat_map(|s| s.contexts.iter().map(|c| c.label.as_str()))
        .collect()
}

// ============================================================================
// Present-Only Frame
// ============================================================================

#[test]
fn present_only_frame_records_swap_chain_copy_sequence() {
    let device = Arc::new(NullDevice::new());
    let mut rg = graph(&device);

    let source: Arc<dyn Texture> = device
        .create_texture(
            &TextureDesc::new_2d("source", 1, 1, Format::R8G8B8A8Unorm)
                .with_usages(TextureUsage::COPY_SRC),
        )
        .unwrap();
    let source = rg.import_texture(source, "source");
    rg.present_pass()
        .from(source, TextureSubresourceLayer::default())
        .set_swap_chain(swap_chain(1, 1))
        .finish();

    rg.compile().unwrap();
    let frame = rg.execute();
    assert_eq!(frame, 0);

    let submissions = device.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].queue, QueueType::Graphics);
    assert!(submissions[0].waits.is_empty());
    assert_eq!(
        submissions[0].signals,
        vec![("rg-graphics-fence".to_owned(), 1)]
    );

    let context = &submissions[0].contexts[0];
    let back_buffer_transitions: Vec<_> = context
        .texture_barriers()
        .into_iter()
        .filter(|b| b.texture.desc().name == "backbuffer")
        .collect();
    assert_eq!(back_buffer_transitions.len(), 2);
    assert_eq!(back_buffer_transitions[0].dst_layout, TextureLayout::CopyDst);
    assert_eq!(back_buffer_transitions[1].dst_layout, TextureLayout::Present);

    let copies = context
        .commands
        .iter()
        .filter(|c| matches!(c, RecordedCommand::CopyTextureRegion { .. }))
        .count();
    assert_eq!(copies, 1);
}

// ============================================================================
// Triangle: Two Layers on One Queue
// ============================================================================

#[test]
fn render_then_present_layers_and_waits() {
    let device = Arc::new(NullDevice::new());
    let mut rg = graph(&device);

    let rt = rg.create_texture(color_target("rt"), "rt");
    let vb = rg.create_buffer(
        GpuBufferDesc {
            name: "vb".to_owned(),
            element_size: 12,
            element_count: 3,
            usages: GpuBufferUsage::VERTEX,
        },
        "vb",
    );
    let pipeline = rg.create_render_pipeline(render_pipeline("pl"), "pl");

    let mut pass = rg.render_pass("p1");
    pass.read_as_vertices(vb);
    pass.set_render_target(rt, true, TextureSubresourceLayer::default())
        .add_pipeline(pipeline)
        .set_executor(|_, ctx| ctx.draw(3, 1));
    let p1 = pass.finish();
    assert!(p1.is_valid());
    drop(pass);

    rg.present_pass()
        .from(rt, TextureSubresourceLayer::default())
        .set_swap_chain(swap_chain(4, 4))
        .finish();

    rg.compile().unwrap();
    rg.execute();

    let submissions = device.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(context_labels(&submissions), vec!["p1", "present"]);
    assert!(submissions[0].waits.is_empty());
    assert_eq!(
        submissions[1].waits,
        vec![("rg-graphics-fence".to_owned(), 1)]
    );

    // P1 transitions the render target into RenderTarget layout and
    // clears it.
    let p1_context = &submissions[0].contexts[0];
    let rt_transition = &p1_context.texture_barriers()[0];
    assert_eq!(rt_transition.texture.desc().name, "rt");
    assert_eq!(rt_transition.dst_layout, TextureLayout::RenderTarget);
    assert!(p1_context.commands.iter().any(|c| matches!(
        c,
        RecordedCommand::BeginRendering { render_target, clear_color: true, .. }
            if render_target == "rt"
    )));
    assert!(p1_context
        .commands
        .iter()
        .any(|c| matches!(c, RecordedCommand::Draw { vertex_count: 3, .. })));

    // Present sees the render target leave RenderTarget for CopySrc.
    let present_context = &submissions[1].contexts[0];
    let rt_to_copy = present_context
        .texture_barriers()
        .into_iter()
        .find(|b| b.texture.desc().name == "rt")
        .expect("present transitions the source");
    assert_eq!(rt_to_copy.src_layout, TextureLayout::RenderTarget);
    assert_eq!(rt_to_copy.dst_layout, TextureLayout::CopySrc);
}

// ============================================================================
// Cross-Queue Scheduling
// ============================================================================

#[test]
fn compute_to_render_crosses_queues_with_fence_waits() {
    let device = Arc::new(NullDevice::new());
    let mut rg = graph(&device);

    let buffer = rg.create_buffer(
        GpuBufferDesc {
            name: "b".to_owned(),
            element_size: 16,
            element_count: 4,
            usages: GpuBufferUsage::STORAGE | GpuBufferUsage::CONSTANT,
        },
        "b",
    );
    let rt = rg.create_texture(color_target("rt"), "rt");
    let cs = rg.create_compute_pipeline(compute_pipeline("cull"), "cull");
    let pl = rg.create_render_pipeline(render_pipeline("pl"), "pl");

    let mut pass = rg.compute_pass("c");
    pass.write_buffer(buffer);
    pass.add_pipeline(cs)
        .set_executor(|_, ctx| ctx.dispatch(1, 1, 1));
    assert!(pass.finish().is_valid());
    drop(pass);

    let mut pass = rg.render_pass("r");
    pass.read_buffer(buffer, PipelineStage::PIXEL_SHADER);
    pass.set_render_target(rt, true, TextureSubresourceLayer::default())
        .add_pipeline(pl)
        .set_executor(|_, ctx| ctx.draw(3, 1));
    assert!(pass.finish().is_valid());
    drop(pass);

    rg.present_pass()
        .from(rt, TextureSubresourceLayer::default())
        .set_swap_chain(swap_chain(4, 4))
        .finish();

    rg.compile().unwrap();
    rg.execute();

    let submissions = device.submissions();
    assert_eq!(submissions.len(), 3);
    assert_eq!(submissions[0].queue, QueueType::Compute);
    assert_eq!(submissions[1].queue, QueueType::Graphics);
    assert_eq!(submissions[2].queue, QueueType::Graphics);

    assert!(submissions[0].waits.is_empty());
    assert_eq!(
        submissions[1].waits,
        vec![("rg-compute-fence".to_owned(), 1)]
    );
    assert_eq!(
        submissions[2].waits,
        vec![("rg-graphics-fence".to_owned(), 1)]
    );

    // The consumer's buffer barrier chains from the producer's write.
    let r_context = &submissions[1].contexts[0];
    let chained = r_context
        .buffer_barriers()
        .into_iter()
        .find(|b| b.buffer.desc().name == "b")
        .expect("render pass sees the storage buffer");
    assert_eq!(chained.src_access, BarrierAccess::SHADER_WRITE);
    assert_eq!(chained.dst_access, BarrierAccess::CONSTANT);

    // Descriptors were created per element and released once fences
    // passed.
    assert!(device.total_bindless_count() > 0);
    assert_eq!(device.live_bindless_count(), 0);
    assert_eq!(rg.retired_count(), 0);
}

// ============================================================================
// Dead-Pass Pruning
// ============================================================================

#[test]
fn unreachable_pass_is_pruned_and_not_materialized() {
    let device = Arc::new(NullDevice::new());
    let mut rg = graph(&device);

    let rt1 = rg.create_texture(color_target("rt1"), "rt1");
    let rt2 = rg.create_texture(color_target("rt2"), "rt2");
    let pl = rg.create_render_pipeline(render_pipeline("pl"), "pl");

    let ran = Arc::new(AtomicBool::new(false));
    let ran_in_pass = Arc::clone(&ran);
    let mut pass = rg.render_pass("p1");
    pass.set_render_target(rt1, true, TextureSubresourceLayer::default())
        .add_pipeline(pl)
        .set_executor(move |_, _| {
            ran_in_pass.store(true, Ordering::Relaxed);
        });
    assert!(pass.finish().is_valid());
    drop(pass);

    let mut pass = rg.render_pass("p2");
    pass.set_render_target(rt2, true, TextureSubresourceLayer::default())
        .add_pipeline(pl)
        .set_executor(|_, ctx| ctx.draw(3, 1));
    assert!(pass.finish().is_valid());
    drop(pass);

    rg.present_pass()
        .from(rt2, TextureSubresourceLayer::default())
        .set_swap_chain(swap_chain(4, 4))
        .finish();

    rg.compile().unwrap();
    rg.execute();

    let submissions = device.submissions();
    assert_eq!(context_labels(&submissions), vec!["p2", "present"]);
    assert!(!ran.load(Ordering::Relaxed));

    // Only retained resources materialize.
    let created = device.created_resource_names();
    assert!(created.contains(&"rt2".to_owned()));
    assert!(!created.contains(&"rt1".to_owned()));
}

// ============================================================================
// Move Aliasing
// ============================================================================

#[test]
fn move_alias_orders_producer_before_alias_consumer() {
    let device = Arc::new(NullDevice::new());
    let mut rg = graph(&device);

    let t1 = rg.create_texture(color_target("shared"), "t1");
    let t2 = rg.move_from(t1, "t2");
    assert!(t2.is_valid());
    let pl = rg.create_render_pipeline(render_pipeline("pl"), "pl");

    let mut pass = rg.render_pass("p");
    pass.set_render_target(t1, true, TextureSubresourceLayer::default())
        .add_pipeline(pl)
        .set_executor(|_, ctx| ctx.draw(3, 1));
    assert!(pass.finish().is_valid());
    drop(pass);

    rg.present_pass()
        .from(t2, TextureSubresourceLayer::default())
        .set_swap_chain(swap_chain(4, 4))
        .finish();

    rg.compile().unwrap();
    rg.execute();

    let submissions = device.submissions();
    assert_eq!(context_labels(&submissions), vec!["p", "present"]);
    assert_eq!(
        submissions[1].waits,
        vec![("rg-graphics-fence".to_owned(), 1)]
    );

    // One underlying texture: RenderTarget in P, CopySrc in present.
    let transition = submissions[1].contexts[0]
        .texture_barriers()
        .into_iter()
        .find(|b| b.texture.desc().name == "shared")
        .expect("present transitions the shared texture");
    assert_eq!(transition.src_layout, TextureLayout::RenderTarget);
    assert_eq!(transition.dst_layout, TextureLayout::CopySrc);
}

#[test]
fn conflicting_writers_through_move_fan_in_fail_compile() {
    let device = Arc::new(NullDevice::new());
    let mut rg = graph(&device);

    let x = rg.create_texture(color_target("x"), "x");
    let pl = rg.create_render_pipeline(render_pipeline("pl"), "pl");

    let mut pass = rg.render_pass("p1");
    pass.set_render_target(x, true, TextureSubresourceLayer::default())
        .add_pipeline(pl)
        .set_executor(|_, ctx| ctx.draw(3, 1));
    assert!(pass.finish().is_valid());
    drop(pass);

    let x2 = rg.move_from(x, "x2");
    let mut pass = rg.render_pass("p2");
    pass.set_render_target(x2, false, TextureSubresourceLayer::default())
        .add_pipeline(pl)
        .set_executor(|_, ctx| ctx.draw(3, 1));
    assert!(pass.finish().is_valid());
    drop(pass);

    rg.present_pass()
        .from(x2, TextureSubresourceLayer::default())
        .set_swap_chain(swap_chain(4, 4))
        .finish();

    let err = rg.compile().unwrap_err();
    assert!(matches!(err, RenderGraphError::ConflictingWriters { .. }));

    // The skipped frame signals nothing and retires nothing.
    rg.execute();
    assert!(device.submissions().is_empty());
    assert_eq!(device.fence_value("rg-graphics-fence"), Some(0));
    assert_eq!(rg.retired_count(), 0);
}

// ============================================================================
// Builder Validation
// ============================================================================

#[test]
fn write_of_stale_version_is_rejected() {
    let device = Arc::new(NullDevice::new());
    let mut rg = graph(&device);

    let buffer = rg.create_buffer(
        GpuBufferDesc {
            name: "b".to_owned(),
            element_size: 4,
            element_count: 1,
            usages: GpuBufferUsage::STORAGE,
        },
        "b",
    );
    let cs = rg.create_compute_pipeline(compute_pipeline("cs"), "cs");

    let mut pass = rg.compute_pass("c");
    let first = pass.write_buffer(buffer);
    assert!(first.is_valid());
    // `buffer` now names a superseded version.
    let second = pass.write_buffer(buffer);
    assert!(!second.is_valid());
    pass.add_pipeline(cs).set_executor(|_, _| {});
    assert!(!pass.finish().is_valid());
}

#[test]
fn read_write_alias_in_one_pass_is_rejected() {
    let device = Arc::new(NullDevice::new());
    let mut rg = graph(&device);

    let buffer = rg.create_buffer(
        GpuBufferDesc {
            name: "b".to_owned(),
            element_size: 4,
            element_count: 1,
            usages: GpuBufferUsage::STORAGE | GpuBufferUsage::CONSTANT,
        },
        "b",
    );
    let cs = rg.create_compute_pipeline(compute_pipeline("cs"), "cs");

    let mut pass = rg.compute_pass("c");
    pass.read_buffer(buffer);
    assert!(!pass.write_buffer(buffer).is_valid());
    pass.add_pipeline(cs).set_executor(|_, _| {});
    assert!(!pass.finish().is_valid());
}

#[test]
fn render_pass_without_pipeline_fails_finish() {
    let device = Arc::new(NullDevice::new());
    let mut rg = graph(&device);

    let rt = rg.create_texture(color_target("rt"), "rt");
    let mut pass = rg.render_pass("p");
    pass.set_render_target(rt, true, TextureSubresourceLayer::default())
        .set_executor(|_, _| {});
    assert!(!pass.finish().is_valid());
}

#[test]
fn usage_mismatch_latches_the_builder() {
    let device = Arc::new(NullDevice::new());
    let mut rg = graph(&device);

    // No VERTEX usage, so binding as vertices must fail.
    let buffer = rg.create_buffer(
        GpuBufferDesc {
            name: "b".to_owned(),
            element_size: 4,
            element_count: 1,
            usages: GpuBufferUsage::CONSTANT,
        },
        "b",
    );
    let rt = rg.create_texture(color_target("rt"), "rt");
    let pl = rg.create_render_pipeline(render_pipeline("pl"), "pl");

    let mut pass = rg.render_pass("p");
    assert!(!pass.read_as_vertices(buffer).is_valid());
    // Latched: even valid calls are no-ops now.
    pass.set_render_target(rt, true, TextureSubresourceLayer::default())
        .add_pipeline(pl)
        .set_executor(|_, _| {});
    assert!(!pass.finish().is_valid());
}

#[test]
fn repeated_reads_union_stage_masks() {
    let device = Arc::new(NullDevice::new());
    let mut rg = graph(&device);

    let buffer = rg.create_buffer(
        GpuBufferDesc {
            name: "b".to_owned(),
            element_size: 4,
            element_count: 1,
            usages: GpuBufferUsage::CONSTANT,
        },
        "b",
    );
    let rt = rg.create_texture(color_target("rt"), "rt");
    let pl = rg.create_render_pipeline(render_pipeline("pl"), "pl");

    let mut pass = rg.render_pass("p");
    pass.read_buffer(buffer, PipelineStage::VERTEX_SHADER);
    pass.read_buffer(buffer, PipelineStage::PIXEL_SHADER);
    pass.set_render_target(rt, true, TextureSubresourceLayer::default())
        .add_pipeline(pl)
        .set_executor(|_, _| {});
    assert!(pass.finish().is_valid());
    drop(pass);

    rg.present_pass()
        .from(rt, TextureSubresourceLayer::default())
        .set_swap_chain(swap_chain(4, 4))
        .finish();
    rg.compile().unwrap();
    rg.execute();

    let submissions = device.submissions();
    let barrier = submissions[0].contexts[0]
        .buffer_barriers()
        .into_iter()
        .find(|b| b.buffer.desc().name == "b")
        .expect("constant buffer gets a barrier");
    assert_eq!(
        barrier.dst_stage,
        PipelineStage::VERTEX_SHADER | PipelineStage::PIXEL_SHADER
    );
}

#[test]
fn samplers_and_pipelines_are_idempotent() {
    let device = Arc::new(NullDevice::new());
    let mut rg = graph(&device);

    let tex = rg.create_texture(
        TextureDesc::new_2d("out", 4, 4, Format::R8G8B8A8Unorm)
            .with_usages(TextureUsage::UAV | TextureUsage::COPY_SRC),
        "out",
    );
    let sampler = rg.create_sampler(
        SamplerDesc {
            name: "linear".to_owned(),
            ..SamplerDesc::default()
        },
        "linear",
    );
    let cs = rg.create_compute_pipeline(compute_pipeline("cs"), "cs");

    let mut pass = rg.compute_pass("c");
    pass.write_texture(tex, TextureSubresourceLayer::default());
    pass.add_sampler(sampler)
        .add_sampler(sampler)
        .add_pipeline(cs)
        .add_pipeline(cs)
        .set_executor(|_, ctx| ctx.dispatch(1, 1, 1));
    assert!(pass.finish().is_valid());
    drop(pass);

    rg.present_pass()
        .from(tex, TextureSubresourceLayer::default())
        .set_swap_chain(swap_chain(4, 4))
        .finish();
    rg.compile().unwrap();
    rg.execute();

    // One UAV descriptor for the storage texture and one for the
    // sampler: the duplicate declarations collapsed.
    assert_eq!(device.total_bindless_count(), 2);
    assert_eq!(device.live_bindless_count(), 0);
}

// ============================================================================
// Imports, Names, Frame Lifecycle
// ============================================================================

#[test]
fn importing_the_same_resource_twice_is_idempotent() {
    let device = Arc::new(NullDevice::new());
    let mut rg = graph(&device);

    let texture: Arc<dyn Texture> = device
        .create_texture(
            &TextureDesc::new_2d("t", 1, 1, Format::R8G8B8A8Unorm)
                .with_usages(TextureUsage::COPY_SRC),
        )
        .unwrap();
    let first = rg.import_texture(Arc::clone(&texture), "t");
    let second = rg.import_texture(texture, "");
    assert!(first.is_valid());
    assert_eq!(first, second);
    assert_eq!(rg.texture_handle("t"), first);
}

#[test]
fn name_collision_yields_invalid_handle() {
    let device = Arc::new(NullDevice::new());
    let mut rg = graph(&device);

    let first = rg.create_texture(color_target("a"), "shared-name");
    let second = rg.create_texture(color_target("b"), "shared-name");
    assert!(first.is_valid());
    assert!(!second.is_valid());
}

#[test]
fn execute_without_compile_skips_the_frame() {
    let device = Arc::new(NullDevice::new());
    let mut rg = graph(&device);

    let frame = rg.execute();
    assert_eq!(frame, 0);
    assert_eq!(rg.frame_index(), 0);
    assert!(device.submissions().is_empty());
}

#[test]
fn frames_advance_fence_values_and_frame_index() {
    let device = Arc::new(NullDevice::new());
    let mut rg = graph(&device);

    for expected_frame in 0..2u64 {
        let source: Arc<dyn Texture> = device
            .create_texture(
                &TextureDesc::new_2d("source", 1, 1, Format::R8G8B8A8Unorm)
                    .with_usages(TextureUsage::COPY_SRC),
            )
            .unwrap();
        let source = rg.import_texture(source, "source");
        rg.present_pass()
            .from(source, TextureSubresourceLayer::default())
            .set_swap_chain(swap_chain(1, 1))
            .finish();
        rg.compile().unwrap();
        assert_eq!(rg.execute(), expected_frame);
    }

    assert_eq!(rg.frame_index(), 2);
    assert_eq!(device.fence_value("rg-graphics-fence"), Some(2));
    assert_eq!(device.fence_value("rg-compute-fence"), Some(0));
}
