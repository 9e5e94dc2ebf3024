//! End-to-end run of a deferred-shading graph against the headless backend.

use std::cell::RefCell;
use std::rc::Rc;

use brazier_framegraph::hal::headless::{CmdEvent, HeadlessRenderer};
use brazier_framegraph::hal::{CommandBufferId, Renderer, ash::vk};
use brazier_framegraph::{AttachmentDesc, FrameGraph, Pass, PipelineKind};

///Pass stub that appends its name to a shared log on every record call.
struct TracedPass {
    name: &'static str,
    log: Rc<RefCell<Vec<&'static str>>>,
}

impl Pass for TracedPass {
    fn record(&mut self, _renderer: &mut dyn Renderer, _cmd: CommandBufferId, _counter: u32) {
        self.log.borrow_mut().push(self.name);
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

fn extent() -> vk::Extent2D {
    vk::Extent2D {
        width: 1280,
        height: 720,
    }
}

fn deferred(log: &Rc<RefCell<Vec<&'static str>>>) -> FrameGraph {
    let traced = |name| {
        Box::new(TracedPass {
            name,
            log: log.clone(),
        })
    };

    let color = AttachmentDesc::color_2d(vk::Format::R8G8B8A8_UNORM);
    let normal = AttachmentDesc::color_2d(vk::Format::R16G16B16A16_SFLOAT);
    let depth = AttachmentDesc::color_2d(vk::Format::D32_SFLOAT);

    let mut graph = FrameGraph::new();
    graph
        .add_pass("gbuffer", PipelineKind::Graphics, traced("gbuffer"))
        .color_output("albedo", color, Some(vk::ClearValue::default()))
        .color_output("normal", normal, Some(vk::ClearValue::default()))
        .depth_stencil_output(
            "depth",
            depth,
            Some(vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            }),
        );
    graph
        .add_pass("lighting", PipelineKind::Graphics, traced("lighting"))
        .color_input_attachment("albedo")
        .color_input_attachment("normal")
        .depth_stencil_input_attachment("depth")
        .color_output("lit_color", color, None);
    graph
        .add_pass("post_process", PipelineKind::Graphics, traced("post_process"))
        .color_input("lit_color")
        .color_output("backbuffer", color, None);
    graph.set_backbuffer_source("backbuffer");
    graph
}

#[test]
fn build_merges_gbuffer_and_lighting() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut renderer = HeadlessRenderer::new();
    let mut graph = deferred(&log);

    graph.build(&mut renderer, extent()).unwrap();

    //gbuffer+lighting share one native render pass, post_process gets its own
    assert_eq!(renderer.render_pass_count(), 2);
    assert_eq!(graph.pass_order().unwrap(), [0, 1, 2]);
    assert!(graph.backbuffer_view().is_some());

    //albedo dies with the lighting pass, backbuffer lives at the tail
    assert_eq!(graph.lifetime_of("albedo"), Some((0, 1)));
    assert_eq!(graph.lifetime_of("backbuffer"), Some((2, 2)));
}

#[test]
fn execute_replays_the_compiled_stream() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut renderer = HeadlessRenderer::new();
    let mut graph = deferred(&log);

    graph.build(&mut renderer, extent()).unwrap();
    renderer.take_events();

    graph.execute(&mut renderer).unwrap();

    assert_eq!(
        log.borrow().as_slice(),
        ["gbuffer", "lighting", "post_process"]
    );

    //ignore ids, assert on the command shape
    let shape: Vec<std::mem::Discriminant<CmdEvent>> = renderer
        .take_events()
        .iter()
        .map(std::mem::discriminant)
        .collect();
    let expected = [
        CmdEvent::BeginCommandBuffer(Default::default()),
        CmdEvent::BeginRenderPass {
            render_pass: Default::default(),
            framebuffer: Default::default(),
        },
        CmdEvent::SetViewport,
        CmdEvent::SetScissor,
        CmdEvent::NextSubpass,
        CmdEvent::EndRenderPass,
        CmdEvent::BeginRenderPass {
            render_pass: Default::default(),
            framebuffer: Default::default(),
        },
        CmdEvent::SetViewport,
        CmdEvent::SetScissor,
        CmdEvent::EndRenderPass,
        CmdEvent::EndCommandBuffer(Default::default()),
        CmdEvent::Submit(Default::default()),
        CmdEvent::WaitIdle,
    ];
    let expected: Vec<_> = expected.iter().map(std::mem::discriminant).collect();
    assert_eq!(shape, expected);
}

#[test]
fn rebuild_releases_and_recreates() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut renderer = HeadlessRenderer::new();
    let mut graph = deferred(&log);

    graph.build(&mut renderer, extent()).unwrap();
    let textures = renderer.texture_count();
    let views = renderer.view_count();
    let ops = graph.op_count();
    let resources = graph.physical_resource_count();

    //resize path: a second build must not leak backend objects and must
    // compile to the same stream
    graph
        .build(
            &mut renderer,
            vk::Extent2D {
                width: 2560,
                height: 1440,
            },
        )
        .unwrap();

    assert_eq!(renderer.texture_count(), textures);
    assert_eq!(renderer.view_count(), views);
    assert_eq!(renderer.render_pass_count(), 2);
    assert_eq!(graph.op_count(), ops);
    assert_eq!(graph.physical_resource_count(), resources);
}

#[test]
fn three_frames_in_a_row() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut renderer = HeadlessRenderer::new();
    let mut graph = deferred(&log);

    graph.build(&mut renderer, extent()).unwrap();

    //more frames than command pools, so the round-robin wraps
    for _ in 0..4 {
        graph.execute(&mut renderer).unwrap();
    }
    assert_eq!(log.borrow().len(), 3 * 4);

    graph.destroy(&mut renderer);
    assert_eq!(renderer.texture_count(), 0);
    assert_eq!(renderer.view_count(), 0);
    assert_eq!(renderer.render_pass_count(), 0);
}
