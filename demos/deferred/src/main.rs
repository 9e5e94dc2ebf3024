//! Deferred-shading frame graph on the headless backend.
//!
//! Builds the classic GBuffer -> lighting -> post-process chain and runs a
//! few frames. Run with `RUST_LOG=trace` to see the merge and aliasing
//! decisions the compiler takes; the GBuffer and lighting passes end up as
//! two subpasses of a single native render pass.

use anyhow::Result;
use brazier_framegraph::hal::headless::HeadlessRenderer;
use brazier_framegraph::hal::{CommandBufferId, Renderer, ash::vk};
use brazier_framegraph::{
    AttachmentDesc, FrameGraph, Pass, PipelineKind, ResolvedAttachments,
};

///Fills albedo/normal/depth. A real implementation would bind its pipeline in
/// `init` and draw the scene in `record`.
struct GBufferPass;

impl Pass for GBufferPass {
    fn record(&mut self, _renderer: &mut dyn Renderer, _cmd: CommandBufferId, _counter: u32) {
        log::info!("gbuffer: draw scene geometry");
    }

    fn name(&self) -> &'static str {
        "gbuffer"
    }
}

///Full-screen lighting resolve reading the GBuffer through input attachments.
#[derive(Default)]
struct LightingPass {
    albedo: Option<brazier_framegraph::hal::TextureViewId>,
}

impl Pass for LightingPass {
    fn update_descriptors(&mut self, attachments: &ResolvedAttachments, extent: vk::Extent2D) {
        self.albedo = attachments.get("albedo");
        log::info!(
            "lighting: bound gbuffer input attachments at {}x{}",
            extent.width,
            extent.height
        );
    }

    fn record(&mut self, _renderer: &mut dyn Renderer, _cmd: CommandBufferId, _counter: u32) {
        log::info!(
            "lighting: full-screen resolve (albedo view {:?})",
            self.albedo
        );
    }

    fn name(&self) -> &'static str {
        "lighting"
    }
}

///Tonemap/composite sampling the lit image, producing the backbuffer source.
struct PostProcessPass;

impl Pass for PostProcessPass {
    fn record(&mut self, _renderer: &mut dyn Renderer, _cmd: CommandBufferId, _counter: u32) {
        log::info!("post_process: tonemap");
    }

    fn name(&self) -> &'static str {
        "post_process"
    }
}

fn main() -> Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .env()
        .init()?;

    let mut renderer = HeadlessRenderer::new();
    let mut graph = FrameGraph::new();

    let color = AttachmentDesc::color_2d(vk::Format::R8G8B8A8_UNORM);
    let normal = AttachmentDesc::color_2d(vk::Format::R16G16B16A16_SFLOAT);
    let depth = AttachmentDesc::color_2d(vk::Format::D32_SFLOAT);

    graph
        .add_pass("gbuffer", PipelineKind::Graphics, Box::new(GBufferPass))
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
        .add_pass(
            "lighting",
            PipelineKind::Graphics,
            Box::new(LightingPass::default()),
        )
        .color_input_attachment("albedo")
        .color_input_attachment("normal")
        .depth_stencil_input_attachment("depth")
        .color_output("lit_color", color, None);
    graph
        .add_pass(
            "post_process",
            PipelineKind::Graphics,
            Box::new(PostProcessPass),
        )
        .color_input("lit_color")
        .color_output("backbuffer", color, None);
    graph.set_backbuffer_source("backbuffer");

    graph.build(
        &mut renderer,
        vk::Extent2D {
            width: 1920,
            height: 1080,
        },
    )?;

    log::info!(
        "compiled: {} native render pass(es), {} physical texture(s), {} op(s)",
        renderer.render_pass_count(),
        graph.physical_resource_count().unwrap_or(0),
        graph.op_count().unwrap_or(0)
    );

    for frame in 0..3 {
        log::info!("--- frame {frame} ---");
        graph.execute(&mut renderer)?;
        renderer.take_events();
    }

    graph.destroy(&mut renderer);
    Ok(())
}
