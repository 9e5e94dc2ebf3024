use brazier_hal::{CommandPoolId, Renderer, TextureViewId, ash::vk};
use smallvec::SmallVec;

use crate::{
    GraphError,
    attachment::AttachmentDesc,
    pass::{
        ColorOutput, DepthStencilOutput, LayerMode, MipGen, Pass, PassDesc, PipelineKind,
    },
};

pub(crate) mod compile;
pub(crate) mod exec;
pub(crate) mod merge;
pub(crate) mod physical;
pub(crate) mod resolve;

use exec::{COMMAND_POOL_COUNT, CompiledGraph};

///One registered pass: its authoring-time declaration plus the executable
/// node the op-code stream calls back into.
pub(crate) struct PassSlot {
    pub(crate) name: String,
    pub(crate) desc: PassDesc,
    pub(crate) node: Box<dyn Pass>,
}

///The frame graph compiler and executor.
///
/// Single-threaded by contract: `build` and `execute` take `&mut self`, one
/// render thread owns the graph. `build` runs once (and again after a
/// swapchain resize); `execute` replays the compiled stream every displayed
/// frame and performs no graph analysis.
pub struct FrameGraph {
    pub(crate) passes: Vec<PassSlot>,
    pub(crate) backbuffer_source: Option<String>,
    pub(crate) compiled: Option<CompiledGraph>,

    ///Round-robin transient command pools, created on first build.
    pools: SmallVec<[CommandPoolId; COMMAND_POOL_COUNT]>,
    pool_cursor: usize,
}

impl FrameGraph {
    pub fn new() -> Self {
        FrameGraph {
            passes: Vec::new(),
            backbuffer_source: None,
            compiled: None,
            pools: SmallVec::new(),
            pool_cursor: 0,
        }
    }

    ///Registers `node` under `name` and returns a builder to declare its
    /// outputs and inputs. Registration order is the authoring order the
    /// dependency resolver starts from.
    pub fn add_pass(
        &mut self,
        name: impl Into<String>,
        kind: PipelineKind,
        node: Box<dyn Pass>,
    ) -> PassBuilder<'_> {
        self.passes.push(PassSlot {
            name: name.into(),
            desc: PassDesc {
                kind,
                ..PassDesc::default()
            },
            node,
        });
        let pass = self.passes.len() - 1;
        PassBuilder { graph: self, pass }
    }

    ///Selects the attachment the graph is compiled to produce.
    pub fn set_backbuffer_source(&mut self, name: impl Into<String>) {
        self.backbuffer_source = Some(name.into());
    }

    ///Checks the graph for configuration errors. Called by [build](Self::build)
    /// as well; a failed validation is a programmer error and fatal to the
    /// caller.
    pub fn validate(&self) -> Result<(), GraphError> {
        resolve::validate(&self.passes, self.backbuffer_source.as_deref())
    }

    ///Compiles the graph: dependency resolution, pass ordering/merging,
    /// physical resource assignment and op-code emission. May be called again
    /// after a swapchain resize; the previous build's backend objects are
    /// released first.
    pub fn build(
        &mut self,
        renderer: &mut dyn Renderer,
        surface_extent: vk::Extent2D,
    ) -> Result<(), GraphError> {
        self.validate()?;

        if let Some(old) = self.compiled.take() {
            old.release(renderer);
        }

        let backbuffer = self
            .backbuffer_source
            .as_deref()
            .expect("validated above")
            .to_string();

        let stack = resolve::initial_pass_stack(&self.passes, &backbuffer);
        #[cfg(feature = "logging")]
        log::debug!(
            "initial pass stack: {:?}",
            stack
                .iter()
                .map(|&p| self.passes[p].name.as_str())
                .collect::<Vec<_>>()
        );

        let stack = merge::optimize_pass_order(&self.passes, stack);
        #[cfg(feature = "logging")]
        log::debug!(
            "optimized pass stack: {:?}",
            stack
                .iter()
                .map(|&p| self.passes[p].name.as_str())
                .collect::<Vec<_>>()
        );

        let physical = physical::assign_physical_resources(
            &self.passes,
            &stack,
            &backbuffer,
            renderer,
            surface_extent,
        )?;

        let compiled = compile::build_render_passes_and_exec_codes(
            &mut self.passes,
            stack,
            physical,
            renderer,
            surface_extent,
        )?;

        //pools before publishing the compiled state: a failure here leaves
        // the graph unbuilt instead of built-without-pools
        if self.pools.is_empty() {
            for _ in 0..COMMAND_POOL_COUNT {
                match renderer.create_command_pool() {
                    Ok(pool) => self.pools.push(pool),
                    Err(err) => {
                        for pool in self.pools.drain(..) {
                            renderer.destroy_command_pool(pool);
                        }
                        compiled.release(renderer);
                        return Err(err.into());
                    }
                }
            }
        }
        self.compiled = Some(compiled);

        Ok(())
    }

    ///Replays the compiled op-code stream into a fresh command buffer and
    /// submits it.
    ///
    /// Synchronization is deliberately coarse: after submission the graphics
    /// queue is drained before returning, so a frame never overlaps its
    /// predecessor. The round-robin pools only guard command-pool reuse, not
    /// frame overlap.
    pub fn execute(&mut self, renderer: &mut dyn Renderer) -> Result<(), GraphError> {
        let compiled = self.compiled.as_ref().ok_or(GraphError::NotBuilt)?;

        let pool = self.pools[self.pool_cursor];
        self.pool_cursor = (self.pool_cursor + 1) % self.pools.len();

        exec::execute(&mut self.passes, compiled, renderer, pool)
    }

    ///View of the backbuffer source attachment, for presentation blits.
    /// `None` before the first build.
    pub fn backbuffer_view(&self) -> Option<TextureViewId> {
        let compiled = self.compiled.as_ref()?;
        compiled.views.get(self.backbuffer_source.as_deref()?)
    }

    ///Releases every texture, view, framebuffer and native render pass of the
    /// last build, plus the graph's command pools.
    pub fn destroy(&mut self, renderer: &mut dyn Renderer) {
        if let Some(compiled) = self.compiled.take() {
            compiled.release(renderer);
        }
        for pool in self.pools.drain(..) {
            renderer.destroy_command_pool(pool);
        }
        self.pool_cursor = 0;
    }

    ///The compiled execution order as indices into the registration order.
    /// Debugging aid, `None` before the first build.
    pub fn pass_order(&self) -> Option<&[usize]> {
        self.compiled.as_ref().map(|c| c.pass_stack.as_slice())
    }

    pub fn physical_resource_count(&self) -> Option<usize> {
        self.compiled.as_ref().map(|c| c.resources.len())
    }

    pub fn op_count(&self) -> Option<usize> {
        self.compiled.as_ref().map(|c| c.ops.len())
    }

    ///Lifetime interval of `attachment` as pass-stack indices, inclusive on
    /// both ends.
    pub fn lifetime_of(&self, attachment: &str) -> Option<(usize, usize)> {
        self.compiled
            .as_ref()
            .and_then(|c| c.lifetimes.get(attachment).copied())
    }
}

impl Default for FrameGraph {
    fn default() -> Self {
        FrameGraph::new()
    }
}

///Builder returned by [FrameGraph::add_pass]. Purely data registration, no
/// GPU calls; malformed declarations are caught centrally by `validate()`.
pub struct PassBuilder<'fg> {
    graph: &'fg mut FrameGraph,
    pass: usize,
}

impl<'fg> PassBuilder<'fg> {
    fn desc(&mut self) -> &mut PassDesc {
        &mut self.graph.passes[self.pass].desc
    }

    ///Registers a color output with default mip-gen and layer policies.
    pub fn color_output(
        self,
        name: impl Into<String>,
        desc: AttachmentDesc,
        clear: Option<vk::ClearValue>,
    ) -> Self {
        self.color_output_ext(name, desc, clear, MipGen::None, LayerMode::OneSubpass)
    }

    pub fn color_output_ext(
        mut self,
        name: impl Into<String>,
        desc: AttachmentDesc,
        clear: Option<vk::ClearValue>,
        mip_gen: MipGen,
        layer_mode: LayerMode,
    ) -> Self {
        self.desc().color_outputs.push(ColorOutput {
            name: name.into(),
            desc,
            clear,
            mip_gen,
            layer_mode,
        });
        self
    }

    pub fn depth_stencil_output(
        mut self,
        name: impl Into<String>,
        desc: AttachmentDesc,
        clear: Option<vk::ClearDepthStencilValue>,
    ) -> Self {
        self.desc().depth_stencil_output = Some(DepthStencilOutput {
            name: name.into(),
            desc,
            clear,
        });
        self
    }

    ///Full-image sampled read of another pass' output.
    pub fn color_input(mut self, name: impl Into<String>) -> Self {
        self.desc().color_inputs.push(name.into());
        self
    }

    pub fn depth_stencil_input(mut self, name: impl Into<String>) -> Self {
        self.desc().depth_stencil_inputs.push(name.into());
        self
    }

    ///Subpass-local read; requires the producer to land in the same native
    /// render pass at identical resolution.
    pub fn color_input_attachment(mut self, name: impl Into<String>) -> Self {
        self.desc().color_input_attachments.push(name.into());
        self
    }

    pub fn depth_stencil_input_attachment(mut self, name: impl Into<String>) -> Self {
        self.desc()
            .depth_stencil_input_attachments
            .push(name.into());
        self
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use brazier_hal::{CommandBufferId, Renderer, ash::vk};

    use crate::{AttachmentDesc, FrameGraph, Pass, PipelineKind};

    pub(crate) struct NullPass;

    impl Pass for NullPass {
        fn record(&mut self, _renderer: &mut dyn Renderer, _cmd: CommandBufferId, _counter: u32) {}
    }

    ///The deferred-shading scenario: GBuffer -> DeferredLighting (input
    /// attachments) -> PostProcess (sampled read) -> backbuffer.
    pub(crate) fn deferred_graph() -> FrameGraph {
        let color = AttachmentDesc::color_2d(vk::Format::R8G8B8A8_UNORM);
        let normal = AttachmentDesc::color_2d(vk::Format::R16G16B16A16_SFLOAT);
        let depth = AttachmentDesc::color_2d(vk::Format::D32_SFLOAT);

        let mut graph = FrameGraph::new();
        graph
            .add_pass("gbuffer", PipelineKind::Graphics, Box::new(NullPass))
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
            .add_pass("lighting", PipelineKind::Graphics, Box::new(NullPass))
            .color_input_attachment("albedo")
            .color_input_attachment("normal")
            .depth_stencil_input_attachment("depth")
            .color_output("lit_color", color, None);
        graph
            .add_pass("post_process", PipelineKind::Graphics, Box::new(NullPass))
            .color_input("lit_color")
            .color_output("backbuffer", color, None);
        graph.set_backbuffer_source("backbuffer");
        graph
    }
}

#[cfg(test)]
mod tests {
    use brazier_hal::{ash::vk, headless::HeadlessRenderer};

    use super::test_util::{NullPass, deferred_graph};
    use crate::{AttachmentDesc, FrameGraph, GraphError, PipelineKind};

    #[test]
    fn execute_before_build_fails() {
        let mut renderer = HeadlessRenderer::new();
        let mut graph = deferred_graph();
        assert!(matches!(
            graph.execute(&mut renderer),
            Err(GraphError::NotBuilt)
        ));
    }

    #[test]
    fn backbuffer_view_resolves_after_build() {
        let mut renderer = HeadlessRenderer::new();
        let mut graph = deferred_graph();
        assert!(graph.backbuffer_view().is_none());

        graph
            .build(
                &mut renderer,
                vk::Extent2D {
                    width: 800,
                    height: 600,
                },
            )
            .unwrap();
        assert!(graph.backbuffer_view().is_some());
    }

    #[test]
    fn destroy_releases_backend_objects() {
        let mut renderer = HeadlessRenderer::new();
        let mut graph = deferred_graph();
        graph
            .build(
                &mut renderer,
                vk::Extent2D {
                    width: 800,
                    height: 600,
                },
            )
            .unwrap();
        assert!(renderer.texture_count() > 0);

        graph.destroy(&mut renderer);
        assert_eq!(renderer.texture_count(), 0);
        assert_eq!(renderer.view_count(), 0);
        assert_eq!(renderer.render_pass_count(), 0);
    }

    #[test]
    fn failed_pool_creation_leaves_graph_unbuilt() {
        use brazier_hal::{
            BlitRegion, CommandBufferId, CommandPoolId, FramebufferDesc, FramebufferId, HalError,
            RenderPassBeginDesc, RenderPassDesc, RenderPassId, Renderer, SamplerId, TextureDesc,
            TextureId, TextureViewDesc, TextureViewId,
        };

        ///Delegates everything to the headless backend except command pool
        /// creation, which always fails.
        struct NoPoolRenderer {
            inner: HeadlessRenderer,
        }

        impl Renderer for NoPoolRenderer {
            fn create_texture(
                &mut self,
                desc: &TextureDesc,
                name: &str,
            ) -> Result<TextureId, HalError> {
                self.inner.create_texture(desc, name)
            }
            fn destroy_texture(&mut self, texture: TextureId) {
                self.inner.destroy_texture(texture);
            }
            fn create_texture_view(
                &mut self,
                desc: &TextureViewDesc,
                name: &str,
            ) -> Result<TextureViewId, HalError> {
                self.inner.create_texture_view(desc, name)
            }
            fn destroy_texture_view(&mut self, view: TextureViewId) {
                self.inner.destroy_texture_view(view);
            }
            fn create_sampler(
                &mut self,
                info: &vk::SamplerCreateInfo<'_>,
            ) -> Result<SamplerId, HalError> {
                self.inner.create_sampler(info)
            }
            fn destroy_sampler(&mut self, sampler: SamplerId) {
                self.inner.destroy_sampler(sampler);
            }
            fn create_render_pass(
                &mut self,
                desc: &RenderPassDesc,
            ) -> Result<RenderPassId, HalError> {
                self.inner.create_render_pass(desc)
            }
            fn destroy_render_pass(&mut self, render_pass: RenderPassId) {
                self.inner.destroy_render_pass(render_pass);
            }
            fn create_framebuffer(
                &mut self,
                desc: &FramebufferDesc,
            ) -> Result<FramebufferId, HalError> {
                self.inner.create_framebuffer(desc)
            }
            fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
                self.inner.destroy_framebuffer(framebuffer);
            }
            fn create_command_pool(&mut self) -> Result<CommandPoolId, HalError> {
                Err(HalError::Creation {
                    what: "command pool",
                    reason: "out of device memory".to_string(),
                })
            }
            fn destroy_command_pool(&mut self, pool: CommandPoolId) {
                self.inner.destroy_command_pool(pool);
            }
            fn reset_command_pool(&mut self, pool: CommandPoolId) -> Result<(), HalError> {
                self.inner.reset_command_pool(pool)
            }
            fn allocate_command_buffer(
                &mut self,
                pool: CommandPoolId,
            ) -> Result<CommandBufferId, HalError> {
                self.inner.allocate_command_buffer(pool)
            }
            fn begin_command_buffer(&mut self, cmd: CommandBufferId) -> Result<(), HalError> {
                self.inner.begin_command_buffer(cmd)
            }
            fn end_command_buffer(&mut self, cmd: CommandBufferId) -> Result<(), HalError> {
                self.inner.end_command_buffer(cmd)
            }
            fn cmd_begin_render_pass(&mut self, cmd: CommandBufferId, begin: &RenderPassBeginDesc) {
                self.inner.cmd_begin_render_pass(cmd, begin);
            }
            fn cmd_next_subpass(&mut self, cmd: CommandBufferId) {
                self.inner.cmd_next_subpass(cmd);
            }
            fn cmd_end_render_pass(&mut self, cmd: CommandBufferId) {
                self.inner.cmd_end_render_pass(cmd);
            }
            fn cmd_set_viewport(&mut self, cmd: CommandBufferId, viewport: vk::Viewport) {
                self.inner.cmd_set_viewport(cmd, viewport);
            }
            fn cmd_set_scissor(&mut self, cmd: CommandBufferId, scissor: vk::Rect2D) {
                self.inner.cmd_set_scissor(cmd, scissor);
            }
            fn cmd_set_texture_layout(
                &mut self,
                cmd: CommandBufferId,
                texture: TextureId,
                range: vk::ImageSubresourceRange,
                old_layout: vk::ImageLayout,
                new_layout: vk::ImageLayout,
            ) {
                self.inner
                    .cmd_set_texture_layout(cmd, texture, range, old_layout, new_layout);
            }
            fn cmd_blit_texture(
                &mut self,
                cmd: CommandBufferId,
                texture: TextureId,
                region: &BlitRegion,
                src_layout: vk::ImageLayout,
                dst_layout: vk::ImageLayout,
            ) {
                self.inner
                    .cmd_blit_texture(cmd, texture, region, src_layout, dst_layout);
            }
            fn submit_graphics(&mut self, cmd: CommandBufferId) -> Result<(), HalError> {
                self.inner.submit_graphics(cmd)
            }
            fn wait_idle(&mut self) {
                self.inner.wait_idle();
            }
        }

        let mut renderer = NoPoolRenderer {
            inner: HeadlessRenderer::new(),
        };
        let mut graph = deferred_graph();

        assert!(
            graph
                .build(
                    &mut renderer,
                    vk::Extent2D {
                        width: 800,
                        height: 600,
                    },
                )
                .is_err()
        );

        //the failed build is not published and nothing leaks
        assert!(matches!(
            graph.execute(&mut renderer),
            Err(GraphError::NotBuilt)
        ));
        assert_eq!(renderer.inner.texture_count(), 0);
        assert_eq!(renderer.inner.view_count(), 0);
        assert_eq!(renderer.inner.render_pass_count(), 0);
    }

    #[test]
    fn builder_registers_declarations() {
        let mut graph = FrameGraph::new();
        graph
            .add_pass("p", PipelineKind::Graphics, Box::new(NullPass))
            .color_output(
                "out",
                AttachmentDesc::color_2d(vk::Format::R8G8B8A8_UNORM),
                None,
            )
            .color_input("sampled")
            .color_input_attachment("local");

        let desc = &graph.passes[0].desc;
        assert_eq!(desc.color_outputs.len(), 1);
        assert_eq!(desc.color_inputs.as_slice(), ["sampled"]);
        assert_eq!(desc.color_input_attachments.as_slice(), ["local"]);
    }
}
