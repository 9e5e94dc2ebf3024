//! In-memory [Renderer] implementation.
//!
//! Allocates keys from slotmaps and appends every recorded command to an
//! event log instead of touching a GPU. Tests assert on the log; the demos
//! use it to run a full frame loop without a device.

use ash::vk;
use slotmap::SlotMap;

use crate::{
    BlitRegion, CommandBufferId, CommandPoolId, FramebufferDesc, FramebufferId, HalError,
    RenderPassBeginDesc, RenderPassDesc, RenderPassId, Renderer, SamplerId, TextureDesc,
    TextureId, TextureViewDesc, TextureViewId,
};

///One recorded backend command. Only data that is useful for assertions is
/// kept; clear values in particular are dropped (`vk::ClearValue` is a union
/// without equality).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmdEvent {
    BeginCommandBuffer(CommandBufferId),
    EndCommandBuffer(CommandBufferId),
    BeginRenderPass {
        render_pass: RenderPassId,
        framebuffer: FramebufferId,
    },
    NextSubpass,
    EndRenderPass,
    SetViewport,
    SetScissor,
    SetTextureLayout {
        texture: TextureId,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    },
    BlitTexture {
        texture: TextureId,
        src_mip: u32,
        dst_mip: u32,
    },
    Submit(CommandBufferId),
    WaitIdle,
}

#[derive(Default)]
pub struct HeadlessRenderer {
    textures: SlotMap<TextureId, (TextureDesc, String)>,
    views: SlotMap<TextureViewId, TextureViewDesc>,
    samplers: SlotMap<SamplerId, ()>,
    render_passes: SlotMap<RenderPassId, RenderPassDesc>,
    framebuffers: SlotMap<FramebufferId, FramebufferDesc>,
    pools: SlotMap<CommandPoolId, ()>,
    command_buffers: SlotMap<CommandBufferId, CommandPoolId>,

    pub events: Vec<CmdEvent>,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        HeadlessRenderer::default()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn render_pass_count(&self) -> usize {
        self.render_passes.len()
    }

    pub fn texture_desc(&self, texture: TextureId) -> Option<&TextureDesc> {
        self.textures.get(texture).map(|(desc, _)| desc)
    }

    pub fn render_pass_desc(&self, render_pass: RenderPassId) -> Option<&RenderPassDesc> {
        self.render_passes.get(render_pass)
    }

    ///Drains the recorded event log, leaving it empty for the next frame.
    pub fn take_events(&mut self) -> Vec<CmdEvent> {
        std::mem::take(&mut self.events)
    }
}

impl Renderer for HeadlessRenderer {
    fn create_texture(&mut self, desc: &TextureDesc, name: &str) -> Result<TextureId, HalError> {
        if desc.usage.is_empty() {
            return Err(HalError::Creation {
                what: "texture",
                reason: format!("no usage flags for texture \"{}\"", name),
            });
        }
        Ok(self.textures.insert((*desc, name.to_string())))
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.textures.remove(texture);
    }

    fn create_texture_view(
        &mut self,
        desc: &TextureViewDesc,
        _name: &str,
    ) -> Result<TextureViewId, HalError> {
        if !self.textures.contains_key(desc.texture) {
            return Err(HalError::UnknownHandle("texture"));
        }
        Ok(self.views.insert(*desc))
    }

    fn destroy_texture_view(&mut self, view: TextureViewId) {
        self.views.remove(view);
    }

    fn create_sampler(&mut self, _info: &vk::SamplerCreateInfo<'_>) -> Result<SamplerId, HalError> {
        Ok(self.samplers.insert(()))
    }

    fn destroy_sampler(&mut self, sampler: SamplerId) {
        self.samplers.remove(sampler);
    }

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> Result<RenderPassId, HalError> {
        if desc.subpasses.is_empty() {
            return Err(HalError::Creation {
                what: "render pass",
                reason: "render pass without subpasses".to_string(),
            });
        }
        Ok(self.render_passes.insert(desc.clone()))
    }

    fn destroy_render_pass(&mut self, render_pass: RenderPassId) {
        self.render_passes.remove(render_pass);
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferId, HalError> {
        if !self.render_passes.contains_key(desc.render_pass) {
            return Err(HalError::UnknownHandle("render pass"));
        }
        for view in &desc.views {
            if !self.views.contains_key(*view) {
                return Err(HalError::UnknownHandle("texture view"));
            }
        }
        Ok(self.framebuffers.insert(desc.clone()))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(framebuffer);
    }

    fn create_command_pool(&mut self) -> Result<CommandPoolId, HalError> {
        Ok(self.pools.insert(()))
    }

    fn destroy_command_pool(&mut self, pool: CommandPoolId) {
        self.command_buffers.retain(|_cb, owner| *owner != pool);
        self.pools.remove(pool);
    }

    fn reset_command_pool(&mut self, pool: CommandPoolId) -> Result<(), HalError> {
        if !self.pools.contains_key(pool) {
            return Err(HalError::UnknownHandle("command pool"));
        }
        self.command_buffers.retain(|_cb, owner| *owner != pool);
        Ok(())
    }

    fn allocate_command_buffer(
        &mut self,
        pool: CommandPoolId,
    ) -> Result<CommandBufferId, HalError> {
        if !self.pools.contains_key(pool) {
            return Err(HalError::UnknownHandle("command pool"));
        }
        Ok(self.command_buffers.insert(pool))
    }

    fn begin_command_buffer(&mut self, cmd: CommandBufferId) -> Result<(), HalError> {
        if !self.command_buffers.contains_key(cmd) {
            return Err(HalError::UnknownHandle("command buffer"));
        }
        self.events.push(CmdEvent::BeginCommandBuffer(cmd));
        Ok(())
    }

    fn end_command_buffer(&mut self, cmd: CommandBufferId) -> Result<(), HalError> {
        if !self.command_buffers.contains_key(cmd) {
            return Err(HalError::UnknownHandle("command buffer"));
        }
        self.events.push(CmdEvent::EndCommandBuffer(cmd));
        Ok(())
    }

    fn cmd_begin_render_pass(&mut self, _cmd: CommandBufferId, begin: &RenderPassBeginDesc) {
        self.events.push(CmdEvent::BeginRenderPass {
            render_pass: begin.render_pass,
            framebuffer: begin.framebuffer,
        });
    }

    fn cmd_next_subpass(&mut self, _cmd: CommandBufferId) {
        self.events.push(CmdEvent::NextSubpass);
    }

    fn cmd_end_render_pass(&mut self, _cmd: CommandBufferId) {
        self.events.push(CmdEvent::EndRenderPass);
    }

    fn cmd_set_viewport(&mut self, _cmd: CommandBufferId, _viewport: vk::Viewport) {
        self.events.push(CmdEvent::SetViewport);
    }

    fn cmd_set_scissor(&mut self, _cmd: CommandBufferId, _scissor: vk::Rect2D) {
        self.events.push(CmdEvent::SetScissor);
    }

    fn cmd_set_texture_layout(
        &mut self,
        _cmd: CommandBufferId,
        texture: TextureId,
        _range: vk::ImageSubresourceRange,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        self.events.push(CmdEvent::SetTextureLayout {
            texture,
            old_layout,
            new_layout,
        });
    }

    fn cmd_blit_texture(
        &mut self,
        _cmd: CommandBufferId,
        texture: TextureId,
        region: &BlitRegion,
        _src_layout: vk::ImageLayout,
        _dst_layout: vk::ImageLayout,
    ) {
        self.events.push(CmdEvent::BlitTexture {
            texture,
            src_mip: region.src_mip,
            dst_mip: region.dst_mip,
        });
    }

    fn submit_graphics(&mut self, cmd: CommandBufferId) -> Result<(), HalError> {
        if !self.command_buffers.contains_key(cmd) {
            return Err(HalError::UnknownHandle("command buffer"));
        }
        self.events.push(CmdEvent::Submit(cmd));
        Ok(())
    }

    fn wait_idle(&mut self) {
        self.events.push(CmdEvent::WaitIdle);
    }
}
