//! # Brazier HAL
//!
//! The capability interface between the frame graph and a concrete renderer
//! backend. The frame graph never talks to a graphics API directly; it is
//! compiled and replayed against the [Renderer] trait, which a Vulkan (or
//! D3D) backend implements with real device objects.
//!
//! Backend objects are addressed through opaque slotmap keys ([TextureId],
//! [RenderPassId], ...). Descriptor structs reuse `ash::vk` value types as
//! the shared vocabulary, but this crate never loads or calls into Vulkan
//! itself.
//!
//! [HeadlessRenderer](headless::HeadlessRenderer) is an in-memory backend
//! that records every command it is asked to perform. It backs the test
//! suite and the demos.

pub use ash;

use ash::vk;
use thiserror::Error;

mod types;
pub use types::{
    AttachmentInfo, BlitRegion, FramebufferDesc, RenderPassBeginDesc, RenderPassDesc, SubpassDesc,
    SubpassDependencyDesc, TextureDesc, TextureViewDesc,
};

pub mod headless;

slotmap::new_key_type! {
    pub struct TextureId;
    pub struct TextureViewId;
    pub struct SamplerId;
    pub struct RenderPassId;
    pub struct FramebufferId;
    pub struct CommandPoolId;
    pub struct CommandBufferId;
}

///Errors a backend can surface through the capability interface.
///
/// Anything the backend reports here is treated as fatal by the frame graph;
/// there is no local recovery path.
#[derive(Debug, Error)]
pub enum HalError {
    #[error("unknown or already destroyed {0} handle")]
    UnknownHandle(&'static str),

    #[error("backend rejected {what}: {reason}")]
    Creation { what: &'static str, reason: String },

    #[error("device lost")]
    DeviceLost,
}

///Capability interface implemented by the renderer backend.
///
/// Creation calls hand out opaque keys, destruction invalidates them. All
/// `cmd_*` calls record into the given command buffer; nothing reaches the
/// GPU before [submit_graphics](Renderer::submit_graphics).
pub trait Renderer {
    fn create_texture(&mut self, desc: &TextureDesc, name: &str) -> Result<TextureId, HalError>;
    fn destroy_texture(&mut self, texture: TextureId);

    fn create_texture_view(
        &mut self,
        desc: &TextureViewDesc,
        name: &str,
    ) -> Result<TextureViewId, HalError>;
    fn destroy_texture_view(&mut self, view: TextureViewId);

    fn create_sampler(&mut self, info: &vk::SamplerCreateInfo<'_>) -> Result<SamplerId, HalError>;
    fn destroy_sampler(&mut self, sampler: SamplerId);

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> Result<RenderPassId, HalError>;
    fn destroy_render_pass(&mut self, render_pass: RenderPassId);

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferId, HalError>;
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId);

    ///Creates a transient command pool on the graphics queue family.
    fn create_command_pool(&mut self) -> Result<CommandPoolId, HalError>;
    fn destroy_command_pool(&mut self, pool: CommandPoolId);
    ///Resets the pool and recycles every command buffer allocated from it.
    fn reset_command_pool(&mut self, pool: CommandPoolId) -> Result<(), HalError>;

    fn allocate_command_buffer(&mut self, pool: CommandPoolId)
    -> Result<CommandBufferId, HalError>;
    fn begin_command_buffer(&mut self, cmd: CommandBufferId) -> Result<(), HalError>;
    fn end_command_buffer(&mut self, cmd: CommandBufferId) -> Result<(), HalError>;

    fn cmd_begin_render_pass(&mut self, cmd: CommandBufferId, begin: &RenderPassBeginDesc);
    fn cmd_next_subpass(&mut self, cmd: CommandBufferId);
    fn cmd_end_render_pass(&mut self, cmd: CommandBufferId);

    fn cmd_set_viewport(&mut self, cmd: CommandBufferId, viewport: vk::Viewport);
    fn cmd_set_scissor(&mut self, cmd: CommandBufferId, scissor: vk::Rect2D);

    fn cmd_set_texture_layout(
        &mut self,
        cmd: CommandBufferId,
        texture: TextureId,
        range: vk::ImageSubresourceRange,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    );

    ///Blits between two mip levels of the same texture. Layouts name the
    /// current layout of the source and destination subresources.
    fn cmd_blit_texture(
        &mut self,
        cmd: CommandBufferId,
        texture: TextureId,
        region: &BlitRegion,
        src_layout: vk::ImageLayout,
        dst_layout: vk::ImageLayout,
    );

    fn submit_graphics(&mut self, cmd: CommandBufferId) -> Result<(), HalError>;
    ///Blocks until the graphics queue has drained.
    fn wait_idle(&mut self);
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use crate::HalError;

    #[test]
    fn assure_send_sync() {
        assert_impl_all!(HalError: Send, Sync);
    }
}
