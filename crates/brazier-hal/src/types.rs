use ash::vk;

use crate::{FramebufferId, RenderPassId, TextureId, TextureViewId};

///Description of a backend texture. Usage flags are final; the frame graph
/// infers them before creation, backends are not expected to patch them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub usage: vk::ImageUsageFlags,
}

#[derive(Clone, Copy, Debug)]
pub struct TextureViewDesc {
    pub texture: TextureId,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub subresource_range: vk::ImageSubresourceRange,
}

///One attachment slot of a native render pass.
#[derive(Clone, Copy, Debug)]
pub struct AttachmentInfo {
    pub format: vk::Format,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

///References are (attachment index, layout) pairs into
/// [RenderPassDesc::attachments].
#[derive(Clone, Debug, Default)]
pub struct SubpassDesc {
    pub bind_point: vk::PipelineBindPoint,
    pub color_refs: Vec<(u32, vk::ImageLayout)>,
    pub input_refs: Vec<(u32, vk::ImageLayout)>,
    pub depth_stencil_ref: Option<(u32, vk::ImageLayout)>,
}

#[derive(Clone, Copy, Debug)]
pub struct SubpassDependencyDesc {
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub flags: vk::DependencyFlags,
}

#[derive(Clone, Debug, Default)]
pub struct RenderPassDesc {
    pub attachments: Vec<AttachmentInfo>,
    pub subpasses: Vec<SubpassDesc>,
    pub dependencies: Vec<SubpassDependencyDesc>,
}

#[derive(Clone, Debug)]
pub struct FramebufferDesc {
    pub render_pass: RenderPassId,
    ///One view per attachment of the render pass, in declaration order.
    pub views: Vec<TextureViewId>,
    pub extent: vk::Extent2D,
    pub layers: u32,
}

#[derive(Clone)]
pub struct RenderPassBeginDesc {
    pub render_pass: RenderPassId,
    pub framebuffer: FramebufferId,
    pub render_area: vk::Rect2D,
    ///Indexed like the render pass' attachments. Slots without clear policy
    /// carry a default value that the backend must ignore.
    pub clear_values: Vec<vk::ClearValue>,
}

///Same-texture blit between two mip levels, used for post-pass mip chain
/// generation.
#[derive(Clone, Copy, Debug)]
pub struct BlitRegion {
    pub aspect: vk::ImageAspectFlags,
    pub src_mip: u32,
    pub dst_mip: u32,
    pub src_offsets: [vk::Offset3D; 2],
    pub dst_offsets: [vk::Offset3D; 2],
    pub base_array_layer: u32,
    pub layer_count: u32,
}
