//! The compiled op-code stream and its per-frame interpreter.
//!
//! `execute` performs no graph analysis; it replays what `build` compiled,
//! dispatching purely on op-code kind. Payloads live in stable arenas on
//! [CompiledGraph] and are addressed by index, so the op list can be copied
//! or inspected independently without dangling references.

use ahash::AHashMap;
use brazier_hal::{
    BlitRegion, CommandBufferId, CommandPoolId, FramebufferId, RenderPassBeginDesc, RenderPassId,
    Renderer, TextureId, TextureViewId, ash::vk,
};

use crate::{GraphError, pass::ResolvedAttachments};

use super::PassSlot;
use super::physical::PhysicalResource;

///Number of round-robin transient command pools. Bounds how many frames of
/// command memory can be alive at once; it does not by itself allow frame
/// overlap (see [FrameGraph::execute](crate::FrameGraph::execute)).
pub(crate) const COMMAND_POOL_COUNT: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OpCode {
    ///Payload index into [CompiledGraph::begin_records].
    BeginRenderPass(u32),
    NextSubpass,
    EndRenderPass,
    ///Payload index into [CompiledGraph::blit_records].
    PostBlit(u32),
    CallRenderFunc {
        pass: usize,
        counter: u32,
    },
}

pub(crate) struct RenderPassBeginRecord {
    pub(crate) render_pass: RenderPassId,
    pub(crate) framebuffer: FramebufferId,
    pub(crate) area: vk::Rect2D,
    pub(crate) clear_values: Vec<vk::ClearValue>,
}

pub(crate) struct PostBlitRecord {
    pub(crate) texture: TextureId,
    pub(crate) aspect: vk::ImageAspectFlags,
    pub(crate) extent: vk::Extent3D,
    pub(crate) mip_levels: u32,
    pub(crate) array_layers: u32,
    ///Layout mip 0 is left in when its render pass closes.
    pub(crate) src_layout: vk::ImageLayout,
}

///Everything one `build()` produced. Dropped (released) wholesale on rebuild
/// or teardown.
pub(crate) struct CompiledGraph {
    pub(crate) pass_stack: Vec<usize>,
    pub(crate) resources: Vec<PhysicalResource>,
    pub(crate) views: ResolvedAttachments,
    pub(crate) view_ids: Vec<TextureViewId>,
    pub(crate) lifetimes: AHashMap<String, (usize, usize)>,

    pub(crate) render_passes: Vec<RenderPassId>,
    pub(crate) framebuffers: Vec<FramebufferId>,

    pub(crate) ops: Vec<OpCode>,
    pub(crate) begin_records: Vec<RenderPassBeginRecord>,
    pub(crate) blit_records: Vec<PostBlitRecord>,
}

impl CompiledGraph {
    ///Destroys every backend object this build created, in reverse
    /// dependency order.
    pub(crate) fn release(self, renderer: &mut dyn Renderer) {
        for framebuffer in self.framebuffers {
            renderer.destroy_framebuffer(framebuffer);
        }
        for render_pass in self.render_passes {
            renderer.destroy_render_pass(render_pass);
        }
        for view in self.view_ids {
            renderer.destroy_texture_view(view);
        }
        for resource in self.resources {
            renderer.destroy_texture(resource.texture);
        }
    }
}

///Replays the op-code stream into one command buffer from `pool`, submits
/// and drains the queue.
pub(crate) fn execute(
    passes: &mut [PassSlot],
    compiled: &CompiledGraph,
    renderer: &mut dyn Renderer,
    pool: CommandPoolId,
) -> Result<(), GraphError> {
    renderer.reset_command_pool(pool)?;
    let cmd = renderer.allocate_command_buffer(pool)?;
    renderer.begin_command_buffer(cmd)?;

    for op in &compiled.ops {
        match *op {
            OpCode::BeginRenderPass(record) => {
                let record = &compiled.begin_records[record as usize];
                renderer.cmd_begin_render_pass(
                    cmd,
                    &RenderPassBeginDesc {
                        render_pass: record.render_pass,
                        framebuffer: record.framebuffer,
                        render_area: record.area,
                        clear_values: record.clear_values.clone(),
                    },
                );
                renderer.cmd_set_viewport(
                    cmd,
                    vk::Viewport {
                        x: 0.0,
                        y: 0.0,
                        width: record.area.extent.width as f32,
                        height: record.area.extent.height as f32,
                        min_depth: 0.0,
                        max_depth: 1.0,
                    },
                );
                renderer.cmd_set_scissor(cmd, record.area);
            }
            OpCode::NextSubpass => renderer.cmd_next_subpass(cmd),
            OpCode::EndRenderPass => renderer.cmd_end_render_pass(cmd),
            OpCode::PostBlit(record) => {
                record_post_blit(renderer, cmd, &compiled.blit_records[record as usize]);
            }
            OpCode::CallRenderFunc { pass, counter } => {
                #[cfg(feature = "logging")]
                log::trace!("render {}", passes[pass].node.name());
                passes[pass].node.record(renderer, cmd, counter);
            }
        }
    }

    renderer.end_command_buffer(cmd)?;
    renderer.submit_graphics(cmd)?;
    //conservative model: never overlap frames, see FrameGraph::execute
    renderer.wait_idle();

    Ok(())
}

fn mip_range(record: &PostBlitRecord, level: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: record.aspect,
        base_mip_level: level,
        level_count: 1,
        base_array_layer: 0,
        layer_count: record.array_layers,
    }
}

///Generates the mip chain with successive same-texture blits, each bracketed
/// by the layout transitions the transfer needs, and leaves the whole chain
/// shader-readable.
fn record_post_blit(renderer: &mut dyn Renderer, cmd: CommandBufferId, record: &PostBlitRecord) {
    renderer.cmd_set_texture_layout(
        cmd,
        record.texture,
        mip_range(record, 0),
        record.src_layout,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    );

    let mut width = record.extent.width;
    let mut height = record.extent.height;

    for level in 1..record.mip_levels {
        let dst_width = (width / 2).max(1);
        let dst_height = (height / 2).max(1);

        renderer.cmd_set_texture_layout(
            cmd,
            record.texture,
            mip_range(record, level),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        renderer.cmd_blit_texture(
            cmd,
            record.texture,
            &BlitRegion {
                aspect: record.aspect,
                src_mip: level - 1,
                dst_mip: level,
                src_offsets: [
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: width as i32,
                        y: height as i32,
                        z: 1,
                    },
                ],
                dst_offsets: [
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: dst_width as i32,
                        y: dst_height as i32,
                        z: 1,
                    },
                ],
                base_array_layer: 0,
                layer_count: record.array_layers,
            },
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        renderer.cmd_set_texture_layout(
            cmd,
            record.texture,
            mip_range(record, level),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );

        width = dst_width;
        height = dst_height;
    }

    renderer.cmd_set_texture_layout(
        cmd,
        record.texture,
        vk::ImageSubresourceRange {
            aspect_mask: record.aspect,
            base_mip_level: 0,
            level_count: record.mip_levels,
            base_array_layer: 0,
            layer_count: record.array_layers,
        },
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );
}
