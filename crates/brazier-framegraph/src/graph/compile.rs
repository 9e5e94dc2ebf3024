//! Render-pass and op-code compilation.
//!
//! Walks the final pass stack and folds successive merge-legal graphics
//! passes into one native render pass, one subpass each. The open render
//! pass closes when the stack ends or the next pass fails the merge check;
//! closing creates the backend objects and brackets the accumulated ops with
//! `BeginRenderPass`/`EndRenderPass`. Compute passes compile to a bare
//! `CallRenderFunc`.

use brazier_hal::{
    AttachmentInfo, FramebufferDesc, FramebufferId, RenderPassDesc, RenderPassId, Renderer,
    SubpassDesc, SubpassDependencyDesc, TextureViewId, ash::vk,
};

use crate::{
    GraphError, LayerMode, MipGen,
    pass::{PassDesc, PipelineKind},
};

use super::PassSlot;
use super::exec::{CompiledGraph, OpCode, PostBlitRecord, RenderPassBeginRecord};
use super::merge::check_is_merge_valid;
use super::physical::PhysicalState;

///Accumulator for the native render pass currently being grown.
struct OpenRenderPass {
    names: Vec<String>,
    attachments: Vec<AttachmentInfo>,
    clear_values: Vec<vk::ClearValue>,
    subpasses: Vec<SubpassDesc>,
    dependencies: Vec<SubpassDependencyDesc>,
    ///ops inside the begin/end bracket
    ops: Vec<OpCode>,
    ///(pass index, base subpass) per merged member
    members: Vec<(usize, u32)>,
    extent: vk::Extent2D,
    layers: u32,
}

impl OpenRenderPass {
    fn new(extent: vk::Extent2D) -> Self {
        OpenRenderPass {
            names: Vec::new(),
            attachments: Vec::new(),
            clear_values: Vec::new(),
            subpasses: Vec::new(),
            dependencies: Vec::new(),
            ops: Vec::new(),
            members: Vec::new(),
            extent,
            layers: 1,
        }
    }

    ///Index of `name` in the attachment list, registering it on first use.
    fn attachment_index(&mut self, name: &str, info: AttachmentInfo, clear: vk::ClearValue) -> u32 {
        if let Some(pos) = self.names.iter().position(|n| n == name) {
            return pos as u32;
        }
        self.names.push(name.to_string());
        self.attachments.push(info);
        self.clear_values.push(clear);
        (self.names.len() - 1) as u32
    }
}

struct Compiler {
    ops: Vec<OpCode>,
    begin_records: Vec<RenderPassBeginRecord>,
    blit_records: Vec<PostBlitRecord>,
    render_passes: Vec<RenderPassId>,
    framebuffers: Vec<FramebufferId>,
    open: Option<OpenRenderPass>,
    surface_extent: vk::Extent2D,
}

pub(crate) fn build_render_passes_and_exec_codes(
    passes: &mut [PassSlot],
    stack: Vec<usize>,
    phys: PhysicalState,
    renderer: &mut dyn Renderer,
    surface_extent: vk::Extent2D,
) -> Result<CompiledGraph, GraphError> {
    let mut compiler = Compiler {
        ops: Vec::new(),
        begin_records: Vec::new(),
        blit_records: Vec::new(),
        render_passes: Vec::new(),
        framebuffers: Vec::new(),
        open: None,
        surface_extent,
    };

    for (pos, &pass) in stack.iter().enumerate() {
        match passes[pass].desc.kind {
            PipelineKind::Compute => {
                compiler.close_open(passes, &phys, renderer)?;
                compiler.ops.push(OpCode::CallRenderFunc { pass, counter: 0 });
                passes[pass].node.init(renderer, None, 0)?;
                compiler.emit_post_blits(passes, pass, &phys);
            }
            PipelineKind::Graphics => {
                let (mode, layer_count) = passes[pass].desc.layer_replication();
                if mode == LayerMode::MultipleRenderPasses {
                    //repetition of a whole render pass never merges; each
                    // repetition targets one layer through its own framebuffer
                    compiler.close_open(passes, &phys, renderer)?;
                    compiler.compile_repeated(passes, pass, layer_count, &phys, renderer)?;
                    continue;
                }

                if compiler.open.is_none() {
                    compiler.open = Some(OpenRenderPass::new(output_extent(
                        &passes[pass].desc,
                        surface_extent,
                    )));
                }
                compiler.append_subpasses(passes, pass, mode, layer_count, &phys);

                let close = match stack.get(pos + 1) {
                    Some(&next) => !check_is_merge_valid(passes, next, pass),
                    None => true,
                };
                if close {
                    compiler.close_open(passes, &phys, renderer)?;
                }
            }
        }
    }
    //a trailing graphics pass always closed above; this only fires on the
    // degenerate all-compute stack
    compiler.close_open(passes, &phys, renderer)?;

    //bind resolved physical inputs, exactly once per compiled pass
    for &pass in &stack {
        let extent = output_extent(&passes[pass].desc, surface_extent);
        passes[pass].node.update_descriptors(&phys.views, extent);
    }

    let PhysicalState {
        resources,
        attachment_res: _,
        views,
        view_ids,
        lifetimes,
    } = phys;

    Ok(CompiledGraph {
        pass_stack: stack,
        resources,
        views,
        view_ids,
        lifetimes,
        render_passes: compiler.render_passes,
        framebuffers: compiler.framebuffers,
        ops: compiler.ops,
        begin_records: compiler.begin_records,
        blit_records: compiler.blit_records,
    })
}

///Resolved extent of a pass' outputs; passes without outputs fall back to
/// the surface extent.
fn output_extent(desc: &PassDesc, surface: vk::Extent2D) -> vk::Extent2D {
    desc.iter_outputs()
        .next()
        .map(|(_, attachment)| {
            let extent = attachment.size.resolve(surface);
            vk::Extent2D {
                width: extent.width,
                height: extent.height,
            }
        })
        .unwrap_or(surface)
}

///Layout an attachment is left in once its producing render pass closes.
fn final_layout(phys: &PhysicalState, name: &str, is_depth: bool) -> vk::ImageLayout {
    let usage = phys.resources[phys.attachment_res[name]].usage;
    if usage.intersects(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::INPUT_ATTACHMENT) {
        if is_depth {
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        } else {
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        }
    } else if is_depth {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    } else {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    }
}

impl Compiler {
    ///Adds `pass` to the open render pass as one subpass (or one per array
    /// layer for `MultipleSubpasses`).
    fn append_subpasses(
        &mut self,
        passes: &[PassSlot],
        pass: usize,
        mode: LayerMode,
        layer_count: u32,
        phys: &PhysicalState,
    ) {
        let open = self.open.as_mut().expect("render pass opened by caller");
        let desc = &passes[pass].desc;

        let mut color_refs = Vec::with_capacity(desc.color_outputs.len());
        for out in &desc.color_outputs {
            open.layers = open.layers.max(out.desc.array_layers);
            let index = open.attachment_index(
                &out.name,
                AttachmentInfo {
                    format: out.desc.format,
                    load_op: if out.clear.is_some() {
                        vk::AttachmentLoadOp::CLEAR
                    } else {
                        vk::AttachmentLoadOp::DONT_CARE
                    },
                    store_op: vk::AttachmentStoreOp::STORE,
                    initial_layout: vk::ImageLayout::UNDEFINED,
                    final_layout: final_layout(phys, &out.name, false),
                },
                out.clear.unwrap_or_default(),
            );
            color_refs.push((index, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
        }

        let depth_stencil_ref = desc.depth_stencil_output.as_ref().map(|depth| {
            open.layers = open.layers.max(depth.desc.array_layers);
            let index = open.attachment_index(
                &depth.name,
                AttachmentInfo {
                    format: depth.desc.format,
                    load_op: if depth.clear.is_some() {
                        vk::AttachmentLoadOp::CLEAR
                    } else {
                        vk::AttachmentLoadOp::DONT_CARE
                    },
                    store_op: vk::AttachmentStoreOp::STORE,
                    initial_layout: vk::ImageLayout::UNDEFINED,
                    final_layout: final_layout(phys, &depth.name, true),
                },
                depth
                    .clear
                    .map(|depth_stencil| vk::ClearValue { depth_stencil })
                    .unwrap_or_default(),
            );
            (index, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        });

        let mut input_refs = Vec::new();
        for input in desc.iter_input_attachments() {
            //an input attachment produced outside this render pass joins it
            // pre-transitioned and must be loaded, not cleared
            let logical = &phys.resources[phys.attachment_res[input]].logical_desc;
            let layout = final_layout(phys, input, logical.is_depth_format());
            let index = open.attachment_index(
                input,
                AttachmentInfo {
                    format: logical.format,
                    load_op: vk::AttachmentLoadOp::LOAD,
                    store_op: vk::AttachmentStoreOp::STORE,
                    initial_layout: layout,
                    final_layout: layout,
                },
                vk::ClearValue::default(),
            );
            input_refs.push((index, layout));
        }

        let base_subpass = open.subpasses.len() as u32;
        let repetitions = if mode == LayerMode::MultipleSubpasses {
            layer_count
        } else {
            1
        };

        for repetition in 0..repetitions {
            let subpass = open.subpasses.len() as u32;
            if subpass > 0 {
                open.ops.push(OpCode::NextSubpass);
                if repetition > 0 {
                    //replicated subpasses write the same attachments, order
                    // their writes
                    open.dependencies.push(SubpassDependencyDesc {
                        src_subpass: subpass - 1,
                        dst_subpass: subpass,
                        src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                        dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                        src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                        dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                        flags: vk::DependencyFlags::BY_REGION,
                    });
                } else if !input_refs.is_empty() {
                    //write -> input-attachment read, restricted to the pixel
                    // region (the only legality input attachments rely on)
                    open.dependencies.push(SubpassDependencyDesc {
                        src_subpass: subpass - 1,
                        dst_subpass: subpass,
                        src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                        dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                        src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                        dst_access: vk::AccessFlags::INPUT_ATTACHMENT_READ,
                        flags: vk::DependencyFlags::BY_REGION,
                    });
                }
            }
            open.subpasses.push(SubpassDesc {
                bind_point: vk::PipelineBindPoint::GRAPHICS,
                color_refs: color_refs.clone(),
                input_refs: input_refs.clone(),
                depth_stencil_ref,
            });
            open.ops.push(OpCode::CallRenderFunc {
                pass,
                counter: repetition,
            });
        }

        open.members.push((pass, base_subpass));
    }

    ///Creates the backend objects for the open render pass and brackets its
    /// ops into the main stream. No-op when nothing is open.
    fn close_open(
        &mut self,
        passes: &mut [PassSlot],
        phys: &PhysicalState,
        renderer: &mut dyn Renderer,
    ) -> Result<(), GraphError> {
        let Some(open) = self.open.take() else {
            return Ok(());
        };

        #[cfg(feature = "logging")]
        log::trace!(
            "closing render pass with {} subpass(es): {:?}",
            open.subpasses.len(),
            open.members
                .iter()
                .map(|&(pass, _)| passes[pass].name.as_str())
                .collect::<Vec<_>>()
        );

        let render_pass = renderer.create_render_pass(&RenderPassDesc {
            attachments: open.attachments,
            subpasses: open.subpasses,
            dependencies: open.dependencies,
        })?;
        let views: Vec<TextureViewId> = open
            .names
            .iter()
            .map(|name| phys.views.get(name).unwrap())
            .collect();
        let framebuffer = renderer.create_framebuffer(&FramebufferDesc {
            render_pass,
            views,
            extent: open.extent,
            layers: open.layers,
        })?;

        let record = self.begin_records.len() as u32;
        self.begin_records.push(RenderPassBeginRecord {
            render_pass,
            framebuffer,
            area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: open.extent,
            },
            clear_values: open.clear_values,
        });

        self.ops.push(OpCode::BeginRenderPass(record));
        self.ops.extend(open.ops);
        self.ops.push(OpCode::EndRenderPass);
        self.render_passes.push(render_pass);
        self.framebuffers.push(framebuffer);

        for &(pass, base_subpass) in &open.members {
            passes[pass]
                .node
                .init(renderer, Some(render_pass), base_subpass)?;
        }
        for &(pass, _) in &open.members {
            self.emit_post_blits(passes, pass, phys);
        }

        Ok(())
    }

    ///One independent, repeated render pass per array layer; every repetition
    /// renders through a per-layer framebuffer.
    fn compile_repeated(
        &mut self,
        passes: &mut [PassSlot],
        pass: usize,
        layer_count: u32,
        phys: &PhysicalState,
        renderer: &mut dyn Renderer,
    ) -> Result<(), GraphError> {
        self.open = Some(OpenRenderPass::new(output_extent(
            &passes[pass].desc,
            self.surface_extent,
        )));
        //reuse the subpass accumulation, then strip the render pass back out
        self.append_subpasses(passes, pass, LayerMode::OneSubpass, 1, phys);
        let open = self.open.take().expect("just opened");

        let extent = open.extent;
        let render_pass = renderer.create_render_pass(&RenderPassDesc {
            attachments: open.attachments,
            subpasses: open.subpasses,
            dependencies: open.dependencies,
        })?;
        self.render_passes.push(render_pass);

        for layer in 0..layer_count {
            let views: Vec<TextureViewId> = open
                .names
                .iter()
                .map(|name| {
                    let layered =
                        phys.resources[phys.attachment_res[name]].logical_desc.array_layers > 1;
                    if layered {
                        phys.views.get_layer(name, layer).unwrap()
                    } else {
                        phys.views.get(name).unwrap()
                    }
                })
                .collect();
            let framebuffer = renderer.create_framebuffer(&FramebufferDesc {
                render_pass,
                views,
                extent,
                layers: 1,
            })?;
            self.framebuffers.push(framebuffer);

            let record = self.begin_records.len() as u32;
            self.begin_records.push(RenderPassBeginRecord {
                render_pass,
                framebuffer,
                area: vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                },
                clear_values: open.clear_values.clone(),
            });

            self.ops.push(OpCode::BeginRenderPass(record));
            self.ops.push(OpCode::CallRenderFunc {
                pass,
                counter: layer,
            });
            self.ops.push(OpCode::EndRenderPass);
        }

        passes[pass].node.init(renderer, Some(render_pass), 0)?;
        self.emit_post_blits(passes, pass, phys);

        Ok(())
    }

    ///Mip-chain generation ops for every post-blit output of `pass`, emitted
    /// right after its render pass closed.
    fn emit_post_blits(&mut self, passes: &[PassSlot], pass: usize, phys: &PhysicalState) {
        for out in &passes[pass].desc.color_outputs {
            if out.mip_gen != MipGen::PostBlit {
                continue;
            }
            let record = self.blit_records.len() as u32;
            self.blit_records.push(PostBlitRecord {
                texture: phys.texture_of(&out.name).unwrap(),
                aspect: out.desc.aspect(),
                extent: out.desc.size.resolve(self.surface_extent),
                mip_levels: out.desc.mip_levels,
                array_layers: out.desc.array_layers,
                src_layout: final_layout(phys, &out.name, false),
            });
            self.ops.push(OpCode::PostBlit(record));
        }
    }
}
