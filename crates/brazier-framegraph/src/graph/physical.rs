//! Physical resource assignment.
//!
//! Infers usage flags from how each logical attachment is consumed across the
//! final pass stack, computes lifetime intervals, backs each attachment with
//! a physical texture (aliasing an existing one when descriptors match and
//! lifetimes are disjoint) and creates the primary view plus the per-mip and
//! per-layer sub-views.

use ahash::AHashMap;
use brazier_hal::{Renderer, TextureDesc, TextureId, TextureViewDesc, TextureViewId, ash::vk};

use crate::{
    GraphError,
    attachment::{AttachmentDesc, layer_view_name, mip_view_name},
    pass::{PipelineKind, ResolvedAttachments},
};

use super::PassSlot;

///A GPU texture backing one or more logical attachments.
pub(crate) struct PhysicalResource {
    pub(crate) texture: TextureId,
    pub(crate) logical_desc: AttachmentDesc,
    pub(crate) usage: vk::ImageUsageFlags,
    ///Inclusive pass-stack interval over all backed attachments.
    pub(crate) lifetime: (usize, usize),
    pub(crate) attachments: Vec<String>,
}

pub(crate) struct PhysicalState {
    pub(crate) resources: Vec<PhysicalResource>,
    ///attachment name -> index into `resources`
    pub(crate) attachment_res: AHashMap<String, usize>,
    pub(crate) views: ResolvedAttachments,
    pub(crate) view_ids: Vec<TextureViewId>,
    pub(crate) lifetimes: AHashMap<String, (usize, usize)>,
}

impl PhysicalState {
    pub(crate) fn texture_of(&self, attachment: &str) -> Option<TextureId> {
        self.attachment_res
            .get(attachment)
            .map(|&idx| self.resources[idx].texture)
    }
}

///Inclusive `[min, max]` pass-stack interval at which each attachment is
/// referenced as an output or any kind of input.
pub(crate) fn attachment_lifetimes(
    passes: &[PassSlot],
    stack: &[usize],
) -> AHashMap<String, (usize, usize)> {
    let mut lifetimes: AHashMap<String, (usize, usize)> = AHashMap::new();
    let mut touch = |name: &str, idx: usize| {
        lifetimes
            .entry(name.to_string())
            .and_modify(|(min, max)| {
                *min = (*min).min(idx);
                *max = (*max).max(idx);
            })
            .or_insert((idx, idx));
    };

    for (idx, &pass) in stack.iter().enumerate() {
        let desc = &passes[pass].desc;
        for (name, _) in desc.iter_outputs() {
            touch(name, idx);
        }
        for name in desc.iter_inputs() {
            touch(name, idx);
        }
    }
    lifetimes
}

///Usage flags of `name`, derived from every reference across the stack.
pub(crate) fn infer_usage(
    passes: &[PassSlot],
    stack: &[usize],
    name: &str,
    backbuffer: &str,
) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::empty();

    for &pass in stack {
        let desc = &passes[pass].desc;

        for out in &desc.color_outputs {
            if out.name != name {
                continue;
            }
            if desc.kind == PipelineKind::Compute {
                usage |= vk::ImageUsageFlags::STORAGE
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST;
            } else {
                usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
            }
            if out.mip_gen == crate::MipGen::PostBlit {
                usage |= vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
            }
        }
        if let Some(depth) = &desc.depth_stencil_output {
            if depth.name == name {
                usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
            }
        }

        if desc.iter_full_image_inputs().any(|input| input == name) {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }

        if desc.iter_input_attachments().any(|input| input == name) {
            usage |= vk::ImageUsageFlags::INPUT_ATTACHMENT;
            //an input attachment at a different resolution than the consumer
            // renders at cannot be read in place, it needs a resize-copy path
            if let Some(attachment) = find_attachment_desc(passes, name) {
                if let Some((_, consumer_out)) = desc.iter_outputs().next() {
                    if !attachment.size.same_size_class(&consumer_out.size) {
                        usage |= vk::ImageUsageFlags::TRANSFER_SRC;
                    }
                }
            }
        }
    }

    //the backbuffer source is handed on for presentation
    if name == backbuffer {
        usage |= vk::ImageUsageFlags::SAMPLED;
    }

    usage
}

fn find_attachment_desc<'p>(passes: &'p [PassSlot], name: &str) -> Option<&'p AttachmentDesc> {
    passes
        .iter()
        .flat_map(|slot| slot.desc.iter_outputs())
        .find_map(|(out_name, desc)| (out_name == name).then_some(desc))
}

fn lifetimes_disjoint(a: (usize, usize), b: (usize, usize)) -> bool {
    a.1 < b.0 || b.1 < a.0
}

///Materializes a physical texture and views for every output attachment of
/// the stack.
pub(crate) fn assign_physical_resources(
    passes: &[PassSlot],
    stack: &[usize],
    backbuffer: &str,
    renderer: &mut dyn Renderer,
    surface_extent: vk::Extent2D,
) -> Result<PhysicalState, GraphError> {
    let lifetimes = attachment_lifetimes(passes, stack);

    let mut state = PhysicalState {
        resources: Vec::new(),
        attachment_res: AHashMap::new(),
        views: ResolvedAttachments::default(),
        view_ids: Vec::new(),
        lifetimes,
    };

    for &pass in stack {
        let outputs: Vec<(String, AttachmentDesc)> = passes[pass]
            .desc
            .iter_outputs()
            .map(|(name, desc)| (name.to_string(), *desc))
            .collect();

        for (name, desc) in outputs {
            if state.attachment_res.contains_key(&name) {
                continue;
            }

            let lifetime = state.lifetimes[&name];
            let usage = infer_usage(passes, stack, &name, backbuffer);

            //alias search: identical logical descriptor, disjoint lifetime,
            // and conservatively only resources without a mip chain. Usage
            // bits are fixed at creation, so the host texture must already
            // cover everything this attachment needs.
            let alias = state.resources.iter().position(|res| {
                res.logical_desc == desc
                    && desc.mip_levels == 1
                    && res.logical_desc.mip_levels == 1
                    && lifetimes_disjoint(res.lifetime, lifetime)
                    && res.usage.contains(usage)
            });

            let res_idx = match alias {
                Some(idx) => {
                    #[cfg(feature = "logging")]
                    log::debug!(
                        "aliasing \"{}\" onto the texture of {:?} (lifetimes {:?} / {:?})",
                        name,
                        state.resources[idx].attachments,
                        state.resources[idx].lifetime,
                        lifetime
                    );
                    let res = &mut state.resources[idx];
                    res.lifetime = (res.lifetime.0.min(lifetime.0), res.lifetime.1.max(lifetime.1));
                    res.attachments.push(name.clone());
                    idx
                }
                None => {
                    let tex_desc = TextureDesc {
                        extent: desc.size.resolve(surface_extent),
                        format: desc.format,
                        mip_levels: desc.mip_levels,
                        array_layers: desc.array_layers,
                        usage,
                    };
                    #[cfg(feature = "logging")]
                    log::debug!(
                        "creating texture for \"{}\": {}x{} {:?} usage {:?}",
                        name,
                        tex_desc.extent.width,
                        tex_desc.extent.height,
                        tex_desc.format,
                        usage
                    );
                    let texture = renderer.create_texture(&tex_desc, &name)?;
                    state.resources.push(PhysicalResource {
                        texture,
                        logical_desc: desc,
                        usage,
                        lifetime,
                        attachments: vec![name.clone()],
                    });
                    state.resources.len() - 1
                }
            };
            state.attachment_res.insert(name.clone(), res_idx);

            create_views(&mut state, res_idx, &name, &desc, renderer)?;
        }
    }

    Ok(state)
}

///Primary view plus one sub-view per mip level and per array layer, so
/// passes can target a single mip/layer through the resolved table.
fn create_views(
    state: &mut PhysicalState,
    res_idx: usize,
    name: &str,
    desc: &AttachmentDesc,
    renderer: &mut dyn Renderer,
) -> Result<(), GraphError> {
    let texture = state.resources[res_idx].texture;
    let aspect = desc.aspect();

    let mut add_view = |state: &mut PhysicalState,
                        view_name: String,
                        view_desc: TextureViewDesc|
     -> Result<(), GraphError> {
        let view = renderer.create_texture_view(&view_desc, &view_name)?;
        state.view_ids.push(view);
        state.views.views.insert(view_name, view);
        Ok(())
    };

    add_view(
        state,
        name.to_string(),
        TextureViewDesc {
            texture,
            view_type: desc.view_type,
            format: desc.format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: desc.array_layers,
            },
        },
    )?;

    for level in 0..desc.mip_levels {
        add_view(
            state,
            mip_view_name(name, level),
            TextureViewDesc {
                texture,
                view_type: desc.view_type,
                format: desc.format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: aspect,
                    base_mip_level: level,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: desc.array_layers,
                },
            },
        )?;
    }

    for layer in 0..desc.array_layers {
        add_view(
            state,
            layer_view_name(name, layer),
            TextureViewDesc {
                texture,
                view_type: vk::ImageViewType::TYPE_2D,
                format: desc.format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: aspect,
                    base_mip_level: 0,
                    level_count: desc.mip_levels,
                    base_array_layer: layer,
                    layer_count: 1,
                },
            },
        )?;
    }

    Ok(())
}
