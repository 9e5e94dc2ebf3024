use ahash::AHashMap;
use brazier_hal::{CommandBufferId, RenderPassId, Renderer, TextureViewId, ash::vk};
use smallvec::SmallVec;

use crate::{
    GraphError,
    attachment::{AttachmentDesc, layer_view_name, mip_view_name},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

///Mip chain policy of an output. `PostBlit` generates the chain with
/// successive same-texture blits right after the producing render pass closes,
/// which also makes the producing pass unmergeable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MipGen {
    #[default]
    None,
    PostBlit,
}

///How an output with more than one array layer is rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LayerMode {
    ///One subpass covers all layers (layered framebuffer).
    #[default]
    OneSubpass,
    ///One subpass per layer inside the same native render pass.
    MultipleSubpasses,
    ///The whole native render pass repeats once per layer.
    MultipleRenderPasses,
}

pub struct ColorOutput {
    pub name: String,
    pub desc: AttachmentDesc,
    pub clear: Option<vk::ClearValue>,
    pub mip_gen: MipGen,
    pub layer_mode: LayerMode,
}

pub struct DepthStencilOutput {
    pub name: String,
    pub desc: AttachmentDesc,
    pub clear: Option<vk::ClearDepthStencilValue>,
}

///Authoring-time declaration of a single pass. Pure data, filled by
/// [PassBuilder](crate::PassBuilder); invalid combinations are caught
/// centrally in `validate()`, never here.
#[derive(Default)]
pub struct PassDesc {
    pub kind: PipelineKind,
    pub color_outputs: SmallVec<[ColorOutput; 4]>,
    pub depth_stencil_output: Option<DepthStencilOutput>,

    ///Full-image sampled reads of another pass' output.
    pub color_inputs: SmallVec<[String; 4]>,
    pub depth_stencil_inputs: SmallVec<[String; 1]>,

    ///Subpass-local reads. Require the producing subpass to live in the same
    /// native render pass at identical resolution.
    pub color_input_attachments: SmallVec<[String; 4]>,
    pub depth_stencil_input_attachments: SmallVec<[String; 1]>,
}

impl Default for PipelineKind {
    fn default() -> Self {
        PipelineKind::Graphics
    }
}

impl PassDesc {
    pub(crate) fn writes(&self, name: &str) -> bool {
        self.color_outputs.iter().any(|o| o.name == name)
            || self
                .depth_stencil_output
                .as_ref()
                .is_some_and(|d| d.name == name)
    }

    ///All declared inputs, full-image and subpass-local alike, in
    /// declaration order.
    pub(crate) fn iter_inputs(&self) -> impl Iterator<Item = &str> {
        self.color_inputs
            .iter()
            .chain(self.color_input_attachments.iter())
            .chain(self.depth_stencil_inputs.iter())
            .chain(self.depth_stencil_input_attachments.iter())
            .map(|s| s.as_str())
    }

    pub(crate) fn iter_full_image_inputs(&self) -> impl Iterator<Item = &str> {
        self.color_inputs
            .iter()
            .chain(self.depth_stencil_inputs.iter())
            .map(|s| s.as_str())
    }

    pub(crate) fn iter_input_attachments(&self) -> impl Iterator<Item = &str> {
        self.color_input_attachments
            .iter()
            .chain(self.depth_stencil_input_attachments.iter())
            .map(|s| s.as_str())
    }

    ///All declared outputs with their descriptors.
    pub(crate) fn iter_outputs(&self) -> impl Iterator<Item = (&str, &AttachmentDesc)> {
        self.color_outputs
            .iter()
            .map(|o| (o.name.as_str(), &o.desc))
            .chain(
                self.depth_stencil_output
                    .as_ref()
                    .map(|d| (d.name.as_str(), &d.desc)),
            )
    }

    pub(crate) fn uses_post_blit(&self) -> bool {
        self.color_outputs
            .iter()
            .any(|o| o.mip_gen == MipGen::PostBlit)
    }

    ///The layer-replication demanded by this pass' outputs, together with the
    /// layer count. Outputs within one pass share a descriptor shape, so the
    /// first replicating output decides.
    pub(crate) fn layer_replication(&self) -> (LayerMode, u32) {
        for out in &self.color_outputs {
            if out.desc.array_layers > 1 && out.layer_mode != LayerMode::OneSubpass {
                return (out.layer_mode, out.desc.array_layers);
            }
        }
        (LayerMode::OneSubpass, 1)
    }
}

///The resolved name → texture-view table handed to
/// [Pass::update_descriptors] after compilation.
///
/// Besides the primary view per attachment it contains one sub-view per mip
/// level and per array layer, reachable through [get_mip](Self::get_mip) /
/// [get_layer](Self::get_layer).
#[derive(Default)]
pub struct ResolvedAttachments {
    pub(crate) views: AHashMap<String, TextureViewId>,
}

impl ResolvedAttachments {
    pub fn get(&self, attachment: &str) -> Option<TextureViewId> {
        self.views.get(attachment).copied()
    }

    pub fn get_mip(&self, attachment: &str, level: u32) -> Option<TextureViewId> {
        self.views.get(&mip_view_name(attachment, level)).copied()
    }

    pub fn get_layer(&self, attachment: &str, layer: u32) -> Option<TextureViewId> {
        self.views.get(&layer_view_name(attachment, layer)).copied()
    }
}

///A pass' executable side. Implementations own their pipelines and
/// descriptor state; the graph owns the declaration and the schedule.
///
/// The implementor must not record render-pass begin/end themselves, the
/// executor brackets [record](Pass::record) calls with the compiled op-code
/// stream.
pub trait Pass {
    ///Called once per `build()` for every compiled pass, with the native
    /// render pass it was placed in (`None` for compute) and the first
    /// subpass index it occupies. Pipeline creation goes here.
    fn init(
        &mut self,
        _renderer: &mut dyn Renderer,
        _render_pass: Option<RenderPassId>,
        _base_subpass: u32,
    ) -> Result<(), GraphError> {
        Ok(())
    }

    ///Called exactly once after compilation with the resolved views and the
    /// swapchain-adjusted output extent, so the pass can bind its physical
    /// inputs.
    fn update_descriptors(&mut self, _attachments: &ResolvedAttachments, _extent: vk::Extent2D) {}

    ///Records this pass' draw/dispatch work. `counter` is the array layer
    /// (for replicated layer rendering) or the render-pass repetition index,
    /// zero otherwise.
    fn record(&mut self, renderer: &mut dyn Renderer, cmd: CommandBufferId, counter: u32);

    ///Can be implemented to make debugging easier
    fn name(&self) -> &'static str {
        "unnamed pass"
    }
}
