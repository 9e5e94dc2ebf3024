//! # Brazier frame graph
//!
//! A declarative pass-dependency scheduler. Passes declare named logical
//! attachments they produce and consume; [FrameGraph::build] resolves which
//! passes are needed to produce the requested backbuffer attachment, orders
//! and merges them into native render-pass/subpass groupings, allocates (and
//! aliases) the physical textures behind each attachment and compiles
//! everything into a flat op-code stream. [FrameGraph::execute] only replays
//! that stream, once per displayed frame.
//!
//! The graph is compiled against the [Renderer](brazier_hal::Renderer)
//! capability interface and never talks to a graphics API directly.
//!
//! ```no_run
//! # use brazier_framegraph::*;
//! # use brazier_hal::ash::vk;
//! # struct Noop;
//! # impl Pass for Noop {
//! #     fn record(&mut self, _: &mut dyn brazier_hal::Renderer, _: brazier_hal::CommandBufferId, _: u32) {}
//! # }
//! # let mut renderer = brazier_hal::headless::HeadlessRenderer::new();
//! let mut graph = FrameGraph::new();
//! graph
//!     .add_pass("tonemap", PipelineKind::Graphics, Box::new(Noop))
//!     .color_input("hdr")
//!     .color_output(
//!         "backbuffer",
//!         AttachmentDesc::color_2d(vk::Format::B8G8R8A8_UNORM),
//!         None,
//!     );
//! # graph.add_pass("scene", PipelineKind::Graphics, Box::new(Noop))
//! #     .color_output("hdr", AttachmentDesc::color_2d(vk::Format::R16G16B16A16_SFLOAT), None);
//! graph.set_backbuffer_source("backbuffer");
//! graph.build(&mut renderer, vk::Extent2D { width: 1920, height: 1080 })?;
//! graph.execute(&mut renderer)?;
//! # Ok::<(), GraphError>(())
//! ```

use brazier_hal::HalError;
use thiserror::Error;

pub mod attachment;
pub use attachment::{AttachmentDesc, AttachmentSize, layer_view_name, mip_view_name};

pub mod pass;
pub use pass::{
    ColorOutput, DepthStencilOutput, LayerMode, MipGen, Pass, PassDesc, PipelineKind,
    ResolvedAttachments,
};

mod graph;
pub use graph::{FrameGraph, PassBuilder};

pub use brazier_hal as hal;

///Top level error structure.
///
/// Every variant except [Hal](GraphError::Hal) is a configuration error: a
/// malformed graph is a programmer error, reported once and treated as fatal
/// by callers. Backend failures pass through untranslated.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("no backbuffer source set")]
    NoBackbufferSource,

    #[error("graph contains no passes")]
    NoPasses,

    #[error("backbuffer source \"{0}\" is not produced by any pass")]
    UnknownBackbufferSource(String),

    #[error("pass \"{pass}\" reads \"{input}\", which no pass in the graph produces")]
    DanglingInput { pass: String, input: String },

    #[error("pass \"{pass}\" declares \"{name}\" both as an output and as one of its own inputs")]
    OutputFeedsOwnInput { pass: String, name: String },

    #[error(
        "attachment \"{name}\" is declared with different descriptors by passes \"{first}\" and \"{second}\""
    )]
    AttachmentRedeclared {
        name: String,
        first: String,
        second: String,
    },

    #[error("dependency cycle through attachment \"{attachment}\" reaching back into pass \"{pass}\"")]
    DependencyCycle { pass: String, attachment: String },

    #[error("execute() called before build()")]
    NotBuilt,

    #[error("backend error")]
    Hal(#[from] HalError),
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use crate::GraphError;

    #[test]
    fn assure_send_sync() {
        assert_impl_all!(GraphError: Send, Sync);
    }
}
