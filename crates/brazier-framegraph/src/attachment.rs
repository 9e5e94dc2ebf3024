use brazier_hal::ash::vk;

///Suffix for auto-generated per-mip sub-views.
pub(crate) const MIP_VIEW_SUFFIX: &str = "_fg_miplvl";
///Suffix for auto-generated per-array-layer sub-views.
pub(crate) const LAYER_VIEW_SUFFIX: &str = "_fg_layer";

///Size of a logical attachment. Either absolute, or relative to the current
/// swapchain extent (`x`/`y` act as multipliers in that case, `1.0` meaning
/// "full resolution").
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttachmentSize {
    pub swapchain_relative: bool,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl AttachmentSize {
    ///Full swapchain resolution.
    pub const SWAPCHAIN: Self = AttachmentSize {
        swapchain_relative: true,
        x: 1.0,
        y: 1.0,
        z: 1.0,
    };

    pub fn swapchain_scaled(x: f32, y: f32) -> Self {
        AttachmentSize {
            swapchain_relative: true,
            x,
            y,
            z: 1.0,
        }
    }

    pub fn absolute(width: u32, height: u32) -> Self {
        AttachmentSize {
            swapchain_relative: false,
            x: width as f32,
            y: height as f32,
            z: 1.0,
        }
    }

    ///Resolves against the swapchain extent. Absolute sizes ignore `surface`.
    pub fn resolve(&self, surface: vk::Extent2D) -> vk::Extent3D {
        if self.swapchain_relative {
            vk::Extent3D {
                width: ((surface.width as f32 * self.x) as u32).max(1),
                height: ((surface.height as f32 * self.y) as u32).max(1),
                depth: (self.z as u32).max(1),
            }
        } else {
            vk::Extent3D {
                width: (self.x as u32).max(1),
                height: (self.y as u32).max(1),
                depth: (self.z as u32).max(1),
            }
        }
    }

    ///Two outputs can only share a native render pass if their size class
    /// matches: same relative/absolute mode and same dimensions.
    pub fn same_size_class(&self, other: &AttachmentSize) -> bool {
        self.swapchain_relative == other.swapchain_relative
            && self.x == other.x
            && self.y == other.y
            && self.z == other.z
    }
}

///Descriptor of one named logical attachment.
///
/// The name is the primary key of the graph: every pass that declares an
/// output under the same name must use an identical descriptor, which
/// `validate()` enforces.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttachmentDesc {
    pub size: AttachmentSize,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub view_type: vk::ImageViewType,
}

impl AttachmentDesc {
    ///Single-mip, single-layer 2d color target at swapchain resolution.
    pub fn color_2d(format: vk::Format) -> Self {
        AttachmentDesc {
            size: AttachmentSize::SWAPCHAIN,
            format,
            mip_levels: 1,
            array_layers: 1,
            view_type: vk::ImageViewType::TYPE_2D,
        }
    }

    pub fn with_size(mut self, size: AttachmentSize) -> Self {
        self.size = size;
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    pub fn with_view_type(mut self, view_type: vk::ImageViewType) -> Self {
        self.view_type = view_type;
        self
    }

    pub(crate) fn aspect(&self) -> vk::ImageAspectFlags {
        format_aspect(self.format)
    }

    pub(crate) fn is_depth_format(&self) -> bool {
        format_aspect(self.format).contains(vk::ImageAspectFlags::DEPTH)
    }
}

pub(crate) fn format_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

///Name of the auto-generated sub-view targeting a single mip level.
pub fn mip_view_name(attachment: &str, level: u32) -> String {
    format!("{}{}{}", attachment, MIP_VIEW_SUFFIX, level)
}

///Name of the auto-generated sub-view targeting a single array layer.
pub fn layer_view_name(attachment: &str, layer: u32) -> String {
    format!("{}{}{}", attachment, LAYER_VIEW_SUFFIX, layer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_swapchain_relative() {
        let half = AttachmentSize::swapchain_scaled(0.5, 0.5);
        let extent = half.resolve(vk::Extent2D {
            width: 1920,
            height: 1080,
        });
        assert_eq!(extent.width, 960);
        assert_eq!(extent.height, 540);
        assert_eq!(extent.depth, 1);
    }

    #[test]
    fn resolve_absolute_ignores_surface() {
        let fixed = AttachmentSize::absolute(256, 256);
        let extent = fixed.resolve(vk::Extent2D {
            width: 1,
            height: 1,
        });
        assert_eq!((extent.width, extent.height), (256, 256));
    }

    #[test]
    fn size_class_separates_relative_from_absolute() {
        let relative = AttachmentSize::SWAPCHAIN;
        let absolute = AttachmentSize::absolute(1920, 1080);
        assert!(!relative.same_size_class(&absolute));
        assert!(relative.same_size_class(&AttachmentSize::swapchain_scaled(1.0, 1.0)));
    }

    #[test]
    fn depth_formats_report_depth_aspect() {
        assert!(
            AttachmentDesc::color_2d(vk::Format::D32_SFLOAT).is_depth_format()
        );
        assert!(!AttachmentDesc::color_2d(vk::Format::R8G8B8A8_UNORM).is_depth_format());
    }
}
