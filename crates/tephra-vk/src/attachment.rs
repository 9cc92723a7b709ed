// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use bitflags::bitflags;

use crate::allocator::AllocationId;

/// Index of the swapchain color attachment in every window's config list.
pub const COLOR_ATTACHMENT: usize = 0;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct AttachmentUsage: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
        const SAMPLED = 1 << 3;
        const INPUT = 1 << 4;
    }
}

/// One attachment type of a window. Width, height and (when zero) depth of
/// `image` are filled in at every swapchain (re)creation.
#[derive(Clone, Debug)]
pub struct AttachmentConfig {
    pub usage: AttachmentUsage,
    pub description: vk::AttachmentDescription,
    pub image: vk::ImageCreateInfo<'static>,
    pub view: vk::ImageViewCreateInfo<'static>,
}

impl AttachmentConfig {
    /// The swapchain color target. Its format is taken from the surface.
    pub fn color() -> Self {
        Self {
            usage: AttachmentUsage::COLOR,
            description: vk::AttachmentDescription {
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                ..Default::default()
            },
            image: vk::ImageCreateInfo::default(),
            view: vk::ImageViewCreateInfo {
                view_type: vk::ImageViewType::TYPE_2D,
                subresource_range: subresource(vk::ImageAspectFlags::COLOR),
                ..Default::default()
            },
        }
    }

    /// A depth target. `UNDEFINED` picks the best supported depth format when
    /// the swapchain is created.
    pub fn depth(format: vk::Format) -> Self {
        let usage = AttachmentUsage::DEPTH;
        Self {
            usage,
            description: vk::AttachmentDescription {
                format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ..Default::default()
            },
            image: vk::ImageCreateInfo {
                image_type: vk::ImageType::TYPE_2D,
                format,
                mip_levels: 1,
                array_layers: 1,
                samples: vk::SampleCountFlags::TYPE_1,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                ..Default::default()
            },
            view: vk::ImageViewCreateInfo {
                view_type: vk::ImageViewType::TYPE_2D,
                format,
                subresource_range: subresource(aspect_mask(usage, format)),
                ..Default::default()
            },
        }
    }

    pub fn format(&self) -> vk::Format {
        self.image.format
    }

    pub fn aspect_mask(&self) -> vk::ImageAspectFlags {
        aspect_mask(self.usage, self.format())
    }

    /// Pin every format field to `format` and refresh the view aspect.
    pub(crate) fn set_format(&mut self, format: vk::Format) {
        self.image.format = format;
        self.view.format = format;
        self.description.format = format;
        self.view.subresource_range.aspect_mask = self.aspect_mask();
    }

    /// Image parameters sized for a swapchain of `extent`.
    pub(crate) fn stamped_image(&self, extent: vk::Extent2D) -> vk::ImageCreateInfo<'static> {
        let mut info = self.image;
        info.extent.width = extent.width;
        info.extent.height = extent.height;
        if info.extent.depth == 0 {
            info.extent.depth = 1;
        }
        info
    }
}

/// Per swap image resources of one attachment type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentInstance {
    pub image: vk::Image,
    pub view: vk::ImageView,
    /// `None` for swapchain-owned images.
    pub allocation: Option<AllocationId>,
    pub layout: vk::ImageLayout,
}

impl AttachmentInstance {
    pub(crate) fn new(image: vk::Image, view: vk::ImageView, allocation: Option<AllocationId>) -> Self {
        Self {
            image,
            view,
            allocation,
            layout: vk::ImageLayout::UNDEFINED,
        }
    }
}

pub(crate) fn subresource(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Aspect for an attachment. Known depth/stencil formats decide on their
/// own; otherwise depth or stencil usage picks the aspect, else color.
pub fn aspect_mask(usage: AttachmentUsage, format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D32_SFLOAT => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => {
            let mut aspect = vk::ImageAspectFlags::empty();
            if usage.contains(AttachmentUsage::DEPTH) {
                aspect |= vk::ImageAspectFlags::DEPTH;
            }
            if usage.contains(AttachmentUsage::STENCIL) {
                aspect |= vk::ImageAspectFlags::STENCIL;
            }
            if aspect.is_empty() {
                vk::ImageAspectFlags::COLOR
            } else {
                aspect
            }
        }
    }
}

/// First depth format in preference order that `supported` accepts;
/// D32_SFLOAT if none does.
pub fn pick_depth_format<F>(mut supported: F) -> vk::Format
where
    F: FnMut(vk::Format) -> bool,
{
    [
        vk::Format::D32_SFLOAT,
        vk::Format::D24_UNORM_S8_UINT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D16_UNORM,
    ]
    .into_iter()
    .find(|&f| supported(f))
    .unwrap_or(vk::Format::D32_SFLOAT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_formats_decide_aspect() {
        let color = AttachmentUsage::COLOR;
        assert_eq!(
            aspect_mask(color, vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_mask(AttachmentUsage::DEPTH, vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_mask(color, vk::Format::B8G8R8A8_SRGB),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn usage_decides_for_unknown_formats() {
        let ds = AttachmentUsage::DEPTH | AttachmentUsage::STENCIL;
        assert_eq!(
            aspect_mask(ds, vk::Format::UNDEFINED),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_mask(AttachmentUsage::SAMPLED, vk::Format::R16G16B16A16_SFLOAT),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn stamp_fills_extent() {
        let cfg = AttachmentConfig::depth(vk::Format::D32_SFLOAT);
        let info = cfg.stamped_image(vk::Extent2D {
            width: 640,
            height: 480,
        });
        assert_eq!(
            info.extent,
            vk::Extent3D {
                width: 640,
                height: 480,
                depth: 1
            }
        );
        assert_eq!(cfg.image.extent.width, 0);
    }

    #[test]
    fn set_format_refreshes_aspect() {
        let mut cfg = AttachmentConfig::depth(vk::Format::UNDEFINED);
        cfg.set_format(vk::Format::D24_UNORM_S8_UINT);
        assert_eq!(cfg.view.format, vk::Format::D24_UNORM_S8_UINT);
        assert_eq!(
            cfg.view.subresource_range.aspect_mask,
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn depth_format_preference() {
        let pick = pick_depth_format(|f| f != vk::Format::D32_SFLOAT);
        assert_eq!(pick, vk::Format::D24_UNORM_S8_UINT);
        assert_eq!(pick_depth_format(|_| false), vk::Format::D32_SFLOAT);
    }
}
