// SPDX-License-Identifier: CEPL-1.0
//! Swapchain and attachment (re)creation for one window.

use ash::khr::{surface, swapchain};
use ash::vk;

use crate::adapter::{AdapterSnapshot, MAX_SURFACE_ENTRIES};
use crate::allocator::ImageAllocator;
use crate::attachment::{pick_depth_format, subresource, AttachmentUsage, COLOR_ATTACHMENT};
use crate::error::{Error, Result};
use crate::frame;
use crate::loader::EntryPoints;
use crate::window::WindowState;

pub trait SurfaceFormatChooser {
    fn choose(&self, formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR;
}

impl<F> SurfaceFormatChooser for F
where
    F: Fn(&[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR,
{
    fn choose(&self, formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
        self(formats)
    }
}

pub trait PresentModeChooser {
    fn choose(&self, modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR;
}

impl<F> PresentModeChooser for F
where
    F: Fn(&[vk::PresentModeKHR]) -> vk::PresentModeKHR,
{
    fn choose(&self, modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
        self(modes)
    }
}

/// BGRA8 sRGB with the sRGB-nonlinear color space, else whatever comes first.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultFormatChooser;

impl SurfaceFormatChooser for DefaultFormatChooser {
    fn choose(&self, formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
        formats
            .iter()
            .copied()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| formats.first().copied())
            .unwrap_or_default()
    }
}

/// Mailbox if offered, else FIFO.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultPresentModeChooser;

impl PresentModeChooser for DefaultPresentModeChooser {
    fn choose(&self, modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
        if modes.contains(&vk::PresentModeKHR::MAILBOX) {
            vk::PresentModeKHR::MAILBOX
        } else {
            vk::PresentModeKHR::FIFO
        }
    }
}

pub fn clamp_extent(want: vk::Extent2D, caps: &vk::SurfaceCapabilitiesKHR) -> vk::Extent2D {
    let (min, max) = (caps.min_image_extent, caps.max_image_extent);
    vk::Extent2D {
        width: want.width.clamp(min.width, max.width.max(min.width)),
        height: want.height.clamp(min.height, max.height.max(min.height)),
    }
}

/// A zero maximum means no upper bound.
pub fn clamp_image_count(want: u32, caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = want.max(caps.min_image_count);
    if caps.max_image_count == 0 {
        count
    } else {
        count.min(caps.max_image_count)
    }
}

/// `want` if supported, else the lowest supported mode.
pub fn choose_composite_alpha(
    want: vk::CompositeAlphaFlagsKHR,
    supported: vk::CompositeAlphaFlagsKHR,
) -> vk::CompositeAlphaFlagsKHR {
    if supported.contains(want) {
        return want;
    }
    let raw = supported.as_raw();
    if raw == 0 {
        return vk::CompositeAlphaFlagsKHR::OPAQUE;
    }
    vk::CompositeAlphaFlagsKHR::from_raw(raw & raw.wrapping_neg())
}

/// Color output always; transfer destination too when the surface allows it.
pub fn swap_image_usage(caps: &vk::SurfaceCapabilitiesKHR) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
    if caps
        .supported_usage_flags
        .contains(vk::ImageUsageFlags::TRANSFER_DST)
    {
        usage |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    usage
}

fn pre_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

/// Device-level objects swapchain work needs, borrowed from the context.
pub(crate) struct SwapchainEnv<'a> {
    pub instance: &'a ash::Instance,
    pub surface_loader: &'a surface::Instance,
    pub device: &'a ash::Device,
    pub swapchain_loader: &'a swapchain::Device,
    pub adapter: &'a AdapterSnapshot,
    /// Null unless per-image command buffers were requested.
    pub command_pool: vk::CommandPool,
    pub formats: &'a dyn SurfaceFormatChooser,
    pub present_modes: &'a dyn PresentModeChooser,
    pub entry_points: &'a EntryPoints,
}

/// First creation for a window whose surface exists.
pub(crate) unsafe fn create(
    env: &SwapchainEnv<'_>,
    allocator: Option<&mut (dyn ImageAllocator + 'static)>,
    window: &mut WindowState,
) -> Result<()> {
    window.drawable = window.adapter.drawable_size();
    // SAFETY: the surface belongs to the selected adapter's instance.
    let caps = unsafe {
        env.surface_loader
            .get_physical_device_surface_capabilities(env.adapter.physical_device, window.surface)?
    };
    unsafe { build(env, allocator, window, &caps) }
}

/// Rebuild for the window's current drawable size. Leaves the old swapchain
/// in place if the drawable is empty.
pub(crate) unsafe fn recreate(
    env: &SwapchainEnv<'_>,
    mut allocator: Option<&mut (dyn ImageAllocator + 'static)>,
    window: &mut WindowState,
) -> Result<()> {
    // SAFETY: every handle below was created on `env.device`.
    unsafe {
        frame::wait_flights(env.device, window, u64::MAX)?;
        env.device.device_wait_idle()?;

        window.drawable = window.adapter.drawable_size();
        let caps = env
            .surface_loader
            .get_physical_device_surface_capabilities(env.adapter.physical_device, window.surface)?;
        let extent = clamp_extent(window.drawable, &caps);
        if extent.width == 0 || extent.height == 0 {
            window.needs_recreate = true;
            return Err(Error::SwapchainOutOfDate);
        }

        let previous = window.swap_size;
        release_attachments(env.device, env.entry_points, allocator.as_deref_mut(), window);
        free_commands(env.device, env.entry_points, env.command_pool, window);

        build(env, allocator, window, &caps)?;

        // TODO: reallocate the per-image arrays instead once callers can
        // observe a changed image count.
        assert_eq!(
            window.swap_size, previous,
            "swapchain image count changed across recreation"
        );
    }
    window.needs_recreate = false;
    Ok(())
}

unsafe fn build(
    env: &SwapchainEnv<'_>,
    mut allocator: Option<&mut (dyn ImageAllocator + 'static)>,
    window: &mut WindowState,
    caps: &vk::SurfaceCapabilitiesKHR,
) -> Result<()> {
    let physical = env.adapter.physical_device;
    let graphics = env.adapter.queues.graphics.ok_or(Error::InvalidState)?;
    let present = env.adapter.queues.present.ok_or(Error::InvalidState)?;

    // SAFETY: all handles come from the live instance/device in `env`.
    let (mut formats, mut modes) = unsafe {
        (
            env.surface_loader
                .get_physical_device_surface_formats(physical, window.surface)?,
            env.surface_loader
                .get_physical_device_surface_present_modes(physical, window.surface)?,
        )
    };
    formats.truncate(MAX_SURFACE_ENTRIES);
    modes.truncate(MAX_SURFACE_ENTRIES);
    if formats.is_empty() {
        tracing::error!("surface reports no formats");
        return Err(Error::InvalidState);
    }

    let format = env.formats.choose(&formats);
    let mode = env.present_modes.choose(&modes);
    let extent = clamp_extent(window.drawable, caps);
    let image_count = clamp_image_count(window.config.image_count, caps);
    let alpha = choose_composite_alpha(window.config.composite_alpha, caps.supported_composite_alpha);
    let usage = swap_image_usage(caps);
    let families = [graphics, present];

    let mut info = vk::SwapchainCreateInfoKHR {
        surface: window.surface,
        min_image_count: image_count,
        image_format: format.format,
        image_color_space: format.color_space,
        image_extent: extent,
        image_array_layers: 1,
        image_usage: usage,
        image_sharing_mode: vk::SharingMode::EXCLUSIVE,
        pre_transform: pre_transform(caps),
        composite_alpha: alpha,
        present_mode: mode,
        clipped: vk::TRUE,
        old_swapchain: window.swapchain,
        ..Default::default()
    };
    if graphics != present {
        info = info
            .image_sharing_mode(vk::SharingMode::CONCURRENT)
            .queue_family_indices(&families);
    }

    let old = window.swapchain;
    let swapchain = unsafe { env.swapchain_loader.create_swapchain(&info, None)? };
    window.swapchain = swapchain;
    if old != vk::SwapchainKHR::null() {
        // SAFETY: retired by the create above; the device is idle.
        unsafe { env.swapchain_loader.destroy_swapchain(old, None) };
    }
    window.surface_format = format;
    window.present_mode = mode;
    window.extent = extent;
    window.config.composite_alpha = alpha;

    let color = &mut window.config.attachments[0];
    color.set_format(format.format);
    color.image.usage = usage;

    let images = unsafe { env.swapchain_loader.get_swapchain_images(swapchain)? };
    window.swap_size = images.len() as u32;
    window.image_fences = vec![vk::Fence::null(); images.len()];
    tracing::info!(
        "swapchain {}x{} format={:?} mode={:?} images={} (asked {})",
        extent.width,
        extent.height,
        format.format,
        mode,
        images.len(),
        image_count
    );

    window.attachments = vec![Vec::with_capacity(images.len()); window.config.attachments.len()];
    for &image in &images {
        let view_info = vk::ImageViewCreateInfo {
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: format.format,
            components: vk::ComponentMapping::default(),
            subresource_range: subresource(vk::ImageAspectFlags::COLOR),
            ..Default::default()
        };
        let view = unsafe { env.device.create_image_view(&view_info, None)? };
        window.push_instance(COLOR_ATTACHMENT, image, view, None);
    }

    for ty in 1..window.config.attachments.len() {
        let cfg = &mut window.config.attachments[ty];
        if cfg.format() == vk::Format::UNDEFINED
            && cfg.usage.intersects(AttachmentUsage::DEPTH | AttachmentUsage::STENCIL)
        {
            let depth = pick_depth_format(|f| {
                // SAFETY: `physical` was enumerated from `env.instance`.
                let props = unsafe {
                    env.instance
                        .get_physical_device_format_properties(physical, f)
                };
                props
                    .optimal_tiling_features
                    .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            });
            cfg.set_format(depth);
        }
        let image_info = cfg.stamped_image(extent);
        let mut view_info = cfg.view;
        if view_info.format == vk::Format::UNDEFINED {
            view_info.format = image_info.format;
        }
        if view_info.subresource_range.aspect_mask.is_empty() {
            view_info.subresource_range.aspect_mask = cfg.aspect_mask();
        }
        view_info.subresource_range.level_count = view_info.subresource_range.level_count.max(1);
        view_info.subresource_range.layer_count = view_info.subresource_range.layer_count.max(1);

        for _ in 0..images.len() {
            let alloc = allocator.as_deref_mut().ok_or(Error::NoAllocator)?;
            let (image, id) = alloc.allocate_image(env.device, &image_info)?;
            view_info.image = image;
            let view = unsafe { env.device.create_image_view(&view_info, None) };
            window.push_instance(ty, image, view.unwrap_or_default(), Some(id));
            view?;
        }
    }

    if env.command_pool != vk::CommandPool::null() {
        let alloc_info = vk::CommandBufferAllocateInfo {
            command_pool: env.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: window.swap_size,
            ..Default::default()
        };
        window.commands = unsafe { env.device.allocate_command_buffers(&alloc_info)? };
    }
    Ok(())
}

/// Destroy views of every attachment and free the non-swapchain images.
/// Objects whose destroy functions never loaded are dropped without a call.
pub(crate) unsafe fn release_attachments(
    device: &ash::Device,
    eps: &EntryPoints,
    mut allocator: Option<&mut (dyn ImageAllocator + 'static)>,
    window: &mut WindowState,
) {
    let views = eps.has(c"vkDestroyImageView");
    let images = eps.has(c"vkDestroyImage") && eps.has(c"vkFreeMemory");
    for instance in window.attachments.drain(..).flatten() {
        if views && instance.view != vk::ImageView::null() {
            // SAFETY: the caller has waited for the window to go idle.
            unsafe { device.destroy_image_view(instance.view, None) };
        }
        if !images {
            continue;
        }
        if let Some(id) = instance.allocation {
            match allocator.as_deref_mut() {
                Some(alloc) => alloc.free_image(device, instance.image, id),
                None => tracing::warn!("attachment image {:?} has no allocator to free it", instance.image),
            }
        }
    }
}

pub(crate) unsafe fn free_commands(
    device: &ash::Device,
    eps: &EntryPoints,
    pool: vk::CommandPool,
    window: &mut WindowState,
) {
    if pool != vk::CommandPool::null()
        && !window.commands.is_empty()
        && eps.has(c"vkFreeCommandBuffers")
    {
        // SAFETY: the buffers came from `pool` and are no longer pending.
        unsafe { device.free_command_buffers(pool, &window.commands) };
    }
    window.commands.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: (u32, u32), max: (u32, u32), count: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: count.0,
            max_image_count: count.1,
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn extent_is_clamped_per_axis() {
        let c = caps((64, 64), (1920, 1080), (2, 8));
        let got = clamp_extent(
            vk::Extent2D {
                width: 4000,
                height: 10,
            },
            &c,
        );
        assert_eq!(
            got,
            vk::Extent2D {
                width: 1920,
                height: 64
            }
        );
    }

    #[test]
    fn image_count_respects_bounds() {
        assert_eq!(clamp_image_count(3, &caps((1, 1), (1, 1), (2, 0))), 3);
        assert_eq!(clamp_image_count(1, &caps((1, 1), (1, 1), (2, 0))), 2);
        assert_eq!(clamp_image_count(8, &caps((1, 1), (1, 1), (2, 4))), 4);
    }

    #[test]
    fn default_format_prefers_bgra_srgb() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(DefaultFormatChooser.choose(&[unorm, srgb]), srgb);
        assert_eq!(DefaultFormatChooser.choose(&[unorm]), unorm);
    }

    #[test]
    fn default_present_mode() {
        let c = DefaultPresentModeChooser;
        assert_eq!(
            c.choose(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            c.choose(&[vk::PresentModeKHR::IMMEDIATE]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn composite_alpha_falls_back_to_lowest_bit() {
        let supported =
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED | vk::CompositeAlphaFlagsKHR::INHERIT;
        assert_eq!(
            choose_composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE, supported),
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED
        );
        assert_eq!(
            choose_composite_alpha(vk::CompositeAlphaFlagsKHR::INHERIT, supported),
            vk::CompositeAlphaFlagsKHR::INHERIT
        );
    }

    #[test]
    fn transfer_usage_only_when_supported() {
        let mut c = caps((1, 1), (1, 1), (2, 0));
        assert_eq!(swap_image_usage(&c), vk::ImageUsageFlags::COLOR_ATTACHMENT);
        c.supported_usage_flags = vk::ImageUsageFlags::TRANSFER_DST;
        assert!(swap_image_usage(&c).contains(vk::ImageUsageFlags::TRANSFER_DST));
    }
}
