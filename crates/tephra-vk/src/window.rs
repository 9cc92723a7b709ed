// SPDX-License-Identifier: CEPL-1.0
use std::ffi::CStr;

use ash::vk;

use crate::allocator::AllocationId;
use crate::attachment::{AttachmentConfig, AttachmentInstance, AttachmentUsage, COLOR_ATTACHMENT};
use crate::error::{Error, Result};
use crate::frame::{FlightSync, FrameCycle, FramePhase};

/// Identity of a registered window, stable for the window's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowKey(pub u64);

/// What the context needs from a window toolkit.
pub trait WindowAdapter {
    fn key(&self) -> WindowKey;

    /// Instance extensions the toolkit needs to present to this window.
    fn required_extensions(&self) -> Result<Vec<&'static CStr>>;

    /// Current drawable size in pixels.
    fn drawable_size(&self) -> vk::Extent2D;

    /// # Safety
    /// `instance` must have been created from `entry` with the extensions
    /// from [`WindowAdapter::required_extensions`] enabled.
    unsafe fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR>;
}

/// Ready-made attachment layouts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WindowProfile {
    #[default]
    Color,
    ColorDepth,
}

#[derive(Clone, Debug)]
pub struct WindowConfig {
    /// Index 0 is the swapchain color target.
    pub attachments: Vec<AttachmentConfig>,
    pub image_count: u32,
    pub max_in_flight: u32,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            attachments: vec![AttachmentConfig::color()],
            image_count: 3,
            max_in_flight: 2,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        }
    }
}

impl From<WindowProfile> for WindowConfig {
    fn from(profile: WindowProfile) -> Self {
        let mut cfg = WindowConfig::default();
        if profile == WindowProfile::ColorDepth {
            cfg.attachments
                .push(AttachmentConfig::depth(vk::Format::UNDEFINED));
        }
        cfg
    }
}

impl WindowConfig {
    /// Attachments past the color target are allocated through the
    /// context's allocator, so they need one.
    pub(crate) fn check_allocator(&self, has_allocator: bool) -> Result<()> {
        if self.attachments.len() > 1 && !has_allocator {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let color_first = self
            .attachments
            .get(COLOR_ATTACHMENT)
            .is_some_and(|a| a.usage.contains(AttachmentUsage::COLOR));
        if !color_first || self.image_count == 0 || self.max_in_flight == 0 {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }
}

/// Everything the context tracks for one registered window.
pub struct WindowState {
    pub(crate) adapter: Box<dyn WindowAdapter>,
    pub(crate) key: WindowKey,
    pub(crate) config: WindowConfig,
    pub(crate) drawable: vk::Extent2D,
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) swapchain: vk::SwapchainKHR,
    pub(crate) surface_format: vk::SurfaceFormatKHR,
    pub(crate) present_mode: vk::PresentModeKHR,
    pub(crate) extent: vk::Extent2D,
    pub(crate) swap_size: u32,
    pub(crate) flights: Vec<FlightSync>,
    pub(crate) cycle: FrameCycle,
    pub(crate) image_index: u32,
    /// Fence of the slot that last submitted work for each swap image.
    pub(crate) image_fences: Vec<vk::Fence>,
    /// `[attachment type][swap image]`
    pub(crate) attachments: Vec<Vec<AttachmentInstance>>,
    pub(crate) commands: Vec<vk::CommandBuffer>,
    pub(crate) needs_recreate: bool,
}

impl std::fmt::Debug for WindowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowState")
            .field("key", &self.key)
            .field("extent", &self.extent)
            .field("swap_size", &self.swap_size)
            .field("phase", &self.cycle.phase())
            .field("flight", &self.cycle.flight())
            .field("image_index", &self.image_index)
            .finish_non_exhaustive()
    }
}

impl WindowState {
    pub(crate) fn new(adapter: Box<dyn WindowAdapter>, config: WindowConfig) -> Self {
        let key = adapter.key();
        let drawable = adapter.drawable_size();
        let cycle = FrameCycle::new(config.max_in_flight);
        Self {
            adapter,
            key,
            config,
            drawable,
            surface: vk::SurfaceKHR::null(),
            swapchain: vk::SwapchainKHR::null(),
            surface_format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            swap_size: 0,
            flights: Vec::new(),
            cycle,
            image_index: 0,
            image_fences: Vec::new(),
            attachments: Vec::new(),
            commands: Vec::new(),
            needs_recreate: false,
        }
    }

    pub fn key(&self) -> WindowKey {
        self.key
    }

    /// Drawable size as last reported by the toolkit.
    pub fn drawable_size(&self) -> vk::Extent2D {
        self.drawable
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of images the swapchain actually has.
    pub fn swap_size(&self) -> u32 {
        self.swap_size
    }

    pub fn phase(&self) -> FramePhase {
        self.cycle.phase()
    }

    pub fn flight_index(&self) -> usize {
        self.cycle.flight()
    }

    pub fn max_in_flight(&self) -> u32 {
        self.config.max_in_flight
    }

    /// Swap image acquired by the last successful begin.
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn swapchain(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn composite_alpha(&self) -> vk::CompositeAlphaFlagsKHR {
        self.config.composite_alpha
    }

    pub fn attachment_configs(&self) -> &[AttachmentConfig] {
        &self.config.attachments
    }

    /// Instances of one attachment type, one per swap image.
    pub fn attachments(&self, attachment: usize) -> &[AttachmentInstance] {
        self.attachments
            .get(attachment)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Instance of `attachment` for the currently acquired image.
    pub fn current_attachment(&self, attachment: usize) -> Option<&AttachmentInstance> {
        self.attachments
            .get(attachment)?
            .get(self.image_index as usize)
    }

    /// Per swap image primary command buffers; empty unless requested.
    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        &self.commands
    }

    /// Command buffer for the currently acquired image.
    pub fn command_buffer(&self) -> Option<vk::CommandBuffer> {
        self.commands.get(self.image_index as usize).copied()
    }

    /// Whether the next begin will recreate the swapchain first.
    pub fn needs_recreate(&self) -> bool {
        self.needs_recreate
    }

    /// Add a freshly created instance of attachment type `ty`. New instances
    /// always start in the undefined layout.
    pub(crate) fn push_instance(
        &mut self,
        ty: usize,
        image: vk::Image,
        view: vk::ImageView,
        allocation: Option<AllocationId>,
    ) {
        if let Some(list) = self.attachments.get_mut(ty) {
            list.push(AttachmentInstance::new(image, view, allocation));
        }
    }

    pub(crate) fn current_flight(&self) -> Result<FlightSync> {
        self.flights
            .get(self.cycle.flight())
            .copied()
            .ok_or(Error::InvalidState)
    }
}
