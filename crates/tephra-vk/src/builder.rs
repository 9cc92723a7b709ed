// SPDX-License-Identifier: CEPL-1.0
//! Configuration calls and the build pipeline.

use std::ffi::{CStr, CString};

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::vk;
use tephra_core::ScratchArena;

use crate::adapter;
use crate::allocator::ImageAllocator;
use crate::context::{Context, DeviceLevel, InstanceLevel};
use crate::debug::{self, DebugCallback, Severity};
use crate::error::{Error, Result};
use crate::extensions::{property_names, ExtensionScope};
use crate::frame;
use crate::selector::{select_adapter, DeviceScorer};
use crate::swapchain::{self as sc, PresentModeChooser, SurfaceFormatChooser};
use crate::window::{WindowAdapter, WindowConfig, WindowKey, WindowProfile, WindowState};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

const PORTABILITY_ENUMERATION: &CStr = c"VK_KHR_portability_enumeration";

fn push_unique<'a>(names: &mut Vec<&'a CStr>, name: &'a CStr) {
    if !names.contains(&name) {
        names.push(name);
    }
}

fn layer_available(layers: &[vk::LayerProperties], name: &CStr) -> bool {
    layers
        .iter()
        // SAFETY: the driver nul-terminates layer_name.
        .any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == name)
}

impl Context {
    fn late(&self, what: &str) -> bool {
        if self.built {
            tracing::warn!("{what} after build has no effect on the built context");
        }
        self.built
    }

    pub fn request_validation(&mut self) -> &mut Self {
        self.late("request_validation");
        self.settings.validation = true;
        self
    }

    /// Packed version as made by `vk::make_api_version`.
    pub fn set_api_version(&mut self, version: u32) -> &mut Self {
        self.late("set_api_version");
        self.settings.api_version = version;
        self
    }

    pub fn set_application(&mut self, name: &str, version: u32) -> Result<&mut Self> {
        self.late("set_application");
        self.settings.app_name = CString::new(name).map_err(|_| Error::IllegalParams)?;
        self.settings.app_version = version;
        Ok(self)
    }

    pub fn set_engine(&mut self, name: &str, version: u32) -> Result<&mut Self> {
        self.late("set_engine");
        self.settings.engine_name = CString::new(name).map_err(|_| Error::IllegalParams)?;
        self.settings.engine_version = version;
        Ok(self)
    }

    pub fn add_required_instance_extension(&mut self, name: &str) -> Result<()> {
        self.late("add_required_instance_extension");
        self.extensions.add_required(ExtensionScope::Instance, name)
    }

    pub fn add_optional_instance_extension(&mut self, name: &str) -> Result<()> {
        self.late("add_optional_instance_extension");
        self.extensions.add_optional(ExtensionScope::Instance, name)
    }

    pub fn add_required_device_extension(&mut self, name: &str) -> Result<()> {
        self.late("add_required_device_extension");
        self.extensions.add_required(ExtensionScope::Device, name)
    }

    pub fn add_optional_device_extension(&mut self, name: &str) -> Result<()> {
        self.late("add_optional_device_extension");
        self.extensions.add_optional(ExtensionScope::Device, name)
    }

    /// Receives validation messages. Defaults to [`debug::TracingDebugCallback`].
    pub fn set_debug_callback(&mut self, callback: impl DebugCallback + 'static) -> &mut Self {
        if !self.late("set_debug_callback") {
            *self.debug_callback = Box::new(callback);
        }
        self
    }

    /// Only consider adapters whose reported name is exactly `name`.
    pub fn lock_device(&mut self, name: &str) -> &mut Self {
        self.late("lock_device");
        self.settings.device_lock = Some(name.to_owned());
        self
    }

    pub fn set_device_scorer(&mut self, scorer: impl DeviceScorer + 'static) -> &mut Self {
        self.late("set_device_scorer");
        self.scorer = Box::new(scorer);
        self
    }

    pub fn set_surface_format_chooser(
        &mut self,
        chooser: impl SurfaceFormatChooser + 'static,
    ) -> &mut Self {
        self.format_chooser = Box::new(chooser);
        self
    }

    pub fn set_present_mode_chooser(&mut self, chooser: impl PresentModeChooser + 'static) -> &mut Self {
        self.present_chooser = Box::new(chooser);
        self
    }

    /// Needed by windows with more than the color attachment.
    pub fn set_allocator(&mut self, allocator: impl ImageAllocator + 'static) -> &mut Self {
        if !self.late("set_allocator") {
            self.allocator = Some(Box::new(allocator));
        }
        self
    }

    /// Create a command pool and one primary command buffer per swap image.
    pub fn request_command_buffers(&mut self) -> &mut Self {
        self.late("request_command_buffers");
        self.settings.command_buffers = true;
        self
    }

    /// Recreate out-of-date swapchains from within begin/present. On by default.
    pub fn set_auto_recreate(&mut self, on: bool) -> &mut Self {
        self.settings.auto_recreate = on;
        self
    }

    pub fn register_window<W>(&mut self, window: W, profile: WindowProfile) -> Result<WindowKey>
    where
        W: WindowAdapter + 'static,
    {
        self.register_window_with(window, WindowConfig::from(profile))
    }

    pub fn register_window_with<W>(&mut self, window: W, config: WindowConfig) -> Result<WindowKey>
    where
        W: WindowAdapter + 'static,
    {
        if self.late("register_window") {
            return Err(Error::InvalidState);
        }
        config.validate()?;
        let key = window.key();
        if self.windows.iter().any(|w| w.key == key) {
            return Err(Error::IllegalParams);
        }
        self.windows.push(WindowState::new(Box::new(window), config));
        Ok(key)
    }

    /// Bring up instance, device and every registered window. On failure
    /// everything created so far is destroyed again.
    pub fn build(&mut self) -> Result<()> {
        if self.built {
            tracing::warn!("build called twice");
            return Err(Error::InvalidState);
        }
        let scratch = ScratchArena::default();
        match self.run_build(&scratch) {
            Ok(()) => {
                self.built = true;
                tracing::debug!("build done, scratch high water {} bytes", scratch.high_water());
                Ok(())
            }
            Err(e) => {
                tracing::error!("build failed: {e}");
                self.teardown();
                self.track(Err(e))
            }
        }
    }

    fn run_build(&mut self, scratch: &ScratchArena) -> Result<()> {
        self.load_driver()?;
        self.create_instance(scratch)?;
        self.create_surfaces()?;
        self.select_device()?;
        self.create_device(scratch)?;
        for idx in 0..self.windows.len() {
            self.create_window_swapchain(idx)?;
        }
        self.create_sync()
    }

    fn create_instance(&mut self, scratch: &ScratchArena) -> Result<()> {
        let entry = self.entry.as_ref().ok_or(Error::InvalidState)?;
        // SAFETY: global-level queries on a loaded entry.
        let (props, layers) = unsafe {
            (
                entry.enumerate_instance_extension_properties(None)?,
                entry.enumerate_instance_layer_properties()?,
            )
        };
        let available = property_names(&props);

        if let Some(missing) = self.extensions.negotiate(ExtensionScope::Instance, &available) {
            tracing::error!("required instance extension {missing:?} is not available");
            return Err(Error::MissingExtension);
        }

        let window_exts = match self.windows.first() {
            Some(w) => w.adapter.required_extensions()?,
            None => Vec::new(),
        };
        let validation = self.settings.validation;
        let mut names: Vec<&CStr> = Vec::new();
        for name in self
            .extensions
            .required(ExtensionScope::Instance)
            .chain(self.extensions.enabled_optional(ExtensionScope::Instance))
            .chain(window_exts.iter().copied())
        {
            push_unique(&mut names, name);
        }
        if validation {
            push_unique(&mut names, debug_utils::NAME);
        }
        if let Some(missing) = names.iter().find(|n| !available.contains(n)) {
            tracing::error!("instance extension {missing:?} is not available");
            return Err(Error::MissingExtension);
        }

        let layer_found = layer_available(&layers, VALIDATION_LAYER);
        if validation && !layer_found {
            tracing::warn!("validation requested but {VALIDATION_LAYER:?} is not installed; continuing without it");
        }
        let use_layer = validation && layer_found;

        let flags = if names.contains(&PORTABILITY_ENUMERATION) {
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
        } else {
            vk::InstanceCreateFlags::empty()
        };

        let cp = scratch.checkpoint();
        let ext_ptrs = cp.alloc_iter(names.iter().map(|n| n.as_ptr()));
        let layer_ptrs: &[*const std::ffi::c_char] = if use_layer {
            cp.alloc_slice_copy(&[VALIDATION_LAYER.as_ptr()])
        } else {
            &[]
        };
        let app_info = vk::ApplicationInfo::default()
            .application_name(&self.settings.app_name)
            .application_version(self.settings.app_version)
            .engine_name(&self.settings.engine_name)
            .engine_version(self.settings.engine_version)
            .api_version(self.settings.api_version);
        let create_info = vk::InstanceCreateInfo::default()
            .flags(flags)
            .application_info(&app_info)
            .enabled_extension_names(ext_ptrs)
            .enabled_layer_names(layer_ptrs);

        // SAFETY: every pointer in `create_info` outlives the call.
        let instance = unsafe { entry.create_instance(&create_info, None)? };
        tracing::info!(
            "instance created with {} extension(s), validation {}",
            names.len(),
            if use_layer { "on" } else { "off" }
        );
        let surface_loader = surface::Instance::new(entry, &instance);
        let inst = self.instance.insert(InstanceLevel {
            instance,
            surface: surface_loader,
            debug: None,
        });
        self.entry_points.load_instance(entry, &inst.instance)?;

        if use_layer {
            let loader = debug_utils::Instance::new(entry, &inst.instance);
            // SAFETY: the callback slot lives in the context and outlives
            // the messenger, which teardown destroys first.
            let messenger = unsafe { debug::create_messenger(&loader, &self.debug_callback)? };
            inst.debug = Some((loader, messenger));
        }
        self.validation_active = use_layer;
        Ok(())
    }

    fn create_surfaces(&mut self) -> Result<()> {
        let entry = self.entry.as_ref().ok_or(Error::InvalidState)?;
        let inst = self.instance.as_ref().ok_or(Error::InvalidState)?;
        for window in &mut self.windows {
            // SAFETY: the instance was created with the window's extensions.
            window.surface = unsafe { window.adapter.create_surface(entry, &inst.instance)? };
        }
        Ok(())
    }

    fn select_device(&mut self) -> Result<()> {
        let inst = self.instance.as_ref().ok_or(Error::InvalidState)?;
        let surfaces: Vec<vk::SurfaceKHR> = self.windows.iter().map(|w| w.surface).collect();
        // SAFETY: the instance is live; surfaces were created on it.
        let mut snapshots: Vec<_> = unsafe {
            inst.instance
                .enumerate_physical_devices()?
                .into_iter()
                .map(|pd| adapter::probe(&inst.instance, &inst.surface, pd, &surfaces))
                .collect()
        };
        let chosen = select_adapter(
            &snapshots,
            &*self.scorer,
            self.settings.device_lock.as_deref(),
        )?;
        let adapter = snapshots.swap_remove(chosen);

        let msg = format!(
            "selected adapter {} ({:?})",
            adapter.name(),
            adapter.device_type()
        );
        if self.settings.validation {
            self.debug_callback.message(Severity::Info, &msg);
        } else {
            tracing::info!("{msg}");
        }
        self.adapter = Some(adapter);
        Ok(())
    }

    fn create_device(&mut self, scratch: &ScratchArena) -> Result<()> {
        let inst = self.instance.as_ref().ok_or(Error::InvalidState)?;
        let adapter = self.adapter.as_ref().ok_or(Error::InvalidState)?;
        let physical = adapter.physical_device;
        let graphics = adapter.queues.graphics.ok_or(Error::NoSuitableDevice)?;
        let present = adapter.queues.present.ok_or(Error::NoSuitableDevice)?;

        // SAFETY: `physical` was enumerated from this instance.
        let props = unsafe { inst.instance.enumerate_device_extension_properties(physical)? };
        let available = property_names(&props);
        if let Some(missing) = self.extensions.negotiate(ExtensionScope::Device, &available) {
            tracing::error!("required device extension {missing:?} is not available");
            return Err(Error::MissingExtension);
        }
        let mut names: Vec<&CStr> = Vec::new();
        for name in self
            .extensions
            .required(ExtensionScope::Device)
            .chain(self.extensions.enabled_optional(ExtensionScope::Device))
        {
            push_unique(&mut names, name);
        }
        push_unique(&mut names, swapchain::NAME);
        if !available.contains(&swapchain::NAME) {
            tracing::error!("adapter lacks {:?}", swapchain::NAME);
            return Err(Error::MissingExtension);
        }

        let device_layer = self.validation_active && {
            // SAFETY: as above.
            let layers = unsafe { inst.instance.enumerate_device_layer_properties(physical)? };
            layer_available(&layers, VALIDATION_LAYER)
        };

        let priorities = [1.0f32];
        let mut queue_infos = vec![vk::DeviceQueueCreateInfo::default()
            .queue_family_index(graphics)
            .queue_priorities(&priorities)];
        if present != graphics {
            queue_infos.push(
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(present)
                    .queue_priorities(&priorities),
            );
        }
        let features = vk::PhysicalDeviceFeatures::default();

        let cp = scratch.checkpoint();
        let ext_ptrs = cp.alloc_iter(names.iter().map(|n| n.as_ptr()));
        let layer_ptrs: &[*const std::ffi::c_char] = if device_layer {
            cp.alloc_slice_copy(&[VALIDATION_LAYER.as_ptr()])
        } else {
            &[]
        };
        #[allow(deprecated)]
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(ext_ptrs)
            .enabled_layer_names(layer_ptrs)
            .enabled_features(&features);

        // SAFETY: every pointer in `create_info` outlives the call.
        let device = unsafe { inst.instance.create_device(physical, &create_info, None)? };
        let swapchain_loader = swapchain::Device::new(&inst.instance, &device);
        // SAFETY: one queue was requested from each family above.
        let (graphics_queue, present_queue) = unsafe {
            (
                device.get_device_queue(graphics, 0),
                device.get_device_queue(present, 0),
            )
        };
        let dev = self.device.insert(DeviceLevel {
            device,
            swapchain: swapchain_loader,
            graphics_queue,
            present_queue,
            command_pool: vk::CommandPool::null(),
        });
        self.entry_points.load_device(&inst.instance, &dev.device)?;

        if self.settings.command_buffers {
            let pool_info = vk::CommandPoolCreateInfo {
                flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                queue_family_index: graphics,
                ..Default::default()
            };
            // SAFETY: `graphics` is a queue family of this device.
            dev.command_pool = unsafe { dev.device.create_command_pool(&pool_info, None)? };
        }
        if let Some(allocator) = self.allocator.as_deref_mut() {
            allocator.init(&inst.instance, &dev.device, physical)?;
        }
        tracing::info!(
            "device created: graphics family {graphics}, present family {present}, {} extension(s)",
            names.len()
        );
        Ok(())
    }

    fn create_window_swapchain(&mut self, idx: usize) -> Result<()> {
        let (env, allocator, window) = self.swapchain_parts(idx)?;
        if let Err(e) = window.config.check_allocator(allocator.is_some()) {
            tracing::error!(
                "window {:?} has {} attachment types but no allocator is set",
                window.key,
                window.config.attachments.len()
            );
            return Err(e);
        }
        // SAFETY: the window's surface and the device are live.
        unsafe { sc::create(&env, allocator, window) }
    }

    fn create_sync(&mut self) -> Result<()> {
        let dev = self.device.as_ref().ok_or(Error::InvalidState)?;
        for window in &mut self.windows {
            // SAFETY: `dev.device` is live.
            unsafe { frame::create_flights(&dev.device, window)? };
        }
        Ok(())
    }
}
