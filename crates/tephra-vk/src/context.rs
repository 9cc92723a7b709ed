// SPDX-License-Identifier: CEPL-1.0
//! The context: everything from the loaded driver down to per-window frame
//! state. Configured through the builder calls in [`crate::builder`],
//! brought up by [`Context::build`], torn down on drop.

use std::ffi::{CStr, CString};
use std::time::Duration;

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::vk;

use crate::adapter::AdapterSnapshot;
use crate::allocator::ImageAllocator;
use crate::debug::{CallbackSlot, TracingDebugCallback};
use crate::error::{Error, Result};
use crate::extensions::{ExtensionRegistry, ExtensionScope};
use crate::frame::{self, Acquire, FramePhase};
use crate::loader::EntryPoints;
use crate::selector::{DefaultScorer, DeviceScorer};
use crate::swapchain::{
    self as sc, DefaultFormatChooser, DefaultPresentModeChooser, PresentModeChooser,
    SurfaceFormatChooser, SwapchainEnv,
};
use crate::transition::{self, BarrierRecorder, CommandBufferRecorder};
use crate::window::{WindowKey, WindowState};

pub(crate) struct Settings {
    pub app_name: CString,
    pub app_version: u32,
    pub engine_name: CString,
    pub engine_version: u32,
    pub api_version: u32,
    pub validation: bool,
    pub device_lock: Option<String>,
    pub command_buffers: bool,
    pub auto_recreate: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: c"tephra application".to_owned(),
            app_version: vk::make_api_version(0, 0, 1, 0),
            engine_name: c"tephra".to_owned(),
            engine_version: vk::make_api_version(0, 0, 1, 0),
            api_version: vk::API_VERSION_1_2,
            validation: false,
            device_lock: None,
            command_buffers: false,
            auto_recreate: true,
        }
    }
}

pub(crate) struct InstanceLevel {
    pub instance: ash::Instance,
    pub surface: surface::Instance,
    pub debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

pub(crate) struct DeviceLevel {
    pub device: ash::Device,
    pub swapchain: swapchain::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub command_pool: vk::CommandPool,
}

pub struct Context {
    pub(crate) settings: Settings,
    pub(crate) extensions: ExtensionRegistry,
    pub(crate) scorer: Box<dyn DeviceScorer>,
    pub(crate) format_chooser: Box<dyn SurfaceFormatChooser>,
    pub(crate) present_chooser: Box<dyn PresentModeChooser>,
    pub(crate) allocator: Option<Box<dyn ImageAllocator>>,
    pub(crate) debug_callback: CallbackSlot,
    pub(crate) windows: Vec<WindowState>,
    pub(crate) entry_points: EntryPoints,
    pub(crate) entry: Option<ash::Entry>,
    pub(crate) instance: Option<InstanceLevel>,
    pub(crate) adapter: Option<AdapterSnapshot>,
    pub(crate) device: Option<DeviceLevel>,
    pub(crate) validation_active: bool,
    pub(crate) built: bool,
    pub(crate) last_result: vk::Result,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("built", &self.built)
            .field("validation", &self.validation_active)
            .field("adapter", &self.adapter.as_ref().map(|a| a.name().into_owned()))
            .field("windows", &self.windows)
            .field("last_result", &self.last_result)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// An empty context. Nothing is loaded until [`Context::init`] or
    /// [`Context::build`].
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
            extensions: ExtensionRegistry::default(),
            scorer: Box::new(DefaultScorer),
            format_chooser: Box::new(DefaultFormatChooser),
            present_chooser: Box::new(DefaultPresentModeChooser),
            allocator: None,
            debug_callback: Box::new(Box::new(TracingDebugCallback)),
            windows: Vec::new(),
            entry_points: EntryPoints::default(),
            entry: None,
            instance: None,
            adapter: None,
            device: None,
            validation_active: false,
            built: false,
            last_result: vk::Result::SUCCESS,
        }
    }

    /// An empty context with the Vulkan loader already opened.
    pub fn init() -> Result<Self> {
        let mut ctx = Self::new();
        ctx.load_driver()?;
        Ok(ctx)
    }

    pub(crate) fn load_driver(&mut self) -> Result<()> {
        if self.entry.is_some() {
            return Ok(());
        }
        // SAFETY: the loader stays open for as long as `self.entry` lives,
        // which outlives every object created from it.
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            tracing::error!("failed to load the Vulkan loader: {e}");
            Error::LoadFailed
        })?;
        self.entry_points.load_global(&entry)?;
        self.entry = Some(entry);
        Ok(())
    }

    /// Remember the raw code of API failures.
    pub(crate) fn track<T>(&mut self, res: Result<T>) -> Result<T> {
        if let Err(Error::Api(code)) = &res {
            self.last_result = *code;
        }
        res
    }

    /// Raw result of the last failed driver call, `SUCCESS` if none.
    pub fn last_result(&self) -> vk::Result {
        self.last_result
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Whether the validation layer was found and enabled.
    pub fn validation_enabled(&self) -> bool {
        self.validation_active
    }

    pub fn has_extension(&self, scope: ExtensionScope, name: &CStr) -> bool {
        self.extensions.has(scope, name)
    }

    pub fn entry(&self) -> Option<&ash::Entry> {
        self.entry.as_ref()
    }

    pub fn entry_points(&self) -> &EntryPoints {
        &self.entry_points
    }

    pub fn instance(&self) -> Option<&ash::Instance> {
        self.instance.as_ref().map(|i| &i.instance)
    }

    pub fn adapter(&self) -> Option<&AdapterSnapshot> {
        self.adapter.as_ref()
    }

    pub fn device(&self) -> Option<&ash::Device> {
        self.device.as_ref().map(|d| &d.device)
    }

    pub fn graphics_queue(&self) -> Option<vk::Queue> {
        self.device.as_ref().map(|d| d.graphics_queue)
    }

    pub fn present_queue(&self) -> Option<vk::Queue> {
        self.device.as_ref().map(|d| d.present_queue)
    }

    /// Null unless command buffers were requested before build.
    pub fn command_pool(&self) -> vk::CommandPool {
        self.device
            .as_ref()
            .map_or(vk::CommandPool::null(), |d| d.command_pool)
    }

    pub fn windows(&self) -> impl Iterator<Item = &WindowState> {
        self.windows.iter()
    }

    pub(crate) fn window_index(&self, key: WindowKey) -> Result<usize> {
        self.windows
            .iter()
            .position(|w| w.key == key)
            .ok_or(Error::InvalidWindow)
    }

    pub fn window_state(&self, key: WindowKey) -> Result<&WindowState> {
        let i = self.window_index(key)?;
        Ok(&self.windows[i])
    }

    /// Split borrows for swapchain work on window `idx`.
    pub(crate) fn swapchain_parts(
        &mut self,
        idx: usize,
    ) -> Result<(
        SwapchainEnv<'_>,
        Option<&mut (dyn ImageAllocator + 'static)>,
        &mut WindowState,
    )> {
        let Context {
            instance,
            device,
            adapter,
            format_chooser,
            present_chooser,
            allocator,
            windows,
            entry_points,
            ..
        } = self;
        let inst = instance.as_ref().ok_or(Error::InvalidState)?;
        let dev = device.as_ref().ok_or(Error::InvalidState)?;
        let adapter = adapter.as_ref().ok_or(Error::InvalidState)?;
        let window = windows.get_mut(idx).ok_or(Error::InvalidWindow)?;
        let env = SwapchainEnv {
            instance: &inst.instance,
            surface_loader: &inst.surface,
            device: &dev.device,
            swapchain_loader: &dev.swapchain,
            adapter,
            command_pool: dev.command_pool,
            formats: &**format_chooser,
            present_modes: &**present_chooser,
            entry_points,
        };
        Ok((env, allocator.as_deref_mut(), window))
    }

    /// Recreate the swapchain, attachments and flight sync of a window for
    /// its current drawable size. Not allowed between begin and submit: the
    /// acquired slot's fence stays unsignaled until its work is submitted.
    pub fn window_swapchain_resize(&mut self, key: WindowKey) -> Result<()> {
        let res = self.window_index(key).and_then(|idx| {
            if self.windows[idx].cycle.phase() == FramePhase::Draw {
                return Err(Error::InvalidFrameState);
            }
            self.resize_index(idx)
        });
        self.track(res)
    }

    fn resize_index(&mut self, idx: usize) -> Result<()> {
        let (env, allocator, window) = self.swapchain_parts(idx)?;
        // SAFETY: `recreate` waits for the window to go idle before
        // anything is destroyed.
        unsafe {
            sc::recreate(&env, allocator, window)?;
            frame::destroy_flights(env.device, env.entry_points, window);
            frame::create_flights(env.device, window)?;
        }
        tracing::debug!(
            "window {:?} recreated at {}x{}",
            window.key,
            window.extent.width,
            window.extent.height
        );
        Ok(())
    }

    /// Wait for the current flight slot and acquire the next image.
    /// Blocks without a bound.
    pub fn window_frame_begin(&mut self, key: WindowKey) -> Result<()> {
        let res = self.frame_begin(key);
        self.track(res)
    }

    fn frame_begin(&mut self, key: WindowKey) -> Result<()> {
        let idx = self.window_index(key)?;
        self.windows[idx].cycle.check_begin()?;
        if self.windows[idx].needs_recreate {
            self.resize_index(idx)?;
        }
        let mut recreated = false;
        loop {
            let dev = self.device.as_ref().ok_or(Error::InvalidState)?;
            // SAFETY: the window's swapchain and sync objects live on `dev`.
            let acquired = unsafe { frame::acquire(&dev.device, &dev.swapchain, &mut self.windows[idx])? };
            match acquired {
                Acquire::Ready => return Ok(()),
                Acquire::OutOfDate if self.settings.auto_recreate && !recreated => {
                    tracing::debug!("window {key:?} out of date, recreating");
                    self.resize_index(idx)?;
                    recreated = true;
                }
                Acquire::OutOfDate => return Err(Error::SwapchainOutOfDate),
            }
        }
    }

    pub fn window_submit(&mut self, key: WindowKey, command_buffer: vk::CommandBuffer) -> Result<()> {
        self.window_submit_batch(key, &[command_buffer])
    }

    /// Submit command buffers for the acquired image. They wait on image
    /// availability at color output and signal the present.
    pub fn window_submit_batch(
        &mut self,
        key: WindowKey,
        command_buffers: &[vk::CommandBuffer],
    ) -> Result<()> {
        let res = self.window_index(key).and_then(|idx| {
            self.windows[idx].cycle.check_submit()?;
            let dev = self.device.as_ref().ok_or(Error::InvalidState)?;
            // SAFETY: command buffers are the caller's, recorded and ended.
            unsafe {
                frame::submit(
                    &dev.device,
                    dev.graphics_queue,
                    &mut self.windows[idx],
                    command_buffers,
                )
            }
        });
        self.track(res)
    }

    pub fn window_present(&mut self, key: WindowKey) -> Result<()> {
        let auto = self.settings.auto_recreate;
        let res = self.window_index(key).and_then(|idx| {
            self.windows[idx].cycle.check_present()?;
            let dev = self.device.as_ref().ok_or(Error::InvalidState)?;
            // SAFETY: the image was acquired and submitted this cycle.
            unsafe { frame::present(&dev.swapchain, dev.present_queue, &mut self.windows[idx], auto) }
        });
        self.track(res)
    }

    /// Record a layout transition of `attachment` for the acquired image.
    /// Returns whether a barrier was recorded.
    ///
    /// # Safety
    /// `command_buffer` must belong to this context's device and be in the
    /// recording state.
    pub unsafe fn window_attachment_transition(
        &mut self,
        key: WindowKey,
        attachment: usize,
        layout: vk::ImageLayout,
        command_buffer: vk::CommandBuffer,
    ) -> Result<bool> {
        let idx = self.window_index(key)?;
        let dev = self.device.as_ref().ok_or(Error::InvalidState)?;
        // SAFETY: forwarded from the caller.
        let mut recorder = unsafe { CommandBufferRecorder::new(&dev.device, command_buffer) };
        transition_window(&mut self.windows[idx], attachment, layout, &mut recorder)
    }

    /// Like [`Context::window_attachment_transition`], recording through
    /// `recorder`.
    pub fn window_attachment_transition_with(
        &mut self,
        key: WindowKey,
        attachment: usize,
        layout: vk::ImageLayout,
        recorder: &mut dyn BarrierRecorder,
    ) -> Result<bool> {
        let idx = self.window_index(key)?;
        transition_window(&mut self.windows[idx], attachment, layout, recorder)
    }

    /// Wait until every in-flight frame of the window has finished.
    pub fn window_wait_idle(&mut self, key: WindowKey, timeout: Duration) -> Result<()> {
        let ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        let res = self.window_index(key).and_then(|idx| {
            let dev = self.device.as_ref().ok_or(Error::InvalidState)?;
            // SAFETY: the fences belong to `dev`.
            unsafe { frame::wait_flights(&dev.device, &self.windows[idx], ns) }
        });
        self.track(res)
    }

    /// Destroy everything in reverse creation order. Safe at any stage of a
    /// partial build: null handles and destroy functions the driver never
    /// handed out are skipped, leaking the object instead.
    pub(crate) fn teardown(&mut self) {
        let eps = &self.entry_points;
        if let Some(dev) = self.device.take() {
            // SAFETY: every object below was created on `dev.device`, and the
            // idle wait ends all GPU use of them.
            unsafe {
                if eps.has(c"vkDeviceWaitIdle") {
                    if let Err(e) = dev.device.device_wait_idle() {
                        tracing::warn!("device_wait_idle during teardown: {e:?}");
                    }
                }
                for window in &mut self.windows {
                    sc::release_attachments(&dev.device, eps, self.allocator.as_deref_mut(), window);
                    sc::free_commands(&dev.device, eps, dev.command_pool, window);
                    frame::destroy_flights(&dev.device, eps, window);
                    if window.swapchain != vk::SwapchainKHR::null()
                        && eps.has(c"vkDestroySwapchainKHR")
                    {
                        dev.swapchain.destroy_swapchain(window.swapchain, None);
                    }
                    window.swapchain = vk::SwapchainKHR::null();
                }
                if let Some(allocator) = self.allocator.as_deref_mut() {
                    allocator.release();
                }
                if dev.command_pool != vk::CommandPool::null()
                    && eps.has(c"vkDestroyCommandPool")
                {
                    dev.device.destroy_command_pool(dev.command_pool, None);
                }
                if eps.has(c"vkDestroyDevice") {
                    dev.device.destroy_device(None);
                } else {
                    tracing::warn!("vkDestroyDevice never loaded; leaking the device");
                }
            }
        }
        if let Some(inst) = self.instance.take() {
            // SAFETY: the device is gone; nothing else uses these objects.
            unsafe {
                for window in &mut self.windows {
                    if window.surface != vk::SurfaceKHR::null() && eps.has(c"vkDestroySurfaceKHR") {
                        inst.surface.destroy_surface(window.surface, None);
                    }
                    window.surface = vk::SurfaceKHR::null();
                }
                if let Some((loader, messenger)) = inst.debug {
                    if eps.has(c"vkDestroyDebugUtilsMessengerEXT") {
                        loader.destroy_debug_utils_messenger(messenger, None);
                    }
                }
                if eps.has(c"vkDestroyInstance") {
                    inst.instance.destroy_instance(None);
                } else {
                    tracing::warn!("vkDestroyInstance never loaded; leaking the instance");
                }
            }
        }
        for window in &mut self.windows {
            window.attachments.clear();
            window.commands.clear();
            window.flights.clear();
            window.image_fences.clear();
            window.cycle.restart();
            window.needs_recreate = false;
        }
        self.adapter = None;
        self.validation_active = false;
        self.built = false;
    }
}

fn transition_window(
    window: &mut WindowState,
    attachment: usize,
    layout: vk::ImageLayout,
    recorder: &mut dyn BarrierRecorder,
) -> Result<bool> {
    let aspect = window
        .config
        .attachments
        .get(attachment)
        .ok_or(Error::IllegalParams)?
        .aspect_mask();
    let image = window.image_index as usize;
    let instance = window
        .attachments
        .get_mut(attachment)
        .and_then(|per_image| per_image.get_mut(image))
        .ok_or(Error::InvalidState)?;
    Ok(transition::transition(instance, aspect, layout, recorder))
}

impl Drop for Context {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::{c_char, c_void};

    use super::*;
    use crate::attachment::{AttachmentInstance, COLOR_ATTACHMENT};
    use crate::frame::FlightSync;
    use crate::window::tests::FakeWindow;
    use crate::window::WindowProfile;
    use ash::vk::Handle;

    unsafe extern "system" fn no_device_proc(
        _device: vk::Device,
        _name: *const c_char,
    ) -> vk::PFN_vkVoidFunction {
        None
    }

    /// Device-level state as left by a driver whose device functions never
    /// resolved: every `ash` table entry is a panicking stub.
    fn unloaded_device_level() -> DeviceLevel {
        let gdpa: vk::PFN_vkGetDeviceProcAddr = no_device_proc;
        // SAFETY: the tables are never called through; only the lookups run.
        let (instance, device) = unsafe {
            (
                ash::Instance::load_with(
                    |name| {
                        if name == c"vkGetDeviceProcAddr" {
                            gdpa as *const c_void
                        } else {
                            std::ptr::null()
                        }
                    },
                    vk::Instance::from_raw(0x1),
                ),
                ash::Device::load_with(|_| std::ptr::null(), vk::Device::from_raw(0x2)),
            )
        };
        let swapchain = swapchain::Device::new(&instance, &device);
        DeviceLevel {
            device,
            swapchain,
            graphics_queue: vk::Queue::null(),
            present_queue: vk::Queue::null(),
            command_pool: vk::CommandPool::from_raw(0x3),
        }
    }

    struct Count(usize);

    impl BarrierRecorder for Count {
        fn image_barrier(
            &mut self,
            _src: vk::PipelineStageFlags,
            _dst: vk::PipelineStageFlags,
            _barrier: &vk::ImageMemoryBarrier<'_>,
        ) {
            self.0 += 1;
        }
    }

    fn fake(key: u64) -> FakeWindow {
        FakeWindow {
            key,
            size: vk::Extent2D {
                width: 320,
                height: 240,
            },
        }
    }

    #[test]
    fn empty_context_drops_cleanly() {
        let ctx = Context::new();
        assert!(!ctx.is_built());
        assert_eq!(ctx.last_result(), vk::Result::SUCCESS);
        drop(ctx);
    }

    #[test]
    fn unknown_window_is_reported() {
        let mut ctx = Context::new();
        let key = WindowKey(42);
        assert_eq!(ctx.window_state(key).unwrap_err(), Error::InvalidWindow);
        assert_eq!(ctx.window_frame_begin(key), Err(Error::InvalidWindow));
        assert_eq!(ctx.window_present(key), Err(Error::InvalidWindow));
    }

    #[test]
    fn frame_calls_before_build_fail_without_touching_phase() {
        let mut ctx = Context::new();
        let key = ctx.register_window(fake(1), WindowProfile::Color).unwrap();
        assert_eq!(
            ctx.window_submit(key, vk::CommandBuffer::null()),
            Err(Error::InvalidFrameState)
        );
        assert_eq!(ctx.window_present(key), Err(Error::InvalidFrameState));
        assert_eq!(ctx.window_frame_begin(key), Err(Error::InvalidState));
        assert_eq!(ctx.window_state(key).unwrap().phase(), frame::FramePhase::Begin);
    }

    #[test]
    fn teardown_skips_destroys_that_never_loaded() {
        let mut ctx = Context::new();
        let key = ctx.register_window(fake(2), WindowProfile::Color).unwrap();
        let window = &mut ctx.windows[0];
        window.swapchain = vk::SwapchainKHR::from_raw(0x10);
        window.attachments = vec![vec![AttachmentInstance::new(
            vk::Image::from_raw(0x11),
            vk::ImageView::from_raw(0x12),
            None,
        )]];
        window.commands = vec![vk::CommandBuffer::from_raw(0x13)];
        window.flights = vec![FlightSync {
            image_available: vk::Semaphore::from_raw(0x14),
            render_finished: vk::Semaphore::from_raw(0x15),
            in_flight: vk::Fence::from_raw(0x16),
        }];
        window.image_fences = vec![vk::Fence::from_raw(0x16)];
        ctx.device = Some(unloaded_device_level());

        ctx.teardown();

        assert!(ctx.device().is_none());
        let state = ctx.window_state(key).unwrap();
        assert_eq!(state.swapchain(), vk::SwapchainKHR::null());
        assert!(state.attachments(COLOR_ATTACHMENT).is_empty());
        assert!(state.command_buffers().is_empty());
        assert_eq!(state.current_flight(), Err(Error::InvalidState));
        drop(ctx);
    }

    #[test]
    fn rebuilt_attachments_start_undefined() {
        let dev = unloaded_device_level();
        let mut ctx = Context::new();
        ctx.register_window(fake(4), WindowProfile::ColorDepth).unwrap();
        let window = &mut ctx.windows[0];
        let mut stale = AttachmentInstance::new(vk::Image::from_raw(0x20), vk::ImageView::null(), None);
        stale.layout = vk::ImageLayout::PRESENT_SRC_KHR;
        window.attachments = vec![vec![stale; 2], vec![stale; 2]];

        // SAFETY: nothing loaded, so no destroy function is called.
        unsafe { sc::release_attachments(&dev.device, &EntryPoints::default(), None, window) };
        assert!(window.attachments.is_empty());

        window.attachments = vec![Vec::new(); window.config.attachments.len()];
        for ty in 0..window.attachments.len() {
            for i in 0..2 {
                window.push_instance(ty, vk::Image::from_raw(0x30 + i), vk::ImageView::null(), None);
            }
        }
        assert!(window
            .attachments
            .iter()
            .flatten()
            .all(|a| a.layout == vk::ImageLayout::UNDEFINED));
        assert_eq!(window.attachments.iter().flatten().count(), 4);
    }

    #[test]
    fn resize_between_begin_and_submit_is_rejected() {
        let mut ctx = Context::new();
        let key = ctx.register_window(fake(5), WindowProfile::Color).unwrap();
        ctx.windows[0].cycle.acquired();
        assert_eq!(ctx.window_swapchain_resize(key), Err(Error::InvalidFrameState));
        assert_eq!(ctx.window_state(key).unwrap().phase(), FramePhase::Draw);

        ctx.windows[0].cycle.restart();
        assert_eq!(ctx.window_swapchain_resize(key), Err(Error::InvalidState));
    }

    #[test]
    fn transition_through_context_is_idempotent() {
        let mut ctx = Context::new();
        let key = ctx.register_window(fake(3), WindowProfile::Color).unwrap();
        ctx.windows[0].attachments = vec![vec![AttachmentInstance::new(
            vk::Image::from_raw(0x10),
            vk::ImageView::null(),
            None,
        )]];
        let mut rec = Count(0);
        let layout = vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL;
        assert_eq!(ctx.window_attachment_transition_with(key, 0, layout, &mut rec), Ok(true));
        assert_eq!(ctx.window_attachment_transition_with(key, 0, layout, &mut rec), Ok(false));
        assert_eq!(rec.0, 1);
        assert_eq!(
            ctx.window_attachment_transition_with(key, 5, layout, &mut rec),
            Err(Error::IllegalParams)
        );
    }

    #[test]
    fn api_errors_are_cached() {
        let mut ctx = Context::new();
        let res: Result<()> = ctx.track(Err(Error::Api(vk::Result::ERROR_DEVICE_LOST)));
        assert!(res.is_err());
        assert_eq!(ctx.last_result(), vk::Result::ERROR_DEVICE_LOST);
        let _ = ctx.track::<()>(Err(Error::InvalidWindow));
        assert_eq!(ctx.last_result(), vk::Result::ERROR_DEVICE_LOST);
    }
}
