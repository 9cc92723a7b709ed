// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use tephra_core::init_tracing;
use tephra_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};
use tephra_platform::WinitWindow;
use tephra_vk::{
    ash, vk, Context, Error, GpuImageAllocator, WindowConfig, WindowKey,
    WindowProfile, COLOR_ATTACHMENT,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable the Khronos validation layer
    #[arg(long)]
    validation: bool,
    /// Attachment set of the window
    #[arg(long, value_enum, default_value_t = ProfileArg::Color)]
    profile: ProfileArg,
    /// Only consider the adapter with this exact name
    #[arg(long)]
    device: Option<String>,
    /// Force FIFO presentation
    #[arg(long)]
    vsync: bool,
    /// Config file
    #[arg(long, default_value = "tephra.toml")]
    config: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProfileArg {
    Color,
    ColorDepth,
}

impl From<ProfileArg> for WindowProfile {
    fn from(p: ProfileArg) -> Self {
        match p {
            ProfileArg::Color => WindowProfile::Color,
            ProfileArg::ColorDepth => WindowProfile::ColorDepth,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RenderCfg {
    #[serde(default = "default_clear")]
    clear_color: [f32; 4],
    #[serde(default)]
    vsync: bool,
    #[serde(default = "default_images")]
    image_count: u32,
    #[serde(default = "default_in_flight")]
    max_in_flight: u32,
    #[serde(default)]
    device_extensions: Vec<String>,
    #[serde(default)]
    optional_device_extensions: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AppCfg {
    #[serde(default)]
    render: RenderCfg,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            vsync: false,
            image_count: default_images(),
            max_in_flight: default_in_flight(),
            device_extensions: Vec::new(),
            optional_device_extensions: Vec::new(),
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}
fn default_images() -> u32 {
    3
}
fn default_in_flight() -> u32 {
    2
}
fn load_cfg(path: &str) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => toml::from_str::<AppCfg>(&s).unwrap_or_else(|e| {
            warn!("{path}: {e}; using defaults");
            AppCfg::default()
        }),
        Err(_) => AppCfg::default(),
    }
}

/// Context plus the handles the frame loop needs every frame.
struct Gpu {
    ctx: Context,
    device: ash::Device,
    key: WindowKey,
}

struct App {
    args: Args,
    cfg: AppCfg,
    window: Option<Arc<Window>>,
    gpu: Option<Gpu>,

    exiting: bool,
    paused: bool,
    resize_pending: bool,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn build_gpu(&self, window: Arc<Window>) -> Result<Gpu> {
        let mut ctx = Context::new();
        if self.args.validation {
            ctx.request_validation();
        }
        ctx.set_application("tephra demo", vk::make_api_version(0, 0, 1, 0))?;
        for name in &self.cfg.render.device_extensions {
            ctx.add_required_device_extension(name)?;
        }
        for name in &self.cfg.render.optional_device_extensions {
            ctx.add_optional_device_extension(name)?;
        }
        if let Some(name) = &self.args.device {
            ctx.lock_device(name);
        }
        if self.args.vsync || self.cfg.render.vsync {
            ctx.set_present_mode_chooser(|_: &[vk::PresentModeKHR]| vk::PresentModeKHR::FIFO);
        }
        let profile = WindowProfile::from(self.args.profile);
        if profile == WindowProfile::ColorDepth {
            ctx.set_allocator(GpuImageAllocator::new());
        }
        ctx.request_command_buffers();

        let config = WindowConfig {
            image_count: self.cfg.render.image_count,
            max_in_flight: self.cfg.render.max_in_flight,
            ..WindowConfig::from(profile)
        };
        let key = ctx.register_window_with(WinitWindow::new(window), config)?;
        if let Err(e) = ctx.build() {
            anyhow::bail!("build failed: {} ({e})", e.name());
        }

        let device = ctx.device().context("no device after build")?.clone();
        let state = ctx.window_state(key)?;
        info!(
            "swapchain {}x{} images={} format={:?} mode={:?}",
            state.extent().width,
            state.extent().height,
            state.swap_size(),
            state.surface_format().format,
            state.present_mode()
        );
        Ok(Gpu { ctx, device, key })
    }

    fn draw_frame(&mut self) -> Result<()> {
        let clear = self.cfg.render.clear_color;
        let Some(gpu) = self.gpu.as_mut() else {
            return Ok(());
        };
        let Gpu { ctx, device, key } = gpu;
        let key = *key;

        if std::mem::take(&mut self.resize_pending) {
            match ctx.window_swapchain_resize(key) {
                Ok(()) => {}
                // Zero-sized drawable; keep the old swapchain until it grows.
                Err(Error::SwapchainOutOfDate) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }

        ctx.window_frame_begin(key)?;
        let state = ctx.window_state(key)?;
        let cmd = state.command_buffer().ok_or(Error::NoCommandBuffer)?;
        let image = state
            .current_attachment(COLOR_ATTACHMENT)
            .ok_or(Error::InvalidState)?
            .image;
        let depth = state.attachment_configs().len() > 1;

        let clear_value = vk::ClearColorValue { float32: clear };
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let begin = vk::CommandBufferBeginInfo {
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        // SAFETY: `cmd` belongs to the acquired image. `window_frame_begin`
        // waited on the fence of the last submission that used that image.
        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(cmd, &begin)?;
            ctx.window_attachment_transition(
                key,
                COLOR_ATTACHMENT,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                cmd,
            )?;
            device.cmd_clear_color_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear_value,
                &[range],
            );
            if depth {
                ctx.window_attachment_transition(
                    key,
                    1,
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                    cmd,
                )?;
            }
            ctx.window_attachment_transition(
                key,
                COLOR_ATTACHMENT,
                vk::ImageLayout::PRESENT_SRC_KHR,
                cmd,
            )?;
            device.end_command_buffer(cmd)?;
        }

        ctx.window_submit(key, cmd)?;
        ctx.window_present(key)?;
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(mut gpu) = self.gpu.take() {
            if let Err(e) = gpu.ctx.window_wait_idle(gpu.key, Duration::from_secs(1)) {
                warn!("wait idle on exit: {e}");
            }
        }
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let window = match event_loop.create_window(Window::default_attributes().with_title("tephra")) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                error!("create_window: {e}");
                event_loop.exit();
                return;
            }
        };
        match self.build_gpu(window.clone()) {
            Ok(gpu) => self.gpu = Some(gpu),
            Err(e) => {
                error!("vulkan init failed: {e:#}");
                event_loop.exit();
                return;
            }
        }
        let size = window.inner_size();
        self.paused = size.width == 0 || size.height == 0;
        info!("resumed → paused={}", self.paused);
        event_loop.set_control_flow(ControlFlow::Poll);
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.exiting = true;
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                self.paused = new_size.width == 0 || new_size.height == 0;
                if !self.paused {
                    self.resize_pending = true;
                }
                info!("Resized → {}x{} (paused={})", new_size.width, new_size.height, self.paused);
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                match self.draw_frame() {
                    Ok(()) => self.frames = self.frames.saturating_add(1),
                    Err(e) => error!("frame error: {e:#}"),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_cfg(&args.config);
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App {
        args,
        cfg,
        window: None,
        gpu: None,
        exiting: false,
        paused: false,
        resize_pending: false,
        frames: 0,
        last_fps_instant: Instant::now(),
    };

    event_loop.run_app(&mut app)?;
    Ok(())
}
