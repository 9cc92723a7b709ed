// SPDX-License-Identifier: CEPL-1.0
//! winit windows as tephra window adapters.
#![deny(unsafe_op_in_unsafe_fn)]
pub use winit;

use std::ffi::CStr;
use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tephra_vk::{vk, Error, Result, WindowAdapter, WindowKey};
use winit::window::Window;

/// Shares a winit window with a context. Cloning the `Arc` keeps the window
/// alive for as long as its surface exists.
#[derive(Clone, Debug)]
pub struct WinitWindow {
    window: Arc<Window>,
}

impl WinitWindow {
    pub fn new(window: Arc<Window>) -> Self {
        Self { window }
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }
}

/// Context key of a winit window.
pub fn window_key(window: &Window) -> WindowKey {
    WindowKey(u64::from(window.id()))
}

impl WindowAdapter for WinitWindow {
    fn key(&self) -> WindowKey {
        window_key(&self.window)
    }

    fn required_extensions(&self) -> Result<Vec<&'static CStr>> {
        let display = self.window.display_handle().map_err(|e| {
            tracing::error!("display_handle: {e}");
            Error::DependencyFailed
        })?;
        let names = ash_window::enumerate_required_extensions(display.as_raw())?;
        // SAFETY: ash-window hands out pointers to static, NUL-terminated names.
        Ok(names
            .iter()
            .map(|&p| unsafe { CStr::from_ptr(p) })
            .collect())
    }

    fn drawable_size(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    unsafe fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR> {
        let handles = self
            .window
            .display_handle()
            .and_then(|d| Ok((d.as_raw(), self.window.window_handle()?.as_raw())));
        let (display, window) = handles.map_err(|e| {
            tracing::error!("window handles: {e}");
            Error::DependencyFailed
        })?;
        // SAFETY: the handles come from a live window, and the instance was
        // created with the extensions listed by `required_extensions`.
        let surface = unsafe { ash_window::create_surface(entry, instance, display, window, None)? };
        Ok(surface)
    }
}
