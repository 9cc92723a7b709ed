// SPDX-License-Identifier: CEPL-1.0
//! Vulkan bootstrap: instance, device selection, per-window swapchains and
//! the begin → submit → present frame cycle.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod adapter;
pub mod allocator;
pub mod attachment;
mod builder;
mod context;
pub mod debug;
pub mod error;
pub mod extensions;
pub mod frame;
pub mod loader;
pub mod selector;
pub mod swapchain;
pub mod transition;
pub mod window;

pub use ash;
pub use ash::vk;

pub use adapter::{AdapterSnapshot, QueueRoles, MAX_SURFACE_ENTRIES};
#[cfg(feature = "gpu-allocator")]
pub use allocator::GpuImageAllocator;
pub use allocator::{AllocationId, ImageAllocator};
pub use attachment::{AttachmentConfig, AttachmentInstance, AttachmentUsage, COLOR_ATTACHMENT};
pub use builder::VALIDATION_LAYER;
pub use context::Context;
pub use debug::{DebugCallback, Severity, TracingDebugCallback};
pub use error::{error_name, Error, Result, SUCCESS};
pub use extensions::ExtensionScope;
pub use frame::{FrameCycle, FramePhase};
pub use selector::{select_adapter, DefaultScorer, DeviceScorer};
pub use swapchain::{
    DefaultFormatChooser, DefaultPresentModeChooser, PresentModeChooser, SurfaceFormatChooser,
};
pub use transition::{BarrierRecorder, CommandBufferRecorder};
pub use window::{WindowAdapter, WindowConfig, WindowKey, WindowProfile, WindowState};
