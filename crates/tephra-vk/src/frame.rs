// SPDX-License-Identifier: CEPL-1.0
//! Per-window frame cycle: begin (acquire) → submit → present.

use ash::khr::swapchain;
use ash::vk;

use crate::error::{Error, Result};
use crate::loader::EntryPoints;
use crate::window::WindowState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramePhase {
    /// Ready to acquire the next image.
    Begin,
    /// Image acquired; waiting for command buffers.
    Draw,
    /// Work submitted; waiting for present.
    Present,
}

/// Phase plus flight slot of one window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameCycle {
    phase: FramePhase,
    flight: usize,
    max_in_flight: usize,
}

impl FrameCycle {
    pub fn new(max_in_flight: u32) -> Self {
        Self {
            phase: FramePhase::Begin,
            flight: 0,
            max_in_flight: (max_in_flight as usize).max(1),
        }
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn flight(&self) -> usize {
        self.flight
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn check_begin(&self) -> Result<()> {
        match self.phase {
            FramePhase::Begin => Ok(()),
            _ => Err(Error::InvalidFrameState),
        }
    }

    pub fn check_submit(&self) -> Result<()> {
        match self.phase {
            FramePhase::Draw => Ok(()),
            _ => Err(Error::InvalidFrameState),
        }
    }

    /// Presenting right after begin means nothing was submitted.
    pub fn check_present(&self) -> Result<()> {
        match self.phase {
            FramePhase::Present => Ok(()),
            FramePhase::Draw => Err(Error::NoCommandBuffer),
            FramePhase::Begin => Err(Error::InvalidFrameState),
        }
    }

    pub fn acquired(&mut self) {
        debug_assert_eq!(self.phase, FramePhase::Begin);
        self.phase = FramePhase::Draw;
    }

    pub fn submitted(&mut self) {
        debug_assert_eq!(self.phase, FramePhase::Draw);
        self.phase = FramePhase::Present;
    }

    pub fn presented(&mut self) {
        debug_assert_eq!(self.phase, FramePhase::Present);
        self.phase = FramePhase::Begin;
        self.flight = (self.flight + 1) % self.max_in_flight;
    }

    /// Back to the first slot, for freshly created sync objects.
    pub fn restart(&mut self) {
        self.phase = FramePhase::Begin;
        self.flight = 0;
    }
}

/// Sync objects of one flight slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlightSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

pub(crate) enum Acquire {
    Ready,
    OutOfDate,
}

/// Create `max_in_flight` slots. Fences start signaled so the first wait
/// on each slot returns at once. Partially created slots are kept on the
/// window for teardown.
pub(crate) unsafe fn create_flights(device: &ash::Device, window: &mut WindowState) -> Result<()> {
    let sem_ci = vk::SemaphoreCreateInfo::default();
    let fence_ci = vk::FenceCreateInfo {
        flags: vk::FenceCreateFlags::SIGNALED,
        ..Default::default()
    };
    for _ in 0..window.config.max_in_flight {
        let mut sync = FlightSync::default();
        // SAFETY: `device` is live; every handle lands in `window.flights`.
        let res = unsafe {
            (|| -> ash::prelude::VkResult<()> {
                sync.image_available = device.create_semaphore(&sem_ci, None)?;
                sync.render_finished = device.create_semaphore(&sem_ci, None)?;
                sync.in_flight = device.create_fence(&fence_ci, None)?;
                Ok(())
            })()
        };
        window.flights.push(sync);
        res?;
    }
    window.cycle.restart();
    Ok(())
}

/// Destroy every slot. Handles whose destroy function never loaded are
/// dropped without a call.
pub(crate) unsafe fn destroy_flights(
    device: &ash::Device,
    eps: &EntryPoints,
    window: &mut WindowState,
) {
    let semaphores = eps.has(c"vkDestroySemaphore");
    let fences = eps.has(c"vkDestroyFence");
    for sync in window.flights.drain(..) {
        // SAFETY: the caller has waited for the window to go idle.
        unsafe {
            if semaphores && sync.image_available != vk::Semaphore::null() {
                device.destroy_semaphore(sync.image_available, None);
            }
            if semaphores && sync.render_finished != vk::Semaphore::null() {
                device.destroy_semaphore(sync.render_finished, None);
            }
            if fences && sync.in_flight != vk::Fence::null() {
                device.destroy_fence(sync.in_flight, None);
            }
        }
    }
    window.image_fences.iter_mut().for_each(|f| *f = vk::Fence::null());
}

/// Record that swap image `index` is now guarded by `fence`. Returns the
/// fence of the frame that last used the image, if it belongs to another
/// slot and must be waited on first.
pub(crate) fn claim_image(
    image_fences: &mut [vk::Fence],
    index: u32,
    fence: vk::Fence,
) -> Option<vk::Fence> {
    let slot = image_fences.get_mut(index as usize)?;
    let previous = std::mem::replace(slot, fence);
    (previous != vk::Fence::null() && previous != fence).then_some(previous)
}

/// Wait for every flight fence of `window`.
pub(crate) unsafe fn wait_flights(
    device: &ash::Device,
    window: &WindowState,
    timeout_ns: u64,
) -> Result<()> {
    let fences: Vec<vk::Fence> = window
        .flights
        .iter()
        .map(|s| s.in_flight)
        .filter(|&f| f != vk::Fence::null())
        .collect();
    if fences.is_empty() {
        return Ok(());
    }
    // SAFETY: the fences belong to `device`.
    match unsafe { device.wait_for_fences(&fences, true, timeout_ns) } {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(Error::Timeout),
        Err(e) => Err(e.into()),
    }
}

/// Wait for the current slot, then acquire the next image into it. When
/// this returns `Ready`, no earlier submission still uses the acquired
/// image or its per-image command buffer.
pub(crate) unsafe fn acquire(
    device: &ash::Device,
    loader: &swapchain::Device,
    window: &mut WindowState,
) -> Result<Acquire> {
    window.cycle.check_begin()?;
    let sync = window.current_flight()?;
    // SAFETY: the slot's objects and the swapchain are live on `device`.
    unsafe {
        device.wait_for_fences(&[sync.in_flight], true, u64::MAX)?;
        let acquired = loader.acquire_next_image(
            window.swapchain,
            u64::MAX,
            sync.image_available,
            vk::Fence::null(),
        );
        match acquired {
            Ok((index, false)) => {
                // The image's command buffer may still be pending from a
                // frame submitted through another slot.
                if let Some(previous) = claim_image(&mut window.image_fences, index, sync.in_flight) {
                    device.wait_for_fences(&[previous], true, u64::MAX)?;
                }
                device.reset_fences(&[sync.in_flight])?;
                window.image_index = index;
                window.cycle.acquired();
                Ok(Acquire::Ready)
            }
            Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(e) => {
                tracing::error!("acquire_next_image failed: {e:?}");
                Err(e.into())
            }
        }
    }
}

pub(crate) unsafe fn submit(
    device: &ash::Device,
    queue: vk::Queue,
    window: &mut WindowState,
    commands: &[vk::CommandBuffer],
) -> Result<()> {
    window.cycle.check_submit()?;
    if commands.is_empty() {
        return Err(Error::NoCommandBuffer);
    }
    let sync = window.current_flight()?;
    let wait = [sync.image_available];
    let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
    let signal = [sync.render_finished];
    let info = vk::SubmitInfo::default()
        .wait_semaphores(&wait)
        .wait_dst_stage_mask(&stages)
        .command_buffers(commands)
        .signal_semaphores(&signal);
    // SAFETY: the caller's command buffers are fully recorded.
    unsafe { device.queue_submit(queue, &[info], sync.in_flight)? };
    window.cycle.submitted();
    Ok(())
}

/// Present the acquired image. An out-of-date target still completes the
/// cycle; with `auto_recreate` the window is flagged for the next begin,
/// otherwise the caller gets [`Error::SwapchainOutOfDate`].
pub(crate) unsafe fn present(
    loader: &swapchain::Device,
    queue: vk::Queue,
    window: &mut WindowState,
    auto_recreate: bool,
) -> Result<()> {
    window.cycle.check_present()?;
    let sync = window.current_flight()?;
    let wait = [sync.render_finished];
    let swapchains = [window.swapchain];
    let indices = [window.image_index];
    let info = vk::PresentInfoKHR::default()
        .wait_semaphores(&wait)
        .swapchains(&swapchains)
        .image_indices(&indices);
    // SAFETY: `image_index` was acquired from `swapchain` this cycle.
    let res = unsafe { loader.queue_present(queue, &info) };
    match res {
        Ok(suboptimal) => {
            window.cycle.presented();
            if suboptimal && auto_recreate {
                window.needs_recreate = true;
            }
            Ok(())
        }
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
            window.cycle.presented();
            if auto_recreate {
                window.needs_recreate = true;
                Ok(())
            } else {
                Err(Error::SwapchainOutOfDate)
            }
        }
        Err(e) => {
            tracing::error!("queue_present failed: {e:?}");
            Err(e.into())
        }
    }
}
