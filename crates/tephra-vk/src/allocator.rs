// SPDX-License-Identifier: CEPL-1.0
//! Image allocation for attachments other than the swapchain color target.

use ash::vk;

use crate::error::Result;

/// Opaque handle an [`ImageAllocator`] hands out with each image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AllocationId(pub u64);

pub trait ImageAllocator {
    /// Called once the logical device exists, before the first allocation.
    fn init(
        &mut self,
        _instance: &ash::Instance,
        _device: &ash::Device,
        _physical_device: vk::PhysicalDevice,
    ) -> Result<()> {
        Ok(())
    }

    fn allocate_image(
        &mut self,
        device: &ash::Device,
        info: &vk::ImageCreateInfo<'_>,
    ) -> Result<(vk::Image, AllocationId)>;

    fn free_image(&mut self, device: &ash::Device, image: vk::Image, allocation: AllocationId);

    /// Called before the logical device is destroyed.
    fn release(&mut self) {}
}

#[cfg(feature = "gpu-allocator")]
pub use gpu::GpuImageAllocator;

#[cfg(feature = "gpu-allocator")]
mod gpu {
    use std::collections::HashMap;

    use ash::vk;
    use gpu_allocator::vulkan::{
        Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
    };
    use gpu_allocator::MemoryLocation;

    use super::{AllocationId, ImageAllocator};
    use crate::error::{Error, Result};

    /// Device-local attachment memory through `gpu-allocator`.
    #[derive(Default)]
    pub struct GpuImageAllocator {
        allocator: Option<Allocator>,
        live: HashMap<AllocationId, Allocation>,
        next_id: u64,
    }

    impl GpuImageAllocator {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn live_allocations(&self) -> usize {
            self.live.len()
        }
    }

    impl ImageAllocator for GpuImageAllocator {
        fn init(
            &mut self,
            instance: &ash::Instance,
            device: &ash::Device,
            physical_device: vk::PhysicalDevice,
        ) -> Result<()> {
            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })
            .map_err(|e| {
                tracing::error!("gpu-allocator init failed: {e}");
                Error::DependencyFailed
            })?;
            self.allocator = Some(allocator);
            Ok(())
        }

        fn allocate_image(
            &mut self,
            device: &ash::Device,
            info: &vk::ImageCreateInfo<'_>,
        ) -> Result<(vk::Image, AllocationId)> {
            let allocator = self.allocator.as_mut().ok_or(Error::InvalidState)?;
            // SAFETY: `device` is the device this allocator was initialised with.
            let image = unsafe { device.create_image(info, None)? };
            let requirements = unsafe { device.get_image_memory_requirements(image) };

            let allocation = match allocator.allocate(&AllocationCreateDesc {
                name: "tephra attachment",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            }) {
                Ok(a) => a,
                Err(e) => {
                    tracing::error!("attachment allocation failed: {e}");
                    unsafe { device.destroy_image(image, None) };
                    return Err(Error::AllocFailed);
                }
            };

            let bound = unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) };
            if let Err(e) = bound {
                warn_on_free_error(allocator.free(allocation));
                unsafe { device.destroy_image(image, None) };
                return Err(e.into());
            }

            let id = AllocationId(self.next_id);
            self.next_id += 1;
            self.live.insert(id, allocation);
            Ok((image, id))
        }

        fn free_image(&mut self, device: &ash::Device, image: vk::Image, allocation: AllocationId) {
            // SAFETY: the caller has waited for the GPU to stop using `image`.
            unsafe { device.destroy_image(image, None) };
            let Some(allocation) = self.live.remove(&allocation) else {
                tracing::warn!("free of unknown attachment allocation {allocation:?}");
                return;
            };
            if let Some(allocator) = self.allocator.as_mut() {
                warn_on_free_error(allocator.free(allocation));
            }
        }

        fn release(&mut self) {
            if let Some(allocator) = self.allocator.as_mut() {
                for (_, allocation) in self.live.drain() {
                    warn_on_free_error(allocator.free(allocation));
                }
            }
            self.allocator = None;
        }
    }

    /// Returns whether the free went through.
    pub(super) fn warn_on_free_error(result: gpu_allocator::Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("gpu-allocator free failed: {e}");
                false
            }
        }
    }
}
