// SPDX-License-Identifier: CEPL-1.0
//! Liveness table for the driver entry points this crate calls.
//!
//! `ash` resolves its own dispatch tables; this table only records which names
//! the loader actually returned, so bring-up can fail early on a broken driver
//! and teardown can skip destroy functions that never loaded.

use std::ffi::CStr;

use ash::vk;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Global,
    Instance,
    Device,
}

#[derive(Clone, Copy, Debug)]
pub struct EntryPoint {
    pub name: &'static CStr,
    pub tier: Tier,
    pub required: bool,
}

const fn ep(name: &'static CStr, tier: Tier, required: bool) -> EntryPoint {
    EntryPoint {
        name,
        tier,
        required,
    }
}

pub const ENTRY_POINTS: &[EntryPoint] = &[
    ep(c"vkCreateInstance", Tier::Global, true),
    ep(c"vkEnumerateInstanceExtensionProperties", Tier::Global, true),
    ep(c"vkEnumerateInstanceLayerProperties", Tier::Global, true),
    ep(c"vkDestroyInstance", Tier::Instance, true),
    ep(c"vkEnumeratePhysicalDevices", Tier::Instance, true),
    ep(c"vkGetPhysicalDeviceProperties", Tier::Instance, true),
    ep(c"vkGetPhysicalDeviceQueueFamilyProperties", Tier::Instance, true),
    ep(c"vkGetPhysicalDeviceMemoryProperties", Tier::Instance, true),
    ep(c"vkEnumerateDeviceExtensionProperties", Tier::Instance, true),
    ep(c"vkCreateDevice", Tier::Instance, true),
    ep(c"vkGetDeviceProcAddr", Tier::Instance, true),
    ep(c"vkDestroySurfaceKHR", Tier::Instance, false),
    ep(c"vkGetPhysicalDeviceSurfaceSupportKHR", Tier::Instance, false),
    ep(c"vkGetPhysicalDeviceSurfaceCapabilitiesKHR", Tier::Instance, false),
    ep(c"vkGetPhysicalDeviceSurfaceFormatsKHR", Tier::Instance, false),
    ep(c"vkGetPhysicalDeviceSurfacePresentModesKHR", Tier::Instance, false),
    ep(c"vkCreateDebugUtilsMessengerEXT", Tier::Instance, false),
    ep(c"vkDestroyDebugUtilsMessengerEXT", Tier::Instance, false),
    ep(c"vkDestroyDevice", Tier::Device, true),
    ep(c"vkGetDeviceQueue", Tier::Device, true),
    ep(c"vkDeviceWaitIdle", Tier::Device, true),
    ep(c"vkCreateCommandPool", Tier::Device, true),
    ep(c"vkDestroyCommandPool", Tier::Device, true),
    ep(c"vkAllocateCommandBuffers", Tier::Device, true),
    ep(c"vkFreeCommandBuffers", Tier::Device, true),
    ep(c"vkCreateImageView", Tier::Device, true),
    ep(c"vkDestroyImageView", Tier::Device, true),
    ep(c"vkDestroyImage", Tier::Device, true),
    ep(c"vkFreeMemory", Tier::Device, true),
    ep(c"vkCreateSemaphore", Tier::Device, true),
    ep(c"vkDestroySemaphore", Tier::Device, true),
    ep(c"vkCreateFence", Tier::Device, true),
    ep(c"vkDestroyFence", Tier::Device, true),
    ep(c"vkWaitForFences", Tier::Device, true),
    ep(c"vkResetFences", Tier::Device, true),
    ep(c"vkQueueSubmit", Tier::Device, true),
    ep(c"vkCmdPipelineBarrier", Tier::Device, true),
    ep(c"vkCreateSwapchainKHR", Tier::Device, false),
    ep(c"vkDestroySwapchainKHR", Tier::Device, false),
    ep(c"vkGetSwapchainImagesKHR", Tier::Device, false),
    ep(c"vkAcquireNextImageKHR", Tier::Device, false),
    ep(c"vkQueuePresentKHR", Tier::Device, false),
];

/// Which entries of [`ENTRY_POINTS`] resolved to a live pointer.
#[derive(Clone, Debug)]
pub struct EntryPoints {
    resolved: Vec<bool>,
}

impl Default for EntryPoints {
    fn default() -> Self {
        Self {
            resolved: vec![false; ENTRY_POINTS.len()],
        }
    }
}

impl EntryPoints {
    pub fn has(&self, name: &CStr) -> bool {
        ENTRY_POINTS
            .iter()
            .zip(&self.resolved)
            .any(|(ep, &live)| live && ep.name == name)
    }

    /// Resolve every entry of `tier` through `resolve`. Fails if a required
    /// one comes back null.
    pub fn load_tier<F>(&mut self, tier: Tier, mut resolve: F) -> Result<()>
    where
        F: FnMut(&CStr) -> vk::PFN_vkVoidFunction,
    {
        let mut missing = None;
        for (ep, live) in ENTRY_POINTS.iter().zip(self.resolved.iter_mut()) {
            if ep.tier != tier {
                continue;
            }
            *live = resolve(ep.name).is_some();
            if !*live && ep.required && missing.is_none() {
                missing = Some(ep.name);
            }
        }
        match missing {
            Some(name) => {
                tracing::error!("required entry point {:?} did not load", name);
                Err(Error::LoadFailed)
            }
            None => Ok(()),
        }
    }

    pub(crate) fn load_global(&mut self, entry: &ash::Entry) -> Result<()> {
        let gipa = entry.static_fn().get_instance_proc_addr;
        // SAFETY: a null instance is valid for global-level lookups.
        self.load_tier(Tier::Global, |name| unsafe {
            gipa(vk::Instance::null(), name.as_ptr())
        })
    }

    pub(crate) fn load_instance(&mut self, entry: &ash::Entry, instance: &ash::Instance) -> Result<()> {
        let gipa = entry.static_fn().get_instance_proc_addr;
        let handle = instance.handle();
        // SAFETY: `handle` is a live instance created from `entry`.
        self.load_tier(Tier::Instance, |name| unsafe { gipa(handle, name.as_ptr()) })
    }

    pub(crate) fn load_device(&mut self, instance: &ash::Instance, device: &ash::Device) -> Result<()> {
        let gdpa = instance.fp_v1_0().get_device_proc_addr;
        let handle = device.handle();
        // SAFETY: `handle` is a live device created from `instance`.
        self.load_tier(Tier::Device, |name| unsafe { gdpa(handle, name.as_ptr()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "system" fn live() {}

    #[test]
    fn missing_required_fails_the_tier() {
        let mut eps = EntryPoints::default();
        let res = eps.load_tier(Tier::Global, |name| {
            if name == c"vkCreateInstance" {
                None
            } else {
                Some(live as unsafe extern "system" fn())
            }
        });
        assert_eq!(res, Err(Error::LoadFailed));
        assert!(eps.has(c"vkEnumerateInstanceExtensionProperties"));
        assert!(!eps.has(c"vkCreateInstance"));
    }

    #[test]
    fn optional_gaps_are_tolerated() {
        let mut eps = EntryPoints::default();
        let res = eps.load_tier(Tier::Device, |name| {
            if name.to_bytes().ends_with(b"KHR") {
                None
            } else {
                Some(live as unsafe extern "system" fn())
            }
        });
        assert!(res.is_ok());
        assert!(eps.has(c"vkDestroyFence"));
        assert!(!eps.has(c"vkDestroySwapchainKHR"));
        // other tiers untouched
        assert!(!eps.has(c"vkDestroyInstance"));
    }

    #[test]
    fn names_are_unique() {
        for (i, a) in ENTRY_POINTS.iter().enumerate() {
            assert!(ENTRY_POINTS[i + 1..].iter().all(|b| b.name != a.name));
        }
    }
}
