// SPDX-License-Identifier: CEPL-1.0
use std::borrow::Cow;
use std::ffi::CStr;

use ash::khr::surface;
use ash::vk;

/// Upper bound on cached surface formats / present modes per adapter.
pub const MAX_SURFACE_ENTRIES: usize = 32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueRoles {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueRoles {
    pub fn complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn unified(&self) -> bool {
        self.complete() && self.graphics == self.present
    }
}

/// Everything selection needs to know about one physical device.
#[derive(Clone, Debug, Default)]
pub struct AdapterSnapshot {
    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub queues: QueueRoles,
    pub surface_formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl AdapterSnapshot {
    pub fn name(&self) -> Cow<'_, str> {
        let raw = &self.properties.device_name;
        // SAFETY: c_char and u8 share size and alignment.
        let bytes: &[u8] = unsafe { std::slice::from_raw_parts(raw.as_ptr().cast(), raw.len()) };
        match CStr::from_bytes_until_nul(bytes) {
            Ok(name) => name.to_string_lossy(),
            Err(_) => String::from_utf8_lossy(bytes),
        }
    }

    pub fn device_type(&self) -> vk::PhysicalDeviceType {
        self.properties.device_type
    }

    /// Bytes across all device-local heaps.
    pub fn device_local_bytes(&self) -> u64 {
        let count = (self.memory.memory_heap_count as usize).min(vk::MAX_MEMORY_HEAPS);
        self.memory.memory_heaps[..count]
            .iter()
            .filter(|h| h.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|h| h.size)
            .sum()
    }
}

/// Pick the graphics family and the first family that can present to every
/// surface in `surfaces`; stops once both roles are filled.
pub fn resolve_queue_roles<F>(
    families: &[vk::QueueFamilyProperties],
    surfaces: &[vk::SurfaceKHR],
    mut supports_present: F,
) -> QueueRoles
where
    F: FnMut(u32, vk::SurfaceKHR) -> bool,
{
    let mut roles = QueueRoles::default();
    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if roles.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            roles.graphics = Some(i);
        }
        if roles.present.is_none() && surfaces.iter().all(|&s| supports_present(i, s)) {
            roles.present = Some(i);
        }
        if roles.complete() {
            break;
        }
    }
    roles
}

/// Build a snapshot for `physical_device`. Surface formats and present modes
/// come from the first surface only.
pub(crate) unsafe fn probe(
    instance: &ash::Instance,
    surface_loader: &surface::Instance,
    physical_device: vk::PhysicalDevice,
    surfaces: &[vk::SurfaceKHR],
) -> AdapterSnapshot {
    // SAFETY: the caller passes a physical device enumerated from `instance`
    // and surfaces created on it.
    unsafe {
        let families = instance.get_physical_device_queue_family_properties(physical_device);
        let queues = resolve_queue_roles(&families, surfaces, |family, surface| {
            surface_loader
                .get_physical_device_surface_support(physical_device, family, surface)
                .unwrap_or(false)
        });

        let (mut surface_formats, mut present_modes) = match surfaces.first() {
            Some(&first) => (
                surface_loader
                    .get_physical_device_surface_formats(physical_device, first)
                    .unwrap_or_default(),
                surface_loader
                    .get_physical_device_surface_present_modes(physical_device, first)
                    .unwrap_or_default(),
            ),
            None => (Vec::new(), Vec::new()),
        };
        surface_formats.truncate(MAX_SURFACE_ENTRIES);
        present_modes.truncate(MAX_SURFACE_ENTRIES);

        AdapterSnapshot {
            physical_device,
            properties: instance.get_physical_device_properties(physical_device),
            features: instance.get_physical_device_features(physical_device),
            memory: instance.get_physical_device_memory_properties(physical_device),
            queues,
            surface_formats,
            present_modes,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ash::vk::Handle;

    pub(crate) fn snapshot(
        name: &str,
        ty: vk::PhysicalDeviceType,
        local_bytes: u64,
        queues: QueueRoles,
    ) -> AdapterSnapshot {
        let mut s = AdapterSnapshot::default();
        s.properties.device_type = ty;
        for (dst, src) in s.properties.device_name.iter_mut().zip(name.bytes()) {
            *dst = src as std::ffi::c_char;
        }
        s.memory.memory_heap_count = 1;
        s.memory.memory_heaps[0] = vk::MemoryHeap {
            size: local_bytes,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        s.queues = queues;
        s
    }

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn present_must_cover_every_surface() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::TRANSFER),
        ];
        let a = vk::SurfaceKHR::from_raw(1);
        let b = vk::SurfaceKHR::from_raw(2);
        // family 0 presents to `a` only, family 2 to both
        let roles = resolve_queue_roles(&families, &[a, b], |i, s| match i {
            0 => s == a,
            2 => true,
            _ => false,
        });
        assert_eq!(roles.graphics, Some(0));
        assert_eq!(roles.present, Some(2));
        assert!(!roles.unified());
    }

    #[test]
    fn scan_stops_once_both_roles_found() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let mut probed = Vec::new();
        let s = vk::SurfaceKHR::from_raw(9);
        let roles = resolve_queue_roles(&families, &[s], |i, _| {
            probed.push(i);
            true
        });
        assert!(roles.unified());
        assert_eq!(probed, vec![0]);
    }

    #[test]
    fn no_graphics_family_leaves_role_empty() {
        let families = [family(vk::QueueFlags::COMPUTE)];
        let roles = resolve_queue_roles(&families, &[], |_, _| true);
        assert_eq!(roles.graphics, None);
        assert_eq!(roles.present, Some(0));
    }

    #[test]
    fn name_and_local_memory() {
        let mut s = snapshot(
            "Test GPU",
            vk::PhysicalDeviceType::DISCRETE_GPU,
            8 << 30,
            QueueRoles::default(),
        );
        s.memory.memory_heap_count = 2;
        s.memory.memory_heaps[1] = vk::MemoryHeap {
            size: 16 << 30,
            flags: vk::MemoryHeapFlags::empty(),
        };
        assert_eq!(s.name(), "Test GPU");
        assert_eq!(s.device_local_bytes(), 8 << 30);
    }
}
