// SPDX-License-Identifier: CEPL-1.0
//! Required and optional extension names for the instance and the device.
//!
//! Optional entries carry a presence flag filled in by [`ExtensionRegistry::negotiate`];
//! required entries are always reported as present because the build refuses
//! to continue without them.

use std::ffi::{CStr, CString};

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtensionScope {
    Instance,
    Device,
}

#[derive(Debug, Default)]
struct ExtensionList {
    required: Vec<CString>,
    optional: Vec<CString>,
    found: Vec<bool>,
}

impl ExtensionList {
    fn has(&self, name: &CStr) -> bool {
        self.optional
            .iter()
            .zip(&self.found)
            .any(|(n, &found)| found && n.as_c_str() == name)
            || self.required.iter().any(|n| n.as_c_str() == name)
    }
}

#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    instance: ExtensionList,
    device: ExtensionList,
}

fn owned_name(name: &str) -> Result<CString> {
    if name.is_empty() {
        return Err(Error::IllegalParams);
    }
    CString::new(name).map_err(|_| Error::IllegalParams)
}

impl ExtensionRegistry {
    fn list(&self, scope: ExtensionScope) -> &ExtensionList {
        match scope {
            ExtensionScope::Instance => &self.instance,
            ExtensionScope::Device => &self.device,
        }
    }

    fn list_mut(&mut self, scope: ExtensionScope) -> &mut ExtensionList {
        match scope {
            ExtensionScope::Instance => &mut self.instance,
            ExtensionScope::Device => &mut self.device,
        }
    }

    pub fn add_required(&mut self, scope: ExtensionScope, name: &str) -> Result<()> {
        let name = owned_name(name)?;
        self.list_mut(scope).required.push(name);
        Ok(())
    }

    pub fn add_optional(&mut self, scope: ExtensionScope, name: &str) -> Result<()> {
        let name = owned_name(name)?;
        let list = self.list_mut(scope);
        list.optional.push(name);
        list.found.push(false);
        Ok(())
    }

    pub fn has(&self, scope: ExtensionScope, name: &CStr) -> bool {
        self.list(scope).has(name)
    }

    pub fn required(&self, scope: ExtensionScope) -> impl Iterator<Item = &CStr> {
        self.list(scope).required.iter().map(CString::as_c_str)
    }

    /// Optional names that negotiation found available.
    pub fn enabled_optional(&self, scope: ExtensionScope) -> impl Iterator<Item = &CStr> {
        let list = self.list(scope);
        list.optional
            .iter()
            .zip(&list.found)
            .filter(|(_, found)| **found)
            .map(|(n, _)| n.as_c_str())
    }

    /// Record which optional names are in `available` and return the first
    /// required name that is not.
    pub fn negotiate<'a>(
        &'a mut self,
        scope: ExtensionScope,
        available: &[&CStr],
    ) -> Option<&'a CStr> {
        let list = self.list_mut(scope);
        for (name, found) in list.optional.iter().zip(list.found.iter_mut()) {
            *found = available.contains(&name.as_c_str());
        }
        list.required
            .iter()
            .map(CString::as_c_str)
            .find(|name| !available.contains(name))
    }
}

/// Extension names out of driver-reported properties.
pub(crate) fn property_names(props: &[ash::vk::ExtensionProperties]) -> Vec<&CStr> {
    props
        .iter()
        // SAFETY: the driver nul-terminates extension_name.
        .map(|p| unsafe { CStr::from_ptr(p.extension_name.as_ptr()) })
        .collect()
}
