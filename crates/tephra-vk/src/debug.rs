// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_void, CStr};

use ash::ext::debug_utils;
use ash::vk;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Verbose,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Verbose => "verbose",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }

    fn from_vk(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            Severity::Error
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            Severity::Warning
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            Severity::Info
        } else {
            Severity::Verbose
        }
    }
}

/// Receives validation-layer messages and the context's own diagnostics.
pub trait DebugCallback {
    fn message(&self, severity: Severity, text: &str);
}

impl<F> DebugCallback for F
where
    F: Fn(Severity, &str),
{
    fn message(&self, severity: Severity, text: &str) {
        self(severity, text)
    }
}

/// Default sink: forwards to `tracing`, prefixed with the severity.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingDebugCallback;

impl DebugCallback for TracingDebugCallback {
    fn message(&self, severity: Severity, text: &str) {
        let label = severity.label();
        match severity {
            Severity::Verbose => tracing::debug!("[vulkan:{label}] {text}"),
            Severity::Info => tracing::info!("[vulkan:{label}] {text}"),
            Severity::Warning => tracing::warn!("[vulkan:{label}] {text}"),
            Severity::Error => tracing::error!("[vulkan:{label}] {text}"),
        }
    }
}

/// Heap slot holding the active callback; its address is the messenger's
/// user data, so it must stay boxed for as long as the messenger lives.
pub(crate) type CallbackSlot = Box<Box<dyn DebugCallback>>;

unsafe extern "system" fn messenger_trampoline(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || user.is_null() {
        return vk::FALSE;
    }
    // SAFETY: `user` is the `CallbackSlot` registered in `create_messenger`,
    // and `data` is valid for the duration of the call.
    let (callback, msg) = unsafe {
        let callback = &*(user as *const Box<dyn DebugCallback>);
        let p = (*data).p_message;
        if p.is_null() {
            return vk::FALSE;
        }
        (callback, CStr::from_ptr(p).to_string_lossy())
    };
    callback.message(Severity::from_vk(severity), &msg);
    vk::FALSE
}

pub(crate) unsafe fn create_messenger(
    loader: &debug_utils::Instance,
    slot: &CallbackSlot,
) -> Result<vk::DebugUtilsMessengerEXT, vk::Result> {
    let user = &**slot as *const Box<dyn DebugCallback> as *mut c_void;
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(messenger_trampoline),
        p_user_data: user,
        ..Default::default()
    };
    // SAFETY: `slot` outlives the messenger; the context destroys the
    // messenger before dropping the slot.
    unsafe { loader.create_debug_utils_messenger(&ci, None) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn severity_prefers_the_highest_bit() {
        let both = vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
        assert_eq!(Severity::from_vk(both), Severity::Error);
        assert_eq!(
            Severity::from_vk(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE),
            Severity::Verbose
        );
    }

    #[test]
    fn trampoline_forwards_to_the_slot() {
        let seen = std::rc::Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let slot: CallbackSlot = Box::new(Box::new(move |sev: Severity, text: &str| {
            sink.borrow_mut().push((sev, text.to_owned()));
        }));
        let data = vk::DebugUtilsMessengerCallbackDataEXT {
            p_message: c"layer says hi".as_ptr(),
            ..Default::default()
        };
        let user = &*slot as *const Box<dyn DebugCallback> as *mut c_void;
        let ret = unsafe {
            messenger_trampoline(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                &data,
                user,
            )
        };
        assert_eq!(ret, vk::FALSE);
        assert_eq!(
            seen.borrow().as_slice(),
            &[(Severity::Warning, "layer says hi".to_owned())]
        );
    }
}
