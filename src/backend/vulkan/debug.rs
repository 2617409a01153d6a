//! Validation layer output, routed through `log`.
//!
//! Validation findings are reported as errors whatever severity the layer
//! gives them, performance warnings as warnings, and driver chatter at
//! debug or trace level. The messenger only subscribes to severities that
//! can reach an enabled log level.

use std::ffi::{CStr, c_void};

use ash::vk;
use log::Level;

use crate::error::GraphicsError;

type Severity = vk::DebugUtilsMessageSeverityFlagsEXT;
type MessageType = vk::DebugUtilsMessageTypeFlagsEXT;

/// Log level a validation layer message is reported at.
fn message_level(severity: Severity, message_type: MessageType) -> Level {
    if severity.contains(Severity::ERROR) {
        return Level::Error;
    }
    if severity.contains(Severity::WARNING) {
        return if message_type.contains(MessageType::VALIDATION) {
            Level::Error
        } else {
            Level::Warn
        };
    }
    if severity.contains(Severity::INFO) {
        Level::Debug
    } else {
        Level::Trace
    }
}

/// Severities worth delivering given the current `log` filter.
fn subscribed_severities(max_level: log::LevelFilter) -> Severity {
    let mut severities = Severity::ERROR | Severity::WARNING;
    if max_level >= log::LevelFilter::Debug {
        severities |= Severity::INFO;
    }
    if max_level >= log::LevelFilter::Trace {
        severities |= Severity::VERBOSE;
    }
    severities
}

fn category(message_type: MessageType) -> &'static str {
    if message_type.contains(MessageType::VALIDATION) {
        "validation"
    } else if message_type.contains(MessageType::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

/// Create a messenger forwarding validation layer messages to `log`.
pub fn create_debug_messenger(
    debug_utils: &ash::ext::debug_utils::Instance,
) -> Result<vk::DebugUtilsMessengerEXT, GraphicsError> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(subscribed_severities(log::max_level()))
        .message_type(MessageType::GENERAL | MessageType::VALIDATION | MessageType::PERFORMANCE)
        .pfn_user_callback(Some(debug_callback));

    unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("validation messenger: {e:?}"))
    })
}

/// Read a possibly null C string handed over by the driver.
///
/// # Safety
///
/// `ptr` must be null or point to a nul-terminated string.
unsafe fn driver_str(ptr: *const std::ffi::c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

unsafe extern "system" fn debug_callback(
    severity: Severity,
    message_type: MessageType,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let level = message_level(severity, message_type);
    if level > log::max_level() {
        return vk::FALSE;
    }

    // SAFETY: the driver passes null or valid callback data for the duration of the call.
    let Some(data) = (unsafe { callback_data.as_ref() }) else {
        return vk::FALSE;
    };
    // SAFETY: both strings are null or nul-terminated and live as long as `data`.
    let id = unsafe { driver_str(data.p_message_id_name) };
    let message = unsafe { driver_str(data.p_message) }.unwrap_or_default();

    match id {
        Some(id) => log::log!(level, "[vulkan {}] {}: {}", category(message_type), id, message),
        None => log::log!(level, "[vulkan {}] {}", category(message_type), message),
    }
    vk::FALSE
}
