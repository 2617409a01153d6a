//! Vulkan instance creation and configuration.

use std::ffi::{CStr, CString, c_char};

use ash::vk;

use crate::error::GraphicsError;

use super::debug;

/// Render passes and binary semaphores only need core 1.1.
const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 1, 0);

/// Validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Surface extensions the instance enables when the loader offers them.
fn candidate_surface_extensions() -> Vec<&'static CStr> {
    #[allow(unused_mut)]
    let mut extensions = vec![ash::khr::surface::NAME];

    #[cfg(target_os = "windows")]
    {
        extensions.push(ash::khr::win32_surface::NAME);
    }

    #[cfg(all(unix, not(target_os = "macos"), not(target_os = "android")))]
    {
        extensions.push(ash::khr::xlib_surface::NAME);
        extensions.push(ash::khr::xcb_surface::NAME);
        extensions.push(ash::khr::wayland_surface::NAME);
    }

    #[cfg(target_os = "android")]
    {
        extensions.push(ash::khr::android_surface::NAME);
    }

    #[cfg(target_os = "macos")]
    {
        extensions.push(ash::khr::portability_enumeration::NAME);
        extensions.push(ash::ext::metal_surface::NAME);
    }

    extensions
}

/// Handles returned by [`create_instance`].
pub struct InstanceParts {
    pub instance: ash::Instance,
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    pub debug_utils: Option<ash::ext::debug_utils::Instance>,
}

/// Create a Vulkan instance with optional validation layers.
pub fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    validation_enabled: bool,
) -> Result<InstanceParts, GraphicsError> {
    let validation_available = validation_enabled && check_validation_layer_support(entry);

    if validation_enabled && !validation_available {
        log::warn!("Validation layers requested but not available");
    }

    let app_name = CString::new(app_name).map_err(|e| {
        GraphicsError::InvalidParameter(format!("application name contains a null byte: {}", e))
    })?;
    let engine_name = c"RedLilium UI";

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let available = available_instance_extensions(entry);
    let mut extensions: Vec<*const c_char> = candidate_surface_extensions()
        .into_iter()
        .filter(|name| {
            let found = available.iter().any(|a| a.as_c_str() == *name);
            if !found {
                log::debug!("Instance extension {:?} not available, skipping", name);
            }
            found
        })
        .map(CStr::as_ptr)
        .collect();

    if validation_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    let layer_names: Vec<*const c_char> = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    #[allow(unused_mut)]
    let mut create_flags = vk::InstanceCreateFlags::empty();

    #[cfg(target_os = "macos")]
    {
        create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let create_info = vk::InstanceCreateInfo::default()
        .flags(create_flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })?;

    let (debug_messenger, debug_utils) = if validation_available {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, &instance);
        let messenger = debug::create_debug_messenger(&debug_utils)?;
        (Some(messenger), Some(debug_utils))
    } else {
        (None, None)
    };

    Ok(InstanceParts {
        instance,
        debug_messenger,
        debug_utils,
    })
}

fn available_instance_extensions(entry: &ash::Entry) -> Vec<CString> {
    let Ok(properties) = (unsafe { entry.enumerate_instance_extension_properties(None) }) else {
        return Vec::new();
    };
    properties
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok().map(CStr::to_owned))
        .collect()
}

/// Check if the validation layer is available.
fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let available_layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(_) => return false,
    };

    available_layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER_NAME))
}
