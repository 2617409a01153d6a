//! Vulkan physical and logical device management.

use ash::vk;

use crate::error::GraphicsError;

/// Select the best physical device for rendering.
///
/// Only devices with a graphics queue family qualify. Discrete GPUs are
/// preferred over integrated ones.
pub fn select_physical_device(
    instance: &ash::Instance,
) -> Result<(vk::PhysicalDevice, u32), GraphicsError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        GraphicsError::InitializationFailed(format!(
            "Failed to enumerate physical devices: {:?}",
            e
        ))
    })?;

    if devices.is_empty() {
        return Err(GraphicsError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best = None;
    let mut best_score = 0;

    for device in devices {
        let Some(queue_family) = find_graphics_queue_family(instance, device) else {
            continue;
        };
        let properties = unsafe { instance.get_physical_device_properties(device) };

        let mut score = 1;
        if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 1000;
        } else if properties.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            score += 100;
        }
        score += properties.limits.max_image_dimension2_d / 1024;

        log::info!(
            "Found GPU: {:?} (type: {:?}, score: {})",
            properties.device_name_as_c_str().unwrap_or(c"<unnamed>"),
            properties.device_type,
            score
        );

        if score > best_score {
            best_score = score;
            best = Some((device, queue_family));
        }
    }

    best.ok_or_else(|| GraphicsError::InitializationFailed("No suitable GPU found".to_string()))
}

/// Find a queue family that supports graphics operations.
fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Option<u32> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    queue_families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|index| index as u32)
}

/// Create a logical device with one graphics queue and the swapchain extension.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    graphics_queue_family: u32,
) -> Result<ash::Device, GraphicsError> {
    let queue_priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(graphics_queue_family)
        .queue_priorities(&queue_priorities)];

    #[allow(unused_mut)]
    let mut device_extensions = vec![ash::khr::swapchain::NAME.as_ptr()];

    #[cfg(target_os = "macos")]
    {
        device_extensions.push(ash::khr::portability_subset::NAME.as_ptr());
    }

    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .enabled_features(&features);

    unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create logical device: {:?}", e))
    })
}
