//! Vulkan command and descriptor pools.

use ash::vk;

use crate::error::GraphicsError;

/// Combined image samplers available to the UI descriptor cache.
pub const DESCRIPTOR_POOL_SIZE: u32 = 1024;

/// Create a command pool whose buffers can be reset individually.
pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> Result<vk::CommandPool, GraphicsError> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create command pool: {:?}", e))
    })
}

/// Create a descriptor pool for combined image sampler sets.
pub fn create_descriptor_pool(device: &ash::Device) -> Result<vk::DescriptorPool, GraphicsError> {
    let pool_sizes = [vk::DescriptorPoolSize {
        ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        descriptor_count: DESCRIPTOR_POOL_SIZE,
    }];

    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        .max_sets(DESCRIPTOR_POOL_SIZE)
        .pool_sizes(&pool_sizes);

    unsafe { device.create_descriptor_pool(&pool_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create descriptor pool: {:?}", e))
    })
}
