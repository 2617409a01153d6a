//! GPU memory allocator integration using gpu-allocator.

use ash::vk;
use gpu_allocator::AllocationError;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};

use crate::error::GraphicsError;
use crate::types::MemoryLocation;

/// Create a memory allocator for the Vulkan device.
pub fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
) -> Result<Allocator, GraphicsError> {
    Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device,
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create memory allocator: {}", e))
    })
}

/// Map a buffer memory location to the allocator's.
pub fn memory_location(location: MemoryLocation) -> gpu_allocator::MemoryLocation {
    match location {
        MemoryLocation::DeviceLocal => gpu_allocator::MemoryLocation::GpuOnly,
        MemoryLocation::HostVisible => gpu_allocator::MemoryLocation::CpuToGpu,
    }
}

/// Every allocator failure means memory for the resource could not be found.
pub fn allocation_error(what: &str, error: AllocationError) -> GraphicsError {
    GraphicsError::AllocationFailure(format!("Failed to allocate {} memory: {}", what, error))
}
