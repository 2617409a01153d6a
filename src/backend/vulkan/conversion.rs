//! Type conversions between renderer types and Vulkan types.

use ash::vk;

use crate::error::GraphicsError;
use crate::types::{
    AccessFlags, AddressMode, BufferUsage, FilterMode, ImageFormat, ImageLayout, ImageUsage,
    PipelineStages, PresentMode, SubresourceRange,
};

/// Convert BufferUsage flags to Vulkan buffer usage flags.
pub fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut result = vk::BufferUsageFlags::empty();

    if usage.contains(BufferUsage::VERTEX) {
        result |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        result |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        result |= vk::BufferUsageFlags::TRANSFER_DST;
    }

    result
}

/// Convert ImageFormat to Vulkan format.
pub fn convert_image_format(format: ImageFormat) -> vk::Format {
    match format {
        ImageFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        ImageFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        ImageFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        ImageFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
    }
}

/// Convert a Vulkan surface format back, if it is one the renderer draws to.
pub fn image_format_from_vk(format: vk::Format) -> Option<ImageFormat> {
    match format {
        vk::Format::R8G8B8A8_UNORM => Some(ImageFormat::Rgba8Unorm),
        vk::Format::R8G8B8A8_SRGB => Some(ImageFormat::Rgba8UnormSrgb),
        vk::Format::B8G8R8A8_UNORM => Some(ImageFormat::Bgra8Unorm),
        vk::Format::B8G8R8A8_SRGB => Some(ImageFormat::Bgra8UnormSrgb),
        _ => None,
    }
}

/// Convert ImageUsage flags to Vulkan image usage flags.
pub fn convert_image_usage(usage: ImageUsage) -> vk::ImageUsageFlags {
    let mut result = vk::ImageUsageFlags::empty();

    if usage.contains(ImageUsage::COPY_SRC) {
        result |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(ImageUsage::COPY_DST) {
        result |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(ImageUsage::SAMPLED) {
        result |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(ImageUsage::COLOR_ATTACHMENT) {
        result |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }

    result
}

/// Convert ImageLayout to Vulkan image layout.
pub fn convert_image_layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

/// Convert AccessFlags to Vulkan access flags.
pub fn convert_access_flags(access: AccessFlags) -> vk::AccessFlags {
    let mut result = vk::AccessFlags::empty();

    if access.contains(AccessFlags::TRANSFER_READ) {
        result |= vk::AccessFlags::TRANSFER_READ;
    }
    if access.contains(AccessFlags::TRANSFER_WRITE) {
        result |= vk::AccessFlags::TRANSFER_WRITE;
    }
    if access.contains(AccessFlags::SHADER_READ) {
        result |= vk::AccessFlags::SHADER_READ;
    }
    if access.contains(AccessFlags::COLOR_ATTACHMENT_READ) {
        result |= vk::AccessFlags::COLOR_ATTACHMENT_READ;
    }
    if access.contains(AccessFlags::COLOR_ATTACHMENT_WRITE) {
        result |= vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    }
    if access.contains(AccessFlags::VERTEX_ATTRIBUTE_READ) {
        result |= vk::AccessFlags::VERTEX_ATTRIBUTE_READ;
    }
    if access.contains(AccessFlags::INDEX_READ) {
        result |= vk::AccessFlags::INDEX_READ;
    }
    if access.contains(AccessFlags::HOST_WRITE) {
        result |= vk::AccessFlags::HOST_WRITE;
    }

    result
}

/// Convert PipelineStages to Vulkan pipeline stage flags.
///
/// An empty set maps to `TOP_OF_PIPE`, which Vulkan requires in place of zero.
pub fn convert_pipeline_stages(stages: PipelineStages) -> vk::PipelineStageFlags {
    let mut result = vk::PipelineStageFlags::empty();

    if stages.contains(PipelineStages::TOP_OF_PIPE) {
        result |= vk::PipelineStageFlags::TOP_OF_PIPE;
    }
    if stages.contains(PipelineStages::HOST) {
        result |= vk::PipelineStageFlags::HOST;
    }
    if stages.contains(PipelineStages::TRANSFER) {
        result |= vk::PipelineStageFlags::TRANSFER;
    }
    if stages.contains(PipelineStages::VERTEX_INPUT) {
        result |= vk::PipelineStageFlags::VERTEX_INPUT;
    }
    if stages.contains(PipelineStages::FRAGMENT_SHADER) {
        result |= vk::PipelineStageFlags::FRAGMENT_SHADER;
    }
    if stages.contains(PipelineStages::COLOR_ATTACHMENT_OUTPUT) {
        result |= vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    }
    if stages.contains(PipelineStages::BOTTOM_OF_PIPE) {
        result |= vk::PipelineStageFlags::BOTTOM_OF_PIPE;
    }

    if result.is_empty() {
        vk::PipelineStageFlags::TOP_OF_PIPE
    } else {
        result
    }
}

/// Convert a color subresource range.
pub fn convert_subresource_range(range: SubresourceRange) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: range.base_mip_level,
        level_count: range.level_count,
        base_array_layer: range.base_array_layer,
        layer_count: range.layer_count,
    }
}

/// Convert FilterMode to Vulkan filter.
pub fn convert_filter_mode(mode: FilterMode) -> vk::Filter {
    match mode {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

/// Convert FilterMode to Vulkan mipmap filter mode.
pub fn convert_mipmap_filter_mode(mode: FilterMode) -> vk::SamplerMipmapMode {
    match mode {
        FilterMode::Nearest => vk::SamplerMipmapMode::NEAREST,
        FilterMode::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

/// Convert AddressMode to Vulkan sampler address mode.
pub fn convert_address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirrorRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
    }
}

/// Convert PresentMode to Vulkan present mode.
pub fn convert_present_mode(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
    }
}

/// Map a failed Vulkan call to a renderer error.
///
/// Out-of-memory and descriptor pool exhaustion become `AllocationFailure`,
/// a lost device `DeviceLost`, and a stale swapchain `SurfaceStale`.
pub fn convert_vk_error(what: &str, result: vk::Result) -> GraphicsError {
    match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY
        | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
        | vk::Result::ERROR_OUT_OF_POOL_MEMORY
        | vk::Result::ERROR_FRAGMENTED_POOL
        | vk::Result::ERROR_FRAGMENTATION => {
            GraphicsError::AllocationFailure(format!("{}: {:?}", what, result))
        }
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR => {
            GraphicsError::SurfaceStale
        }
        vk::Result::ERROR_SURFACE_LOST_KHR => {
            GraphicsError::FeatureNotSupported(format!("{}: surface lost", what))
        }
        other => GraphicsError::Internal(format!("{}: {:?}", what, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layouts() {
        assert_eq!(
            convert_image_layout(ImageLayout::TransferDst),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
        assert_eq!(
            convert_image_layout(ImageLayout::PresentSrc),
            vk::ImageLayout::PRESENT_SRC_KHR
        );
    }

    #[test]
    fn test_formats_round_trip_for_surface_formats() {
        for format in [
            ImageFormat::Rgba8Unorm,
            ImageFormat::Rgba8UnormSrgb,
            ImageFormat::Bgra8Unorm,
            ImageFormat::Bgra8UnormSrgb,
        ] {
            assert_eq!(image_format_from_vk(convert_image_format(format)), Some(format));
        }
        assert_eq!(image_format_from_vk(vk::Format::R16G16B16A16_SFLOAT), None);
    }

    #[test]
    fn test_empty_stages_become_top_of_pipe() {
        assert_eq!(
            convert_pipeline_stages(PipelineStages::empty()),
            vk::PipelineStageFlags::TOP_OF_PIPE
        );
        assert_eq!(
            convert_pipeline_stages(PipelineStages::TRANSFER | PipelineStages::VERTEX_INPUT),
            vk::PipelineStageFlags::TRANSFER | vk::PipelineStageFlags::VERTEX_INPUT
        );
    }

    #[test]
    fn test_access_flags() {
        assert_eq!(
            convert_access_flags(AccessFlags::TRANSFER_WRITE | AccessFlags::SHADER_READ),
            vk::AccessFlags::TRANSFER_WRITE | vk::AccessFlags::SHADER_READ
        );
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            convert_vk_error("alloc", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            GraphicsError::AllocationFailure(_)
        ));
        assert!(matches!(
            convert_vk_error("alloc", vk::Result::ERROR_OUT_OF_POOL_MEMORY),
            GraphicsError::AllocationFailure(_)
        ));
        assert_eq!(
            convert_vk_error("submit", vk::Result::ERROR_DEVICE_LOST),
            GraphicsError::DeviceLost
        );
        assert_eq!(
            convert_vk_error("acquire", vk::Result::ERROR_OUT_OF_DATE_KHR),
            GraphicsError::SurfaceStale
        );
    }
}
