//! Image types, layouts and synchronization flags.

use bitflags::bitflags;

use super::Extent2d;
use crate::backend::ImageHandle;
use crate::error::{GraphicsError, GraphicsResult};

/// Pixel formats used by UI textures and swapchains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageFormat {
    /// 8-bit RGBA, linear.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA, sRGB.
    Rgba8UnormSrgb,
    /// 8-bit BGRA, linear.
    Bgra8Unorm,
    /// 8-bit BGRA, sRGB.
    Bgra8UnormSrgb,
}

impl ImageFormat {
    /// Bytes per pixel.
    pub fn bytes_per_pixel(&self) -> u32 {
        4
    }

    /// Whether the format applies sRGB encoding on write.
    pub fn is_srgb(&self) -> bool {
        matches!(self, Self::Rgba8UnormSrgb | Self::Bgra8UnormSrgb)
    }
}

bitflags! {
    /// Usage flags for images.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        /// Image can be the source of a copy or blit.
        const COPY_SRC = 1 << 0;
        /// Image can be the destination of a copy or blit.
        const COPY_DST = 1 << 1;
        /// Image can be sampled in a shader.
        const SAMPLED = 1 << 2;
        /// Image can be used as a color attachment.
        const COLOR_ATTACHMENT = 1 << 3;
    }
}

impl Default for ImageUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Layout states an image can be in.
///
/// One value per whole image; transitions in this crate are whole-image except
/// during mip-chain generation, which manages per-level state itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    /// Initial state, contents undefined.
    #[default]
    Undefined,
    /// Optimal as the source of a copy or blit.
    TransferSrc,
    /// Optimal as the destination of a copy or blit.
    TransferDst,
    /// Optimal for shader sampling.
    ShaderReadOnly,
    /// Optimal for color attachment writes.
    ColorAttachment,
    /// Ready for presentation.
    PresentSrc,
}

bitflags! {
    /// Memory access types used in barriers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        const TRANSFER_READ = 1 << 0;
        const TRANSFER_WRITE = 1 << 1;
        const SHADER_READ = 1 << 2;
        const COLOR_ATTACHMENT_READ = 1 << 3;
        const COLOR_ATTACHMENT_WRITE = 1 << 4;
        const VERTEX_ATTRIBUTE_READ = 1 << 5;
        const INDEX_READ = 1 << 6;
        const HOST_WRITE = 1 << 7;
    }
}

bitflags! {
    /// Pipeline stages used in barriers and semaphore waits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const HOST = 1 << 1;
        const TRANSFER = 1 << 2;
        const VERTEX_INPUT = 1 << 3;
        const FRAGMENT_SHADER = 1 << 4;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 5;
        const BOTTOM_OF_PIPE = 1 << 6;
    }
}

/// A range of mip levels and array layers within an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubresourceRange {
    /// First mip level.
    pub base_mip_level: u32,
    /// Number of mip levels.
    pub level_count: u32,
    /// First array layer.
    pub base_array_layer: u32,
    /// Number of array layers.
    pub layer_count: u32,
}

impl SubresourceRange {
    /// Range covering all levels and layers of an image.
    pub fn whole(level_count: u32, layer_count: u32) -> Self {
        Self {
            base_mip_level: 0,
            level_count,
            base_array_layer: 0,
            layer_count,
        }
    }

    /// Range covering a run of mip levels on the first layer.
    pub fn mips(base_mip_level: u32, level_count: u32) -> Self {
        Self {
            base_mip_level,
            level_count,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    /// Range covering a single mip level on the first layer.
    pub fn mip(level: u32) -> Self {
        Self::mips(level, 1)
    }

    /// Whether this range contains mip level `level`.
    pub fn contains_mip(&self, level: u32) -> bool {
        level >= self.base_mip_level && level < self.base_mip_level + self.level_count
    }
}

/// Descriptor for creating an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageDescriptor {
    /// Debug label for the image.
    pub label: Option<String>,
    /// Size of mip level 0.
    pub extent: Extent2d,
    /// Pixel format.
    pub format: ImageFormat,
    /// Number of mip levels.
    pub mip_level_count: u32,
    /// Number of array layers.
    pub array_layer_count: u32,
    /// Usage flags.
    pub usage: ImageUsage,
}

impl ImageDescriptor {
    /// Create a single-level, single-layer 2D image descriptor.
    pub fn new_2d(width: u32, height: u32, format: ImageFormat, usage: ImageUsage) -> Self {
        Self {
            label: None,
            extent: Extent2d::new(width, height),
            format,
            mip_level_count: 1,
            array_layer_count: 1,
            usage,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the number of mip levels.
    pub fn with_mip_level_count(mut self, count: u32) -> Self {
        self.mip_level_count = count;
        self
    }

    /// Check the descriptor's constraints.
    pub fn validate(&self) -> GraphicsResult<()> {
        if self.extent.is_empty() {
            return Err(GraphicsError::InvalidParameter(format!(
                "image size must be at least 1x1, got {}x{}",
                self.extent.width, self.extent.height
            )));
        }
        if self.mip_level_count == 0 || self.array_layer_count == 0 {
            return Err(GraphicsError::InvalidParameter(
                "image needs at least one mip level and one layer".to_string(),
            ));
        }
        let max_levels = crate::resources::mip_level_count(self.extent.width, self.extent.height);
        if self.mip_level_count > max_levels {
            return Err(GraphicsError::InvalidParameter(format!(
                "{} mip levels requested but a {}x{} image has at most {max_levels}",
                self.mip_level_count, self.extent.width, self.extent.height
            )));
        }
        if self.usage.is_empty() {
            return Err(GraphicsError::InvalidParameter(
                "image usage must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Descriptor for creating an image view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageViewDescriptor {
    /// Image to view.
    pub image: ImageHandle,
    /// Format of the view.
    pub format: ImageFormat,
    /// Visible subresources.
    pub range: SubresourceRange,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_rejects_zero_size() {
        let desc = ImageDescriptor::new_2d(0, 16, ImageFormat::Rgba8Unorm, ImageUsage::SAMPLED);
        assert!(matches!(
            desc.validate(),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_descriptor_rejects_too_many_mips() {
        let desc = ImageDescriptor::new_2d(4, 4, ImageFormat::Rgba8Unorm, ImageUsage::SAMPLED)
            .with_mip_level_count(4);
        assert!(desc.validate().is_err());

        let desc = desc.with_mip_level_count(3);
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn test_subresource_range_contains() {
        let range = SubresourceRange::mips(2, 3);
        assert!(!range.contains_mip(1));
        assert!(range.contains_mip(2));
        assert!(range.contains_mip(4));
        assert!(!range.contains_mip(5));
    }
}
