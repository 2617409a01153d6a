//! Common types used throughout the renderer.

mod buffer;
mod image;
mod sampler;

pub use buffer::{BufferDescriptor, BufferUsage, MemoryLocation};
pub use image::{
    AccessFlags, ImageDescriptor, ImageFormat, ImageLayout, ImageUsage, ImageViewDescriptor,
    PipelineStages, SubresourceRange,
};
pub use sampler::{AddressMode, FilterMode, SamplerDescriptor};

/// A 2D size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Extent2d {
    /// Create a new extent.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether either dimension is zero (e.g. a minimized window).
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Size of mip level `level`, clamped to at least one pixel per axis.
    pub fn mip_level_size(&self, level: u32) -> Self {
        Self {
            width: (self.width >> level).max(1),
            height: (self.height >> level).max(1),
        }
    }
}

/// A 2D offset in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Offset2d {
    /// X offset.
    pub x: u32,
    /// Y offset.
    pub y: u32,
}

impl Offset2d {
    /// Create a new offset.
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// A scissor rectangle in framebuffer pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScissorRect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Color used to clear the framebuffer at the start of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClearColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ClearColor {
    /// Opaque black.
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    /// Fully transparent.
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    /// Create a new clear color.
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Components as an array.
    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Presentation mode for swapchains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresentMode {
    /// Wait for vertical blank, never tears. Always supported.
    #[default]
    Fifo,
    /// Replace the queued image on vertical blank.
    Mailbox,
    /// Present immediately, may tear.
    Immediate,
}

/// Index type used by the UI draw data.
pub type DrawIndex = u32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_mip_level_size() {
        let extent = Extent2d::new(100, 50);
        assert_eq!(extent.mip_level_size(0), Extent2d::new(100, 50));
        assert_eq!(extent.mip_level_size(1), Extent2d::new(50, 25));
        assert_eq!(extent.mip_level_size(6), Extent2d::new(1, 1));
    }

    #[test]
    fn test_extent_is_empty() {
        assert!(Extent2d::new(0, 600).is_empty());
        assert!(Extent2d::new(800, 0).is_empty());
        assert!(!Extent2d::new(1, 1).is_empty());
    }
}
