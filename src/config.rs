//! Renderer configuration.

use crate::types::{ClearColor, ImageFormat, PresentMode};

/// Default initial vertex store capacity, in bytes.
pub const DEFAULT_VERTEX_CAPACITY: u64 = 64 * 1024;

/// Default initial index store capacity, in bytes.
pub const DEFAULT_INDEX_CAPACITY: u64 = 32 * 1024;

/// Configuration for a [`Renderer`](crate::Renderer).
///
/// # Example
///
/// ```
/// use redlilium_ui_renderer::{ClearColor, PresentMode, RendererConfig};
///
/// let config = RendererConfig::default()
///     .with_present_mode(PresentMode::Mailbox)
///     .with_clear_color(ClearColor::TRANSPARENT);
/// assert_eq!(config.min_image_count, 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Application name reported to the driver.
    pub app_name: String,
    /// Enable validation layers and the debug messenger.
    pub validation: bool,
    /// Swapchain and render pass color format.
    pub color_format: ImageFormat,
    /// Presentation mode (vsync behavior).
    pub present_mode: PresentMode,
    /// Minimum number of swapchain images to request.
    pub min_image_count: u32,
    /// Color the framebuffer is cleared to each frame.
    pub clear_color: ClearColor,
    /// Initial vertex store capacity of each ring slot, in bytes.
    pub initial_vertex_capacity: u64,
    /// Initial index store capacity of each ring slot, in bytes.
    pub initial_index_capacity: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            app_name: "RedLilium UI".to_string(),
            validation: cfg!(debug_assertions),
            color_format: ImageFormat::Bgra8Unorm,
            present_mode: PresentMode::Fifo,
            min_image_count: 2,
            clear_color: ClearColor::BLACK,
            initial_vertex_capacity: DEFAULT_VERTEX_CAPACITY,
            initial_index_capacity: DEFAULT_INDEX_CAPACITY,
        }
    }
}

impl RendererConfig {
    /// Set the application name.
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the color format.
    pub fn with_color_format(mut self, format: ImageFormat) -> Self {
        self.color_format = format;
        self
    }

    /// Set the present mode.
    pub fn with_present_mode(mut self, present_mode: PresentMode) -> Self {
        self.present_mode = present_mode;
        self
    }

    /// Set the minimum swapchain image count.
    pub fn with_min_image_count(mut self, count: u32) -> Self {
        self.min_image_count = count;
        self
    }

    /// Set the clear color.
    pub fn with_clear_color(mut self, color: ClearColor) -> Self {
        self.clear_color = color;
        self
    }

    /// Set the initial geometry capacities, in bytes.
    pub fn with_geometry_capacity(mut self, vertex_bytes: u64, index_bytes: u64) -> Self {
        self.initial_vertex_capacity = vertex_bytes;
        self.initial_index_capacity = index_bytes;
        self
    }
}
