//! # RedLilium UI Renderer
//!
//! Vulkan renderer core for immediate-mode UI draw data.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`GpuBackend`] - Trait over the device, with Vulkan and Dummy (for testing) implementations
//! - [`resources`] - Owned GPU images, views, samplers, buffers and mip-chain generation
//! - [`FrameRing`] - Per-viewport frames in flight, paced by fences and semaphores
//! - [`DescriptorCache`] - Descriptor sets keyed by (sampler, view)
//! - [`ViewportManager`] - Swapchain lifecycle for one or more windows
//! - [`Renderer`] - Ties the above together to render [`DrawData`]
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_ui_renderer::{Renderer, RendererConfig, DrawData, ViewportId};
//!
//! let backend = redlilium_ui_renderer::create_backend(&config)?;
//! let mut renderer = Renderer::new(backend, config, factory, window, size, build_program)?;
//! renderer.render(ViewportId::MAIN, &draw_data)?;
//! ```

pub mod backend;
pub mod config;
pub mod descriptor;
pub mod draw;
pub mod error;
pub mod frame;
pub mod program;
pub mod renderer;
pub mod resources;
pub mod texture;
pub mod types;
pub mod viewport;

// Re-export main types for convenience
pub use backend::{GpuBackend, create_backend};
pub use config::RendererConfig;
pub use descriptor::DescriptorCache;
pub use draw::{DrawCommand, DrawData, DrawList, DrawVertex};
pub use error::{GraphicsError, GraphicsResult};
pub use frame::{FrameRing, FrameSlot};
pub use program::DrawingProgram;
pub use renderer::Renderer;
pub use resources::{DynamicGeometryBuffer, GpuImage, ImageView, MipChainGenerator, Sampler};
pub use texture::{TextureId, TextureUpload};
pub use types::{
    ClearColor, Extent2d, FilterMode, ImageFormat, ImageLayout, PresentMode, SamplerDescriptor,
};
pub use viewport::{FrameOutcome, SkipReason, ViewportId, ViewportManager, WindowHandle};

/// Renderer library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_dummy_backend() {
        let backend = backend::dummy::DummyBackend::new();
        assert_eq!(backend.name(), "Dummy Backend");
    }
}
