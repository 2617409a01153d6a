//! Image views and samplers.

use std::sync::Arc;

use crate::backend::{GpuBackend, ImageHandle, ImageViewHandle, SamplerHandle};
use crate::error::GraphicsResult;
use crate::types::{ImageFormat, ImageViewDescriptor, SamplerDescriptor, SubresourceRange};

use super::GpuImage;

/// A read-only projection of a [`GpuImage`].
///
/// Does not own memory. It must be dropped before the image it views; owners
/// holding both declare the view field first.
pub struct ImageView {
    backend: Arc<dyn GpuBackend>,
    handle: ImageViewHandle,
    image: ImageHandle,
    format: ImageFormat,
    range: SubresourceRange,
}

impl ImageView {
    /// Create a view over a subresource range of an image.
    pub fn new(
        backend: &Arc<dyn GpuBackend>,
        image: &GpuImage,
        range: SubresourceRange,
    ) -> GraphicsResult<Self> {
        let descriptor = ImageViewDescriptor {
            image: image.handle(),
            format: image.format(),
            range,
        };
        let handle = backend.create_image_view(&descriptor)?;
        Ok(Self {
            backend: Arc::clone(backend),
            handle,
            image: image.handle(),
            format: image.format(),
            range,
        })
    }

    /// Create a view over every level and layer of an image.
    pub fn whole(backend: &Arc<dyn GpuBackend>, image: &GpuImage) -> GraphicsResult<Self> {
        Self::new(backend, image, image.full_range())
    }

    pub fn handle(&self) -> ImageViewHandle {
        self.handle
    }

    /// The viewed image.
    pub fn image(&self) -> ImageHandle {
        self.image
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn range(&self) -> SubresourceRange {
        self.range
    }
}

impl std::fmt::Debug for ImageView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageView")
            .field("handle", &self.handle)
            .field("image", &self.image)
            .field("range", &self.range)
            .finish()
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        self.backend.destroy_image_view(self.handle);
    }
}

/// Filtering and addressing state, independent of any image.
pub struct Sampler {
    backend: Arc<dyn GpuBackend>,
    handle: SamplerHandle,
    descriptor: SamplerDescriptor,
}

impl Sampler {
    pub fn new(backend: &Arc<dyn GpuBackend>, descriptor: SamplerDescriptor) -> GraphicsResult<Self> {
        let handle = backend.create_sampler(&descriptor)?;
        Ok(Self {
            backend: Arc::clone(backend),
            handle,
            descriptor,
        })
    }

    pub fn handle(&self) -> SamplerHandle {
        self.handle
    }

    pub fn descriptor(&self) -> &SamplerDescriptor {
        &self.descriptor
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("handle", &self.handle)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.backend.destroy_sampler(self.handle);
    }
}
