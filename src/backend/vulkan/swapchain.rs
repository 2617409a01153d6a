//! Vulkan surfaces and swapchains.

use ash::vk;
use ash::vk::Handle;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use super::VulkanBackend;
use super::conversion::{
    convert_image_format, convert_present_mode, convert_vk_error, image_format_from_vk,
};
use crate::backend::{
    AcquireOutcome, ImageHandle, PresentOutcome, SemaphoreHandle, SurfaceHandle,
    SwapchainDescriptor, SwapchainHandle, SwapchainImages,
};
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::Extent2d;

impl VulkanBackend {
    /// Create a presentation surface for a native window.
    ///
    /// # Safety
    ///
    /// The display and window handles must be valid and must outlive the
    /// returned surface.
    pub unsafe fn create_surface(
        &self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> GraphicsResult<SurfaceHandle> {
        // SAFETY: the caller guarantees the raw handles are valid
        let surface = unsafe {
            ash_window::create_surface(&self.entry, &self.instance, display, window, None)
        }
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create Vulkan surface: {:?}", e))
        })?;

        if !self.is_surface_supported(surface) {
            unsafe { self.surface_loader.destroy_surface(surface, None) };
            return Err(GraphicsError::FeatureNotSupported(
                "graphics queue cannot present to this surface".to_string(),
            ));
        }

        log::debug!("Created Vulkan surface {:?}", surface);
        Ok(SurfaceHandle::from_raw(surface.as_raw()))
    }

    /// Check if the graphics queue can present to a surface.
    pub fn is_surface_supported(&self, surface: vk::SurfaceKHR) -> bool {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_support(
                    self.physical_device,
                    self.graphics_queue_family,
                    surface,
                )
                .unwrap_or(false)
        }
    }

    pub(super) fn build_swapchain(
        &self,
        descriptor: &SwapchainDescriptor,
    ) -> GraphicsResult<SwapchainImages> {
        let surface = vk::SurfaceKHR::from_raw(descriptor.surface.raw());

        let capabilities = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, surface)
        }
        .map_err(|e| convert_vk_error("Failed to get surface capabilities", e))?;
        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, surface)
        }
        .map_err(|e| convert_vk_error("Failed to get surface formats", e))?;
        let present_modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, surface)
        }
        .map_err(|e| convert_vk_error("Failed to get present modes", e))?;

        let wanted = convert_image_format(descriptor.format);
        let surface_format = formats
            .iter()
            .find(|f| f.format == wanted)
            .or_else(|| formats.first())
            .copied()
            .ok_or_else(|| {
                GraphicsError::FeatureNotSupported("surface reports no formats".to_string())
            })?;
        let format = image_format_from_vk(surface_format.format).ok_or_else(|| {
            GraphicsError::FeatureNotSupported(format!(
                "surface format {:?} is not drawable",
                surface_format.format
            ))
        })?;

        let present_mode = convert_present_mode(descriptor.present_mode);
        let present_mode = if present_modes.contains(&present_mode) {
            present_mode
        } else {
            log::warn!("{:?} not supported, falling back to FIFO", present_mode);
            vk::PresentModeKHR::FIFO
        };

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: descriptor.extent.width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: descriptor.extent.height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };
        if extent.width == 0 || extent.height == 0 {
            // The window was minimized between the resize event and now.
            return Err(GraphicsError::SurfaceStale);
        }

        let mut image_count = descriptor.min_image_count.max(capabilities.min_image_count);
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let composite_alpha = [
            vk::CompositeAlphaFlagsKHR::OPAQUE,
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
            vk::CompositeAlphaFlagsKHR::INHERIT,
        ]
        .into_iter()
        .find(|mode| capabilities.supported_composite_alpha.contains(*mode))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE);

        let old_swapchain = descriptor
            .old_swapchain
            .map(|old| vk::SwapchainKHR::from_raw(old.raw()))
            .unwrap_or_else(vk::SwapchainKHR::null);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(composite_alpha)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|e| convert_vk_error("Failed to create swapchain", e))?;

        let images = match unsafe { self.swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(convert_vk_error("Failed to get swapchain images", e));
            }
        };

        log::info!(
            "Created Vulkan swapchain: {}x{} with {} images ({:?})",
            extent.width,
            extent.height,
            images.len(),
            present_mode
        );

        Ok(SwapchainImages {
            swapchain: SwapchainHandle::from_raw(swapchain.as_raw()),
            images: images
                .iter()
                .map(|image| ImageHandle::from_raw(image.as_raw()))
                .collect(),
            format,
            extent: Extent2d::new(extent.width, extent.height),
        })
    }

    pub(super) fn acquire(
        &self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
    ) -> GraphicsResult<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                vk::SwapchainKHR::from_raw(swapchain.raw()),
                u64::MAX,
                vk::Semaphore::from_raw(signal.raw()),
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
            Err(e) => Err(convert_vk_error("Failed to acquire swapchain image", e)),
        }
    }

    pub(super) fn queue_present(
        &self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> GraphicsResult<PresentOutcome> {
        let wait_semaphores = [vk::Semaphore::from_raw(wait.raw())];
        let swapchains = [vk::SwapchainKHR::from_raw(swapchain.raw())];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = {
            let _queue = self.queue_lock.lock();
            unsafe {
                self.swapchain_loader
                    .queue_present(self.graphics_queue, &present_info)
            }
        };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => {
                log::trace!("Swapchain suboptimal");
                Ok(PresentOutcome::Suboptimal)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date, needs recreation");
                Ok(PresentOutcome::Stale)
            }
            Err(e) => Err(convert_vk_error("Failed to present swapchain image", e)),
        }
    }
}
