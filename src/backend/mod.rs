//! GPU backend abstraction layer.
//!
//! The renderer talks to the GPU exclusively through the [`GpuBackend`] trait,
//! using plain `Copy` handles. Ownership of those handles lives one level up,
//! in the RAII wrappers of [`crate::resources`] and [`crate::frame`].
//!
//! # Available Backends
//!
//! - `vulkan-backend`: Native Vulkan backend using ash and gpu-allocator
//! - `dummy`: No-op backend that records commands and simulates GPU timing,
//!   used for testing without GPU hardware
//!
//! # Synchronization contract
//!
//! All waits ([`GpuBackend::wait_fence`], [`GpuBackend::wait_idle`]) block until
//! signaled; there are no caller-specified timeouts.

#[cfg(feature = "dummy")]
pub mod dummy;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use std::sync::Arc;

use crate::config::RendererConfig;
use crate::error::{GraphicsError, GraphicsResult};
use crate::program::DrawingProgram;
use crate::types::{
    AccessFlags, BufferDescriptor, ClearColor, Extent2d, FilterMode, ImageDescriptor,
    ImageFormat, ImageLayout, ImageViewDescriptor, Offset2d, PipelineStages, PresentMode,
    SamplerDescriptor, ScissorRect, SubresourceRange,
};

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Create a handle from a raw backend value.
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Get the raw backend value.
            pub const fn raw(&self) -> u64 {
                self.0
            }
        }
    };
}

define_handle!(
    /// Handle to a GPU buffer.
    BufferHandle
);
define_handle!(
    /// Handle to a GPU image.
    ImageHandle
);
define_handle!(
    /// Handle to an image view.
    ImageViewHandle
);
define_handle!(
    /// Handle to a sampler.
    SamplerHandle
);
define_handle!(
    /// Handle to a fence for CPU-GPU synchronization.
    FenceHandle
);
define_handle!(
    /// Handle to a semaphore for GPU-GPU synchronization.
    SemaphoreHandle
);
define_handle!(
    /// Handle to a primary command buffer.
    CommandBufferHandle
);
define_handle!(
    /// Handle to an allocated descriptor set.
    DescriptorSetHandle
);
define_handle!(
    /// Handle to a descriptor set layout.
    DescriptorSetLayoutHandle
);
define_handle!(
    /// Handle to a graphics pipeline.
    PipelineHandle
);
define_handle!(
    /// Handle to a pipeline layout.
    PipelineLayoutHandle
);
define_handle!(
    /// Handle to a render pass.
    RenderPassHandle
);
define_handle!(
    /// Handle to a framebuffer.
    FramebufferHandle
);
define_handle!(
    /// Handle to a swapchain.
    SwapchainHandle
);
define_handle!(
    /// Handle to a presentation surface.
    SurfaceHandle
);

/// An image layout transition with its synchronization scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: ImageHandle,
    pub range: SubresourceRange,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub src_stage: PipelineStages,
    pub dst_stage: PipelineStages,
}

/// A whole-buffer memory dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBarrier {
    pub buffer: BufferHandle,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub src_stage: PipelineStages,
    pub dst_stage: PipelineStages,
}

/// Copy of tightly packed pixels from a buffer into one mip level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferImageCopy {
    pub buffer_offset: u64,
    pub mip_level: u32,
    pub image_offset: Offset2d,
    pub image_extent: Extent2d,
}

/// Blit between two mip levels of the same image.
///
/// The source level must be in `TransferSrc` and the destination in `TransferDst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipBlit {
    pub src_level: u32,
    pub src_extent: Extent2d,
    pub dst_level: u32,
    pub dst_extent: Extent2d,
    pub filter: FilterMode,
}

/// Parameters for beginning a render pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPassBegin {
    pub render_pass: RenderPassHandle,
    pub framebuffer: FramebufferHandle,
    pub extent: Extent2d,
    pub clear_color: ClearColor,
}

/// A queue submission of one command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub command_buffer: CommandBufferHandle,
    /// Semaphore to wait on before `wait_stage` executes.
    pub wait_semaphore: Option<SemaphoreHandle>,
    pub wait_stage: PipelineStages,
    /// Semaphore signaled when the command buffer completes.
    pub signal_semaphore: Option<SemaphoreHandle>,
    /// Fence signaled when the command buffer completes.
    pub signal_fence: Option<FenceHandle>,
}

/// Parameters for creating a swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDescriptor {
    pub surface: SurfaceHandle,
    pub extent: Extent2d,
    pub format: ImageFormat,
    pub present_mode: PresentMode,
    pub min_image_count: u32,
    /// Swapchain being replaced, if any. It is still destroyed by the caller.
    pub old_swapchain: Option<SwapchainHandle>,
}

/// A created swapchain and the images it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainImages {
    pub swapchain: SwapchainHandle,
    pub images: Vec<ImageHandle>,
    pub format: ImageFormat,
    /// Actual extent, which may differ from the requested one.
    pub extent: Extent2d,
}

/// Result of acquiring the next swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired; the semaphore will be signaled when it is ready.
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain is out of date. The semaphore is not signaled.
    Stale,
}

/// Result of presenting a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented normally.
    Presented,
    /// Presented, but the swapchain no longer matches the surface exactly.
    Suboptimal,
    /// Not presented, the swapchain is out of date.
    Stale,
}

impl PresentOutcome {
    /// Whether the swapchain should be recreated.
    pub fn needs_rebuild(&self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// GPU backend trait for abstracting the device.
///
/// Destroy functions take handles by value and must be called exactly once per
/// created handle; the owning wrappers in this crate guarantee that.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    // ------------------------------------------------------------------
    // Memory-backed resources
    // ------------------------------------------------------------------

    /// Create a buffer. Fails with `AllocationFailure` when memory is exhausted.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> GraphicsResult<BufferHandle>;

    /// Destroy a buffer and free its memory.
    fn destroy_buffer(&self, buffer: BufferHandle);

    /// Write data into a host-visible buffer.
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GraphicsResult<()>;

    /// Create an image with its own device memory in `Undefined` layout.
    fn create_image(&self, descriptor: &ImageDescriptor) -> GraphicsResult<ImageHandle>;

    /// Destroy an image and free its memory.
    fn destroy_image(&self, image: ImageHandle);

    /// Create a view over an image.
    fn create_image_view(&self, descriptor: &ImageViewDescriptor)
    -> GraphicsResult<ImageViewHandle>;

    /// Destroy an image view.
    fn destroy_image_view(&self, view: ImageViewHandle);

    /// Create a sampler.
    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> GraphicsResult<SamplerHandle>;

    /// Destroy a sampler.
    fn destroy_sampler(&self, sampler: SamplerHandle);

    // ------------------------------------------------------------------
    // Synchronization
    // ------------------------------------------------------------------

    /// Create a fence, optionally already signaled.
    fn create_fence(&self, signaled: bool) -> GraphicsResult<FenceHandle>;

    /// Destroy a fence.
    fn destroy_fence(&self, fence: FenceHandle);

    /// Block until the fence is signaled.
    fn wait_fence(&self, fence: FenceHandle) -> GraphicsResult<()>;

    /// Return the fence to the unsignaled state.
    fn reset_fence(&self, fence: FenceHandle) -> GraphicsResult<()>;

    /// Check whether a fence is signaled without blocking.
    fn is_fence_signaled(&self, fence: FenceHandle) -> GraphicsResult<bool>;

    /// Create a binary semaphore.
    fn create_semaphore(&self) -> GraphicsResult<SemaphoreHandle>;

    /// Destroy a semaphore.
    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);

    /// Block until all submitted work has completed.
    fn wait_idle(&self) -> GraphicsResult<()>;

    // ------------------------------------------------------------------
    // Command buffers
    // ------------------------------------------------------------------

    /// Allocate a resettable primary command buffer.
    fn allocate_command_buffer(&self) -> GraphicsResult<CommandBufferHandle>;

    /// Free a command buffer.
    fn free_command_buffer(&self, command_buffer: CommandBufferHandle);

    /// Reset a command buffer and begin recording.
    fn begin_command_buffer(&self, command_buffer: CommandBufferHandle) -> GraphicsResult<()>;

    /// Finish recording.
    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> GraphicsResult<()>;

    /// Submit a recorded command buffer to the graphics queue.
    fn submit(&self, submission: &Submission) -> GraphicsResult<()>;

    // ------------------------------------------------------------------
    // Command recording
    // ------------------------------------------------------------------

    fn cmd_image_barrier(&self, command_buffer: CommandBufferHandle, barrier: &ImageBarrier);

    fn cmd_buffer_barrier(&self, command_buffer: CommandBufferHandle, barrier: &BufferBarrier);

    fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    );

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        image: ImageHandle,
        region: &BufferImageCopy,
    );

    fn cmd_blit_image(&self, command_buffer: CommandBufferHandle, image: ImageHandle, blit: &MipBlit);

    fn cmd_begin_render_pass(&self, command_buffer: CommandBufferHandle, begin: &RenderPassBegin);

    fn cmd_end_render_pass(&self, command_buffer: CommandBufferHandle);

    fn cmd_bind_program(&self, command_buffer: CommandBufferHandle, program: &DrawingProgram);

    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: CommandBufferHandle,
        program: &DrawingProgram,
        set: DescriptorSetHandle,
    );

    fn cmd_push_constants(
        &self,
        command_buffer: CommandBufferHandle,
        program: &DrawingProgram,
        data: &[u8],
    );

    fn cmd_bind_geometry(
        &self,
        command_buffer: CommandBufferHandle,
        vertex_buffer: BufferHandle,
        index_buffer: BufferHandle,
    );

    fn cmd_set_viewport(&self, command_buffer: CommandBufferHandle, extent: Extent2d);

    fn cmd_set_scissor(&self, command_buffer: CommandBufferHandle, rect: ScissorRect);

    fn cmd_draw_indexed(
        &self,
        command_buffer: CommandBufferHandle,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    );

    // ------------------------------------------------------------------
    // Descriptors
    // ------------------------------------------------------------------

    /// Allocate a descriptor set. Fails with `AllocationFailure` when the pool is exhausted.
    fn allocate_descriptor_set(
        &self,
        layout: DescriptorSetLayoutHandle,
    ) -> GraphicsResult<DescriptorSetHandle>;

    /// Write a combined image sampler into binding 0 of a descriptor set.
    fn write_image_descriptor(
        &self,
        set: DescriptorSetHandle,
        sampler: SamplerHandle,
        view: ImageViewHandle,
    );

    /// Return a descriptor set to its pool.
    fn free_descriptor_set(&self, set: DescriptorSetHandle);

    // ------------------------------------------------------------------
    // Presentation
    // ------------------------------------------------------------------

    /// Create a single-subpass render pass that clears a color attachment
    /// and leaves it ready for presentation.
    fn create_render_pass(&self, format: ImageFormat) -> GraphicsResult<RenderPassHandle>;

    fn destroy_render_pass(&self, render_pass: RenderPassHandle);

    fn create_framebuffer(
        &self,
        render_pass: RenderPassHandle,
        view: ImageViewHandle,
        extent: Extent2d,
    ) -> GraphicsResult<FramebufferHandle>;

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle);

    /// Create a swapchain for a surface.
    fn create_swapchain(&self, descriptor: &SwapchainDescriptor) -> GraphicsResult<SwapchainImages>;

    /// Destroy a swapchain. Its images are released with it.
    fn destroy_swapchain(&self, swapchain: SwapchainHandle);

    /// Acquire the next presentable image, signaling `signal` when it is ready.
    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
    ) -> GraphicsResult<AcquireOutcome>;

    /// Queue an image for presentation after `wait` is signaled.
    fn present(
        &self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> GraphicsResult<PresentOutcome>;

    /// Destroy a presentation surface.
    fn destroy_surface(&self, surface: SurfaceHandle);
}

/// Selects and creates the appropriate backend based on available features.
pub fn create_backend(config: &RendererConfig) -> GraphicsResult<Arc<dyn GpuBackend>> {
    #[cfg(feature = "vulkan-backend")]
    {
        match vulkan::VulkanBackend::new(config) {
            Ok(backend) => {
                log::info!("Using Vulkan backend (ash)");
                return Ok(Arc::new(backend));
            }
            Err(e) => {
                log::warn!("Failed to create Vulkan backend: {}", e);
            }
        }
    }

    #[cfg(feature = "dummy")]
    {
        let _ = config;
        log::info!("Using dummy backend");
        return Ok(Arc::new(dummy::DummyBackend::new()));
    }

    #[allow(unreachable_code)]
    Err(GraphicsError::InitializationFailed(
        "no GPU backend available".to_string(),
    ))
}
