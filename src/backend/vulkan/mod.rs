//! Native Vulkan backend implementation using ash.
//!
//! Handles passed through [`GpuBackend`] are the raw Vulkan handle values.
//! Memory for buffers and images comes from gpu-allocator and is tracked
//! here by handle, so destroying a handle also frees its allocation.
//!
//! Command buffers and descriptor sets come from one pool each. Recording
//! into a command buffer is not synchronized: one thread records at a time,
//! which is how the renderer drives the backend.

mod allocator;
mod command;
pub(crate) mod conversion;
mod debug;
mod device;
mod instance;
mod pipeline;
mod swapchain;

pub use pipeline::UiShaders;

use std::collections::HashMap;
use std::mem::ManuallyDrop;

use ash::vk;
use ash::vk::Handle;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use parking_lot::Mutex;

use self::conversion::{
    convert_access_flags, convert_address_mode, convert_buffer_usage, convert_filter_mode,
    convert_image_format, convert_image_layout, convert_image_usage, convert_mipmap_filter_mode,
    convert_pipeline_stages, convert_subresource_range, convert_vk_error,
};
use super::{
    AcquireOutcome, BufferBarrier, BufferHandle, BufferImageCopy, CommandBufferHandle,
    DescriptorSetHandle, DescriptorSetLayoutHandle, FenceHandle, FramebufferHandle, GpuBackend,
    ImageBarrier, ImageHandle, ImageViewHandle, MipBlit, PresentOutcome, RenderPassBegin,
    RenderPassHandle, SamplerHandle, SemaphoreHandle, Submission, SurfaceHandle,
    SwapchainDescriptor, SwapchainHandle, SwapchainImages,
};
use crate::config::RendererConfig;
use crate::error::{GraphicsError, GraphicsResult};
use crate::program::DrawingProgram;
use crate::types::{
    BufferDescriptor, Extent2d, ImageDescriptor, ImageFormat, ImageLayout, ImageViewDescriptor,
    SamplerDescriptor, ScissorRect,
};

/// A buffer's memory and size.
struct BufferMemory {
    allocation: Allocation,
    size: u64,
}

/// Vulkan-based GPU backend using ash.
///
/// This backend provides native Vulkan access with:
/// - Validation layers when [`RendererConfig::validation`] is set
/// - gpu-allocator for memory management
/// - A single graphics queue used for transfers, drawing and presentation
pub struct VulkanBackend {
    entry: ash::Entry,
    instance: ash::Instance,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    graphics_queue: vk::Queue,
    graphics_queue_family: u32,
    /// Serializes queue submission and presentation.
    queue_lock: Mutex<()>,
    /// Dropped before the device.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    buffers: Mutex<HashMap<BufferHandle, BufferMemory>>,
    images: Mutex<HashMap<ImageHandle, Allocation>>,
    command_pool: Mutex<vk::CommandPool>,
    descriptor_pool: Mutex<vk::DescriptorPool>,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    validation_enabled: bool,
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("validation_enabled", &self.validation_enabled)
            .field("graphics_queue_family", &self.graphics_queue_family)
            .finish()
    }
}

impl VulkanBackend {
    /// Create a new Vulkan backend.
    ///
    /// This initializes the Vulkan instance, selects a physical device,
    /// creates a logical device, and sets up the memory allocator and pools.
    pub fn new(config: &RendererConfig) -> GraphicsResult<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to load Vulkan: {}", e))
        })?;

        let validation_enabled = config.validation;
        let parts = instance::create_instance(&entry, &config.app_name, validation_enabled)?;
        let instance = parts.instance;

        let (physical_device, graphics_queue_family) = device::select_physical_device(&instance)?;
        let device =
            device::create_logical_device(&instance, physical_device, graphics_queue_family)?;
        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };

        let allocator = allocator::create_allocator(&instance, physical_device, device.clone())?;
        let command_pool = command::create_command_pool(&device, graphics_queue_family)?;
        let descriptor_pool = command::create_descriptor_pool(&device)?;

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        log::info!(
            "Vulkan backend initialized (validation: {})",
            validation_enabled
        );

        Ok(Self {
            entry,
            instance,
            debug_messenger: parts.debug_messenger,
            debug_utils: parts.debug_utils,
            physical_device,
            device,
            graphics_queue,
            graphics_queue_family,
            queue_lock: Mutex::new(()),
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            buffers: Mutex::new(HashMap::new()),
            images: Mutex::new(HashMap::new()),
            command_pool: Mutex::new(command_pool),
            descriptor_pool: Mutex::new(descriptor_pool),
            surface_loader,
            swapchain_loader,
            validation_enabled,
        })
    }

    /// Get the Vulkan device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the Vulkan instance.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the graphics queue family index.
    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    fn cmd(command_buffer: CommandBufferHandle) -> vk::CommandBuffer {
        vk::CommandBuffer::from_raw(command_buffer.raw())
    }

    fn allocate_memory(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: gpu_allocator::MemoryLocation,
        linear: bool,
    ) -> GraphicsResult<Allocation> {
        self.allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| allocator::allocation_error(name, e))
    }

    fn free_memory(&self, allocation: Allocation) {
        if let Err(e) = self.allocator.lock().free(allocation) {
            log::error!("Failed to free GPU memory: {}", e);
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            let leaked_buffers = self.buffers.get_mut().len();
            let leaked_images = self.images.get_mut().len();
            if leaked_buffers + leaked_images > 0 {
                log::warn!(
                    "Vulkan backend dropped with {} buffers and {} images alive",
                    leaked_buffers,
                    leaked_images
                );
            }
            for (_, memory) in self.buffers.get_mut().drain() {
                let _ = self.allocator.get_mut().free(memory.allocation);
            }
            for (_, allocation) in self.images.get_mut().drain() {
                let _ = self.allocator.get_mut().free(allocation);
            }

            self.device
                .destroy_descriptor_pool(*self.descriptor_pool.get_mut(), None);
            self.device
                .destroy_command_pool(*self.command_pool.get_mut(), None);

            // The allocator frees its device memory blocks on drop.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);

            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan Backend (ash)"
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> GraphicsResult<BufferHandle> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(descriptor.size)
            .usage(convert_buffer_usage(descriptor.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(|e| convert_vk_error("Failed to create buffer", e))?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let allocation = match self.allocate_memory(
            descriptor.label.as_deref().unwrap_or("buffer"),
            requirements,
            allocator::memory_location(descriptor.location),
            true,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.free_memory(allocation);
            return Err(convert_vk_error("Failed to bind buffer memory", e));
        }

        let handle = BufferHandle::from_raw(buffer.as_raw());
        self.buffers.lock().insert(
            handle,
            BufferMemory {
                allocation,
                size: descriptor.size,
            },
        );
        Ok(handle)
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let memory = self.buffers.lock().remove(&buffer);
        unsafe {
            self.device
                .destroy_buffer(vk::Buffer::from_raw(buffer.raw()), None)
        };
        match memory {
            Some(memory) => self.free_memory(memory.allocation),
            None => log::error!("Destroyed untracked {:?}", buffer),
        }
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        let buffers = self.buffers.lock();
        let memory = buffers.get(&buffer).ok_or_else(|| {
            GraphicsError::ResourceMisuse(format!("write to unknown {:?}", buffer))
        })?;
        if offset + data.len() as u64 > memory.size {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at {} overflows buffer of {} bytes",
                data.len(),
                offset,
                memory.size
            )));
        }
        let Some(mapped_ptr) = memory.allocation.mapped_ptr() else {
            return Err(GraphicsError::ResourceMisuse(
                "Buffer is not mapped for CPU access".to_string(),
            ));
        };

        // SAFETY: the range was checked against the buffer size and the
        // mapping stays valid while the allocation is alive
        unsafe {
            let dst = mapped_ptr.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        Ok(())
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> GraphicsResult<ImageHandle> {
        descriptor.validate()?;
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(convert_image_format(descriptor.format))
            .extent(vk::Extent3D {
                width: descriptor.extent.width,
                height: descriptor.extent.height,
                depth: 1,
            })
            .mip_levels(descriptor.mip_level_count)
            .array_layers(descriptor.array_layer_count)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_image_usage(descriptor.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(|e| convert_vk_error("Failed to create image", e))?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let allocation = match self.allocate_memory(
            descriptor.label.as_deref().unwrap_or("image"),
            requirements,
            gpu_allocator::MemoryLocation::GpuOnly,
            false,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            unsafe { self.device.destroy_image(image, None) };
            self.free_memory(allocation);
            return Err(convert_vk_error("Failed to bind image memory", e));
        }

        let handle = ImageHandle::from_raw(image.as_raw());
        self.images.lock().insert(handle, allocation);
        Ok(handle)
    }

    fn destroy_image(&self, image: ImageHandle) {
        let allocation = self.images.lock().remove(&image);
        unsafe { self.device.destroy_image(vk::Image::from_raw(image.raw()), None) };
        match allocation {
            Some(allocation) => self.free_memory(allocation),
            None => log::error!("Destroyed untracked {:?}", image),
        }
    }

    fn create_image_view(
        &self,
        descriptor: &ImageViewDescriptor,
    ) -> GraphicsResult<ImageViewHandle> {
        let view_type = if descriptor.range.layer_count > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(vk::Image::from_raw(descriptor.image.raw()))
            .view_type(view_type)
            .format(convert_image_format(descriptor.format))
            .components(vk::ComponentMapping::default())
            .subresource_range(convert_subresource_range(descriptor.range));

        let view = unsafe { self.device.create_image_view(&view_info, None) }
            .map_err(|e| convert_vk_error("Failed to create image view", e))?;
        Ok(ImageViewHandle::from_raw(view.as_raw()))
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        unsafe {
            self.device
                .destroy_image_view(vk::ImageView::from_raw(view.raw()), None)
        };
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> GraphicsResult<SamplerHandle> {
        let address_mode = convert_address_mode(descriptor.address_mode);
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(convert_filter_mode(descriptor.mag_filter))
            .min_filter(convert_filter_mode(descriptor.min_filter))
            .mipmap_mode(convert_mipmap_filter_mode(descriptor.mipmap_filter))
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .mip_lod_bias(0.0)
            .anisotropy_enable(false)
            .min_lod(0.0)
            .max_lod(descriptor.max_lod as f32)
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK)
            .unnormalized_coordinates(false);

        let sampler = unsafe { self.device.create_sampler(&sampler_info, None) }
            .map_err(|e| convert_vk_error("Failed to create sampler", e))?;
        Ok(SamplerHandle::from_raw(sampler.as_raw()))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        unsafe {
            self.device
                .destroy_sampler(vk::Sampler::from_raw(sampler.raw()), None)
        };
    }

    fn create_fence(&self, signaled: bool) -> GraphicsResult<FenceHandle> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence = unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        }
        .map_err(|e| convert_vk_error("Failed to create fence", e))?;
        Ok(FenceHandle::from_raw(fence.as_raw()))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        unsafe {
            self.device
                .destroy_fence(vk::Fence::from_raw(fence.raw()), None)
        };
    }

    fn wait_fence(&self, fence: FenceHandle) -> GraphicsResult<()> {
        let fences = [vk::Fence::from_raw(fence.raw())];
        unsafe { self.device.wait_for_fences(&fences, true, u64::MAX) }
            .map_err(|e| convert_vk_error("Failed to wait for fence", e))
    }

    fn reset_fence(&self, fence: FenceHandle) -> GraphicsResult<()> {
        let fences = [vk::Fence::from_raw(fence.raw())];
        unsafe { self.device.reset_fences(&fences) }
            .map_err(|e| convert_vk_error("Failed to reset fence", e))
    }

    fn is_fence_signaled(&self, fence: FenceHandle) -> GraphicsResult<bool> {
        unsafe {
            self.device
                .get_fence_status(vk::Fence::from_raw(fence.raw()))
        }
        .map_err(|e| convert_vk_error("Failed to query fence", e))
    }

    fn create_semaphore(&self) -> GraphicsResult<SemaphoreHandle> {
        let semaphore = unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
        .map_err(|e| convert_vk_error("Failed to create semaphore", e))?;
        Ok(SemaphoreHandle::from_raw(semaphore.as_raw()))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        unsafe {
            self.device
                .destroy_semaphore(vk::Semaphore::from_raw(semaphore.raw()), None)
        };
    }

    fn wait_idle(&self) -> GraphicsResult<()> {
        let _queue = self.queue_lock.lock();
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| convert_vk_error("Failed to wait for device idle", e))
    }

    fn allocate_command_buffer(&self) -> GraphicsResult<CommandBufferHandle> {
        let pool = self.command_pool.lock();
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| convert_vk_error("Failed to allocate command buffer", e))?;
        buffers
            .first()
            .map(|cmd| CommandBufferHandle::from_raw(cmd.as_raw()))
            .ok_or_else(|| GraphicsError::Internal("no command buffer allocated".to_string()))
    }

    fn free_command_buffer(&self, command_buffer: CommandBufferHandle) {
        let pool = self.command_pool.lock();
        unsafe {
            self.device
                .free_command_buffers(*pool, &[Self::cmd(command_buffer)])
        };
    }

    fn begin_command_buffer(&self, command_buffer: CommandBufferHandle) -> GraphicsResult<()> {
        let cmd = Self::cmd(command_buffer);
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .map_err(|e| convert_vk_error("Failed to reset command buffer", e))?;

        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }
            .map_err(|e| convert_vk_error("Failed to begin command buffer", e))
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> GraphicsResult<()> {
        unsafe { self.device.end_command_buffer(Self::cmd(command_buffer)) }
            .map_err(|e| convert_vk_error("Failed to end command buffer", e))
    }

    fn submit(&self, submission: &Submission) -> GraphicsResult<()> {
        let command_buffers = [Self::cmd(submission.command_buffer)];
        let wait_semaphores: Vec<vk::Semaphore> = submission
            .wait_semaphore
            .iter()
            .map(|s| vk::Semaphore::from_raw(s.raw()))
            .collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = wait_semaphores
            .iter()
            .map(|_| convert_pipeline_stages(submission.wait_stage))
            .collect();
        let signal_semaphores: Vec<vk::Semaphore> = submission
            .signal_semaphore
            .iter()
            .map(|s| vk::Semaphore::from_raw(s.raw()))
            .collect();
        let fence = submission
            .signal_fence
            .map(|f| vk::Fence::from_raw(f.raw()))
            .unwrap_or_else(vk::Fence::null);

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let _queue = self.queue_lock.lock();
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], fence)
        }
        .map_err(|e| convert_vk_error("Failed to submit command buffer", e))
    }

    fn cmd_image_barrier(&self, command_buffer: CommandBufferHandle, barrier: &ImageBarrier) {
        let vk_barrier = vk::ImageMemoryBarrier::default()
            .old_layout(convert_image_layout(barrier.old_layout))
            .new_layout(convert_image_layout(barrier.new_layout))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(vk::Image::from_raw(barrier.image.raw()))
            .subresource_range(convert_subresource_range(barrier.range))
            .src_access_mask(convert_access_flags(barrier.src_access))
            .dst_access_mask(convert_access_flags(barrier.dst_access));

        unsafe {
            self.device.cmd_pipeline_barrier(
                Self::cmd(command_buffer),
                convert_pipeline_stages(barrier.src_stage),
                convert_pipeline_stages(barrier.dst_stage),
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[vk_barrier],
            );
        }
    }

    fn cmd_buffer_barrier(&self, command_buffer: CommandBufferHandle, barrier: &BufferBarrier) {
        let vk_barrier = vk::BufferMemoryBarrier::default()
            .src_access_mask(convert_access_flags(barrier.src_access))
            .dst_access_mask(convert_access_flags(barrier.dst_access))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(vk::Buffer::from_raw(barrier.buffer.raw()))
            .offset(0)
            .size(vk::WHOLE_SIZE);

        unsafe {
            self.device.cmd_pipeline_barrier(
                Self::cmd(command_buffer),
                convert_pipeline_stages(barrier.src_stage),
                convert_pipeline_stages(barrier.dst_stage),
                vk::DependencyFlags::empty(),
                &[],
                &[vk_barrier],
                &[],
            );
        }
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            self.device.cmd_copy_buffer(
                Self::cmd(command_buffer),
                vk::Buffer::from_raw(src.raw()),
                vk::Buffer::from_raw(dst.raw()),
                &[region],
            );
        }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        image: ImageHandle,
        region: &BufferImageCopy,
    ) {
        let copy = vk::BufferImageCopy::default()
            .buffer_offset(region.buffer_offset)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: region.mip_level,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D {
                x: region.image_offset.x as i32,
                y: region.image_offset.y as i32,
                z: 0,
            })
            .image_extent(vk::Extent3D {
                width: region.image_extent.width,
                height: region.image_extent.height,
                depth: 1,
            });

        unsafe {
            self.device.cmd_copy_buffer_to_image(
                Self::cmd(command_buffer),
                vk::Buffer::from_raw(src.raw()),
                vk::Image::from_raw(image.raw()),
                convert_image_layout(ImageLayout::TransferDst),
                &[copy],
            );
        }
    }

    fn cmd_blit_image(&self, command_buffer: CommandBufferHandle, image: ImageHandle, blit: &MipBlit) {
        let corner = |extent: Extent2d| vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: 1,
        };
        let layers = |mip_level| vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level,
            base_array_layer: 0,
            layer_count: 1,
        };
        let region = vk::ImageBlit::default()
            .src_subresource(layers(blit.src_level))
            .src_offsets([vk::Offset3D::default(), corner(blit.src_extent)])
            .dst_subresource(layers(blit.dst_level))
            .dst_offsets([vk::Offset3D::default(), corner(blit.dst_extent)]);

        let image = vk::Image::from_raw(image.raw());
        unsafe {
            self.device.cmd_blit_image(
                Self::cmd(command_buffer),
                image,
                convert_image_layout(ImageLayout::TransferSrc),
                image,
                convert_image_layout(ImageLayout::TransferDst),
                &[region],
                convert_filter_mode(blit.filter),
            );
        }
    }

    fn cmd_begin_render_pass(&self, command_buffer: CommandBufferHandle, begin: &RenderPassBegin) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: begin.clear_color.to_array(),
            },
        }];
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(vk::RenderPass::from_raw(begin.render_pass.raw()))
            .framebuffer(vk::Framebuffer::from_raw(begin.framebuffer.raw()))
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: begin.extent.width,
                    height: begin.extent.height,
                },
            })
            .clear_values(&clear_values);

        unsafe {
            self.device.cmd_begin_render_pass(
                Self::cmd(command_buffer),
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    fn cmd_end_render_pass(&self, command_buffer: CommandBufferHandle) {
        unsafe { self.device.cmd_end_render_pass(Self::cmd(command_buffer)) };
    }

    fn cmd_bind_program(&self, command_buffer: CommandBufferHandle, program: &DrawingProgram) {
        unsafe {
            self.device.cmd_bind_pipeline(
                Self::cmd(command_buffer),
                vk::PipelineBindPoint::GRAPHICS,
                vk::Pipeline::from_raw(program.pipeline().raw()),
            );
        }
    }

    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: CommandBufferHandle,
        program: &DrawingProgram,
        set: DescriptorSetHandle,
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                Self::cmd(command_buffer),
                vk::PipelineBindPoint::GRAPHICS,
                vk::PipelineLayout::from_raw(program.pipeline_layout().raw()),
                0,
                &[vk::DescriptorSet::from_raw(set.raw())],
                &[],
            );
        }
    }

    fn cmd_push_constants(
        &self,
        command_buffer: CommandBufferHandle,
        program: &DrawingProgram,
        data: &[u8],
    ) {
        unsafe {
            self.device.cmd_push_constants(
                Self::cmd(command_buffer),
                vk::PipelineLayout::from_raw(program.pipeline_layout().raw()),
                vk::ShaderStageFlags::VERTEX,
                0,
                data,
            );
        }
    }

    fn cmd_bind_geometry(
        &self,
        command_buffer: CommandBufferHandle,
        vertex_buffer: BufferHandle,
        index_buffer: BufferHandle,
    ) {
        let cmd = Self::cmd(command_buffer);
        unsafe {
            self.device.cmd_bind_vertex_buffers(
                cmd,
                0,
                &[vk::Buffer::from_raw(vertex_buffer.raw())],
                &[0],
            );
            self.device.cmd_bind_index_buffer(
                cmd,
                vk::Buffer::from_raw(index_buffer.raw()),
                0,
                vk::IndexType::UINT32,
            );
        }
    }

    fn cmd_set_viewport(&self, command_buffer: CommandBufferHandle, extent: Extent2d) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe {
            self.device
                .cmd_set_viewport(Self::cmd(command_buffer), 0, &[viewport])
        };
    }

    fn cmd_set_scissor(&self, command_buffer: CommandBufferHandle, rect: ScissorRect) {
        let scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: rect.x,
                y: rect.y,
            },
            extent: vk::Extent2D {
                width: rect.width,
                height: rect.height,
            },
        };
        unsafe {
            self.device
                .cmd_set_scissor(Self::cmd(command_buffer), 0, &[scissor])
        };
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: CommandBufferHandle,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                Self::cmd(command_buffer),
                index_count,
                1,
                first_index,
                vertex_offset,
                0,
            );
        }
    }

    fn allocate_descriptor_set(
        &self,
        layout: DescriptorSetLayoutHandle,
    ) -> GraphicsResult<DescriptorSetHandle> {
        let pool = self.descriptor_pool.lock();
        let layouts = [vk::DescriptorSetLayout::from_raw(layout.raw())];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(*pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| convert_vk_error("Failed to allocate descriptor set", e))?;
        sets.first()
            .map(|set| DescriptorSetHandle::from_raw(set.as_raw()))
            .ok_or_else(|| GraphicsError::Internal("no descriptor set allocated".to_string()))
    }

    fn write_image_descriptor(
        &self,
        set: DescriptorSetHandle,
        sampler: SamplerHandle,
        view: ImageViewHandle,
    ) {
        let image_info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::from_raw(sampler.raw()),
            image_view: vk::ImageView::from_raw(view.raw()),
            image_layout: convert_image_layout(ImageLayout::ShaderReadOnly),
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(vk::DescriptorSet::from_raw(set.raw()))
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info);

        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
    }

    fn free_descriptor_set(&self, set: DescriptorSetHandle) {
        let pool = self.descriptor_pool.lock();
        if let Err(e) = unsafe {
            self.device
                .free_descriptor_sets(*pool, &[vk::DescriptorSet::from_raw(set.raw())])
        } {
            log::error!("Failed to free descriptor set: {:?}", e);
        }
    }

    fn create_render_pass(&self, format: ImageFormat) -> GraphicsResult<RenderPassHandle> {
        let attachments = [vk::AttachmentDescription::default()
            .format(convert_image_format(format))
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(convert_image_layout(ImageLayout::Undefined))
            .final_layout(convert_image_layout(ImageLayout::PresentSrc))];

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: convert_image_layout(ImageLayout::ColorAttachment),
        }];
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)];

        // Wait for the acquire semaphore's stage before the layout transition.
        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { self.device.create_render_pass(&create_info, None) }
            .map_err(|e| convert_vk_error("Failed to create render pass", e))?;
        Ok(RenderPassHandle::from_raw(render_pass.as_raw()))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        unsafe {
            self.device
                .destroy_render_pass(vk::RenderPass::from_raw(render_pass.raw()), None)
        };
    }

    fn create_framebuffer(
        &self,
        render_pass: RenderPassHandle,
        view: ImageViewHandle,
        extent: Extent2d,
    ) -> GraphicsResult<FramebufferHandle> {
        let attachments = [vk::ImageView::from_raw(view.raw())];
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(vk::RenderPass::from_raw(render_pass.raw()))
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { self.device.create_framebuffer(&create_info, None) }
            .map_err(|e| convert_vk_error("Failed to create framebuffer", e))?;
        Ok(FramebufferHandle::from_raw(framebuffer.as_raw()))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        unsafe {
            self.device
                .destroy_framebuffer(vk::Framebuffer::from_raw(framebuffer.raw()), None)
        };
    }

    fn create_swapchain(&self, descriptor: &SwapchainDescriptor) -> GraphicsResult<SwapchainImages> {
        self.build_swapchain(descriptor)
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        unsafe {
            self.swapchain_loader
                .destroy_swapchain(vk::SwapchainKHR::from_raw(swapchain.raw()), None)
        };
    }

    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
    ) -> GraphicsResult<AcquireOutcome> {
        self.acquire(swapchain, signal)
    }

    fn present(
        &self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> GraphicsResult<PresentOutcome> {
        self.queue_present(swapchain, image_index, wait)
    }

    fn destroy_surface(&self, surface: SurfaceHandle) {
        unsafe {
            self.surface_loader
                .destroy_surface(vk::SurfaceKHR::from_raw(surface.raw()), None)
        };
    }
}
