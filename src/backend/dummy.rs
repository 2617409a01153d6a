//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. It hands out unique
//! handles, records every command into per-command-buffer logs and simulates
//! queue completion so that fence waits behave like they do on a real device.
//!
//! Beyond that it checks the usage rules a driver's validation layer would:
//! re-recording a command buffer the GPU is still executing, destroying a
//! resource referenced by in-flight work, or waiting on a semaphore that will
//! never be signaled. Such misuse is collected in [`DummyBackend::violations`].

use std::collections::{HashMap, VecDeque};

use parking_lot::{Condvar, Mutex};

use crate::error::{GraphicsError, GraphicsResult};
use crate::program::DrawingProgram;
use crate::types::{
    BufferDescriptor, Extent2d, ImageDescriptor, ImageViewDescriptor, MemoryLocation,
    PipelineStages, SamplerDescriptor, ScissorRect,
};

use super::{
    AcquireOutcome, BufferBarrier, BufferHandle, BufferImageCopy, CommandBufferHandle,
    DescriptorSetHandle, DescriptorSetLayoutHandle, FenceHandle, FramebufferHandle,
    GpuBackend, ImageBarrier, ImageHandle, ImageViewHandle, MipBlit, PipelineHandle,
    PipelineLayoutHandle, PresentOutcome, RenderPassBegin, RenderPassHandle, SamplerHandle,
    SemaphoreHandle, Submission, SurfaceHandle, SwapchainDescriptor, SwapchainHandle,
    SwapchainImages,
};

/// Number of swapchain images the dummy surface provides by default.
pub const DEFAULT_SWAPCHAIN_IMAGE_COUNT: u32 = 3;

/// A command recorded into a dummy command buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    ImageBarrier(ImageBarrier),
    BufferBarrier(BufferBarrier),
    CopyBuffer {
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    },
    CopyBufferToImage {
        src: BufferHandle,
        image: ImageHandle,
        region: BufferImageCopy,
    },
    BlitImage {
        image: ImageHandle,
        blit: MipBlit,
    },
    BeginRenderPass(RenderPassBegin),
    EndRenderPass,
    BindProgram(PipelineHandle),
    BindDescriptorSet(DescriptorSetHandle),
    PushConstants(Vec<u8>),
    BindGeometry {
        vertex_buffer: BufferHandle,
        index_buffer: BufferHandle,
    },
    SetViewport(Extent2d),
    SetScissor(ScissorRect),
    DrawIndexed {
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    },
}

impl RecordedCommand {
    fn uses_buffer(&self, buffer: BufferHandle) -> bool {
        match self {
            Self::BufferBarrier(b) => b.buffer == buffer,
            Self::CopyBuffer { src, dst, .. } => *src == buffer || *dst == buffer,
            Self::CopyBufferToImage { src, .. } => *src == buffer,
            Self::BindGeometry {
                vertex_buffer,
                index_buffer,
            } => *vertex_buffer == buffer || *index_buffer == buffer,
            _ => false,
        }
    }

    fn uses_image(&self, image: ImageHandle) -> bool {
        match self {
            Self::ImageBarrier(b) => b.image == image,
            Self::CopyBufferToImage { image: i, .. } | Self::BlitImage { image: i, .. } => {
                *i == image
            }
            _ => false,
        }
    }
}

/// Observable device-level events, in the order they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendEvent {
    CommandBufferBegun(CommandBufferHandle),
    Submitted {
        command_buffer: CommandBufferHandle,
        fence: Option<FenceHandle>,
    },
    FenceWaitStarted(FenceHandle),
    FenceWaitFinished(FenceHandle),
    FenceSignaled(FenceHandle),
    FenceReset(FenceHandle),
    Acquired {
        swapchain: SwapchainHandle,
        image_index: u32,
    },
    AcquireStale(SwapchainHandle),
    Presented {
        swapchain: SwapchainHandle,
        image_index: u32,
    },
    PresentStale(SwapchainHandle),
    SwapchainCreated(SwapchainHandle),
    SwapchainDestroyed(SwapchainHandle),
    WaitIdle,
}

/// How the simulated GPU completes submitted work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuCompletion {
    /// Work completes as soon as it is submitted.
    #[default]
    Immediate,
    /// Work completes only through [`DummyBackend::complete_next_submission`],
    /// [`DummyBackend::complete_all_submissions`] or an idle wait.
    Manual,
}

/// Scripted response for the next acquire or present call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedOutcome {
    /// Report the swapchain as out of date.
    Stale,
    /// Succeed but report the swapchain as suboptimal.
    Suboptimal,
    /// Fail with the given error.
    Fail(GraphicsError),
}

/// Number of live objects per handle type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveHandleCounts {
    pub buffers: usize,
    pub images: usize,
    pub image_views: usize,
    pub samplers: usize,
    pub fences: usize,
    pub semaphores: usize,
    pub command_buffers: usize,
    pub descriptor_sets: usize,
    pub render_passes: usize,
    pub framebuffers: usize,
    pub swapchains: usize,
    pub surfaces: usize,
    pub pipelines: usize,
}

/// A command buffer as it was when submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedWork {
    pub command_buffer: CommandBufferHandle,
    pub commands: Vec<RecordedCommand>,
    pub wait_semaphore: Option<SemaphoreHandle>,
    pub signal_semaphore: Option<SemaphoreHandle>,
    pub fence: Option<FenceHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    Pending,
}

#[derive(Debug)]
struct DummyCommandBuffer {
    state: CommandBufferState,
    commands: Vec<RecordedCommand>,
}

#[derive(Debug)]
struct DummyBuffer {
    size: u64,
    location: MemoryLocation,
    contents: Vec<u8>,
}

#[derive(Debug)]
struct DummySwapchain {
    surface: SurfaceHandle,
    images: Vec<ImageHandle>,
    next_image: u32,
}

#[derive(Debug)]
struct PendingSubmission {
    submitted_index: usize,
    command_buffer: CommandBufferHandle,
    fence: Option<FenceHandle>,
}

#[derive(Debug, Default)]
struct DummyState {
    next_handle: u64,
    completion: GpuCompletion,
    swapchain_image_count: u32,
    memory_budget: Option<u64>,
    memory_used: u64,
    descriptor_set_limit: Option<usize>,

    buffers: HashMap<BufferHandle, DummyBuffer>,
    images: HashMap<ImageHandle, u64>,
    image_views: HashMap<ImageViewHandle, ImageViewDescriptor>,
    samplers: HashMap<SamplerHandle, SamplerDescriptor>,
    fences: HashMap<FenceHandle, bool>,
    semaphores: HashMap<SemaphoreHandle, bool>,
    command_buffers: HashMap<CommandBufferHandle, DummyCommandBuffer>,
    descriptor_sets: HashMap<DescriptorSetHandle, Option<(SamplerHandle, ImageViewHandle)>>,
    render_passes: HashMap<RenderPassHandle, ()>,
    framebuffers: HashMap<FramebufferHandle, ImageViewHandle>,
    swapchains: HashMap<SwapchainHandle, DummySwapchain>,
    surfaces: HashMap<SurfaceHandle, ()>,
    pipelines: usize,

    pending: VecDeque<PendingSubmission>,
    submitted: Vec<SubmittedWork>,
    acquire_script: VecDeque<ScriptedOutcome>,
    present_script: VecDeque<ScriptedOutcome>,
    events: Vec<BackendEvent>,
    violations: Vec<String>,
    swapchains_created: usize,
    presents: usize,
}

impl DummyState {
    fn next_raw(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn reserve_memory(&mut self, bytes: u64, what: &str) -> GraphicsResult<()> {
        if let Some(budget) = self.memory_budget {
            if self.memory_used + bytes > budget {
                return Err(GraphicsError::AllocationFailure(format!(
                    "{what} of {bytes} bytes exceeds memory budget ({} of {budget} used)",
                    self.memory_used
                )));
            }
        }
        self.memory_used += bytes;
        Ok(())
    }

    fn record(&mut self, command_buffer: CommandBufferHandle, command: RecordedCommand) {
        match self.command_buffers.get_mut(&command_buffer) {
            Some(cb) if cb.state == CommandBufferState::Recording => cb.commands.push(command),
            Some(cb) => {
                let state = cb.state;
                self.violations.push(format!(
                    "{command:?} recorded into {command_buffer:?} in state {state:?}"
                ));
            }
            None => self
                .violations
                .push(format!("{command:?} recorded into unknown {command_buffer:?}")),
        }
    }

    fn in_flight(&self, mut uses: impl FnMut(&RecordedCommand) -> bool) -> bool {
        self.pending.iter().any(|p| {
            self.submitted[p.submitted_index]
                .commands
                .iter()
                .any(&mut uses)
        })
    }

    fn complete(&mut self, submission: PendingSubmission) {
        if let Some(cb) = self.command_buffers.get_mut(&submission.command_buffer) {
            cb.state = CommandBufferState::Executable;
        }
        if let Some(fence) = submission.fence {
            if let Some(signaled) = self.fences.get_mut(&fence) {
                *signaled = true;
                self.events.push(BackendEvent::FenceSignaled(fence));
            }
        }
    }

    fn consume_semaphore(&mut self, semaphore: SemaphoreHandle, context: &str) {
        match self.semaphores.get_mut(&semaphore) {
            Some(signaled) if *signaled => *signaled = false,
            Some(_) => self.violations.push(format!(
                "{context} waits on {semaphore:?} which has no pending signal"
            )),
            None => self
                .violations
                .push(format!("{context} waits on unknown {semaphore:?}")),
        }
    }
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    state: Mutex<DummyState>,
    completed: Condvar,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyBackend {
    /// Create a new dummy backend with immediate completion.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DummyState {
                swapchain_image_count: DEFAULT_SWAPCHAIN_IMAGE_COUNT,
                ..Default::default()
            }),
            completed: Condvar::new(),
        }
    }

    /// Create a dummy backend with the given completion mode.
    pub fn with_completion(completion: GpuCompletion) -> Self {
        let backend = Self::new();
        backend.state.lock().completion = completion;
        backend
    }

    /// Set how submitted work completes.
    pub fn set_completion(&self, completion: GpuCompletion) {
        self.state.lock().completion = completion;
    }

    /// Set the number of images new swapchains receive (at least the requested minimum).
    pub fn set_swapchain_image_count(&self, count: u32) {
        self.state.lock().swapchain_image_count = count;
    }

    /// Limit the total bytes of buffer and image memory that may be live.
    pub fn set_memory_budget(&self, budget: Option<u64>) {
        self.state.lock().memory_budget = budget;
    }

    /// Limit the number of descriptor sets that may be live.
    pub fn set_descriptor_set_limit(&self, limit: Option<usize>) {
        self.state.lock().descriptor_set_limit = limit;
    }

    /// Bytes of buffer and image memory currently live.
    pub fn memory_used(&self) -> u64 {
        self.state.lock().memory_used
    }

    /// Queue an outcome for an upcoming acquire call.
    pub fn script_acquire(&self, outcome: ScriptedOutcome) {
        self.state.lock().acquire_script.push_back(outcome);
    }

    /// Queue an outcome for an upcoming present call.
    pub fn script_present(&self, outcome: ScriptedOutcome) {
        self.state.lock().present_script.push_back(outcome);
    }

    /// Create a presentation surface, standing in for a window system surface.
    pub fn create_surface(&self) -> SurfaceHandle {
        let mut state = self.state.lock();
        let surface = SurfaceHandle::from_raw(state.next_raw());
        state.surfaces.insert(surface, ());
        surface
    }

    /// Create a drawing program whose handles are tracked and released on drop.
    pub fn create_program(self: &std::sync::Arc<Self>) -> DrawingProgram {
        let mut state = self.state.lock();
        let pipeline = PipelineHandle::from_raw(state.next_raw());
        let layout = PipelineLayoutHandle::from_raw(state.next_raw());
        let set_layout = DescriptorSetLayoutHandle::from_raw(state.next_raw());
        state.pipelines += 1;
        drop(state);

        let owner = std::sync::Arc::clone(self);
        DrawingProgram::new(pipeline, layout, set_layout).with_destructor(
            self.clone(),
            Box::new(move |_| {
                owner.state.lock().pipelines -= 1;
            }),
        )
    }

    /// Complete the oldest pending submission. Returns false if none was pending.
    pub fn complete_next_submission(&self) -> bool {
        let mut state = self.state.lock();
        let Some(submission) = state.pending.pop_front() else {
            return false;
        };
        state.complete(submission);
        self.completed.notify_all();
        true
    }

    /// Complete every pending submission.
    pub fn complete_all_submissions(&self) {
        let mut state = self.state.lock();
        while let Some(submission) = state.pending.pop_front() {
            state.complete(submission);
        }
        self.completed.notify_all();
    }

    /// Number of submissions the GPU has not completed yet.
    pub fn pending_submissions(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of live objects per handle type.
    pub fn live_handles(&self) -> LiveHandleCounts {
        let state = self.state.lock();
        LiveHandleCounts {
            buffers: state.buffers.len(),
            images: state.images.len(),
            image_views: state.image_views.len(),
            samplers: state.samplers.len(),
            fences: state.fences.len(),
            semaphores: state.semaphores.len(),
            command_buffers: state.command_buffers.len(),
            descriptor_sets: state.descriptor_sets.len(),
            render_passes: state.render_passes.len(),
            framebuffers: state.framebuffers.len(),
            swapchains: state.swapchains.len(),
            surfaces: state.surfaces.len(),
            pipelines: state.pipelines,
        }
    }

    /// All submissions so far, oldest first.
    pub fn submissions(&self) -> Vec<SubmittedWork> {
        self.state.lock().submitted.clone()
    }

    /// Number of submissions so far.
    pub fn submission_count(&self) -> usize {
        self.state.lock().submitted.len()
    }

    /// Number of successful presents so far.
    pub fn present_count(&self) -> usize {
        self.state.lock().presents
    }

    /// Number of swapchains created so far.
    pub fn swapchains_created(&self) -> usize {
        self.state.lock().swapchains_created
    }

    /// Commands currently recorded in a command buffer.
    pub fn recorded_commands(&self, command_buffer: CommandBufferHandle) -> Vec<RecordedCommand> {
        self.state
            .lock()
            .command_buffers
            .get(&command_buffer)
            .map(|cb| cb.commands.clone())
            .unwrap_or_default()
    }

    /// Contents of a host-visible buffer.
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.state
            .lock()
            .buffers
            .get(&buffer)
            .map(|b| b.contents.clone())
    }

    /// Size of a live buffer.
    pub fn buffer_size(&self, buffer: BufferHandle) -> Option<u64> {
        self.state.lock().buffers.get(&buffer).map(|b| b.size)
    }

    /// The (sampler, view) pair written into a descriptor set.
    pub fn descriptor_binding(
        &self,
        set: DescriptorSetHandle,
    ) -> Option<(SamplerHandle, ImageViewHandle)> {
        self.state.lock().descriptor_sets.get(&set).copied().flatten()
    }

    /// Device events so far.
    pub fn events(&self) -> Vec<BackendEvent> {
        self.state.lock().events.clone()
    }

    /// Forget recorded events and submissions.
    pub fn clear_history(&self) {
        let mut state = self.state.lock();
        state.events.clear();
        let keep = state.pending.len();
        let drain_to = state.submitted.len() - keep;
        state.submitted.drain(..drain_to);
        for (i, pending) in state.pending.iter_mut().enumerate() {
            pending.submitted_index = i;
        }
    }

    /// Usage rule violations detected so far.
    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> GraphicsResult<BufferHandle> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        let mut state = self.state.lock();
        state.reserve_memory(descriptor.size, "buffer")?;
        let buffer = BufferHandle::from_raw(state.next_raw());
        let contents = match descriptor.location {
            MemoryLocation::HostVisible => vec![0; descriptor.size as usize],
            MemoryLocation::DeviceLocal => Vec::new(),
        };
        state.buffers.insert(
            buffer,
            DummyBuffer {
                size: descriptor.size,
                location: descriptor.location,
                contents,
            },
        );
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state.lock();
        if state.in_flight(|c| c.uses_buffer(buffer)) {
            state
                .violations
                .push(format!("{buffer:?} destroyed while in use by the GPU"));
        }
        match state.buffers.remove(&buffer) {
            Some(b) => state.memory_used -= b.size,
            None => state.violations.push(format!("unknown {buffer:?} destroyed")),
        }
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let entry = state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| GraphicsError::ResourceMisuse(format!("write to unknown {buffer:?}")))?;
        if entry.location != MemoryLocation::HostVisible {
            return Err(GraphicsError::ResourceMisuse(format!(
                "{buffer:?} is not host visible"
            )));
        }
        let end = offset + data.len() as u64;
        if end > entry.size {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at offset {offset} exceeds buffer size {}",
                data.len(),
                entry.size
            )));
        }
        entry.contents[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> GraphicsResult<ImageHandle> {
        log::trace!(
            "DummyBackend: creating image {:?} ({}x{}, {} mips)",
            descriptor.label,
            descriptor.extent.width,
            descriptor.extent.height,
            descriptor.mip_level_count
        );
        let bytes: u64 = (0..descriptor.mip_level_count)
            .map(|level| {
                let size = descriptor.extent.mip_level_size(level);
                size.width as u64
                    * size.height as u64
                    * descriptor.format.bytes_per_pixel() as u64
                    * descriptor.array_layer_count as u64
            })
            .sum();
        let mut state = self.state.lock();
        state.reserve_memory(bytes, "image")?;
        let image = ImageHandle::from_raw(state.next_raw());
        state.images.insert(image, bytes);
        Ok(image)
    }

    fn destroy_image(&self, image: ImageHandle) {
        let mut state = self.state.lock();
        if state.in_flight(|c| c.uses_image(image)) {
            state
                .violations
                .push(format!("{image:?} destroyed while in use by the GPU"));
        }
        match state.images.remove(&image) {
            Some(bytes) => state.memory_used -= bytes,
            None => state.violations.push(format!("unknown {image:?} destroyed")),
        }
    }

    fn create_image_view(
        &self,
        descriptor: &ImageViewDescriptor,
    ) -> GraphicsResult<ImageViewHandle> {
        let mut state = self.state.lock();
        let known = state.images.contains_key(&descriptor.image)
            || state
                .swapchains
                .values()
                .any(|s| s.images.contains(&descriptor.image));
        if !known {
            return Err(GraphicsError::ResourceMisuse(format!(
                "view of unknown {:?}",
                descriptor.image
            )));
        }
        let view = ImageViewHandle::from_raw(state.next_raw());
        state.image_views.insert(view, *descriptor);
        Ok(view)
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        let mut state = self.state.lock();
        if state.image_views.remove(&view).is_none() {
            state.violations.push(format!("unknown {view:?} destroyed"));
        }
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> GraphicsResult<SamplerHandle> {
        log::trace!("DummyBackend: creating sampler {:?}", descriptor.label);
        let mut state = self.state.lock();
        let sampler = SamplerHandle::from_raw(state.next_raw());
        state.samplers.insert(sampler, descriptor.clone());
        Ok(sampler)
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        let mut state = self.state.lock();
        if state.samplers.remove(&sampler).is_none() {
            state.violations.push(format!("unknown {sampler:?} destroyed"));
        }
    }

    fn create_fence(&self, signaled: bool) -> GraphicsResult<FenceHandle> {
        let mut state = self.state.lock();
        let fence = FenceHandle::from_raw(state.next_raw());
        state.fences.insert(fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        let mut state = self.state.lock();
        if state.pending.iter().any(|p| p.fence == Some(fence)) {
            state
                .violations
                .push(format!("{fence:?} destroyed while its submission is pending"));
        }
        if state.fences.remove(&fence).is_none() {
            state.violations.push(format!("unknown {fence:?} destroyed"));
        }
    }

    fn wait_fence(&self, fence: FenceHandle) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        state.events.push(BackendEvent::FenceWaitStarted(fence));
        loop {
            match state.fences.get(&fence).copied() {
                Some(true) => break,
                Some(false) => {
                    let will_signal = state.pending.iter().any(|p| p.fence == Some(fence));
                    if !will_signal {
                        return Err(GraphicsError::ResourceMisuse(format!(
                            "wait on unsignaled {fence:?} with no pending submission"
                        )));
                    }
                    self.completed.wait(&mut state);
                }
                None => {
                    return Err(GraphicsError::ResourceMisuse(format!(
                        "wait on unknown {fence:?}"
                    )));
                }
            }
        }
        state.events.push(BackendEvent::FenceWaitFinished(fence));
        Ok(())
    }

    fn reset_fence(&self, fence: FenceHandle) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        if state.pending.iter().any(|p| p.fence == Some(fence)) {
            state
                .violations
                .push(format!("{fence:?} reset while its submission is pending"));
        }
        let signaled = state
            .fences
            .get_mut(&fence)
            .ok_or_else(|| GraphicsError::ResourceMisuse(format!("reset of unknown {fence:?}")))?;
        *signaled = false;
        state.events.push(BackendEvent::FenceReset(fence));
        Ok(())
    }

    fn is_fence_signaled(&self, fence: FenceHandle) -> GraphicsResult<bool> {
        self.state
            .lock()
            .fences
            .get(&fence)
            .copied()
            .ok_or_else(|| GraphicsError::ResourceMisuse(format!("query of unknown {fence:?}")))
    }

    fn create_semaphore(&self) -> GraphicsResult<SemaphoreHandle> {
        let mut state = self.state.lock();
        let semaphore = SemaphoreHandle::from_raw(state.next_raw());
        state.semaphores.insert(semaphore, false);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        let mut state = self.state.lock();
        if state.semaphores.remove(&semaphore).is_none() {
            state.violations.push(format!("unknown {semaphore:?} destroyed"));
        }
    }

    fn wait_idle(&self) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        state.events.push(BackendEvent::WaitIdle);
        while let Some(submission) = state.pending.pop_front() {
            state.complete(submission);
        }
        self.completed.notify_all();
        Ok(())
    }

    fn allocate_command_buffer(&self) -> GraphicsResult<CommandBufferHandle> {
        let mut state = self.state.lock();
        let command_buffer = CommandBufferHandle::from_raw(state.next_raw());
        state.command_buffers.insert(
            command_buffer,
            DummyCommandBuffer {
                state: CommandBufferState::Initial,
                commands: Vec::new(),
            },
        );
        Ok(command_buffer)
    }

    fn free_command_buffer(&self, command_buffer: CommandBufferHandle) {
        let mut state = self.state.lock();
        match state.command_buffers.remove(&command_buffer) {
            Some(cb) if cb.state == CommandBufferState::Pending => state
                .violations
                .push(format!("{command_buffer:?} freed while pending")),
            Some(_) => {}
            None => state
                .violations
                .push(format!("unknown {command_buffer:?} freed")),
        }
    }

    fn begin_command_buffer(&self, command_buffer: CommandBufferHandle) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let cb = state.command_buffers.get_mut(&command_buffer).ok_or_else(|| {
            GraphicsError::ResourceMisuse(format!("begin of unknown {command_buffer:?}"))
        })?;
        if cb.state == CommandBufferState::Pending {
            return Err(GraphicsError::ResourceMisuse(format!(
                "{command_buffer:?} re-recorded while the GPU is executing it"
            )));
        }
        cb.state = CommandBufferState::Recording;
        cb.commands.clear();
        state
            .events
            .push(BackendEvent::CommandBufferBegun(command_buffer));
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let cb = state.command_buffers.get_mut(&command_buffer).ok_or_else(|| {
            GraphicsError::ResourceMisuse(format!("end of unknown {command_buffer:?}"))
        })?;
        if cb.state != CommandBufferState::Recording {
            return Err(GraphicsError::ResourceMisuse(format!(
                "{command_buffer:?} ended while not recording"
            )));
        }
        cb.state = CommandBufferState::Executable;
        Ok(())
    }

    fn submit(&self, submission: &Submission) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let commands = {
            let cb = state
                .command_buffers
                .get_mut(&submission.command_buffer)
                .ok_or_else(|| {
                    GraphicsError::ResourceMisuse(format!(
                        "submit of unknown {:?}",
                        submission.command_buffer
                    ))
                })?;
            if cb.state != CommandBufferState::Executable {
                return Err(GraphicsError::ResourceMisuse(format!(
                    "{:?} submitted in state {:?}",
                    submission.command_buffer, cb.state
                )));
            }
            cb.state = CommandBufferState::Pending;
            cb.commands.clone()
        };
        if let Some(fence) = submission.signal_fence {
            if state.fences.get(&fence) != Some(&false) {
                state.violations.push(format!(
                    "submission signals {fence:?} which is not an unsignaled fence"
                ));
            }
        }
        if let Some(semaphore) = submission.wait_semaphore {
            state.consume_semaphore(semaphore, "submission");
        }
        // The signal operation is queued now; later waits are ordered on the GPU.
        if let Some(pending_signal) = submission
            .signal_semaphore
            .and_then(|semaphore| state.semaphores.get_mut(&semaphore))
        {
            *pending_signal = true;
        }

        state.submitted.push(SubmittedWork {
            command_buffer: submission.command_buffer,
            commands,
            wait_semaphore: submission.wait_semaphore,
            signal_semaphore: submission.signal_semaphore,
            fence: submission.signal_fence,
        });
        state.events.push(BackendEvent::Submitted {
            command_buffer: submission.command_buffer,
            fence: submission.signal_fence,
        });
        let pending = PendingSubmission {
            submitted_index: state.submitted.len() - 1,
            command_buffer: submission.command_buffer,
            fence: submission.signal_fence,
        };
        match state.completion {
            GpuCompletion::Immediate => {
                state.complete(pending);
                self.completed.notify_all();
            }
            GpuCompletion::Manual => state.pending.push_back(pending),
        }
        Ok(())
    }

    fn cmd_image_barrier(&self, command_buffer: CommandBufferHandle, barrier: &ImageBarrier) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::ImageBarrier(*barrier));
    }

    fn cmd_buffer_barrier(&self, command_buffer: CommandBufferHandle, barrier: &BufferBarrier) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::BufferBarrier(*barrier));
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::CopyBuffer { src, dst, size });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        image: ImageHandle,
        region: &BufferImageCopy,
    ) {
        self.state.lock().record(
            command_buffer,
            RecordedCommand::CopyBufferToImage {
                src,
                image,
                region: *region,
            },
        );
    }

    fn cmd_blit_image(&self, command_buffer: CommandBufferHandle, image: ImageHandle, blit: &MipBlit) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::BlitImage { image, blit: *blit });
    }

    fn cmd_begin_render_pass(&self, command_buffer: CommandBufferHandle, begin: &RenderPassBegin) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::BeginRenderPass(*begin));
    }

    fn cmd_end_render_pass(&self, command_buffer: CommandBufferHandle) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::EndRenderPass);
    }

    fn cmd_bind_program(&self, command_buffer: CommandBufferHandle, program: &DrawingProgram) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::BindProgram(program.pipeline()));
    }

    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: CommandBufferHandle,
        _program: &DrawingProgram,
        set: DescriptorSetHandle,
    ) {
        let mut state = self.state.lock();
        if !state.descriptor_sets.contains_key(&set) {
            state.violations.push(format!("unknown {set:?} bound"));
        }
        state.record(command_buffer, RecordedCommand::BindDescriptorSet(set));
    }

    fn cmd_push_constants(
        &self,
        command_buffer: CommandBufferHandle,
        _program: &DrawingProgram,
        data: &[u8],
    ) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::PushConstants(data.to_vec()));
    }

    fn cmd_bind_geometry(
        &self,
        command_buffer: CommandBufferHandle,
        vertex_buffer: BufferHandle,
        index_buffer: BufferHandle,
    ) {
        self.state.lock().record(
            command_buffer,
            RecordedCommand::BindGeometry {
                vertex_buffer,
                index_buffer,
            },
        );
    }

    fn cmd_set_viewport(&self, command_buffer: CommandBufferHandle, extent: Extent2d) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::SetViewport(extent));
    }

    fn cmd_set_scissor(&self, command_buffer: CommandBufferHandle, rect: ScissorRect) {
        self.state
            .lock()
            .record(command_buffer, RecordedCommand::SetScissor(rect));
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: CommandBufferHandle,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) {
        self.state.lock().record(
            command_buffer,
            RecordedCommand::DrawIndexed {
                index_count,
                first_index,
                vertex_offset,
            },
        );
    }

    fn allocate_descriptor_set(
        &self,
        _layout: DescriptorSetLayoutHandle,
    ) -> GraphicsResult<DescriptorSetHandle> {
        let mut state = self.state.lock();
        if let Some(limit) = state.descriptor_set_limit {
            if state.descriptor_sets.len() >= limit {
                return Err(GraphicsError::AllocationFailure(format!(
                    "descriptor pool exhausted ({limit} sets)"
                )));
            }
        }
        let set = DescriptorSetHandle::from_raw(state.next_raw());
        state.descriptor_sets.insert(set, None);
        Ok(set)
    }

    fn write_image_descriptor(
        &self,
        set: DescriptorSetHandle,
        sampler: SamplerHandle,
        view: ImageViewHandle,
    ) {
        let mut state = self.state.lock();
        if !state.samplers.contains_key(&sampler) || !state.image_views.contains_key(&view) {
            state.violations.push(format!(
                "{set:?} written with dead {sampler:?} or {view:?}"
            ));
        }
        match state.descriptor_sets.get_mut(&set) {
            Some(binding) => *binding = Some((sampler, view)),
            None => state.violations.push(format!("write to unknown {set:?}")),
        }
    }

    fn free_descriptor_set(&self, set: DescriptorSetHandle) {
        let mut state = self.state.lock();
        if state.descriptor_sets.remove(&set).is_none() {
            state.violations.push(format!("unknown {set:?} freed"));
        }
    }

    fn create_render_pass(
        &self,
        _format: crate::types::ImageFormat,
    ) -> GraphicsResult<RenderPassHandle> {
        let mut state = self.state.lock();
        let render_pass = RenderPassHandle::from_raw(state.next_raw());
        state.render_passes.insert(render_pass, ());
        Ok(render_pass)
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        let mut state = self.state.lock();
        if state.render_passes.remove(&render_pass).is_none() {
            state
                .violations
                .push(format!("unknown {render_pass:?} destroyed"));
        }
    }

    fn create_framebuffer(
        &self,
        render_pass: RenderPassHandle,
        view: ImageViewHandle,
        _extent: Extent2d,
    ) -> GraphicsResult<FramebufferHandle> {
        let mut state = self.state.lock();
        if !state.render_passes.contains_key(&render_pass) || !state.image_views.contains_key(&view)
        {
            return Err(GraphicsError::ResourceMisuse(
                "framebuffer created from dead render pass or view".to_string(),
            ));
        }
        let framebuffer = FramebufferHandle::from_raw(state.next_raw());
        state.framebuffers.insert(framebuffer, view);
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        let mut state = self.state.lock();
        if state.framebuffers.remove(&framebuffer).is_none() {
            state
                .violations
                .push(format!("unknown {framebuffer:?} destroyed"));
        }
    }

    fn create_swapchain(
        &self,
        descriptor: &SwapchainDescriptor,
    ) -> GraphicsResult<SwapchainImages> {
        let mut state = self.state.lock();
        if !state.surfaces.contains_key(&descriptor.surface) {
            return Err(GraphicsError::InitializationFailed(format!(
                "unknown {:?}",
                descriptor.surface
            )));
        }
        if descriptor.extent.is_empty() {
            return Err(GraphicsError::InvalidParameter(
                "swapchain extent must not be empty".to_string(),
            ));
        }
        if let Some(old) = descriptor.old_swapchain {
            if !state.swapchains.contains_key(&old) {
                state
                    .violations
                    .push(format!("old swapchain {old:?} is not alive"));
            }
        }
        let count = state
            .swapchain_image_count
            .max(descriptor.min_image_count)
            .max(1);
        let swapchain = SwapchainHandle::from_raw(state.next_raw());
        let images = (0..count)
            .map(|_| ImageHandle::from_raw(state.next_raw()))
            .collect::<Vec<_>>();
        state.swapchains.insert(
            swapchain,
            DummySwapchain {
                surface: descriptor.surface,
                images: images.clone(),
                next_image: 0,
            },
        );
        state.swapchains_created += 1;
        state.events.push(BackendEvent::SwapchainCreated(swapchain));
        Ok(SwapchainImages {
            swapchain,
            images,
            format: descriptor.format,
            extent: descriptor.extent,
        })
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        let mut state = self.state.lock();
        match state.swapchains.remove(&swapchain) {
            Some(removed) => {
                let views_left = state
                    .image_views
                    .values()
                    .any(|v| removed.images.contains(&v.image));
                if views_left {
                    state.violations.push(format!(
                        "{swapchain:?} destroyed while views of its images are alive"
                    ));
                }
                state
                    .events
                    .push(BackendEvent::SwapchainDestroyed(swapchain));
            }
            None => state
                .violations
                .push(format!("unknown {swapchain:?} destroyed")),
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
    ) -> GraphicsResult<AcquireOutcome> {
        let mut state = self.state.lock();
        let scripted = state.acquire_script.pop_front();
        if let Some(ScriptedOutcome::Fail(e)) = scripted {
            return Err(e);
        }
        if scripted == Some(ScriptedOutcome::Stale) {
            state.events.push(BackendEvent::AcquireStale(swapchain));
            return Ok(AcquireOutcome::Stale);
        }
        let chain = state.swapchains.get_mut(&swapchain).ok_or_else(|| {
            GraphicsError::ResourceMisuse(format!("acquire from unknown {swapchain:?}"))
        })?;
        let image_index = chain.next_image;
        chain.next_image = (chain.next_image + 1) % chain.images.len() as u32;
        match state.semaphores.get_mut(&signal) {
            Some(signaled) if *signaled => state.violations.push(format!(
                "acquire signals {signal:?} which already has a pending signal"
            )),
            Some(signaled) => *signaled = true,
            None => state
                .violations
                .push(format!("acquire signals unknown {signal:?}")),
        }
        state.events.push(BackendEvent::Acquired {
            swapchain,
            image_index,
        });
        Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal: scripted == Some(ScriptedOutcome::Suboptimal),
        })
    }

    fn present(
        &self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> GraphicsResult<PresentOutcome> {
        let mut state = self.state.lock();
        if !state.swapchains.contains_key(&swapchain) {
            return Err(GraphicsError::ResourceMisuse(format!(
                "present to unknown {swapchain:?}"
            )));
        }
        state.consume_semaphore(wait, "present");
        match state.present_script.pop_front() {
            Some(ScriptedOutcome::Fail(e)) => Err(e),
            Some(ScriptedOutcome::Stale) => {
                state.events.push(BackendEvent::PresentStale(swapchain));
                Ok(PresentOutcome::Stale)
            }
            scripted => {
                state.presents += 1;
                state.events.push(BackendEvent::Presented {
                    swapchain,
                    image_index,
                });
                if scripted == Some(ScriptedOutcome::Suboptimal) {
                    Ok(PresentOutcome::Suboptimal)
                } else {
                    Ok(PresentOutcome::Presented)
                }
            }
        }
    }

    fn destroy_surface(&self, surface: SurfaceHandle) {
        let mut state = self.state.lock();
        if state.swapchains.values().any(|s| s.surface == surface) {
            state
                .violations
                .push(format!("{surface:?} destroyed before its swapchain"));
        }
        if state.surfaces.remove(&surface).is_none() {
            state.violations.push(format!("unknown {surface:?} destroyed"));
        }
    }
}
