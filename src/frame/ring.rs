//! Ring of in-flight frames.
//!
//! ```text
//!   slots (one per swapchain image)         semaphore pairs (slots + 1)
//!   ┌────────┬────────┬────────┐            ┌────┬────┬────┬────┐
//!   │ cmd    │ cmd    │ cmd    │            │ A0 │ A1 │ A2 │ A3 │  image acquired
//!   │ fence  │ fence  │ fence  │            │ R0 │ R1 │ R2 │ R3 │  render complete
//!   │ geom   │ geom   │ geom   │            └────┴────┴────┴────┘
//!   └────────┴────────┴────────┘                  ▲ semaphore_index
//!       ▲ frame_index
//! ```
//!
//! Slot lifecycle: `Idle -> Acquired -> Recording -> Submitted -> (fence) -> Idle`.
//! A slot's command buffer and geometry are only touched after its fence
//! has been waited on. The semaphore ring is one longer than the slot ring
//! and advances independently, so the acquire semaphore handed to the
//! presentation engine is never one it may still be holding.

use std::sync::Arc;

use crate::backend::{CommandBufferHandle, FenceHandle, GpuBackend, SemaphoreHandle, Submission};
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::{Buffer, DynamicGeometryBuffer};
use crate::types::PipelineStages;

/// State of a ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    /// GPU work finished (or never submitted); resources are free.
    #[default]
    Idle,
    /// Selected for the current frame, waiting on the fence.
    Acquired,
    /// Command buffer is being recorded.
    Recording,
    /// Submitted; the GPU may still be executing.
    Submitted,
}

/// Image-acquired and render-complete semaphores used by one frame.
pub struct SemaphorePair {
    backend: Arc<dyn GpuBackend>,
    image_acquired: SemaphoreHandle,
    render_complete: SemaphoreHandle,
}

impl SemaphorePair {
    fn new(backend: &Arc<dyn GpuBackend>) -> GraphicsResult<Self> {
        let image_acquired = backend.create_semaphore()?;
        let render_complete = match backend.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                backend.destroy_semaphore(image_acquired);
                return Err(e);
            }
        };
        Ok(Self {
            backend: Arc::clone(backend),
            image_acquired,
            render_complete,
        })
    }

    pub fn image_acquired(&self) -> SemaphoreHandle {
        self.image_acquired
    }

    pub fn render_complete(&self) -> SemaphoreHandle {
        self.render_complete
    }
}

impl Drop for SemaphorePair {
    fn drop(&mut self) {
        self.backend.destroy_semaphore(self.image_acquired);
        self.backend.destroy_semaphore(self.render_complete);
    }
}

/// One frame in flight: command buffer, completion fence and geometry.
pub struct FrameSlot {
    retired: Vec<Buffer>,
    geometry: DynamicGeometryBuffer,
    backend: Arc<dyn GpuBackend>,
    command_buffer: CommandBufferHandle,
    fence: FenceHandle,
    state: SlotState,
}

impl FrameSlot {
    fn new(
        backend: &Arc<dyn GpuBackend>,
        vertex_capacity: u64,
        index_capacity: u64,
    ) -> GraphicsResult<Self> {
        let geometry = DynamicGeometryBuffer::new(backend, vertex_capacity, index_capacity)?;
        // Created signaled so the first wait returns immediately.
        let fence = backend.create_fence(true)?;
        let command_buffer = match backend.allocate_command_buffer() {
            Ok(cmd) => cmd,
            Err(e) => {
                backend.destroy_fence(fence);
                return Err(e);
            }
        };
        Ok(Self {
            retired: Vec::new(),
            geometry,
            backend: Arc::clone(backend),
            command_buffer,
            fence,
            state: SlotState::Idle,
        })
    }

    pub fn command_buffer(&self) -> CommandBufferHandle {
        self.command_buffer
    }

    pub fn fence(&self) -> FenceHandle {
        self.fence
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn geometry(&self) -> &DynamicGeometryBuffer {
        &self.geometry
    }

    /// Mutable geometry access, only while the slot is recording.
    pub fn geometry_mut(&mut self) -> GraphicsResult<&mut DynamicGeometryBuffer> {
        if self.state != SlotState::Recording {
            return Err(GraphicsError::ResourceMisuse(format!(
                "geometry of a {:?} slot may still be read by the GPU",
                self.state
            )));
        }
        Ok(&mut self.geometry)
    }

    /// Upload vertex and index bytes for this frame.
    pub fn upload_geometry(&mut self, vertices: &[u8], indices: &[u8]) -> GraphicsResult<()> {
        let command_buffer = self.command_buffer;
        let mut staged = Vec::new();
        self.geometry_mut()?
            .upload(command_buffer, vertices, indices, &mut staged)?;
        self.retired.append(&mut staged);
        Ok(())
    }

    /// Keep a buffer alive until this slot's fence next signals.
    pub fn retire(&mut self, buffer: Buffer) {
        self.retired.push(buffer);
    }

    /// Number of buffers waiting for this slot's fence.
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Block until the GPU has finished this slot's last submission, then reclaim.
    fn wait(&mut self) -> GraphicsResult<()> {
        self.state = SlotState::Acquired;
        self.backend.wait_fence(self.fence)?;
        if !self.retired.is_empty() {
            log::trace!("Releasing {} retired buffers", self.retired.len());
            self.retired.clear();
        }
        self.state = SlotState::Idle;
        Ok(())
    }

    fn begin(&mut self) -> GraphicsResult<()> {
        self.backend.begin_command_buffer(self.command_buffer)?;
        self.state = SlotState::Recording;
        Ok(())
    }

    fn submit(
        &mut self,
        wait_semaphore: SemaphoreHandle,
        signal_semaphore: SemaphoreHandle,
    ) -> GraphicsResult<()> {
        if self.state != SlotState::Recording {
            return Err(GraphicsError::ResourceMisuse(format!(
                "submit of a {:?} slot",
                self.state
            )));
        }
        self.backend.end_command_buffer(self.command_buffer)?;
        // Reset only now so a frame abandoned mid-recording keeps a signaled fence.
        self.backend.reset_fence(self.fence)?;
        self.backend.submit(&Submission {
            command_buffer: self.command_buffer,
            wait_semaphore: Some(wait_semaphore),
            wait_stage: PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: Some(signal_semaphore),
            signal_fence: Some(self.fence),
        })?;
        self.state = SlotState::Submitted;
        Ok(())
    }
}

impl std::fmt::Debug for FrameSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSlot")
            .field("command_buffer", &self.command_buffer)
            .field("fence", &self.fence)
            .field("state", &self.state)
            .field("geometry", &self.geometry)
            .field("retired", &self.retired.len())
            .finish()
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        if self.state == SlotState::Submitted {
            if let Err(e) = self.backend.wait_fence(self.fence) {
                log::error!("Failed to wait for frame fence before release: {}", e);
            }
        }
        self.retired.clear();
        self.backend.free_command_buffer(self.command_buffer);
        self.backend.destroy_fence(self.fence);
    }
}

/// Fixed-size ring of frame slots plus an independent semaphore ring.
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    semaphores: Vec<SemaphorePair>,
    frame_index: usize,
    semaphore_index: usize,
}

impl FrameRing {
    /// Create a ring with `slot_count` slots and `slot_count + 1` semaphore pairs.
    pub fn new(
        backend: &Arc<dyn GpuBackend>,
        slot_count: usize,
        vertex_capacity: u64,
        index_capacity: u64,
    ) -> GraphicsResult<Self> {
        if slot_count == 0 {
            return Err(GraphicsError::InvalidParameter(
                "frame ring needs at least one slot".to_string(),
            ));
        }
        let slots = (0..slot_count)
            .map(|_| FrameSlot::new(backend, vertex_capacity, index_capacity))
            .collect::<GraphicsResult<Vec<_>>>()?;
        let semaphores = (0..slot_count + 1)
            .map(|_| SemaphorePair::new(backend))
            .collect::<GraphicsResult<Vec<_>>>()?;
        log::debug!(
            "Created frame ring with {} slots and {} semaphore pairs",
            slots.len(),
            semaphores.len()
        );
        Ok(Self {
            slots,
            semaphores,
            frame_index: 0,
            semaphore_index: 0,
        })
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn semaphore_count(&self) -> usize {
        self.semaphores.len()
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn semaphore_index(&self) -> usize {
        self.semaphore_index
    }

    /// Semaphores for the frame being prepared.
    pub fn current_semaphores(&self) -> &SemaphorePair {
        &self.semaphores[self.semaphore_index]
    }

    /// The slot selected for the frame being prepared.
    pub fn current_slot(&self) -> &FrameSlot {
        &self.slots[self.frame_index]
    }

    pub fn current_slot_mut(&mut self) -> &mut FrameSlot {
        &mut self.slots[self.frame_index]
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    /// Fences of slots the GPU may still be executing.
    pub fn in_flight_fences(&self) -> Vec<FenceHandle> {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Submitted)
            .map(|s| s.fence)
            .collect()
    }

    /// Wait for the current slot's fence and start recording its command buffer.
    ///
    /// This is the only steady-state point where the CPU waits for the GPU.
    pub fn begin_frame(&mut self) -> GraphicsResult<&mut FrameSlot> {
        let slot = &mut self.slots[self.frame_index];
        slot.wait()?;
        slot.begin()?;
        log::trace!(
            "Recording frame slot {} (semaphore pair {})",
            self.frame_index,
            self.semaphore_index
        );
        Ok(slot)
    }

    /// End recording and submit the current slot, waiting on the acquire
    /// semaphore and signaling render-complete plus the slot fence.
    pub fn submit_frame(&mut self) -> GraphicsResult<()> {
        let pair = &self.semaphores[self.semaphore_index];
        let (wait, signal) = (pair.image_acquired, pair.render_complete);
        self.slots[self.frame_index].submit(wait, signal)
    }

    /// Move to the next slot and semaphore pair.
    pub fn advance(&mut self) {
        self.frame_index = (self.frame_index + 1) % self.slots.len();
        self.semaphore_index = (self.semaphore_index + 1) % self.semaphores.len();
    }

    /// Block until every slot's work has completed and release retired buffers.
    pub fn wait_all(&mut self) -> GraphicsResult<()> {
        for slot in &mut self.slots {
            if slot.state == SlotState::Submitted {
                slot.wait()?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for FrameRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRing")
            .field("slots", &self.slots)
            .field("semaphores", &self.semaphores.len())
            .field("frame_index", &self.frame_index)
            .field("semaphore_index", &self.semaphore_index)
            .finish()
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::dummy::{BackendEvent, DummyBackend, GpuCompletion};
    use crate::backend::{AcquireOutcome, SwapchainDescriptor, SwapchainHandle};
    use crate::types::{Extent2d, ImageFormat, PresentMode};

    fn setup(
        completion: GpuCompletion,
    ) -> (Arc<DummyBackend>, Arc<dyn GpuBackend>, SwapchainHandle) {
        let dummy = Arc::new(DummyBackend::with_completion(completion));
        let backend: Arc<dyn GpuBackend> = dummy.clone();
        let surface = dummy.create_surface();
        let swapchain = backend
            .create_swapchain(&SwapchainDescriptor {
                surface,
                extent: Extent2d::new(64, 64),
                format: ImageFormat::Bgra8Unorm,
                present_mode: PresentMode::Fifo,
                min_image_count: 2,
                old_swapchain: None,
            })
            .unwrap()
            .swapchain;
        (dummy, backend, swapchain)
    }

    fn run_frame(backend: &Arc<dyn GpuBackend>, ring: &mut FrameRing, swapchain: SwapchainHandle) {
        let acquire = ring.current_semaphores().image_acquired();
        let AcquireOutcome::Acquired { image_index, .. } =
            backend.acquire_next_image(swapchain, acquire).unwrap()
        else {
            panic!("acquire failed");
        };
        ring.begin_frame().unwrap();
        ring.submit_frame().unwrap();
        let render_complete = ring.current_semaphores().render_complete();
        backend
            .present(swapchain, image_index, render_complete)
            .unwrap();
        ring.advance();
    }

    #[test]
    fn test_semaphore_ring_is_one_longer() {
        let (_dummy, backend, _swapchain) = setup(GpuCompletion::Immediate);
        let ring = FrameRing::new(&backend, 3, 256, 256).unwrap();
        assert_eq!(ring.slot_count(), 3);
        assert_eq!(ring.semaphore_count(), 4);
    }

    #[test]
    fn test_indices_advance_independently() {
        let (dummy, backend, swapchain) = setup(GpuCompletion::Immediate);
        let mut ring = FrameRing::new(&backend, 2, 256, 256).unwrap();

        for _ in 0..5 {
            run_frame(&backend, &mut ring, swapchain);
        }

        assert_eq!(ring.frame_index(), 5 % 2);
        assert_eq!(ring.semaphore_index(), 5 % 3);
        assert!(dummy.violations().is_empty(), "{:?}", dummy.violations());
    }

    #[test]
    fn test_slot_rerecorded_only_after_fence() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (dummy, backend, swapchain) = setup(GpuCompletion::Manual);
        let mut ring = FrameRing::new(&backend, 2, 256, 256).unwrap();
        let first_cmd = ring.current_slot().command_buffer();
        let first_fence = ring.current_slot().fence();

        run_frame(&backend, &mut ring, swapchain);
        run_frame(&backend, &mut ring, swapchain);
        assert_eq!(dummy.pending_submissions(), 2);

        let gpu = Arc::clone(&dummy);
        let completer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            gpu.complete_next_submission();
        });
        run_frame(&backend, &mut ring, swapchain);
        completer.join().unwrap();

        let events = dummy.events();
        let signaled = events
            .iter()
            .position(|e| *e == BackendEvent::FenceSignaled(first_fence))
            .unwrap();
        let rerecorded = events
            .iter()
            .rposition(|e| *e == BackendEvent::CommandBufferBegun(first_cmd))
            .unwrap();
        assert!(signaled < rerecorded);
        assert!(dummy.violations().is_empty(), "{:?}", dummy.violations());
    }

    #[test]
    fn test_retired_buffers_released_after_fence() {
        let (dummy, backend, _swapchain) = setup(GpuCompletion::Manual);
        let mut ring = FrameRing::new(&backend, 1, 0, 0).unwrap();

        let slot = ring.begin_frame().unwrap();
        slot.upload_geometry(&[0u8; 64], &[0u8; 12]).unwrap();
        assert_eq!(slot.retired_count(), 2);
        backend.end_command_buffer(slot.command_buffer()).unwrap();
        backend.reset_fence(slot.fence()).unwrap();
        backend
            .submit(&Submission {
                command_buffer: slot.command_buffer(),
                wait_semaphore: None,
                wait_stage: PipelineStages::TRANSFER,
                signal_semaphore: None,
                signal_fence: Some(slot.fence()),
            })
            .unwrap();
        slot.state = SlotState::Submitted;
        let buffers_in_flight = dummy.live_handles().buffers;

        dummy.complete_all_submissions();
        ring.wait_all().unwrap();

        assert_eq!(ring.current_slot().retired_count(), 0);
        assert_eq!(dummy.live_handles().buffers, buffers_in_flight - 2);
        assert!(dummy.violations().is_empty(), "{:?}", dummy.violations());
    }

    #[test]
    fn test_geometry_locked_outside_recording() {
        let (_dummy, backend, _swapchain) = setup(GpuCompletion::Immediate);
        let mut ring = FrameRing::new(&backend, 2, 256, 256).unwrap();
        assert!(matches!(
            ring.current_slot_mut().geometry_mut(),
            Err(GraphicsError::ResourceMisuse(_))
        ));
        assert!(ring.begin_frame().unwrap().geometry_mut().is_ok());
    }
}
