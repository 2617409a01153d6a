//! Viewports: one swapchain, framebuffer set and frame ring per OS window.
//!
//! Contexts live in a registry keyed by [`ViewportId`]. The main viewport is
//! created with the manager and only destroyed by shutdown.
//!
//! A resize (requested, or triggered by a stale swapchain) waits for the
//! device to go idle, tears down the frame ring, framebuffers and views,
//! then builds a new swapchain from the old one. The surface survives.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::{
    AcquireOutcome, FramebufferHandle, GpuBackend, PresentOutcome, RenderPassHandle,
    SurfaceHandle, SwapchainDescriptor, SwapchainHandle,
};
use crate::config::RendererConfig;
use crate::error::{GraphicsError, GraphicsResult};
use crate::frame::{FrameRing, FrameSlot};
use crate::resources::{GpuImage, ImageView};
use crate::types::{Extent2d, ImageFormat};

/// Identifies a viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewportId(u64);

impl ViewportId {
    /// The main window's viewport.
    pub const MAIN: Self = Self(0);

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

/// Opaque window identifier from the windowing system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(u64);

impl WindowHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

/// Creates a presentation surface for a window.
pub type SurfaceFactory = Box<dyn FnMut(WindowHandle) -> GraphicsResult<SurfaceHandle> + Send>;

/// Why a frame was not rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The window has zero area.
    Minimized,
    /// The swapchain was out of date; it has been rebuilt.
    SurfaceStale,
    /// There was nothing to draw.
    Empty,
}

/// Result of rendering a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and queued for presentation.
    Presented {
        image_index: u32,
        /// The swapchain no longer matched the surface and has been rebuilt.
        suboptimal: bool,
    },
    /// The frame was not shown.
    Skipped(SkipReason),
}

/// Everything a frame recorder needs, borrowed from the viewport.
pub struct FrameContext<'a> {
    pub viewport: ViewportId,
    /// The ring slot, in `Recording` state.
    pub slot: &'a mut FrameSlot,
    /// Swapchain image being rendered.
    pub target: &'a mut GpuImage,
    pub framebuffer: FramebufferHandle,
    pub render_pass: RenderPassHandle,
    pub extent: Extent2d,
    pub image_index: u32,
}

struct Framebuffer {
    backend: Arc<dyn GpuBackend>,
    handle: FramebufferHandle,
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        self.backend.destroy_framebuffer(self.handle);
    }
}

struct Swapchain {
    backend: Arc<dyn GpuBackend>,
    handle: SwapchainHandle,
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.backend.destroy_swapchain(self.handle);
    }
}

/// Everything rebuilt on resize. Field order is teardown order.
struct SwapchainTargets {
    ring: FrameRing,
    framebuffers: Vec<Framebuffer>,
    views: Vec<ImageView>,
    images: Vec<GpuImage>,
    swapchain: Swapchain,
    extent: Extent2d,
}

impl SwapchainTargets {
    fn build(
        backend: &Arc<dyn GpuBackend>,
        config: &RendererConfig,
        render_pass: RenderPassHandle,
        surface: SurfaceHandle,
        extent: Extent2d,
        old: Option<SwapchainHandle>,
    ) -> GraphicsResult<Self> {
        let created = backend.create_swapchain(&SwapchainDescriptor {
            surface,
            extent,
            format: config.color_format,
            present_mode: config.present_mode,
            min_image_count: config.min_image_count,
            old_swapchain: old,
        })?;
        let swapchain = Swapchain {
            backend: Arc::clone(backend),
            handle: created.swapchain,
        };
        if created.format != config.color_format {
            return Err(GraphicsError::FeatureNotSupported(format!(
                "surface provided {:?} instead of {:?}",
                created.format, config.color_format
            )));
        }

        let images: Vec<GpuImage> = created
            .images
            .iter()
            .map(|&image| GpuImage::from_swapchain(backend, image, created.extent, created.format))
            .collect();
        let views = images
            .iter()
            .map(|image| ImageView::whole(backend, image))
            .collect::<GraphicsResult<Vec<_>>>()?;
        let framebuffers = views
            .iter()
            .map(|view| {
                backend
                    .create_framebuffer(render_pass, view.handle(), created.extent)
                    .map(|handle| Framebuffer {
                        backend: Arc::clone(backend),
                        handle,
                    })
            })
            .collect::<GraphicsResult<Vec<_>>>()?;
        let ring = FrameRing::new(
            backend,
            images.len(),
            config.initial_vertex_capacity,
            config.initial_index_capacity,
        )?;

        log::info!(
            "Created swapchain {:?}: {}x{}, {} images",
            created.swapchain,
            created.extent.width,
            created.extent.height,
            images.len()
        );
        Ok(Self {
            ring,
            framebuffers,
            views,
            images,
            swapchain,
            extent: created.extent,
        })
    }

    /// Release everything but the swapchain, which is returned so it can be
    /// handed to its replacement.
    fn into_swapchain(self) -> Swapchain {
        let Self {
            ring,
            framebuffers,
            views,
            images,
            swapchain,
            ..
        } = self;
        drop(ring);
        drop(framebuffers);
        drop(views);
        drop(images);
        swapchain
    }
}

/// Per-window rendering state.
pub struct ViewportContext {
    id: ViewportId,
    window: WindowHandle,
    size: Extent2d,
    targets: Option<SwapchainTargets>,
    submitted_frames: u64,
    backend: Arc<dyn GpuBackend>,
    surface: SurfaceHandle,
}

impl ViewportContext {
    pub fn id(&self) -> ViewportId {
        self.id
    }

    pub fn window(&self) -> WindowHandle {
        self.window
    }

    pub fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    /// Size requested for the window.
    pub fn size(&self) -> Extent2d {
        self.size
    }

    /// Whether the window has zero area and no swapchain.
    pub fn is_minimized(&self) -> bool {
        self.targets.is_none()
    }

    /// Actual swapchain extent.
    pub fn extent(&self) -> Option<Extent2d> {
        self.targets.as_ref().map(|t| t.extent)
    }

    pub fn swapchain(&self) -> Option<SwapchainHandle> {
        self.targets.as_ref().map(|t| t.swapchain.handle)
    }

    pub fn image_count(&self) -> usize {
        self.targets.as_ref().map_or(0, |t| t.images.len())
    }

    /// Frames submitted to the GPU over the viewport's lifetime.
    pub fn submitted_frames(&self) -> u64 {
        self.submitted_frames
    }

    pub fn frame_ring(&self) -> Option<&FrameRing> {
        self.targets.as_ref().map(|t| &t.ring)
    }

    /// Layout of a swapchain image as of the last recorded frame.
    pub fn image_layout(&self, image_index: u32) -> Option<crate::types::ImageLayout> {
        self.targets
            .as_ref()?
            .images
            .get(image_index as usize)?
            .layout()
    }
}

impl std::fmt::Debug for ViewportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewportContext")
            .field("id", &self.id)
            .field("window", &self.window)
            .field("size", &self.size)
            .field("surface", &self.surface)
            .field("swapchain", &self.swapchain())
            .finish()
    }
}

impl Drop for ViewportContext {
    fn drop(&mut self) {
        self.targets = None;
        self.backend.destroy_surface(self.surface);
    }
}

/// Registry of viewports and owner of their swapchain lifecycles.
pub struct ViewportManager {
    backend: Arc<dyn GpuBackend>,
    config: RendererConfig,
    render_pass: RenderPassHandle,
    surface_factory: SurfaceFactory,
    contexts: BTreeMap<ViewportId, ViewportContext>,
    next_id: u64,
    idle_point: bool,
}

impl ViewportManager {
    /// Create the manager and the main viewport.
    pub fn new(
        backend: &Arc<dyn GpuBackend>,
        config: RendererConfig,
        render_pass: RenderPassHandle,
        mut surface_factory: SurfaceFactory,
        main_window: WindowHandle,
        main_size: Extent2d,
    ) -> GraphicsResult<Self> {
        let surface = surface_factory(main_window)?;
        let mut manager = Self {
            backend: Arc::clone(backend),
            config,
            render_pass,
            surface_factory,
            contexts: BTreeMap::new(),
            next_id: 1,
            idle_point: false,
        };
        manager.insert_context(ViewportId::MAIN, main_window, surface, main_size)?;
        Ok(manager)
    }

    fn insert_context(
        &mut self,
        id: ViewportId,
        window: WindowHandle,
        surface: SurfaceHandle,
        size: Extent2d,
    ) -> GraphicsResult<()> {
        let mut context = ViewportContext {
            id,
            window,
            size,
            targets: None,
            submitted_frames: 0,
            backend: Arc::clone(&self.backend),
            surface,
        };
        if !size.is_empty() {
            context.targets = Some(SwapchainTargets::build(
                &self.backend,
                &self.config,
                self.render_pass,
                surface,
                size,
                None,
            )?);
        }
        log::info!(
            "Created viewport {:?} for window {:?} ({}x{})",
            id,
            window,
            size.width,
            size.height
        );
        self.contexts.insert(id, context);
        Ok(())
    }

    /// Open a viewport for a new window.
    pub fn create_window(
        &mut self,
        window: WindowHandle,
        size: Extent2d,
    ) -> GraphicsResult<ViewportId> {
        let surface = (self.surface_factory)(window)?;
        let id = ViewportId(self.next_id);
        self.next_id += 1;
        self.insert_context(id, window, surface, size)?;
        Ok(id)
    }

    /// Rebuild a viewport's swapchain at `size`. A zero-area size minimizes it.
    pub fn resize(&mut self, id: ViewportId, size: Extent2d) -> GraphicsResult<()> {
        if !self.contexts.contains_key(&id) {
            return Err(GraphicsError::InvalidParameter(format!(
                "unknown viewport {id:?}"
            )));
        }
        self.wait_idle()?;

        let backend = Arc::clone(&self.backend);
        let Some(context) = self.contexts.get_mut(&id) else {
            return Ok(());
        };
        log::debug!(
            "Resizing viewport {:?} from {}x{} to {}x{}",
            id,
            context.size.width,
            context.size.height,
            size.width,
            size.height
        );
        context.size = size;
        let old = context.targets.take().map(SwapchainTargets::into_swapchain);
        if size.is_empty() {
            log::debug!("Viewport {:?} minimized", id);
            return Ok(());
        }
        let built = SwapchainTargets::build(
            &backend,
            &self.config,
            self.render_pass,
            context.surface,
            size,
            old.as_ref().map(|s| s.handle),
        );
        drop(old);
        match built {
            Ok(targets) => {
                context.targets = Some(targets);
                Ok(())
            }
            Err(GraphicsError::SurfaceStale) => {
                // The surface has no area yet; retry on the next resize.
                log::debug!("Surface of viewport {:?} has zero extent", id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Tear down a viewport and its surface.
    pub fn destroy_window(&mut self, id: ViewportId) -> GraphicsResult<()> {
        if id == ViewportId::MAIN {
            return Err(GraphicsError::InvalidParameter(
                "the main viewport is destroyed only at shutdown".to_string(),
            ));
        }
        if !self.contexts.contains_key(&id) {
            return Err(GraphicsError::InvalidParameter(format!(
                "unknown viewport {id:?}"
            )));
        }
        self.wait_idle()?;
        self.contexts.remove(&id);
        log::info!("Destroyed viewport {:?}", id);
        Ok(())
    }

    /// Render one frame of a viewport.
    ///
    /// `record` is called with the slot in `Recording` state after its fence
    /// has been waited on. A stale swapchain at acquire skips the frame
    /// without submitting; a stale or suboptimal one at present is rebuilt
    /// after presenting. A frame that fails between acquire and submit
    /// rebuilds the swapchain before the error is returned.
    pub fn render_frame<F>(&mut self, id: ViewportId, record: F) -> GraphicsResult<FrameOutcome>
    where
        F: FnOnce(&mut FrameContext<'_>) -> GraphicsResult<()>,
    {
        let render_pass = self.render_pass;
        let context = self.contexts.get_mut(&id).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown viewport {id:?}"))
        })?;
        let size = context.size;
        let Some(targets) = context.targets.as_mut() else {
            return Ok(FrameOutcome::Skipped(SkipReason::Minimized));
        };

        let swapchain = targets.swapchain.handle;
        let acquire_semaphore = targets.ring.current_semaphores().image_acquired();
        let (image_index, acquire_suboptimal) =
            match self.backend.acquire_next_image(swapchain, acquire_semaphore)? {
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal,
                } => (image_index, suboptimal),
                AcquireOutcome::Stale => {
                    log::warn!("Swapchain of viewport {:?} is stale, skipping frame", id);
                    self.resize(id, size)?;
                    return Ok(FrameOutcome::Skipped(SkipReason::SurfaceStale));
                }
            };

        let framebuffer = targets
            .framebuffers
            .get(image_index as usize)
            .map(|fb| fb.handle)
            .ok_or_else(|| {
                GraphicsError::Internal(format!("acquired image {image_index} out of range"))
            })?;
        let extent = targets.extent;
        let recorded = targets.ring.begin_frame().and_then(|slot| {
            record(&mut FrameContext {
                viewport: id,
                slot,
                target: &mut targets.images[image_index as usize],
                framebuffer,
                render_pass,
                extent,
                image_index,
            })
        });
        if let Err(e) = recorded.and_then(|()| targets.ring.submit_frame()) {
            // The acquired image and its semaphore signal cannot be handed
            // back, so the swapchain and ring are rebuilt around them.
            log::error!("Frame of viewport {:?} abandoned after acquire: {}", id, e);
            if let Err(rebuild) = self.resize(id, size) {
                log::error!("Failed to rebuild viewport {:?}: {}", id, rebuild);
            }
            return Err(e);
        }
        context.submitted_frames += 1;

        let render_complete = targets.ring.current_semaphores().render_complete();
        let presented = self
            .backend
            .present(swapchain, image_index, render_complete)?;
        targets.ring.advance();
        log::trace!("Viewport {:?} presented image {}", id, image_index);

        match presented {
            PresentOutcome::Stale => {
                log::warn!("Swapchain of viewport {:?} went stale at present", id);
                self.resize(id, size)?;
                Ok(FrameOutcome::Skipped(SkipReason::SurfaceStale))
            }
            PresentOutcome::Suboptimal => {
                self.resize(id, size)?;
                Ok(FrameOutcome::Presented {
                    image_index,
                    suboptimal: true,
                })
            }
            PresentOutcome::Presented if acquire_suboptimal => {
                self.resize(id, size)?;
                Ok(FrameOutcome::Presented {
                    image_index,
                    suboptimal: true,
                })
            }
            PresentOutcome::Presented => Ok(FrameOutcome::Presented {
                image_index,
                suboptimal: false,
            }),
        }
    }

    /// Fences of frames any viewport may still have in flight.
    pub fn in_flight_fences(&self) -> Vec<crate::backend::FenceHandle> {
        self.contexts
            .values()
            .filter_map(|c| c.targets.as_ref())
            .flat_map(|t| t.ring.in_flight_fences())
            .collect()
    }

    /// Whether the device went idle since the last call.
    pub fn take_idle_point(&mut self) -> bool {
        std::mem::take(&mut self.idle_point)
    }

    fn wait_idle(&mut self) -> GraphicsResult<()> {
        self.backend.wait_idle()?;
        for targets in self.contexts.values_mut().filter_map(|c| c.targets.as_mut()) {
            targets.ring.wait_all()?;
        }
        self.idle_point = true;
        Ok(())
    }

    pub fn get(&self, id: ViewportId) -> Option<&ViewportContext> {
        self.contexts.get(&id)
    }

    pub fn ids(&self) -> Vec<ViewportId> {
        self.contexts.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn color_format(&self) -> ImageFormat {
        self.config.color_format
    }

    /// Idle-wait and destroy every viewport, the main one last.
    pub fn shutdown(&mut self) -> GraphicsResult<()> {
        if self.contexts.is_empty() {
            return Ok(());
        }
        self.wait_idle()?;
        let secondary: Vec<_> = self
            .contexts
            .keys()
            .copied()
            .filter(|id| *id != ViewportId::MAIN)
            .collect();
        for id in secondary {
            self.contexts.remove(&id);
        }
        self.contexts.remove(&ViewportId::MAIN);
        log::info!("Destroyed all viewports");
        Ok(())
    }
}

impl std::fmt::Debug for ViewportManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewportManager")
            .field("contexts", &self.contexts)
            .field("render_pass", &self.render_pass)
            .finish()
    }
}

impl Drop for ViewportManager {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Failed to shut down viewports: {}", e);
        }
    }
}
