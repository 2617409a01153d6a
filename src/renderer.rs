//! Frame rendering facade.
//!
//! Per frame and viewport:
//!
//! 1. acquire a swapchain image and wait for the ring slot's fence
//! 2. record queued texture uploads (with mip chains)
//! 3. upload the frame's vertices and indices into the slot's geometry
//! 4. record the render pass with one draw per visible command
//! 5. submit and present
//!
//! Steps 2 and 3 record transfers and barriers outside the render pass.

use std::sync::Arc;

use crate::backend::{
    CommandBufferHandle, DescriptorSetHandle, FenceHandle, GpuBackend, ImageViewHandle,
    RenderPassBegin, RenderPassHandle, SamplerHandle,
};
use crate::config::RendererConfig;
use crate::descriptor::DescriptorCache;
use crate::draw::{CallbackContext, DrawData};
use crate::error::{GraphicsError, GraphicsResult};
use crate::program::DrawingProgram;
use crate::texture::{TextureId, TextureManager, TextureUpload};
use crate::types::{Extent2d, ImageLayout};
use crate::viewport::{
    FrameContext, FrameOutcome, SkipReason, SurfaceFactory, ViewportId, ViewportManager,
    WindowHandle,
};

struct RenderPass {
    backend: Arc<dyn GpuBackend>,
    handle: RenderPassHandle,
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.backend.destroy_render_pass(self.handle);
    }
}

/// Renders UI draw data onto one or more windows.
pub struct Renderer {
    // Field order is release order after `shutdown`.
    viewports: ViewportManager,
    descriptors: DescriptorCache,
    textures: TextureManager,
    program: DrawingProgram,
    render_pass: RenderPass,
    config: RendererConfig,
    backend: Arc<dyn GpuBackend>,
    shut_down: bool,
}

impl Renderer {
    /// Create a renderer and the main viewport.
    ///
    /// `build_program` receives the render pass all viewports draw with and
    /// returns the compiled drawing program.
    pub fn new<P>(
        backend: Arc<dyn GpuBackend>,
        config: RendererConfig,
        surface_factory: SurfaceFactory,
        main_window: WindowHandle,
        main_size: Extent2d,
        build_program: P,
    ) -> GraphicsResult<Self>
    where
        P: FnOnce(&Arc<dyn GpuBackend>, RenderPassHandle) -> GraphicsResult<DrawingProgram>,
    {
        log::info!(
            "Creating UI renderer on {} ({:?}, {:?})",
            backend.name(),
            config.color_format,
            config.present_mode
        );
        let render_pass = RenderPass {
            handle: backend.create_render_pass(config.color_format)?,
            backend: Arc::clone(&backend),
        };
        let program = build_program(&backend, render_pass.handle)?;
        let textures = TextureManager::new(&backend)?;
        let descriptors = DescriptorCache::new(&backend, program.set_layout());
        let viewports = ViewportManager::new(
            &backend,
            config.clone(),
            render_pass.handle,
            surface_factory,
            main_window,
            main_size,
        )?;
        Ok(Self {
            viewports,
            descriptors,
            textures,
            program,
            render_pass,
            config,
            backend,
            shut_down: false,
        })
    }

    /// Render `data` onto a viewport.
    pub fn render(&mut self, viewport: ViewportId, data: &DrawData) -> GraphicsResult<FrameOutcome> {
        self.textures.validate_draw_data(data)?;
        if data.framebuffer_extent().is_empty() {
            return Ok(FrameOutcome::Skipped(SkipReason::Empty));
        }

        let vertices = data.vertex_bytes();
        let indices = data.index_bytes();
        let submitted_before = self.submitted_frames(viewport);
        let clear_color = self.config.clear_color;
        let backend = &self.backend;
        let program = &self.program;
        let textures = &mut self.textures;
        let descriptors = &mut self.descriptors;

        let outcome = self.viewports.render_frame(viewport, |frame| {
            textures.fence_completed(frame.slot.fence(), descriptors);
            textures.record_uploads(frame.slot)?;
            frame.slot.upload_geometry(&vertices, &indices)?;

            let pass = DrawPass {
                backend: backend.as_ref(),
                program,
                command_buffer: frame.slot.command_buffer(),
                extent: frame.extent,
                has_geometry: !vertices.is_empty() && !indices.is_empty(),
            };
            backend.cmd_begin_render_pass(
                pass.command_buffer,
                &RenderPassBegin {
                    render_pass: frame.render_pass,
                    framebuffer: frame.framebuffer,
                    extent: frame.extent,
                    clear_color,
                },
            );
            let recorded = pass.record(
                frame,
                data,
                |sampler, view| descriptors.get(sampler, view),
                textures,
            );
            backend.cmd_end_render_pass(pass.command_buffer);
            frame.target.assume_layout(ImageLayout::PresentSrc);
            recorded
        });

        if self.submitted_frames(viewport) > submitted_before {
            let in_flight = self.viewports.in_flight_fences();
            self.textures.commit_uploads(&in_flight);
        } else {
            self.textures.abort_uploads(&mut self.descriptors);
        }
        self.release_textures();
        outcome
    }

    fn submitted_frames(&self, viewport: ViewportId) -> u64 {
        self.viewports
            .get(viewport)
            .map_or(0, |context| context.submitted_frames())
    }

    fn release_textures(&mut self) {
        if self.viewports.take_idle_point() {
            self.textures.flush_retired(&mut self.descriptors);
        } else {
            self.textures.collect_garbage(&mut self.descriptors);
        }
    }

    /// Open a viewport for a new window.
    pub fn create_window(
        &mut self,
        window: WindowHandle,
        size: Extent2d,
    ) -> GraphicsResult<ViewportId> {
        self.viewports.create_window(window, size)
    }

    /// Resize a viewport. A zero-area size minimizes it until the next resize.
    pub fn resize(&mut self, viewport: ViewportId, size: Extent2d) -> GraphicsResult<()> {
        let result = self.viewports.resize(viewport, size);
        self.release_textures();
        result
    }

    /// Close a secondary viewport.
    pub fn destroy_window(&mut self, viewport: ViewportId) -> GraphicsResult<()> {
        let result = self.viewports.destroy_window(viewport);
        self.release_textures();
        result
    }

    /// Queue a texture upload, recorded with the next rendered frame.
    pub fn set_texture(&mut self, id: TextureId, upload: TextureUpload) -> GraphicsResult<()> {
        self.textures.set_texture(id, upload)
    }

    /// Free a texture once frames in flight no longer use it.
    pub fn free_texture(&mut self, id: TextureId) {
        let in_flight: Vec<FenceHandle> = self.viewports.in_flight_fences();
        self.textures.free_texture(id, &in_flight);
        self.textures.collect_garbage(&mut self.descriptors);
    }

    /// Make a caller-owned view and sampler drawable.
    pub fn register_user_texture(
        &mut self,
        view: ImageViewHandle,
        sampler: SamplerHandle,
    ) -> TextureId {
        self.textures.register_user_texture(view, sampler)
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn viewports(&self) -> &ViewportManager {
        &self.viewports
    }

    pub fn textures(&self) -> &TextureManager {
        &self.textures
    }

    pub fn descriptors(&self) -> &DescriptorCache {
        &self.descriptors
    }

    pub fn render_pass(&self) -> RenderPassHandle {
        self.render_pass.handle
    }

    /// Idle-wait and release all viewports, descriptors and textures.
    ///
    /// Called on drop; calling it earlier surfaces errors.
    pub fn shutdown(&mut self) -> GraphicsResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.viewports.shutdown()?;
        self.descriptors.clear();
        self.textures.clear(&mut self.descriptors);
        log::info!("UI renderer shut down");
        Ok(())
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("backend", &self.backend.name())
            .field("viewports", &self.viewports)
            .field("textures", &self.textures)
            .field("descriptors", &self.descriptors)
            .finish()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Failed to shut down renderer: {}", e);
        }
    }
}

/// Records the draw commands of one frame inside the render pass.
struct DrawPass<'a> {
    backend: &'a dyn GpuBackend,
    program: &'a DrawingProgram,
    command_buffer: CommandBufferHandle,
    extent: Extent2d,
    has_geometry: bool,
}

impl DrawPass<'_> {
    /// Bind pipeline, geometry, viewport and projection.
    fn setup_render_state(&self, frame: &FrameContext<'_>, data: &DrawData) {
        let backend = self.backend;
        backend.cmd_bind_program(self.command_buffer, self.program);
        if self.has_geometry {
            let geometry = frame.slot.geometry();
            if let (Some(vertices), Some(indices)) =
                (geometry.vertices().buffer(), geometry.indices().buffer())
            {
                backend.cmd_bind_geometry(self.command_buffer, vertices.handle(), indices.handle());
            }
        }
        backend.cmd_set_viewport(self.command_buffer, self.extent);
        let projection = data.projection();
        backend.cmd_push_constants(
            self.command_buffer,
            self.program,
            bytemuck::cast_slice(&projection),
        );
    }

    fn record<D>(
        &self,
        frame: &mut FrameContext<'_>,
        data: &DrawData,
        mut descriptor: D,
        textures: &TextureManager,
    ) -> GraphicsResult<()>
    where
        D: FnMut(SamplerHandle, ImageViewHandle) -> GraphicsResult<DescriptorSetHandle>,
    {
        self.setup_render_state(frame, data);

        let mut global_vertex = 0u32;
        let mut global_index = 0u32;
        for list in &data.lists {
            for command in &list.commands {
                let scissor = data.scissor(command.clip_rect, self.extent);
                if let Some(callback) = &command.callback {
                    callback(&mut CallbackContext {
                        backend: self.backend,
                        command_buffer: self.command_buffer,
                        viewport: frame.viewport,
                        scissor,
                        framebuffer_extent: self.extent,
                    });
                    self.setup_render_state(frame, data);
                    continue;
                }
                let Some(scissor) = scissor else {
                    continue;
                };
                if command.index_count == 0 {
                    continue;
                }

                let (sampler, view) = textures.resolve(command.texture_id).ok_or_else(|| {
                    GraphicsError::InvalidParameter(format!(
                        "draw command references unknown texture {:?}",
                        command.texture_id
                    ))
                })?;
                let set = descriptor(sampler, view)?;
                self.backend
                    .cmd_bind_descriptor_set(self.command_buffer, self.program, set);
                self.backend.cmd_set_scissor(self.command_buffer, scissor);
                self.backend.cmd_draw_indexed(
                    self.command_buffer,
                    command.index_count,
                    command.index_offset + global_index,
                    (command.vertex_offset + global_vertex) as i32,
                );
            }
            global_index += list.indices.len() as u32;
            global_vertex += list.vertices.len() as u32;
        }
        Ok(())
    }
}
