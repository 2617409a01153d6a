//! Compiled drawing program.
//!
//! Shaders and pipelines are built outside this crate. The renderer only
//! needs the resulting handles and the push constant layout to bind them.

use std::sync::Arc;

use crate::backend::{DescriptorSetLayoutHandle, GpuBackend, PipelineHandle, PipelineLayoutHandle};

/// Size in bytes of the projection push constant block (`scale: vec2, translate: vec2`).
pub const PROJECTION_PUSH_CONSTANT_SIZE: u32 = 16;

/// Destroys the program's handles when the program is dropped.
pub type ProgramDestructor = Box<dyn FnOnce(&dyn GpuBackend) + Send + Sync>;

/// Opaque pipeline, pipeline layout and descriptor set layout for UI drawing.
///
/// The pipeline must consume [`DrawVertex`](crate::DrawVertex) at binding 0,
/// a combined image sampler at set 0 binding 0, and the projection push
/// constants at offset 0 in the vertex stage.
pub struct DrawingProgram {
    pipeline: PipelineHandle,
    pipeline_layout: PipelineLayoutHandle,
    set_layout: DescriptorSetLayoutHandle,
    destroy: Option<(Arc<dyn GpuBackend>, ProgramDestructor)>,
}

impl DrawingProgram {
    /// Wrap handles whose lifetime is managed elsewhere.
    pub fn new(
        pipeline: PipelineHandle,
        pipeline_layout: PipelineLayoutHandle,
        set_layout: DescriptorSetLayoutHandle,
    ) -> Self {
        Self {
            pipeline,
            pipeline_layout,
            set_layout,
            destroy: None,
        }
    }

    /// Take ownership of the handles, running `destroy` when dropped.
    pub fn with_destructor(mut self, backend: Arc<dyn GpuBackend>, destroy: ProgramDestructor) -> Self {
        self.destroy = Some((backend, destroy));
        self
    }

    pub fn pipeline(&self) -> PipelineHandle {
        self.pipeline
    }

    pub fn pipeline_layout(&self) -> PipelineLayoutHandle {
        self.pipeline_layout
    }

    pub fn set_layout(&self) -> DescriptorSetLayoutHandle {
        self.set_layout
    }
}

impl std::fmt::Debug for DrawingProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawingProgram")
            .field("pipeline", &self.pipeline)
            .field("pipeline_layout", &self.pipeline_layout)
            .field("set_layout", &self.set_layout)
            .field("owned", &self.destroy.is_some())
            .finish()
    }
}

impl Drop for DrawingProgram {
    fn drop(&mut self) {
        if let Some((backend, destroy)) = self.destroy.take() {
            destroy(backend.as_ref());
        }
    }
}
