//! Growable vertex and index storage.
//!
//! Each frame ring slot owns one [`DynamicGeometryBuffer`], so the buffers the
//! GPU reads for frame N-1 are never touched while frame N is recorded.
//! Capacities only grow. Growing replaces the buffer, which is only legal
//! once the owning slot's fence has been waited on; the frame ring hands out
//! mutable access to the geometry only in that state.

use std::sync::Arc;

use crate::backend::{BufferBarrier, CommandBufferHandle, GpuBackend};
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{AccessFlags, BufferDescriptor, BufferUsage, PipelineStages};

use super::{Buffer, GEOMETRY_ALIGNMENT, align_up};

/// One device-local store with monotonically growing capacity.
pub struct GeometryStore {
    backend: Arc<dyn GpuBackend>,
    label: &'static str,
    usage: BufferUsage,
    read_access: AccessFlags,
    buffer: Option<Buffer>,
    /// Bytes written by the last upload.
    used: u64,
}

impl GeometryStore {
    fn new(
        backend: &Arc<dyn GpuBackend>,
        label: &'static str,
        usage: BufferUsage,
        read_access: AccessFlags,
    ) -> Self {
        Self {
            backend: Arc::clone(backend),
            label,
            usage,
            read_access,
            buffer: None,
            used: 0,
        }
    }

    /// Current capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.buffer.as_ref().map_or(0, Buffer::size)
    }

    /// Bytes written by the last upload.
    pub fn used(&self) -> u64 {
        self.used
    }

    /// The backing buffer, if any capacity has been allocated.
    pub fn buffer(&self) -> Option<&Buffer> {
        self.buffer.as_ref()
    }

    /// Make room for at least `required` bytes.
    ///
    /// No-op when the capacity already suffices. Otherwise the old buffer is
    /// destroyed and a new one of `required` bytes rounded up to
    /// [`GEOMETRY_ALIGNMENT`] is allocated. Failure is always reported as
    /// [`GraphicsError::AllocationFailure`].
    pub fn ensure_capacity(&mut self, required: u64) -> GraphicsResult<()> {
        if required == 0 || self.capacity() >= required {
            return Ok(());
        }
        let new_capacity = align_up(required, GEOMETRY_ALIGNMENT);
        log::debug!(
            "Growing {} store from {} to {} bytes",
            self.label,
            self.capacity(),
            new_capacity
        );

        self.buffer = None;
        self.used = 0;
        let descriptor = BufferDescriptor::new(new_capacity, self.usage | BufferUsage::COPY_DST)
            .with_label(self.label);
        let buffer = Buffer::new(&self.backend, &descriptor).map_err(|e| match e {
            GraphicsError::AllocationFailure(_) => e,
            other => GraphicsError::AllocationFailure(format!(
                "growing {} store to {new_capacity} bytes: {other}",
                self.label
            )),
        })?;
        self.buffer = Some(buffer);
        Ok(())
    }

    /// Stage `data` and record a copy into the store.
    ///
    /// Returns the staging buffer, which must outlive the GPU's execution of
    /// `command_buffer`.
    fn upload(
        &mut self,
        command_buffer: CommandBufferHandle,
        data: &[u8],
    ) -> GraphicsResult<Option<Buffer>> {
        if data.is_empty() {
            self.used = 0;
            return Ok(None);
        }
        let size = data.len() as u64;
        self.ensure_capacity(size)?;
        let staging = Buffer::staging(&self.backend, data).map_err(|e| match e {
            GraphicsError::AllocationFailure(_) => e,
            other => GraphicsError::AllocationFailure(format!(
                "staging {size} bytes for {} store: {other}",
                self.label
            )),
        })?;
        let Some(target) = self.buffer.as_ref() else {
            return Err(GraphicsError::Internal(format!(
                "{} store has no buffer after growth",
                self.label
            )));
        };

        self.backend
            .cmd_copy_buffer(command_buffer, staging.handle(), target.handle(), size);
        self.backend.cmd_buffer_barrier(
            command_buffer,
            &BufferBarrier {
                buffer: target.handle(),
                src_access: AccessFlags::TRANSFER_WRITE,
                dst_access: self.read_access,
                src_stage: PipelineStages::TRANSFER,
                dst_stage: PipelineStages::VERTEX_INPUT,
            },
        );
        self.used = size;
        Ok(Some(staging))
    }
}

impl std::fmt::Debug for GeometryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeometryStore")
            .field("label", &self.label)
            .field("capacity", &self.capacity())
            .field("used", &self.used)
            .finish()
    }
}

/// Vertex store plus index store.
#[derive(Debug)]
pub struct DynamicGeometryBuffer {
    vertices: GeometryStore,
    indices: GeometryStore,
}

impl DynamicGeometryBuffer {
    /// Create a geometry buffer with the given initial capacities in bytes.
    pub fn new(
        backend: &Arc<dyn GpuBackend>,
        vertex_capacity: u64,
        index_capacity: u64,
    ) -> GraphicsResult<Self> {
        let mut geometry = Self {
            vertices: GeometryStore::new(
                backend,
                "ui vertices",
                BufferUsage::VERTEX,
                AccessFlags::VERTEX_ATTRIBUTE_READ,
            ),
            indices: GeometryStore::new(
                backend,
                "ui indices",
                BufferUsage::INDEX,
                AccessFlags::INDEX_READ,
            ),
        };
        geometry.vertices.ensure_capacity(vertex_capacity)?;
        geometry.indices.ensure_capacity(index_capacity)?;
        Ok(geometry)
    }

    pub fn vertices(&self) -> &GeometryStore {
        &self.vertices
    }

    pub fn indices(&self) -> &GeometryStore {
        &self.indices
    }

    pub fn vertices_mut(&mut self) -> &mut GeometryStore {
        &mut self.vertices
    }

    pub fn indices_mut(&mut self) -> &mut GeometryStore {
        &mut self.indices
    }

    /// Upload a frame's vertex and index bytes.
    ///
    /// Staging buffers are pushed onto `retired` and must be kept alive until
    /// the GPU has finished with `command_buffer`.
    pub fn upload(
        &mut self,
        command_buffer: CommandBufferHandle,
        vertices: &[u8],
        indices: &[u8],
        retired: &mut Vec<Buffer>,
    ) -> GraphicsResult<()> {
        retired.extend(self.vertices.upload(command_buffer, vertices)?);
        retired.extend(self.indices.upload(command_buffer, indices)?);
        Ok(())
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, RecordedCommand};

    fn backend() -> (Arc<DummyBackend>, Arc<dyn GpuBackend>) {
        let dummy = Arc::new(DummyBackend::new());
        let backend: Arc<dyn GpuBackend> = dummy.clone();
        (dummy, backend)
    }

    #[test]
    fn test_capacity_never_shrinks() {
        let (_dummy, backend) = backend();
        let mut geometry = DynamicGeometryBuffer::new(&backend, 0, 0).unwrap();
        let store = geometry.vertices_mut();

        for required in [1000, 50000, 1000] {
            store.ensure_capacity(required).unwrap();
        }

        assert!(store.capacity() >= 50000);
        assert_eq!(store.capacity() % GEOMETRY_ALIGNMENT, 0);
    }

    #[test]
    fn test_growth_replaces_buffer() {
        let (dummy, backend) = backend();
        let mut geometry = DynamicGeometryBuffer::new(&backend, 256, 256).unwrap();
        assert_eq!(dummy.live_handles().buffers, 2);

        geometry.vertices_mut().ensure_capacity(4096).unwrap();
        assert_eq!(dummy.live_handles().buffers, 2);
        assert_eq!(geometry.vertices().capacity(), 4096);

        geometry.vertices_mut().ensure_capacity(100).unwrap();
        assert_eq!(geometry.vertices().capacity(), 4096);
    }

    #[test]
    fn test_growth_failure_is_allocation_failure() {
        let (dummy, backend) = backend();
        let mut geometry = DynamicGeometryBuffer::new(&backend, 256, 256).unwrap();
        dummy.set_memory_budget(Some(1024));

        let result = geometry.indices_mut().ensure_capacity(1 << 20);
        assert!(matches!(result, Err(GraphicsError::AllocationFailure(_))));
    }

    #[test]
    fn test_upload_records_copy_and_barrier() {
        let (dummy, backend) = backend();
        let cmd = backend.allocate_command_buffer().unwrap();
        backend.begin_command_buffer(cmd).unwrap();
        let mut geometry = DynamicGeometryBuffer::new(&backend, 0, 0).unwrap();
        let mut retired = Vec::new();

        geometry
            .upload(cmd, &[1u8; 300], &[2u8; 12], &mut retired)
            .unwrap();

        assert_eq!(retired.len(), 2);
        assert_eq!(geometry.vertices().used(), 300);
        assert_eq!(geometry.vertices().capacity(), 512);
        let commands = dummy.recorded_commands(cmd);
        assert!(matches!(
            commands[0],
            RecordedCommand::CopyBuffer { size: 300, .. }
        ));
        let RecordedCommand::BufferBarrier(barrier) = &commands[1] else {
            panic!("expected buffer barrier");
        };
        assert_eq!(barrier.dst_access, AccessFlags::VERTEX_ATTRIBUTE_READ);
        assert_eq!(
            dummy.buffer_contents(retired[1].handle()),
            Some(vec![2u8; 12])
        );
    }
}
