//! Owned GPU buffer.

use std::sync::Arc;

use crate::backend::{BufferHandle, GpuBackend};
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{BufferDescriptor, BufferUsage, MemoryLocation};

/// A GPU buffer and its memory, released on drop.
pub struct Buffer {
    backend: Arc<dyn GpuBackend>,
    handle: BufferHandle,
    size: u64,
    usage: BufferUsage,
    location: MemoryLocation,
}

impl Buffer {
    /// Create a buffer.
    pub fn new(backend: &Arc<dyn GpuBackend>, descriptor: &BufferDescriptor) -> GraphicsResult<Self> {
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size must be greater than zero".to_string(),
            ));
        }
        let handle = backend.create_buffer(descriptor)?;
        Ok(Self {
            backend: Arc::clone(backend),
            handle,
            size: descriptor.size,
            usage: descriptor.usage,
            location: descriptor.location,
        })
    }

    /// Create a host-visible staging buffer holding a copy of `data`.
    pub fn staging(backend: &Arc<dyn GpuBackend>, data: &[u8]) -> GraphicsResult<Self> {
        let buffer = Self::new(backend, &BufferDescriptor::staging(data.len() as u64))?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Write into a host-visible buffer.
    pub fn write(&self, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        if self.location != MemoryLocation::HostVisible {
            return Err(GraphicsError::ResourceMisuse(
                "cannot write to a device-local buffer from the CPU".to_string(),
            ));
        }
        self.backend.write_buffer(self.handle, offset, data)
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.handle)
            .field("size", &self.size)
            .field("usage", &self.usage)
            .field("location", &self.location)
            .finish()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.backend.destroy_buffer(self.handle);
    }
}
